use std::fmt;

use itertools::Itertools;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::core::expr::*;
use crate::core::import::*;

// Precedence levels, loosest first. Binders, annotations and arrows sit at
// the bottom; selectors and atoms at the top.
const PREC_EXPR: u8 = 0;
const PREC_OP_BASE: u8 = 1;
const PREC_APP: u8 = 9;
const PREC_SELECT: u8 = 10;
const PREC_ATOM: u8 = 11;

fn op_symbol(op: BinOp) -> &'static str {
    use BinOp::*;
    match op {
        ImportAlt => "?",
        BoolOr => "||",
        IntegerAdd => "+",
        TextAppend => "++",
        ListAppend => "#",
        BoolAnd => "&&",
        BoolEQ => "==",
        BoolNE => "!=",
    }
}

fn op_prec(op: BinOp) -> u8 {
    use BinOp::*;
    PREC_OP_BASE
        + match op {
            ImportAlt => 0,
            BoolOr => 1,
            IntegerAdd => 2,
            TextAppend => 3,
            ListAppend => 4,
            BoolAnd => 5,
            BoolEQ => 6,
            BoolNE => 7,
        }
}

fn expr_prec(expr: &Expr) -> u8 {
    use Expr::*;
    match expr {
        Lam(..) | Pi(..) | Let(..) | Annot(..) | EmptyListLit(_) => PREC_EXPR,
        BinOp(op, ..) => op_prec(*op),
        App(..) => PREC_APP,
        Field(..) => PREC_SELECT,
        _ => PREC_ATOM,
    }
}

fn fmt_expr(f: &mut fmt::Formatter, expr: &Expr, min: u8) -> fmt::Result {
    use Expr::*;
    let prec = expr_prec(expr);
    if prec < min {
        write!(f, "(")?;
    }
    match expr {
        Const(c) => write!(f, "{c}")?,
        Builtin(b) => write!(f, "{b}")?,
        Var(v) => write!(f, "{v}")?,
        Lam(x, t, b) => {
            write!(f, "λ({x} : ")?;
            fmt_expr(f, t, PREC_EXPR)?;
            write!(f, ") → ")?;
            fmt_expr(f, b, PREC_EXPR)?;
        }
        Pi(x, t, b) if x.as_str() == "_" => {
            fmt_expr(f, t, PREC_OP_BASE)?;
            write!(f, " → ")?;
            fmt_expr(f, b, PREC_EXPR)?;
        }
        Pi(x, t, b) => {
            write!(f, "∀({x} : ")?;
            fmt_expr(f, t, PREC_EXPR)?;
            write!(f, ") → ")?;
            fmt_expr(f, b, PREC_EXPR)?;
        }
        App(g, a) => {
            fmt_expr(f, g, PREC_APP)?;
            write!(f, " ")?;
            fmt_expr(f, a, PREC_SELECT)?;
        }
        Let(x, t, v, b) => {
            write!(f, "let {x}")?;
            if let Some(t) = t {
                write!(f, " : ")?;
                fmt_expr(f, t, PREC_EXPR)?;
            }
            write!(f, " = ")?;
            fmt_expr(f, v, PREC_EXPR)?;
            write!(f, " in ")?;
            fmt_expr(f, b, PREC_EXPR)?;
        }
        Annot(e, t) => {
            fmt_expr(f, e, PREC_OP_BASE)?;
            write!(f, " : ")?;
            fmt_expr(f, t, PREC_EXPR)?;
        }
        BoolLit(true) => write!(f, "True")?,
        BoolLit(false) => write!(f, "False")?,
        IntegerLit(n) => write!(f, "{n}")?,
        TextLit(s) => fmt_text(f, s)?,
        BinOp(op, l, r) => {
            let p = op_prec(*op);
            fmt_expr(f, l, p)?;
            write!(f, " {} ", op_symbol(*op))?;
            fmt_expr(f, r, p + 1)?;
        }
        EmptyListLit(t) => {
            write!(f, "[] : ")?;
            fmt_expr(f, t, PREC_APP)?;
        }
        NEListLit(xs) => {
            write!(f, "[")?;
            for (i, x) in xs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                fmt_expr(f, x, PREC_EXPR)?;
            }
            write!(f, "]")?;
        }
        RecordType(m) if m.is_empty() => write!(f, "{{}}")?,
        RecordType(m) => {
            write!(f, "{{ ")?;
            for (i, (k, t)) in m.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k} : ")?;
                fmt_expr(f, t, PREC_EXPR)?;
            }
            write!(f, " }}")?;
        }
        RecordLit(m) if m.is_empty() => write!(f, "{{=}}")?,
        RecordLit(m) => {
            write!(f, "{{ ")?;
            for (i, (k, v)) in m.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k} = ")?;
                fmt_expr(f, v, PREC_EXPR)?;
            }
            write!(f, " }}")?;
        }
        Field(e, k) => {
            fmt_expr(f, e, PREC_SELECT)?;
            write!(f, ".{k}")?;
        }
        Import(i) => write!(f, "{i}")?,
    }
    if prec < min {
        write!(f, ")")?;
    }
    Ok(())
}

fn fmt_text(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_expr(f, self, PREC_EXPR)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for V {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let V(x, n) = self;
        if *n == 0 {
            write!(f, "{x}")
        } else {
            write!(f, "{x}@{n}")
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Const::Type => write!(f, "Type"),
            Const::Kind => write!(f, "Kind"),
            Const::Sort => write!(f, "Sort"),
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Builtin::Bool => write!(f, "Bool"),
            Builtin::Integer => write!(f, "Integer"),
            Builtin::Text => write!(f, "Text"),
            Builtin::List => write!(f, "List"),
        }
    }
}

impl fmt::Display for FilePrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FilePrefix::Absolute => Ok(()),
            FilePrefix::Here => write!(f, "."),
            FilePrefix::Parent => write!(f, ".."),
            FilePrefix::Home => write!(f, "~"),
        }
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for c in &self.directory.components {
            write!(f, "/{c}")?;
        }
        write!(f, "/{}", self.file)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scheme::HTTP => write!(f, "http"),
            Scheme::HTTPS => write!(f, "https"),
        }
    }
}

// Conservative set for URL path segments; everything a terminal or shell
// could misread gets escaped.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

impl fmt::Display for URL {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)?;
        let segments = self
            .path
            .directory
            .components
            .iter()
            .chain(std::iter::once(&self.path.file))
            .filter(|s| !s.is_empty())
            .map(|s| utf8_percent_encode(s.as_str(), PATH_SEGMENT).to_string())
            .join("/");
        if !segments.is_empty() {
            write!(f, "/{segments}")?;
        }
        if let Some(q) = &self.query {
            write!(f, "?{q}")?;
        }
        if let Some(frag) = &self.fragment {
            write!(f, "#{frag}")?;
        }
        if let Some(headers) = &self.headers {
            write!(f, " using ")?;
            match headers.as_ref() {
                Expr::Import(i) => write!(f, "{i}")?,
                e => write!(f, "({e})")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for ImportLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ImportLocation::Local(prefix, file) => {
                write!(f, "{prefix}{file}")
            }
            ImportLocation::Remote(url) => write!(f, "{url}"),
            ImportLocation::Env(name) => write!(f, "env:{name}"),
            ImportLocation::Missing => write!(f, "missing"),
        }
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Hash::SHA256(bytes) = self;
        write!(f, "sha256:{}", hex::encode(bytes))
    }
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.location)?;
        if let Some(hash) = &self.hash {
            write!(f, " {hash}")?;
        }
        if self.mode == ImportMode::RawText {
            write!(f, " as Text")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_imports_in_surface_syntax() {
        for src in [
            "./pkg/render",
            "../sibling",
            "/etc/config",
            "~/in-home",
            "env:FOO",
            "missing",
            "https://example.com/pkg/a",
            "http://example.com",
            "https://example.com/x using ./headers",
        ] {
            assert_eq!(parse_expr(src).unwrap().to_string(), src);
        }
        let digest = "ab".repeat(32);
        let src = format!("./pkg/render sha256:{digest} as Text");
        assert_eq!(parse_expr(&src).unwrap().to_string(), src);
    }

    #[test]
    fn display_round_trips_through_the_parser() {
        for src in [
            "λ(a : Type) → λ(x : a) → x",
            "(λ(a : Type) → λ(x : a) → x) Bool True",
            "{ bar = \"Hi\", baz = λ(x : Bool) → x == False, foo = 1 }",
            "let x = 1 in x + 2",
            "missing ? env:NOPE ? ./does-not-exist",
            "∀(x : Bool) → Bool",
            "[1, 2] # ([] : List Integer)",
            "\"a\\\"b\\n\"",
            "{ header : Text, value : Text }",
        ] {
            let parsed = parse_expr(src).unwrap();
            assert_eq!(parsed.to_string(), src);
            assert_eq!(parse_expr(&parsed.to_string()).unwrap(), parsed);
        }
    }
}
