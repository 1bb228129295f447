use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::core::expr::*;
use crate::core::import::*;

// This file consumes the parse tree generated by pest and turns it into
// our own AST. Operator rules are layered in the grammar itself, so each
// level folds left-associatively over its children.

#[derive(Parser)]
#[grammar = "tarn.pest"]
struct TarnParser;

pub type ParseError = pest::error::Error<Rule>;

pub type ParseResult<T> = Result<T, ParseError>;

impl Builtin {
    pub fn parse(s: &str) -> Option<Self> {
        use Builtin::*;
        match s {
            "Bool" => Some(Bool),
            "Integer" => Some(Integer),
            "Text" => Some(Text),
            "List" => Some(List),
            _ => None,
        }
    }
}

impl Const {
    pub fn parse(s: &str) -> Option<Self> {
        use Const::*;
        match s {
            "Type" => Some(Type),
            "Kind" => Some(Kind),
            "Sort" => Some(Sort),
            _ => None,
        }
    }
}

fn custom_parse_error(pair: &Pair<Rule>, msg: String) -> ParseError {
    let e = pest::error::ErrorVariant::CustomError { message: msg };
    ParseError::new_from_span(e, pair.as_span())
}

/// Parse a complete expression; leading/trailing whitespace is allowed but
/// the whole input must be consumed.
pub fn parse_expr(s: &str) -> ParseResult<Expr> {
    let mut pairs = TarnParser::parse(Rule::final_expression, s)?;
    // The grammar guarantees exactly one final_expression wrapping one
    // expression, so the unwraps below cannot fail.
    let whole = pairs.next().unwrap();
    expression(whole.into_inner().next().unwrap())
}

fn first_inner(pair: Pair<Rule>) -> Pair<Rule> {
    pair.into_inner().next().unwrap()
}

fn label(pair: Pair<Rule>) -> Label {
    pair.as_str().into()
}

fn expression(pair: Pair<Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expression
        | Rule::import_expression
        | Rule::paren_expression => expression(first_inner(pair)),
        Rule::primary_expression => primary(first_inner(pair)),
        Rule::lambda_expression => {
            let (x, t, b) = binder(pair)?;
            Ok(Expr::Lam(x, t.boxed(), b.boxed()))
        }
        Rule::forall_expression => {
            let (x, t, b) = binder(pair)?;
            Ok(Expr::Pi(x, t.boxed(), b.boxed()))
        }
        Rule::let_expression => {
            let mut bindings = Vec::new();
            let mut body = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::let_binding => bindings.push(let_binding(p)?),
                    _ => body = Some(expression(p)?),
                }
            }
            let mut expr = body.unwrap();
            for (x, t, v) in bindings.into_iter().rev() {
                expr =
                    Expr::Let(x, t.map(Expr::boxed), v.boxed(), expr.boxed());
            }
            Ok(expr)
        }
        Rule::annotated_expression => {
            let mut inner = pair.into_inner();
            let base = expression(inner.next().unwrap())?;
            match inner.next() {
                None => Ok(base),
                Some(tail) => {
                    let rule = tail.as_rule();
                    let rhs = expression(first_inner(tail))?;
                    Ok(match rule {
                        Rule::arrow_tail => {
                            Expr::Pi("_".into(), base.boxed(), rhs.boxed())
                        }
                        _ => Expr::Annot(base.boxed(), rhs.boxed()),
                    })
                }
            }
        }
        Rule::import_alt_expression => binop_level(pair, BinOp::ImportAlt),
        Rule::or_expression => binop_level(pair, BinOp::BoolOr),
        Rule::plus_expression => binop_level(pair, BinOp::IntegerAdd),
        Rule::text_append_expression => binop_level(pair, BinOp::TextAppend),
        Rule::list_append_expression => binop_level(pair, BinOp::ListAppend),
        Rule::and_expression => binop_level(pair, BinOp::BoolAnd),
        Rule::equal_expression => binop_level(pair, BinOp::BoolEQ),
        Rule::not_equal_expression => binop_level(pair, BinOp::BoolNE),
        Rule::application_expression => {
            let mut inner = pair.into_inner();
            let mut acc = expression(inner.next().unwrap())?;
            for p in inner {
                acc = Expr::App(acc.boxed(), expression(p)?.boxed());
            }
            Ok(acc)
        }
        Rule::selector_expression => {
            let mut inner = pair.into_inner();
            let mut acc = expression(inner.next().unwrap())?;
            for p in inner {
                acc = Expr::Field(acc.boxed(), label(p));
            }
            Ok(acc)
        }
        Rule::import => import(pair),
        r => unreachable!("expression: unexpected rule {:?}", r),
    }
}

fn binder(pair: Pair<Rule>) -> ParseResult<(Label, Expr, Expr)> {
    let mut inner = pair.into_inner();
    let x = label(inner.next().unwrap());
    let t = expression(inner.next().unwrap())?;
    let b = expression(inner.next().unwrap())?;
    Ok((x, t, b))
}

fn let_binding(
    pair: Pair<Rule>,
) -> ParseResult<(Label, Option<Expr>, Expr)> {
    let mut inner = pair.into_inner();
    let x = label(inner.next().unwrap());
    let mut exprs = inner
        .map(expression)
        .collect::<ParseResult<Vec<_>>>()?;
    let value = exprs.pop().unwrap();
    let annot = exprs.pop();
    Ok((x, annot, value))
}

fn binop_level(pair: Pair<Rule>, op: BinOp) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let mut acc = expression(inner.next().unwrap())?;
    for p in inner {
        acc = Expr::BinOp(op, acc.boxed(), expression(p)?.boxed());
    }
    Ok(acc)
}

fn primary(pair: Pair<Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::text_literal => Ok(Expr::TextLit(text_literal(pair))),
        Rule::integer_literal => match pair.as_str().parse::<i64>() {
            Ok(n) => Ok(Expr::IntegerLit(n)),
            Err(e) => Err(custom_parse_error(
                &pair,
                format!("invalid integer literal: {e}"),
            )),
        },
        Rule::empty_list_literal => {
            Ok(Expr::EmptyListLit(expression(first_inner(pair))?.boxed()))
        }
        Rule::non_empty_list_literal => Ok(Expr::NEListLit(
            pair.into_inner()
                .map(expression)
                .collect::<ParseResult<_>>()?,
        )),
        Rule::record_literal => record(pair, Expr::RecordLit),
        Rule::record_type => record(pair, Expr::RecordType),
        Rule::paren_expression => expression(first_inner(pair)),
        Rule::identifier => identifier(pair),
        r => unreachable!("primary: unexpected rule {:?}", r),
    }
}

fn record(
    pair: Pair<Rule>,
    build: impl FnOnce(BTreeMap<Label, Expr>) -> Expr,
) -> ParseResult<Expr> {
    let mut map = BTreeMap::new();
    for entry in pair.clone().into_inner() {
        let mut inner = entry.into_inner();
        let k = label(inner.next().unwrap());
        let v = expression(inner.next().unwrap())?;
        if map.contains_key(&k) {
            return Err(custom_parse_error(
                &pair,
                format!("duplicate field `{}`", k.as_str()),
            ));
        }
        map.insert(k, v);
    }
    Ok(build(map))
}

fn identifier(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str();
    let index = match inner.next() {
        Some(p) => match p.as_str().parse::<usize>() {
            Ok(n) => Some(n),
            Err(e) => {
                return Err(custom_parse_error(
                    &p,
                    format!("invalid variable index: {e}"),
                ))
            }
        },
        None => None,
    };
    Ok(match index {
        Some(n) => Expr::Var(V(name.into(), n)),
        None => {
            if let Some(c) = Const::parse(name) {
                Expr::Const(c)
            } else if let Some(b) = Builtin::parse(name) {
                Expr::Builtin(b)
            } else if name == "True" {
                Expr::BoolLit(true)
            } else if name == "False" {
                Expr::BoolLit(false)
            } else {
                Expr::Var(V(name.into(), 0))
            }
        }
    })
}

fn text_literal(pair: Pair<Rule>) -> String {
    let mut s = String::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::text_chars => s.push_str(p.as_str()),
            Rule::text_escape => s.push(match &p.as_str()[1..] {
                "\"" => '"',
                "\\" => '\\',
                "/" => '/',
                "n" => '\n',
                "t" => '\t',
                _ => '\r',
            }),
            r => unreachable!("text_literal: unexpected rule {:?}", r),
        }
    }
    s
}

fn import(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let hashed = inner.next().unwrap();
    let mode = match inner.next() {
        Some(_) => ImportMode::RawText,
        None => ImportMode::Code,
    };
    let mut inner = hashed.into_inner();
    let ty = inner.next().unwrap();
    let hash = inner.next().map(|p| digest(&p)).transpose()?;
    let location = import_type(ty)?;
    Ok(Expr::Import(Import {
        mode,
        location,
        hash,
    }))
}

fn digest(pair: &Pair<Rule>) -> ParseResult<Hash> {
    let digits = &pair.as_str()["sha256:".len()..];
    match hex::decode(digits) {
        Ok(bytes) => Ok(Hash::SHA256(bytes)),
        Err(e) => Err(custom_parse_error(
            pair,
            format!("invalid sha256 digest: {e}"),
        )),
    }
}

fn import_type(pair: Pair<Rule>) -> ParseResult<ImportLocation> {
    let p = first_inner(pair);
    match p.as_rule() {
        Rule::missing_keyword => Ok(ImportLocation::Missing),
        Rule::env => {
            Ok(ImportLocation::Env(first_inner(p).as_str().to_owned()))
        }
        Rule::http => http(p),
        Rule::local => local(p),
        r => unreachable!("import_type: unexpected rule {:?}", r),
    }
}

fn local(pair: Pair<Rule>) -> ParseResult<ImportLocation> {
    let p = first_inner(pair);
    let prefix = match p.as_rule() {
        Rule::parent_path => FilePrefix::Parent,
        Rule::here_path => FilePrefix::Here,
        Rule::home_path => FilePrefix::Home,
        _ => FilePrefix::Absolute,
    };
    let components = p
        .into_inner()
        .map(|c| c.as_str()[1..].to_owned())
        .collect();
    Ok(ImportLocation::Local(prefix, file_of(components)))
}

fn file_of(mut components: Vec<String>) -> File {
    let file = components.pop().unwrap_or_default();
    File {
        directory: Directory { components },
        file,
    }
}

fn http(pair: Pair<Rule>) -> ParseResult<ImportLocation> {
    let mut inner = pair.into_inner();
    let raw = inner.next().unwrap();
    let headers = inner
        .next()
        .map(|p| expression(p).map(Expr::boxed))
        .transpose()?;
    let mut scheme = Scheme::HTTPS;
    let mut authority = String::new();
    let mut components = Vec::new();
    let mut query = None;
    let mut fragment = None;
    for p in raw.into_inner() {
        match p.as_rule() {
            Rule::scheme => {
                scheme = match p.as_str() {
                    "http" => Scheme::HTTP,
                    _ => Scheme::HTTPS,
                }
            }
            Rule::authority => authority = p.as_str().to_owned(),
            Rule::url_path => {
                components = p
                    .into_inner()
                    .map(|c| {
                        percent_decode_str(&c.as_str()[1..])
                            .decode_utf8_lossy()
                            .into_owned()
                    })
                    .collect()
            }
            Rule::query => query = Some(p.as_str().to_owned()),
            Rule::url_fragment => fragment = Some(p.as_str().to_owned()),
            r => unreachable!("http: unexpected rule {:?}", r),
        }
    }
    Ok(ImportLocation::Remote(URL {
        scheme,
        authority,
        path: file_of(components),
        query,
        fragment,
        headers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn var(x: &str) -> Expr {
        Expr::Var(V(x.into(), 0))
    }

    fn here_import(components: &[&str]) -> Import {
        Import {
            mode: ImportMode::Code,
            location: ImportLocation::Local(
                FilePrefix::Here,
                file_of(components.iter().map(|c| (*c).to_owned()).collect()),
            ),
            hash: None,
        }
    }

    #[test]
    fn parses_lambda_and_application() {
        let e = parse_expr("λ(a : Type) → λ(x : a) → x").unwrap();
        assert_eq!(
            e,
            Expr::Lam(
                "a".into(),
                Expr::Const(Const::Type).boxed(),
                Expr::Lam("x".into(), var("a").boxed(), var("x").boxed())
                    .boxed(),
            )
        );

        let e = parse_expr("./id Bool True").unwrap();
        assert_eq!(
            e,
            Expr::App(
                Expr::App(
                    Expr::Import(here_import(&["id"])).boxed(),
                    Expr::Builtin(Builtin::Bool).boxed(),
                )
                .boxed(),
                Expr::BoolLit(true).boxed(),
            )
        );
    }

    #[test]
    fn parses_ascii_spellings() {
        assert_eq!(
            parse_expr("\\(x : Bool) -> x").unwrap(),
            parse_expr("λ(x : Bool) → x").unwrap()
        );
        assert_eq!(
            parse_expr("forall (x : Bool) -> Bool").unwrap(),
            parse_expr("∀(x : Bool) → Bool").unwrap()
        );
    }

    #[test]
    fn parses_arrow_as_anonymous_pi() {
        assert_eq!(
            parse_expr("Bool → Bool").unwrap(),
            Expr::Pi(
                "_".into(),
                Expr::Builtin(Builtin::Bool).boxed(),
                Expr::Builtin(Builtin::Bool).boxed(),
            )
        );
    }

    #[test]
    fn parses_let_bindings() {
        let e = parse_expr("let x = 1 let y : Integer = 2 in x + y").unwrap();
        assert_eq!(
            e,
            Expr::Let(
                "x".into(),
                None,
                Expr::IntegerLit(1).boxed(),
                Expr::Let(
                    "y".into(),
                    Some(Expr::Builtin(Builtin::Integer).boxed()),
                    Expr::IntegerLit(2).boxed(),
                    Expr::BinOp(
                        BinOp::IntegerAdd,
                        var("x").boxed(),
                        var("y").boxed(),
                    )
                    .boxed(),
                )
                .boxed(),
            )
        );
    }

    #[test]
    fn operators_associate_left() {
        let e = parse_expr("a && b && c").unwrap();
        assert_eq!(
            e,
            Expr::BinOp(
                BinOp::BoolAnd,
                Expr::BinOp(BinOp::BoolAnd, var("a").boxed(), var("b").boxed())
                    .boxed(),
                var("c").boxed(),
            )
        );
    }

    #[test]
    fn alternative_binds_loosest() {
        let e = parse_expr("missing ? env:NOPE ? ./does-not-exist").unwrap();
        let Expr::BinOp(BinOp::ImportAlt, l, _) = e else {
            panic!("expected import alternative");
        };
        assert!(matches!(*l, Expr::BinOp(BinOp::ImportAlt, _, _)));
    }

    #[test]
    fn parses_every_locator_form() {
        for (src, local) in [
            ("./foo/bar", true),
            ("../sibling", true),
            ("/etc/config", true),
            ("~/in-home", true),
            ("env:HOME_DIR", true),
            ("missing", true),
            ("https://example.com/pkg/a", false),
        ] {
            let e = parse_expr(src).unwrap();
            let Expr::Import(import) = e else {
                panic!("{src} should parse as an import");
            };
            assert_eq!(import.is_local(), local, "{src}");
        }
    }

    #[test]
    fn parses_hash_mode_and_headers() {
        let digest = "aa".repeat(32);
        let e = parse_expr(&format!("./pkg/render sha256:{digest} as Text"))
            .unwrap();
        let Expr::Import(import) = e else {
            panic!("expected import");
        };
        assert_eq!(import.mode, ImportMode::RawText);
        assert_eq!(import.hash, Some(Hash::SHA256(vec![0xaa; 32])));

        let e = parse_expr("https://example.com/x using ./headers").unwrap();
        let Expr::Import(import) = e else {
            panic!("expected import");
        };
        let ImportLocation::Remote(url) = import.location else {
            panic!("expected remote import");
        };
        assert_eq!(
            *url.headers.unwrap(),
            Expr::Import(here_import(&["headers"]))
        );
    }

    #[test]
    fn parses_records_and_lists() {
        let e = parse_expr(r#"{ foo = env:FOO, bar = "Hi" }"#).unwrap();
        let Expr::RecordLit(m) = e else {
            panic!("expected record literal");
        };
        assert_eq!(m.len(), 2);

        assert_eq!(
            parse_expr("[1, 2]").unwrap(),
            Expr::NEListLit(vec![Expr::IntegerLit(1), Expr::IntegerLit(2)])
        );
        let e = parse_expr("[] : List Integer").unwrap();
        assert!(matches!(e, Expr::EmptyListLit(_)));

        assert_eq!(parse_expr("{=}").unwrap(), Expr::RecordLit(BTreeMap::new()));
        assert_eq!(parse_expr("{}").unwrap(), Expr::RecordType(BTreeMap::new()));
    }

    #[test]
    fn parses_text_escapes_and_comments() {
        assert_eq!(
            parse_expr(r#""a\"b\n" -- trailing note"#).unwrap(),
            Expr::TextLit("a\"b\n".to_owned())
        );
    }

    #[test]
    fn rejects_garbage_after_expression() {
        assert!(parse_expr("1 )").is_err());
        assert!(parse_expr("").is_err());
    }
}
