//! Canonical binary encoding of expressions as CBOR. The encoding is
//! deterministic: record fields are emitted in key order, application
//! spines are flattened, and every optional slot is present (null when
//! empty), so equal expressions always produce equal bytes.

use std::collections::BTreeMap;

use ciborium::value::Value;

use tarn_syntax::{
    BinOp, Builtin, Const, Directory, Expr, File, FilePrefix, Hash, Import,
    ImportLocation, ImportMode, Label, Scheme, URL, V,
};

use crate::error::{DecodeError, EncodeError};

/// Tags the binary encoding variant. Threaded through encoding, decoding,
/// hashing and the integrity cache so a format change stays a local
/// concern.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    V1,
}

pub fn encode(
    version: ProtocolVersion,
    expr: &Expr,
) -> Result<Vec<u8>, EncodeError> {
    match version {
        ProtocolVersion::V1 => {
            let mut bytes = Vec::new();
            ciborium::into_writer(&encode_expr(expr), &mut bytes)
                .map_err(|e| EncodeError::Cbor(e.to_string()))?;
            Ok(bytes)
        }
    }
}

pub fn decode(
    version: ProtocolVersion,
    bytes: &[u8],
) -> Result<Expr, DecodeError> {
    match version {
        ProtocolVersion::V1 => {
            let value: Value = ciborium::from_reader(bytes)
                .map_err(|e| DecodeError::Cbor(e.to_string()))?;
            decode_expr(&value)
        }
    }
}

// Node tags. Variables named `_` are bare integers, other variables
// two-element arrays, constants and builtins strings, booleans booleans.
const TAG_APP: i64 = 0;
const TAG_LAM: i64 = 1;
const TAG_PI: i64 = 2;
const TAG_BINOP: i64 = 3;
const TAG_LIST: i64 = 4;
const TAG_RECORD_TYPE: i64 = 7;
const TAG_RECORD_LIT: i64 = 8;
const TAG_FIELD: i64 = 9;
const TAG_INTEGER: i64 = 16;
const TAG_TEXT: i64 = 18;
const TAG_IMPORT: i64 = 24;
const TAG_LET: i64 = 25;
const TAG_ANNOT: i64 = 26;

fn int(n: i64) -> Value {
    Value::Integer(n.into())
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

fn opt_text(s: &Option<String>) -> Value {
    match s {
        Some(s) => text(s),
        None => Value::Null,
    }
}

fn op_code(op: BinOp) -> i64 {
    use BinOp::*;
    match op {
        BoolOr => 0,
        BoolAnd => 1,
        BoolEQ => 2,
        BoolNE => 3,
        IntegerAdd => 4,
        TextAppend => 5,
        ListAppend => 6,
        ImportAlt => 7,
    }
}

fn op_of_code(code: i64) -> Option<BinOp> {
    use BinOp::*;
    Some(match code {
        0 => BoolOr,
        1 => BoolAnd,
        2 => BoolEQ,
        3 => BoolNE,
        4 => IntegerAdd,
        5 => TextAppend,
        6 => ListAppend,
        7 => ImportAlt,
        _ => return None,
    })
}

fn encode_expr(expr: &Expr) -> Value {
    use Expr::*;
    match expr {
        Var(V(x, n)) if x.as_str() == "_" => int(*n as i64),
        Var(V(x, n)) => {
            Value::Array(vec![text(x.as_str()), int(*n as i64)])
        }
        Const(c) => text(&c.to_string()),
        Builtin(b) => text(&b.to_string()),
        BoolLit(b) => Value::Bool(*b),
        IntegerLit(n) => Value::Array(vec![int(TAG_INTEGER), int(*n)]),
        TextLit(s) => Value::Array(vec![int(TAG_TEXT), text(s)]),
        App(f, a) => {
            let mut args = vec![encode_expr(a)];
            let mut head = f.as_ref();
            while let App(g, b) = head {
                args.push(encode_expr(b));
                head = g.as_ref();
            }
            let mut items = vec![int(TAG_APP), encode_expr(head)];
            items.extend(args.into_iter().rev());
            Value::Array(items)
        }
        Lam(x, t, b) => encode_binder(TAG_LAM, x, t, b),
        Pi(x, t, b) => encode_binder(TAG_PI, x, t, b),
        Let(x, t, v, b) => Value::Array(vec![
            int(TAG_LET),
            text(x.as_str()),
            match t {
                Some(t) => encode_expr(t),
                None => Value::Null,
            },
            encode_expr(v),
            encode_expr(b),
        ]),
        Annot(e, t) => Value::Array(vec![
            int(TAG_ANNOT),
            encode_expr(e),
            encode_expr(t),
        ]),
        BinOp(op, l, r) => Value::Array(vec![
            int(TAG_BINOP),
            int(op_code(*op)),
            encode_expr(l),
            encode_expr(r),
        ]),
        EmptyListLit(t) => {
            Value::Array(vec![int(TAG_LIST), encode_expr(t)])
        }
        NEListLit(xs) => {
            let mut items = vec![int(TAG_LIST), Value::Null];
            items.extend(xs.iter().map(encode_expr));
            Value::Array(items)
        }
        RecordType(m) => {
            Value::Array(vec![int(TAG_RECORD_TYPE), encode_map(m)])
        }
        RecordLit(m) => {
            Value::Array(vec![int(TAG_RECORD_LIT), encode_map(m)])
        }
        Field(e, k) => Value::Array(vec![
            int(TAG_FIELD),
            encode_expr(e),
            text(k.as_str()),
        ]),
        Import(import) => encode_import(import),
    }
}

fn encode_binder(tag: i64, x: &Label, t: &Expr, b: &Expr) -> Value {
    let mut items = vec![int(tag)];
    if x.as_str() != "_" {
        items.push(text(x.as_str()));
    }
    items.push(encode_expr(t));
    items.push(encode_expr(b));
    Value::Array(items)
}

fn encode_map(m: &BTreeMap<Label, Expr>) -> Value {
    Value::Map(
        m.iter()
            .map(|(k, v)| (text(k.as_str()), encode_expr(v)))
            .collect(),
    )
}

fn encode_import(import: &Import) -> Value {
    use ImportLocation::*;
    let mut items = vec![int(TAG_IMPORT)];
    items.push(match &import.hash {
        Some(Hash::SHA256(bytes)) => Value::Bytes(bytes.clone()),
        None => Value::Null,
    });
    items.push(int(match import.mode {
        ImportMode::Code => 0,
        ImportMode::RawText => 1,
    }));
    match &import.location {
        Remote(url) => {
            items.push(int(match url.scheme {
                Scheme::HTTP => 0,
                Scheme::HTTPS => 1,
            }));
            items.push(match &url.headers {
                Some(h) => encode_expr(h),
                None => Value::Null,
            });
            items.push(text(&url.authority));
            for c in &url.path.directory.components {
                items.push(text(c));
            }
            items.push(text(&url.path.file));
            items.push(opt_text(&url.query));
            items.push(opt_text(&url.fragment));
        }
        Local(prefix, file) => {
            items.push(int(match prefix {
                FilePrefix::Absolute => 2,
                FilePrefix::Here => 3,
                FilePrefix::Parent => 4,
                FilePrefix::Home => 5,
            }));
            for c in &file.directory.components {
                items.push(text(c));
            }
            items.push(text(&file.file));
        }
        Env(name) => {
            items.push(int(6));
            items.push(text(name));
        }
        Missing => items.push(int(7)),
    }
    Value::Array(items)
}

fn malformed<T>(what: &str) -> Result<T, DecodeError> {
    Err(DecodeError::Malformed(what.to_owned()))
}

fn as_i64(value: &Value) -> Result<i64, DecodeError> {
    match value {
        Value::Integer(n) => i128::from(*n)
            .try_into()
            .map_err(|_| DecodeError::Malformed("integer overflow".into())),
        _ => malformed("expected an integer"),
    }
}

fn as_text<'a>(value: &'a Value) -> Result<&'a str, DecodeError> {
    match value {
        Value::Text(s) => Ok(s),
        _ => malformed("expected a string"),
    }
}

fn decode_expr(value: &Value) -> Result<Expr, DecodeError> {
    match value {
        Value::Integer(_) => {
            let n = as_i64(value)? as usize;
            Ok(Expr::Var(V("_".into(), n)))
        }
        Value::Bool(b) => Ok(Expr::BoolLit(*b)),
        Value::Text(s) => {
            if let Some(c) = Const::parse(s) {
                Ok(Expr::Const(c))
            } else if let Some(b) = Builtin::parse(s) {
                Ok(Expr::Builtin(b))
            } else {
                malformed("unknown constant")
            }
        }
        Value::Array(items) => decode_array(items),
        _ => malformed("unexpected CBOR value"),
    }
}

fn decode_array(items: &[Value]) -> Result<Expr, DecodeError> {
    if let [Value::Text(x), index] = items {
        let n = as_i64(index)? as usize;
        return Ok(Expr::Var(V(x.as_str().into(), n)));
    }
    let (tag, rest) = match items.split_first() {
        Some((tag, rest)) => (as_i64(tag)?, rest),
        None => return malformed("empty array"),
    };
    match (tag, rest) {
        (TAG_APP, [f, args @ ..]) if !args.is_empty() => {
            let mut acc = decode_expr(f)?;
            for a in args {
                acc = Expr::App(acc.boxed(), decode_expr(a)?.boxed());
            }
            Ok(acc)
        }
        (TAG_LAM, [t, b]) => Ok(Expr::Lam(
            "_".into(),
            decode_expr(t)?.boxed(),
            decode_expr(b)?.boxed(),
        )),
        (TAG_LAM, [x, t, b]) => Ok(Expr::Lam(
            as_text(x)?.into(),
            decode_expr(t)?.boxed(),
            decode_expr(b)?.boxed(),
        )),
        (TAG_PI, [t, b]) => Ok(Expr::Pi(
            "_".into(),
            decode_expr(t)?.boxed(),
            decode_expr(b)?.boxed(),
        )),
        (TAG_PI, [x, t, b]) => Ok(Expr::Pi(
            as_text(x)?.into(),
            decode_expr(t)?.boxed(),
            decode_expr(b)?.boxed(),
        )),
        (TAG_BINOP, [op, l, r]) => {
            let op = op_of_code(as_i64(op)?)
                .ok_or_else(|| DecodeError::Malformed("bad operator".into()))?;
            Ok(Expr::BinOp(
                op,
                decode_expr(l)?.boxed(),
                decode_expr(r)?.boxed(),
            ))
        }
        (TAG_LIST, [Value::Null, xs @ ..]) if !xs.is_empty() => {
            Ok(Expr::NEListLit(
                xs.iter().map(decode_expr).collect::<Result<_, _>>()?,
            ))
        }
        (TAG_LIST, [t]) => Ok(Expr::EmptyListLit(decode_expr(t)?.boxed())),
        (TAG_RECORD_TYPE, [m]) => Ok(Expr::RecordType(decode_map(m)?)),
        (TAG_RECORD_LIT, [m]) => Ok(Expr::RecordLit(decode_map(m)?)),
        (TAG_FIELD, [e, k]) => Ok(Expr::Field(
            decode_expr(e)?.boxed(),
            as_text(k)?.into(),
        )),
        (TAG_INTEGER, [n]) => Ok(Expr::IntegerLit(as_i64(n)?)),
        (TAG_TEXT, [s]) => Ok(Expr::TextLit(as_text(s)?.to_owned())),
        (TAG_LET, [x, t, v, b]) => Ok(Expr::Let(
            as_text(x)?.into(),
            match t {
                Value::Null => None,
                t => Some(decode_expr(t)?.boxed()),
            },
            decode_expr(v)?.boxed(),
            decode_expr(b)?.boxed(),
        )),
        (TAG_ANNOT, [e, t]) => Ok(Expr::Annot(
            decode_expr(e)?.boxed(),
            decode_expr(t)?.boxed(),
        )),
        (TAG_IMPORT, rest) => decode_import(rest),
        _ => malformed("unknown node tag"),
    }
}

fn decode_map(value: &Value) -> Result<BTreeMap<Label, Expr>, DecodeError> {
    let Value::Map(entries) = value else {
        return malformed("expected a map");
    };
    entries
        .iter()
        .map(|(k, v)| Ok((as_text(k)?.into(), decode_expr(v)?)))
        .collect()
}

fn decode_import(items: &[Value]) -> Result<Expr, DecodeError> {
    let [hash, mode, kind, rest @ ..] = items else {
        return malformed("truncated import");
    };
    let hash = match hash {
        Value::Null => None,
        Value::Bytes(bytes) => Some(Hash::SHA256(bytes.clone())),
        _ => return malformed("bad import hash"),
    };
    let mode = match as_i64(mode)? {
        0 => ImportMode::Code,
        1 => ImportMode::RawText,
        _ => return malformed("bad import mode"),
    };
    let location = match as_i64(kind)? {
        scheme @ (0 | 1) => {
            let [headers, authority, path @ .., query, fragment] = rest
            else {
                return malformed("truncated URL import");
            };
            let headers = match headers {
                Value::Null => None,
                h => Some(decode_expr(h)?.boxed()),
            };
            ImportLocation::Remote(URL {
                scheme: if scheme == 0 {
                    Scheme::HTTP
                } else {
                    Scheme::HTTPS
                },
                authority: as_text(authority)?.to_owned(),
                path: decode_file(path)?,
                query: match query {
                    Value::Null => None,
                    q => Some(as_text(q)?.to_owned()),
                },
                fragment: match fragment {
                    Value::Null => None,
                    f => Some(as_text(f)?.to_owned()),
                },
                headers,
            })
        }
        prefix @ 2..=5 => {
            let prefix = match prefix {
                2 => FilePrefix::Absolute,
                3 => FilePrefix::Here,
                4 => FilePrefix::Parent,
                _ => FilePrefix::Home,
            };
            ImportLocation::Local(prefix, decode_file(rest)?)
        }
        6 => match rest {
            [name] => ImportLocation::Env(as_text(name)?.to_owned()),
            _ => return malformed("bad env import"),
        },
        7 => ImportLocation::Missing,
        _ => return malformed("bad import kind"),
    };
    Ok(Expr::Import(Import {
        mode,
        location,
        hash,
    }))
}

// The trailing texts of an import: directory components then the filename.
fn decode_file(items: &[Value]) -> Result<File, DecodeError> {
    let [components @ .., file] = items else {
        return malformed("missing filename component");
    };
    Ok(File {
        directory: Directory {
            components: components
                .iter()
                .map(|c| as_text(c).map(str::to_owned))
                .collect::<Result<_, _>>()?,
        },
        file: as_text(file)?.to_owned(),
    })
}
