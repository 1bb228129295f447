use std::path::PathBuf;

use thiserror::Error;

use tarn_syntax::{Expr, Import, Label, V};

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Parse(#[from] tarn_syntax::ParseError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Resolve(#[from] ImportError),
    #[error(transparent)]
    Typecheck(#[from] TypeError),
}

impl Error {
    /// The payload of the `MissingImports` envelope, which is the one and
    /// only failure the `?` operator recovers from. Anything else is
    /// returned unchanged for the caller to propagate.
    pub(crate) fn into_missing_imports(
        self,
    ) -> Result<Vec<ImportError>, Error> {
        match self {
            Error::Resolve(ImportError::MissingImports(es)) => Ok(es),
            other => Err(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("missing file {0}")]
    MissingFile(PathBuf),
    #[error("missing environment variable {0}")]
    MissingEnvironmentVariable(String),
    #[error("cannot import {0}: HTTP support is not compiled in")]
    CannotImportHttpUrl(String),
    #[error("error fetching {url}: {message}")]
    HttpError { url: String, message: String },
    #[error("the home directory could not be determined")]
    MissingHome,
    #[error("cyclic import: {0}")]
    Cycle(Import),
    #[error("referentially opaque import: {0}")]
    ReferentiallyOpaque(Import),
    #[error("hash mismatch: expected sha256:{expected}, got sha256:{actual}")]
    HashMismatch { expected: String, actual: String },
    #[error(
        "headers must normalize to a literal List {{ header : Text, value : Text }}"
    )]
    MalformedHeaders,
    #[error("unexpected import: {0}")]
    UnexpectedImport(Import),
    #[error("{}", display_missing_imports(.0))]
    MissingImports(Vec<ImportError>),
    #[error("{}", display_imported(.stack, .inner))]
    Imported { stack: Vec<Import>, inner: Box<Error> },
}

fn display_missing_imports(es: &[ImportError]) -> String {
    match es {
        [] => "no valid imports".to_owned(),
        [e] => e.to_string(),
        es => {
            let mut s = String::from("failed to resolve any alternative:");
            for e in es {
                s.push_str("\n\n");
                s.push_str(&e.to_string());
            }
            s
        }
    }
}

// The first stack entry is the synthetic root import; the chain shown to
// the user starts at the outermost real import.
fn display_imported(stack: &[Import], inner: &Error) -> String {
    let mut s = String::new();
    for (depth, import) in stack.iter().skip(1).enumerate() {
        for _ in 0..depth {
            s.push_str("  ");
        }
        s.push_str("↳ ");
        s.push_str(&import.to_string());
        s.push('\n');
    }
    s.push_str(&inner.to_string());
    s
}

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("unbound variable {0}")]
    UnboundVariable(V),
    #[error("not a function: {0}")]
    NotAFunction(Expr),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: Expr, found: Expr },
    #[error("annotation mismatch: annotated {annot}, inferred {actual}")]
    AnnotMismatch { annot: Expr, actual: Expr },
    #[error("Sort has no type")]
    Untyped,
    #[error("invalid input or output universe for a function type")]
    NoDependentTypes,
    #[error("expected a type, found {0}")]
    NotAType(Expr),
    #[error("invalid type for list elements: {0}")]
    InvalidListType(Expr),
    #[error("field `{0}` must have a type of universe Type")]
    InvalidFieldType(Label),
    #[error("record has no field `{0}`")]
    MissingField(Label),
    #[error("not a record: {0}")]
    NotARecord(Expr),
    #[error("cannot type-check an unresolved import: {0}")]
    UnresolvedImport(Import),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("CBOR serialization failed: {0}")]
    Cbor(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("CBOR deserialization failed: {0}")]
    Cbor(String),
    #[error("malformed expression encoding: {0}")]
    Malformed(String),
}
