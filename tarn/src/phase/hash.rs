use sha2::{Digest, Sha256};
use tarn_syntax::Expr;

use crate::error::EncodeError;
use crate::phase::binary::{encode, ProtocolVersion};
use crate::phase::normalize::alpha_normalize;

/// SHA-256 of the canonical encoding of `expr`, α-normalized first so the
/// digest is stable under binder renaming. The input must be fully
/// resolved and in β-normal form.
pub fn hash_expression(
    version: ProtocolVersion,
    expr: &Expr,
) -> Result<[u8; 32], EncodeError> {
    let bytes = encode(version, &alpha_normalize(expr))?;
    Ok(Sha256::digest(&bytes).into())
}

/// The digest in import surface syntax: `sha256:<64 hex digits>`.
pub fn hash_expression_to_code(
    version: ProtocolVersion,
    expr: &Expr,
) -> Result<String, EncodeError> {
    Ok(format!(
        "sha256:{}",
        hex::encode(hash_expression(version, expr)?)
    ))
}
