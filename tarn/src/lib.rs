//! Import resolution core for the tarn configuration language.
//!
//! A tarn program is an expression tree whose leaves may be imports:
//! references to other expressions on the local filesystem, at `http(s)`
//! URLs, or in process environment variables. [`load`] replaces every
//! import leaf, transitively, by the type-checked and normalized
//! expression it denotes, enforcing content-addressed integrity, cycle
//! and referential-opacity rules, and caching resolved artifacts both in
//! memory and (for hashed imports) on disk.

pub mod core;
pub mod error;
pub mod phase;

use tarn_syntax::Expr;

pub use crate::core::context::TypecheckContext;
pub use crate::error::{Error, ImportError, TypeError};
pub use crate::phase::binary::ProtocolVersion;
pub use crate::phase::hash::{hash_expression, hash_expression_to_code};
pub use crate::phase::normalize::Normalizer;
pub use crate::phase::resolve::{
    expr_from_import, Fetched, Fetcher, Status, SystemFetcher,
};
pub use crate::phase::{Normalized, Parsed, Resolved, Typed};

/// Resolve every import in `expr`, using the current working directory as
/// the starting point for relative imports.
pub fn load(expr: &Expr) -> Result<Expr, Error> {
    let mut status = Status::new(".");
    load_with(&mut status, expr)
}

/// Resolve every import in `expr` against an existing session, sharing its
/// memo, import stack and fetcher. For embedders.
pub fn load_with(status: &mut Status, expr: &Expr) -> Result<Expr, Error> {
    phase::resolve::resolve_expr(status, expr)
}
