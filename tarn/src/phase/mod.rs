use std::fmt::Display;
use std::path::Path;

use tarn_syntax::Expr;

use crate::core::context::TypecheckContext;
use crate::error::{EncodeError, Error, TypeError};
use crate::phase::binary::ProtocolVersion;
use crate::phase::normalize::Normalizer;
use crate::phase::resolve::ImportRoot;

pub mod binary;
pub(crate) mod cache;
pub mod hash;
pub mod normalize;
pub(crate) mod parse;
pub mod resolve;
pub mod typecheck;

pub type ParsedExpr = Expr;
pub type ResolvedExpr = Expr;
pub type NormalizedExpr = Expr;

/// An expression fresh out of the parser, remembering the directory that
/// relative imports resolve against.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed(pub(crate) ParsedExpr, pub(crate) ImportRoot);

/// An expression where all imports have been resolved
///
/// Invariant: there must be no `Import` leaves or `?` operations left.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved(pub(crate) ResolvedExpr);

/// A type-checked expression together with its inferred type.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    expr: Expr,
    ty: Expr,
}

/// A normalized expression.
///
/// Invariant: the contained expression must be in normal form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized(pub(crate) NormalizedExpr);

impl Parsed {
    pub fn parse_file(f: &Path) -> Result<Parsed, Error> {
        parse::parse_file(f)
    }
    pub fn parse_str(s: &str) -> Result<Parsed, Error> {
        parse::parse_str(s)
    }

    pub fn resolve(self) -> Result<Resolved, Error> {
        resolve::resolve(self)
    }
    pub fn skip_resolve(self) -> Result<Resolved, Error> {
        resolve::skip_resolve_expr(self)
    }
}

impl Resolved {
    pub fn typecheck(self) -> Result<Typed, TypeError> {
        let ty = typecheck::typecheck(&self.0)?;
        Ok(Typed { expr: self.0, ty })
    }
    pub fn typecheck_with(
        self,
        ctx: &TypecheckContext,
    ) -> Result<Typed, TypeError> {
        let ty = typecheck::type_with(ctx, &self.0)?;
        Ok(Typed { expr: self.0, ty })
    }
}

impl Typed {
    /// Reduce to β-normal form. Does not re-type-check; normalization of a
    /// well-typed expression stays well-typed.
    pub fn normalize(self) -> Normalized {
        self.normalize_with(None)
    }
    pub fn normalize_with(self, custom: Option<&Normalizer>) -> Normalized {
        Normalized(normalize::normalize_with(custom, &self.expr))
    }

    pub fn get_type(&self) -> &Expr {
        &self.ty
    }
    pub fn to_expr(&self) -> Expr {
        self.expr.clone()
    }
}

impl Normalized {
    pub fn encode(
        &self,
        version: ProtocolVersion,
    ) -> Result<Vec<u8>, EncodeError> {
        binary::encode(version, &self.0)
    }

    pub fn to_expr(&self) -> NormalizedExpr {
        self.0.clone()
    }
    /// The α-normalized rendition: what hashes and the on-disk integrity
    /// cache are computed over.
    pub fn to_expr_alpha(&self) -> NormalizedExpr {
        normalize::alpha_normalize(&self.0)
    }
}

macro_rules! derive_display_for_wrapper_struct {
    ($ty:ident) => {
        impl Display for $ty {
            fn fmt(
                &self,
                f: &mut std::fmt::Formatter,
            ) -> Result<(), std::fmt::Error> {
                self.0.fmt(f)
            }
        }
    };
}

derive_display_for_wrapper_struct!(Resolved);
derive_display_for_wrapper_struct!(Normalized);

impl Display for Parsed {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        self.0.fmt(f)
    }
}

impl Display for Typed {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        self.expr.fmt(f)
    }
}
