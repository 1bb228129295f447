use std::collections::BTreeMap;

use crate::core::import::Import;

/// The name of a bound variable or record field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(String);

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Label(s)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label(s.to_owned())
    }
}

/// A variable together with the number of enclosing binders of the same
/// name to skip: `x@0` is the innermost `x` in scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct V(pub Label, pub usize);

/// Type universes
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Const {
    Type,
    Kind,
    Sort,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Builtin {
    Bool,
    Integer,
    Text,
    List,
}

/// Binary operators, loosest-binding first
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// `?`
    ImportAlt,
    /// `||`
    BoolOr,
    /// `+`
    IntegerAdd,
    /// `++`
    TextAppend,
    /// `#`
    ListAppend,
    /// `&&`
    BoolAnd,
    /// `==`
    BoolEQ,
    /// `!=`
    BoolNE,
}

pub type SubExpr = Box<Expr>;

/// A tarn expression.
///
/// Imports appear as `Import` leaves until the resolution phase replaces
/// them; every other constructor is walked homomorphically by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(Const),
    Builtin(Builtin),
    Var(V),
    /// `λ(x : A) → b`
    Lam(Label, SubExpr, SubExpr),
    /// `∀(x : A) → B`; non-dependent arrows use the label `_`
    Pi(Label, SubExpr, SubExpr),
    /// `f a`
    App(SubExpr, SubExpr),
    /// `let x : A = v in b`
    Let(Label, Option<SubExpr>, SubExpr, SubExpr),
    /// `e : T`
    Annot(SubExpr, SubExpr),
    BoolLit(bool),
    IntegerLit(i64),
    TextLit(String),
    BinOp(BinOp, SubExpr, SubExpr),
    /// `[] : T` where `T` must normalize to `List a`
    EmptyListLit(SubExpr),
    NEListLit(Vec<Expr>),
    /// `{ k : T, ... }`
    RecordType(BTreeMap<Label, Expr>),
    /// `{ k = v, ... }`
    RecordLit(BTreeMap<Label, Expr>),
    /// `e.k`
    Field(SubExpr, Label),
    Import(Import),
}

impl Expr {
    pub fn boxed(self) -> SubExpr {
        Box::new(self)
    }

    /// Rebuild this node by mapping every immediate sub-expression, in
    /// left-to-right declaration order. `Import` is a leaf: headers of a
    /// remote import are resolved by the fetcher, not by this traversal.
    pub fn try_map_children<E>(
        &self,
        f: &mut impl FnMut(&Expr) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        use Expr::*;
        Ok(match self {
            Const(_) | Builtin(_) | Var(_) | BoolLit(_) | IntegerLit(_)
            | TextLit(_) | Import(_) => self.clone(),
            Lam(x, t, b) => Lam(x.clone(), f(t)?.boxed(), f(b)?.boxed()),
            Pi(x, t, b) => Pi(x.clone(), f(t)?.boxed(), f(b)?.boxed()),
            App(g, a) => App(f(g)?.boxed(), f(a)?.boxed()),
            Let(x, t, v, b) => Let(
                x.clone(),
                t.as_ref().map(|t| f(t).map(Expr::boxed)).transpose()?,
                f(v)?.boxed(),
                f(b)?.boxed(),
            ),
            Annot(e, t) => Annot(f(e)?.boxed(), f(t)?.boxed()),
            BinOp(o, l, r) => BinOp(*o, f(l)?.boxed(), f(r)?.boxed()),
            EmptyListLit(t) => EmptyListLit(f(t)?.boxed()),
            NEListLit(xs) => {
                NEListLit(xs.iter().map(f).collect::<Result<_, _>>()?)
            }
            RecordType(kts) => RecordType(
                kts.iter()
                    .map(|(k, t)| Ok((k.clone(), f(t)?)))
                    .collect::<Result<_, E>>()?,
            ),
            RecordLit(kvs) => RecordLit(
                kvs.iter()
                    .map(|(k, v)| Ok((k.clone(), f(v)?)))
                    .collect::<Result<_, E>>()?,
            ),
            Field(e, k) => Field(f(e)?.boxed(), k.clone()),
        })
    }

    pub fn map_children(&self, f: &mut impl FnMut(&Expr) -> Expr) -> Expr {
        match self.try_map_children::<std::convert::Infallible>(&mut |e| Ok(f(e))) {
            Ok(e) => e,
            Err(never) => match never {},
        }
    }

    /// Whether any `Import` leaf remains anywhere in the tree.
    pub fn contains_imports(&self) -> bool {
        use Expr::*;
        match self {
            Import(_) => true,
            Const(_) | Builtin(_) | Var(_) | BoolLit(_) | IntegerLit(_)
            | TextLit(_) => false,
            Lam(_, a, b) | Pi(_, a, b) | App(a, b) | Annot(a, b)
            | BinOp(_, a, b) => a.contains_imports() || b.contains_imports(),
            Let(_, t, v, b) => {
                t.as_deref().is_some_and(Expr::contains_imports)
                    || v.contains_imports()
                    || b.contains_imports()
            }
            EmptyListLit(t) => t.contains_imports(),
            NEListLit(xs) => xs.iter().any(Expr::contains_imports),
            RecordType(m) | RecordLit(m) => {
                m.values().any(Expr::contains_imports)
            }
            Field(e, _) => e.contains_imports(),
        }
    }
}
