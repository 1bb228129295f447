use tarn_syntax::{BinOp as Op, Expr, Label, V};

use crate::core::var::{shift, subst, subst_shift};

/// User-supplied reduction hook, consulted before the structural rules at
/// every node. Returning `Some` restarts normalization on the replacement,
/// so the hook must be shrinking.
pub type Normalizer = dyn Fn(&Expr) -> Option<Expr>;

pub fn normalize(expr: &Expr) -> Expr {
    normalize_with(None, expr)
}

/// β-normalization: reduces applications, lets, annotations, operator
/// applications and field selections, including under binders. The
/// language has no recursion, so this terminates on every input.
pub fn normalize_with(custom: Option<&Normalizer>, expr: &Expr) -> Expr {
    use Expr::*;
    if let Some(custom_fn) = custom {
        if let Some(replaced) = custom_fn(expr) {
            return normalize_with(custom, &replaced);
        }
    }
    match expr {
        App(f, a) => match normalize_with(custom, f) {
            Lam(x, _, b) => normalize_with(custom, &subst_shift(&x, a, &b)),
            f => App(f.boxed(), normalize_with(custom, a).boxed()),
        },
        Let(x, _, v, b) => normalize_with(custom, &subst_shift(x, v, b)),
        Annot(e, _) => normalize_with(custom, e),
        // resolution replaces the alternative by its surviving branch; on
        // unresolved expressions the left branch decides the normal form
        BinOp(Op::ImportAlt, l, _) => normalize_with(custom, l),
        BinOp(op, l, r) => fold_binop(
            *op,
            normalize_with(custom, l),
            normalize_with(custom, r),
        ),
        Field(e, k) => match normalize_with(custom, e) {
            RecordLit(m) => match m.get(k) {
                Some(v) => v.clone(),
                None => Field(RecordLit(m).boxed(), k.clone()),
            },
            e => Field(e.boxed(), k.clone()),
        },
        _ => expr.map_children(&mut |e| normalize_with(custom, e)),
    }
}

fn fold_binop(op: Op, l: Expr, r: Expr) -> Expr {
    use Op::*;
    use Expr::*;
    match (op, l, r) {
        (BoolAnd, BoolLit(a), BoolLit(b)) => BoolLit(a && b),
        (BoolAnd, BoolLit(true), r) => r,
        (BoolAnd, l, BoolLit(true)) => l,
        (BoolAnd, BoolLit(false), _) => BoolLit(false),
        (BoolAnd, _, BoolLit(false)) => BoolLit(false),
        (BoolOr, BoolLit(a), BoolLit(b)) => BoolLit(a || b),
        (BoolOr, BoolLit(false), r) => r,
        (BoolOr, l, BoolLit(false)) => l,
        (BoolOr, BoolLit(true), _) => BoolLit(true),
        (BoolOr, _, BoolLit(true)) => BoolLit(true),
        (BoolEQ, BoolLit(a), BoolLit(b)) => BoolLit(a == b),
        (BoolEQ, BoolLit(true), r) => r,
        (BoolEQ, l, BoolLit(true)) => l,
        (BoolNE, BoolLit(a), BoolLit(b)) => BoolLit(a != b),
        (BoolNE, BoolLit(false), r) => r,
        (BoolNE, l, BoolLit(false)) => l,
        // wraps on overflow
        (IntegerAdd, IntegerLit(a), IntegerLit(b)) => {
            IntegerLit(a.wrapping_add(b))
        }
        (IntegerAdd, IntegerLit(0), r) => r,
        (IntegerAdd, l, IntegerLit(0)) => l,
        (TextAppend, TextLit(a), TextLit(b)) => TextLit(a + &b),
        (TextAppend, TextLit(a), r) if a.is_empty() => r,
        (TextAppend, l, TextLit(b)) if b.is_empty() => l,
        (ListAppend, EmptyListLit(_), r) => r,
        (ListAppend, l, EmptyListLit(_)) => l,
        (ListAppend, NEListLit(mut a), NEListLit(b)) => {
            a.extend(b);
            NEListLit(a)
        }
        (op, l, r) => BinOp(op, l.boxed(), r.boxed()),
    }
}

/// Rename every binder to `_`, leaving an expression whose equality is
/// α-equivalence and whose binary encoding is stable under renaming.
pub fn alpha_normalize(expr: &Expr) -> Expr {
    use Expr::*;
    match expr {
        Lam(x, t, b) => Lam(
            "_".into(),
            alpha_normalize(t).boxed(),
            alpha_normalize(&rebind(x, b)).boxed(),
        ),
        Pi(x, t, b) => Pi(
            "_".into(),
            alpha_normalize(t).boxed(),
            alpha_normalize(&rebind(x, b)).boxed(),
        ),
        Let(x, t, v, b) => Let(
            "_".into(),
            t.as_ref().map(|t| alpha_normalize(t).boxed()),
            alpha_normalize(v).boxed(),
            alpha_normalize(&rebind(x, b)).boxed(),
        ),
        _ => expr.map_children(&mut |e| alpha_normalize(e)),
    }
}

// Redirect references to the binder `x` towards a binder named `_`.
fn rebind(x: &Label, body: &Expr) -> Expr {
    if x.as_str() == "_" {
        return body.clone();
    }
    let x0 = V(x.clone(), 0);
    let u0 = V("_".into(), 0);
    shift(
        -1,
        &x0,
        &subst(&x0, &Expr::Var(u0.clone()), &shift(1, &u0, body)),
    )
}
