//! Shifting and substitution over named variables with shadowing indices.
//! `x@n` refers to the variable bound by the (n+1)-th enclosing `x` binder.

use tarn_syntax::{Expr, Label, V};

fn under_binder(var: &V, x: &Label) -> V {
    let V(y, m) = var;
    if x == y {
        V(y.clone(), m + 1)
    } else {
        var.clone()
    }
}

/// Adjust by `delta` the indices of free occurrences of `var` (and deeper)
/// in `expr`.
pub(crate) fn shift(delta: isize, var: &V, expr: &Expr) -> Expr {
    use Expr::*;
    match expr {
        Var(V(x, n)) => {
            let V(y, m) = var;
            if x == y && n >= m {
                Var(V(x.clone(), (*n as isize + delta) as usize))
            } else {
                expr.clone()
            }
        }
        Lam(x, t, b) => Lam(
            x.clone(),
            shift(delta, var, t).boxed(),
            shift(delta, &under_binder(var, x), b).boxed(),
        ),
        Pi(x, t, b) => Pi(
            x.clone(),
            shift(delta, var, t).boxed(),
            shift(delta, &under_binder(var, x), b).boxed(),
        ),
        Let(x, t, v, b) => Let(
            x.clone(),
            t.as_ref().map(|t| shift(delta, var, t).boxed()),
            shift(delta, var, v).boxed(),
            shift(delta, &under_binder(var, x), b).boxed(),
        ),
        _ => expr.map_children(&mut |e| shift(delta, var, e)),
    }
}

/// Replace free occurrences of `var` in `expr` by `value`,
/// capture-avoidingly.
pub(crate) fn subst(var: &V, value: &Expr, expr: &Expr) -> Expr {
    use Expr::*;
    match expr {
        Var(v) if v == var => value.clone(),
        Var(_) => expr.clone(),
        Lam(x, t, b) => Lam(
            x.clone(),
            subst(var, value, t).boxed(),
            subst_under(var, value, x, b).boxed(),
        ),
        Pi(x, t, b) => Pi(
            x.clone(),
            subst(var, value, t).boxed(),
            subst_under(var, value, x, b).boxed(),
        ),
        Let(x, t, v, b) => Let(
            x.clone(),
            t.as_ref().map(|t| subst(var, value, t).boxed()),
            subst(var, value, v).boxed(),
            subst_under(var, value, x, b).boxed(),
        ),
        _ => expr.map_children(&mut |e| subst(var, value, e)),
    }
}

fn subst_under(var: &V, value: &Expr, x: &Label, body: &Expr) -> Expr {
    subst(
        &under_binder(var, x),
        &shift(1, &V(x.clone(), 0), value),
        body,
    )
}

/// `x := a` in `b`: the standard index-correct reduction for both
/// `(λ(x : _) → b) a` and `let x = a in b`.
pub(crate) fn subst_shift(x: &Label, a: &Expr, b: &Expr) -> Expr {
    let v = V(x.clone(), 0);
    shift(-1, &v, &subst(&v, &shift(1, &v, a), b))
}
