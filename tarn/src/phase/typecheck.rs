use std::collections::BTreeMap;

use tarn_syntax::{BinOp, Builtin, Const, Expr};

use crate::core::context::TypecheckContext;
use crate::core::var::subst_shift;
use crate::error::TypeError;
use crate::phase::normalize::{alpha_normalize, normalize};

pub(crate) fn typecheck(expr: &Expr) -> Result<Expr, TypeError> {
    type_with(&TypecheckContext::new(), expr)
}

/// Whether two type expressions denote the same type: β-normal forms equal
/// up to α-renaming.
pub(crate) fn equivalent(a: &Expr, b: &Expr) -> bool {
    alpha_normalize(&normalize(a)) == alpha_normalize(&normalize(b))
}

fn function_check(input: Const, output: Const) -> Result<Const, TypeError> {
    use Const::*;
    match (input, output) {
        (_, Type) => Ok(Type),
        (Kind, Kind) => Ok(Kind),
        (Sort, Kind) => Ok(Sort),
        (Sort, Sort) => Ok(Sort),
        _ => Err(TypeError::NoDependentTypes),
    }
}

// The type of `e` must land in some universe; say which one.
fn expect_const(
    ctx: &TypecheckContext,
    e: &Expr,
) -> Result<Const, TypeError> {
    match normalize(&type_with(ctx, e)?) {
        Expr::Const(c) => Ok(c),
        _ => Err(TypeError::NotAType(e.clone())),
    }
}

/// Infer the type of `expr` under `ctx`.
pub fn type_with(
    ctx: &TypecheckContext,
    expr: &Expr,
) -> Result<Expr, TypeError> {
    match expr {
        Expr::Const(Const::Type) => Ok(Expr::Const(Const::Kind)),
        Expr::Const(Const::Kind) => Ok(Expr::Const(Const::Sort)),
        Expr::Const(Const::Sort) => Err(TypeError::Untyped),
        Expr::Var(v) => ctx
            .lookup(v)
            .ok_or_else(|| TypeError::UnboundVariable(v.clone())),
        Expr::Lam(x, a, b) => {
            expect_const(ctx, a)?;
            let ctx2 = ctx.insert_type(x, a.as_ref().clone());
            let tb = type_with(&ctx2, b)?;
            let pi = Expr::Pi(x.clone(), a.clone(), tb.boxed());
            // rejects ill-formed universe combinations
            type_with(ctx, &pi)?;
            Ok(pi)
        }
        Expr::Pi(x, a, b) => {
            let ka = expect_const(ctx, a)?;
            let ctx2 = ctx.insert_type(x, a.as_ref().clone());
            let kb = expect_const(&ctx2, b)?;
            Ok(Expr::Const(function_check(ka, kb)?))
        }
        Expr::App(f, arg) => {
            let tf = normalize(&type_with(ctx, f)?);
            let Expr::Pi(x, a, b) = tf else {
                return Err(TypeError::NotAFunction(f.as_ref().clone()));
            };
            let ta = type_with(ctx, arg)?;
            if !equivalent(&a, &ta) {
                return Err(TypeError::TypeMismatch {
                    expected: *a,
                    found: ta,
                });
            }
            Ok(subst_shift(&x, arg, &b))
        }
        Expr::Let(x, annot, v, b) => {
            let tv = type_with(ctx, v)?;
            if let Some(annot) = annot {
                if !equivalent(annot, &tv) {
                    return Err(TypeError::AnnotMismatch {
                        annot: annot.as_ref().clone(),
                        actual: tv,
                    });
                }
            }
            type_with(ctx, &subst_shift(x, v, b))
        }
        Expr::Annot(e, t) => {
            let te = type_with(ctx, e)?;
            if !equivalent(t, &te) {
                return Err(TypeError::AnnotMismatch {
                    annot: t.as_ref().clone(),
                    actual: te,
                });
            }
            Ok(te)
        }
        Expr::Builtin(b) => Ok(match b {
            Builtin::Bool | Builtin::Integer | Builtin::Text => {
                Expr::Const(Const::Type)
            }
            Builtin::List => Expr::Pi(
                "_".into(),
                Expr::Const(Const::Type).boxed(),
                Expr::Const(Const::Type).boxed(),
            ),
        }),
        Expr::BoolLit(_) => Ok(Expr::Builtin(Builtin::Bool)),
        Expr::IntegerLit(_) => Ok(Expr::Builtin(Builtin::Integer)),
        Expr::TextLit(_) => Ok(Expr::Builtin(Builtin::Text)),
        Expr::BinOp(op, l, r) => type_binop(ctx, *op, l, r),
        Expr::EmptyListLit(t) => {
            let nt = normalize(t);
            let well_formed = match &nt {
                Expr::App(f, a) if **f == Expr::Builtin(Builtin::List) => {
                    expect_const(ctx, a)? == Const::Type
                }
                _ => false,
            };
            if well_formed {
                Ok(nt)
            } else {
                Err(TypeError::InvalidListType(t.as_ref().clone()))
            }
        }
        Expr::NEListLit(xs) => {
            let Some(first) = xs.first() else {
                // the parser only builds non-empty literals
                return Err(TypeError::InvalidListType(expr.clone()));
            };
            let t0 = type_with(ctx, first)?;
            if expect_const(ctx, &t0)? != Const::Type {
                return Err(TypeError::InvalidListType(t0));
            }
            for x in &xs[1..] {
                let t = type_with(ctx, x)?;
                if !equivalent(&t0, &t) {
                    return Err(TypeError::TypeMismatch {
                        expected: t0,
                        found: t,
                    });
                }
            }
            Ok(Expr::App(
                Expr::Builtin(Builtin::List).boxed(),
                normalize(&t0).boxed(),
            ))
        }
        Expr::RecordType(kts) => {
            for (k, t) in kts {
                if expect_const(ctx, t)? != Const::Type {
                    return Err(TypeError::InvalidFieldType(k.clone()));
                }
            }
            Ok(Expr::Const(Const::Type))
        }
        Expr::RecordLit(kvs) => {
            let mut kts = BTreeMap::new();
            for (k, v) in kvs {
                let t = type_with(ctx, v)?;
                if expect_const(ctx, &t)? != Const::Type {
                    return Err(TypeError::InvalidFieldType(k.clone()));
                }
                kts.insert(k.clone(), normalize(&t));
            }
            Ok(Expr::RecordType(kts))
        }
        Expr::Field(e, k) => {
            let te = normalize(&type_with(ctx, e)?);
            match te {
                Expr::RecordType(mut kts) => kts
                    .remove(k)
                    .ok_or_else(|| TypeError::MissingField(k.clone())),
                other => Err(TypeError::NotARecord(other)),
            }
        }
        Expr::Import(i) => Err(TypeError::UnresolvedImport(i.clone())),
    }
}

fn type_binop(
    ctx: &TypecheckContext,
    op: BinOp,
    l: &Expr,
    r: &Expr,
) -> Result<Expr, TypeError> {
    use BinOp::*;
    // the alternative never reaches the checker through resolution; for
    // unresolved expressions its type is its left branch's
    if op == ImportAlt {
        return type_with(ctx, l);
    }
    let tl = type_with(ctx, l)?;
    let tr = type_with(ctx, r)?;
    let operands = |expected: Expr| -> Result<Expr, TypeError> {
        if !equivalent(&tl, &expected) {
            return Err(TypeError::TypeMismatch {
                expected,
                found: tl.clone(),
            });
        }
        if !equivalent(&tr, &expected) {
            return Err(TypeError::TypeMismatch {
                expected,
                found: tr.clone(),
            });
        }
        Ok(expected)
    };
    match op {
        BoolAnd | BoolOr | BoolEQ | BoolNE => {
            operands(Expr::Builtin(Builtin::Bool))
        }
        IntegerAdd => operands(Expr::Builtin(Builtin::Integer)),
        TextAppend => operands(Expr::Builtin(Builtin::Text)),
        ListAppend => {
            if !equivalent(&tl, &tr) {
                return Err(TypeError::TypeMismatch {
                    expected: tl,
                    found: tr,
                });
            }
            let n = normalize(&tl);
            match &n {
                Expr::App(f, _) if **f == Expr::Builtin(Builtin::List) => {
                    Ok(n.clone())
                }
                _ => Err(TypeError::InvalidListType(n.clone())),
            }
        }
        ImportAlt => unreachable!("handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tarn_syntax::parse_expr;

    fn infer(src: &str) -> Result<Expr, TypeError> {
        typecheck(&parse_expr(src).unwrap())
    }

    #[test]
    fn infers_polymorphic_application() {
        let ty = infer("(λ(a : Type) → λ(x : a) → x) Bool True").unwrap();
        assert_eq!(ty, Expr::Builtin(Builtin::Bool));
    }

    #[test]
    fn infers_the_identity_function_type() {
        let ty = infer("λ(a : Type) → λ(x : a) → x").unwrap();
        assert_eq!(ty, parse_expr("∀(a : Type) → ∀(x : a) → a").unwrap());
    }

    #[test]
    fn infers_record_types() {
        let ty = infer(
            r#"{ foo = 1, bar = "Hi", baz = λ(x : Bool) → x == False }"#,
        )
        .unwrap();
        assert_eq!(
            ty,
            parse_expr(
                "{ bar : Text, baz : ∀(x : Bool) → Bool, foo : Integer }"
            )
            .unwrap()
        );
    }

    #[test]
    fn checks_operators_lists_and_fields() {
        assert_eq!(infer("1 + 2").unwrap(), Expr::Builtin(Builtin::Integer));
        assert_eq!(
            infer("[1, 2] # ([] : List Integer)").unwrap(),
            parse_expr("List Integer").unwrap()
        );
        assert_eq!(
            infer("{ a = True }.a").unwrap(),
            Expr::Builtin(Builtin::Bool)
        );
    }

    #[test]
    fn lets_are_transparent_to_types() {
        assert_eq!(
            infer("let id = λ(a : Type) → λ(x : a) → x in id Bool True")
                .unwrap(),
            Expr::Builtin(Builtin::Bool)
        );
    }

    #[test]
    fn rejects_ill_typed_expressions() {
        assert!(matches!(
            infer("x"),
            Err(TypeError::UnboundVariable(_))
        ));
        assert!(matches!(
            infer("(λ(x : Bool) → x) 1"),
            Err(TypeError::TypeMismatch { .. })
        ));
        assert!(matches!(
            infer("1 && True"),
            Err(TypeError::TypeMismatch { .. })
        ));
        assert!(matches!(
            infer("True : Integer"),
            Err(TypeError::AnnotMismatch { .. })
        ));
        assert!(matches!(
            infer("{ a = 1 }.b"),
            Err(TypeError::MissingField(_))
        ));
        assert!(matches!(
            infer("./unresolved"),
            Err(TypeError::UnresolvedImport(_))
        ));
    }

    #[test]
    fn equivalence_is_alpha_beta() {
        assert!(equivalent(
            &parse_expr("∀(x : Bool) → Bool").unwrap(),
            &parse_expr("∀(y : Bool) → Bool").unwrap(),
        ));
        assert!(equivalent(
            &parse_expr("(λ(a : Type) → a) Bool").unwrap(),
            &parse_expr("Bool").unwrap(),
        ));
    }
}
