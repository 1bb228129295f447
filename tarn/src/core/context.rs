use std::rc::Rc;

use tarn_syntax::{Expr, Label, V};

use crate::core::var::shift;

/// Typing context: an ordered list of `x : T` entries, innermost last.
/// Contexts are snapshots shared behind an `Rc`; entering a binder builds
/// a new one.
#[derive(Debug, Clone, Default)]
pub struct TypecheckContext(Rc<Vec<(Label, Expr)>>);

impl TypecheckContext {
    pub fn new() -> Self {
        TypecheckContext(Rc::new(Vec::new()))
    }

    /// Enter the binder `x : t`. Every stored type, including the new one,
    /// is shifted so its free variables keep pointing past the binder.
    pub fn insert_type(&self, x: &Label, t: Expr) -> Self {
        let v = V(x.clone(), 0);
        let mut vec: Vec<(Label, Expr)> = Vec::with_capacity(self.0.len() + 1);
        vec.extend(self.0.iter().cloned());
        vec.push((x.clone(), t));
        let vec = vec
            .into_iter()
            .map(|(l, ty)| {
                let ty = shift(1, &v, &ty);
                (l, ty)
            })
            .collect();
        TypecheckContext(Rc::new(vec))
    }

    pub fn lookup(&self, var: &V) -> Option<Expr> {
        let V(x, index) = var;
        let mut skip = *index;
        for (l, t) in self.0.iter().rev() {
            if l == x {
                if skip == 0 {
                    return Some(t.clone());
                }
                skip -= 1;
            }
        }
        None
    }
}
