//! Value-equivalence classes derived from equality filters.
//!
//! Every top-level `x = y` conjunct in which at least one side is a column
//! reference puts both sides into the same class. Classes are merged
//! transitively, so `a.id = b.id AND b.id = ?0` places `a.id`, `b.id` and
//! `?0` together.

use crate::expr::{BinaryOp, Expr};

#[derive(Debug, Clone, Default)]
pub struct ValueEquivalence {
    classes: Vec<Vec<Expr>>,
}

impl ValueEquivalence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the classes from a set of filter expressions.
    pub fn from_filters<'a>(filters: impl IntoIterator<Item = &'a Expr>) -> Self {
        let mut equivalence = Self::new();
        for filter in filters {
            for term in filter.conjuncts() {
                if let Expr::BinaryOp {
                    left,
                    op: BinaryOp::Eq,
                    right,
                } = term
                {
                    let has_column = matches!(left.as_ref(), Expr::Column(_))
                        || matches!(right.as_ref(), Expr::Column(_));
                    if has_column {
                        equivalence.add(left, right);
                    }
                }
            }
        }
        equivalence
    }

    pub fn add(&mut self, left: &Expr, right: &Expr) {
        let l = self.class_of(left);
        let r = self.class_of(right);
        match (l, r) {
            (Some(l), Some(r)) if l == r => {}
            (Some(l), Some(r)) => {
                let (keep, merge) = if l < r { (l, r) } else { (r, l) };
                let merged = self.classes.remove(merge);
                self.classes[keep].extend(merged);
            }
            (Some(l), None) => self.classes[l].push(right.clone()),
            (None, Some(r)) => self.classes[r].push(left.clone()),
            (None, None) => self.classes.push(vec![left.clone(), right.clone()]),
        }
    }

    fn class_of(&self, expr: &Expr) -> Option<usize> {
        self.classes
            .iter()
            .position(|class| class.iter().any(|e| e.same_value(expr)))
    }

    /// Expressions known to equal the column `alias.column`, excluding the
    /// column itself.
    pub fn equivalents_of_column(&self, alias: &str, column: &str) -> Vec<&Expr> {
        let key = Expr::col(alias, column);
        match self.class_of(&key) {
            Some(idx) => self.classes[idx]
                .iter()
                .filter(|e| !e.same_value(&key))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
