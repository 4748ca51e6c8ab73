//! Outer-join simplification.
//!
//! A LEFT join whose inner side is null-rejected by some predicate that is
//! evaluated above it produces no null-extended rows, so it is an INNER join.
//! Converting it gives the access-path enumerator more join orders.

use crate::expr::Expr;
use crate::statement::{JoinNode, JoinType};

/// Rewrites RIGHT joins as LEFT joins, then converts null-rejected LEFT
/// joins to INNER joins.
pub fn simplify(tree: &mut JoinNode) {
    tree.normalize_right_joins();
    simplify_outer_joins(tree);
}

/// Converts null-rejected LEFT joins to INNER joins, top-down.
pub fn simplify_outer_joins(tree: &mut JoinNode) {
    let JoinNode::Branch { left, right, .. } = &*tree else {
        return;
    };
    // At the top only WHERE terms can reject nulls.
    let exprs: Vec<Expr> = tree
        .where_expr()
        .into_iter()
        .chain(left.where_expr())
        .chain(right.where_expr())
        .cloned()
        .collect();
    simplify_recursively(tree, exprs);
}

fn simplify_recursively(node: &mut JoinNode, mut exprs: Vec<Expr>) {
    let JoinNode::Branch {
        join_type,
        left,
        right,
        join_expr,
        ..
    } = node
    else {
        return;
    };

    if *join_type == JoinType::Left {
        let inner_aliases = right.table_aliases();
        let rejected = exprs
            .iter()
            .any(|e| inner_aliases.iter().any(|alias| e.is_null_rejecting(alias)));
        if rejected {
            *join_type = JoinType::Inner;
        }
    }

    // The ON clause only constrains the inner side; WHERE terms of either
    // child constrain both, since the outer side never introduces nulls.
    let mut new_exprs = exprs.clone();
    new_exprs.extend(join_expr.clone());
    exprs.extend(left.where_expr().cloned());
    exprs.extend(right.where_expr().cloned());

    if *join_type == JoinType::Inner {
        exprs.extend(new_exprs);
        simplify_recursively(left, exprs.clone());
        simplify_recursively(right, exprs);
    } else {
        new_exprs.extend(exprs.iter().cloned());
        simplify_recursively(right, new_exprs);
        simplify_recursively(left, exprs);
    }
}
