//! Binary join tree of a select statement.

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

/// A node of the join tree.
///
/// `join_expr` holds ON-clause terms and `where_expr` holds WHERE-clause
/// terms that the parser attached at this level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum JoinNode {
    Leaf {
        alias: String,
        #[serde(default)]
        join_expr: Option<Expr>,
        #[serde(default)]
        where_expr: Option<Expr>,
    },
    Branch {
        join_type: JoinType,
        left: Box<JoinNode>,
        right: Box<JoinNode>,
        #[serde(default)]
        join_expr: Option<Expr>,
        #[serde(default)]
        where_expr: Option<Expr>,
    },
}

impl JoinNode {
    pub fn leaf(alias: impl Into<String>) -> Self {
        JoinNode::Leaf {
            alias: alias.into(),
            join_expr: None,
            where_expr: None,
        }
    }

    pub fn join(join_type: JoinType, left: JoinNode, right: JoinNode, on: Option<Expr>) -> Self {
        JoinNode::Branch {
            join_type,
            left: Box::new(left),
            right: Box::new(right),
            join_expr: on,
            where_expr: None,
        }
    }

    pub fn inner(left: JoinNode, right: JoinNode, on: Expr) -> Self {
        Self::join(JoinType::Inner, left, right, Some(on))
    }

    pub fn left_outer(left: JoinNode, right: JoinNode, on: Expr) -> Self {
        Self::join(JoinType::Left, left, right, Some(on))
    }

    pub fn right_outer(left: JoinNode, right: JoinNode, on: Expr) -> Self {
        Self::join(JoinType::Right, left, right, Some(on))
    }

    /// Attaches a WHERE term to this node, AND-ing it with any existing one.
    pub fn with_where(mut self, expr: Expr) -> Self {
        let slot = match &mut self {
            JoinNode::Leaf { where_expr, .. } | JoinNode::Branch { where_expr, .. } => where_expr,
        };
        *slot = Some(match slot.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn join_expr(&self) -> Option<&Expr> {
        match self {
            JoinNode::Leaf { join_expr, .. } | JoinNode::Branch { join_expr, .. } => {
                join_expr.as_ref()
            }
        }
    }

    pub fn where_expr(&self) -> Option<&Expr> {
        match self {
            JoinNode::Leaf { where_expr, .. } | JoinNode::Branch { where_expr, .. } => {
                where_expr.as_ref()
            }
        }
    }

    pub fn join_type(&self) -> Option<JoinType> {
        match self {
            JoinNode::Leaf { .. } => None,
            JoinNode::Branch { join_type, .. } => Some(*join_type),
        }
    }

    /// Table aliases beneath this node, left to right.
    pub fn table_aliases(&self) -> Vec<&str> {
        match self {
            JoinNode::Leaf { alias, .. } => vec![alias.as_str()],
            JoinNode::Branch { left, right, .. } => {
                let mut out = left.table_aliases();
                out.extend(right.table_aliases());
                out
            }
        }
    }

    /// Every ON and WHERE expression in the tree.
    pub fn all_expressions(&self) -> Vec<&Expr> {
        let mut out: Vec<&Expr> = self.join_expr().into_iter().collect();
        out.extend(self.where_expr());
        if let JoinNode::Branch { left, right, .. } = self {
            out.extend(left.all_expressions());
            out.extend(right.all_expressions());
        }
        out
    }

    /// Rewrites every RIGHT join as a LEFT join with swapped children; the
    /// executor only handles the outer table on the left.
    pub fn normalize_right_joins(&mut self) {
        if let JoinNode::Branch {
            join_type,
            left,
            right,
            ..
        } = self
        {
            if *join_type == JoinType::Right {
                std::mem::swap(left, right);
                *join_type = JoinType::Left;
            }
            left.normalize_right_joins();
            right.normalize_right_joins();
        }
    }
}
