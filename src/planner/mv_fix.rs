//! Materialized-view reconciliation for distributed plans.
//!
//! A view over a partitioned table whose GROUP BY does not include the
//! partitioning column keeps one partial row per group on every partition.
//! Reading it across partitions needs a coordinator-side re-aggregation that
//! folds the partial rows back together.

use serde::{Deserialize, Serialize};

use super::plan::{
    AggregateNode, AggregateStrategy, NodeId, OutputColumn, PlanNode, PlanNodeType, PlanTree,
};
use super::{PlanError, PlanResult};
use crate::expr::{AggregateFunc, Expr};

/// An aggregated view column and the function that re-aggregates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewAggregate {
    pub column: String,
    /// Function of the view definition; COUNT folds with SUM.
    pub func: AggregateFunc,
}

impl ViewAggregate {
    pub fn new(column: impl Into<String>, func: AggregateFunc) -> Self {
        Self {
            column: column.into(),
            func,
        }
    }

    fn reaggregate_with(&self) -> AggregateFunc {
        match self.func {
            AggregateFunc::Count | AggregateFunc::CountStar | AggregateFunc::Sum => AggregateFunc::Sum,
            other => other,
        }
    }
}

/// What the parser found out about a scanned view that needs reconciling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedViewFix {
    pub view_table: String,
    pub view_alias: String,
    /// Grouping columns of the view definition.
    pub group_by: Vec<String>,
    pub aggregates: Vec<ViewAggregate>,
    /// View columns the statement reads, in scan output order.
    pub scan_columns: Vec<String>,
}

impl MaterializedViewFix {
    fn is_aggregated_column(&self, column: &str) -> bool {
        self.aggregates.iter().any(|a| a.column == column)
    }

    /// Coordinator hash aggregate folding per-partition view rows.
    pub fn reaggregation_node(&self) -> PlanNode {
        let mut agg = AggregateNode {
            coordinating: true,
            ..AggregateNode::default()
        };
        for (i, column) in self.scan_columns.iter().enumerate() {
            let input = Expr::col(self.view_alias.clone(), column.clone());
            match self.aggregates.iter().find(|a| &a.column == column) {
                Some(view_agg) => {
                    agg.add_aggregate(view_agg.reaggregate_with(), false, i, Some(input));
                    agg.output
                        .push(OutputColumn::new(column.clone(), Expr::intermediate(column.clone(), None)));
                }
                None => agg.output.push(OutputColumn::new(column.clone(), input)),
            }
        }
        agg.group_by = self
            .group_by
            .iter()
            .map(|c| Expr::col(self.view_alias.clone(), c.clone()))
            .collect();
        PlanNode::aggregate(AggregateStrategy::Hash, agg)
    }

    /// Inline projection for the view scan, reading only the needed columns.
    pub fn scan_projection(&self) -> PlanNode {
        PlanNode::projection(
            self.scan_columns
                .iter()
                .map(|c| OutputColumn::new(c.clone(), Expr::col(self.view_alias.clone(), c.clone())))
                .collect(),
        )
    }

    /// First scan of the view beneath `from`, with its parent.
    fn find_view_scan(&self, tree: &PlanTree, from: NodeId) -> Option<(NodeId, NodeId)> {
        for child in tree.children(from) {
            let node = tree.node(child);
            match node.scan() {
                Some(scan) if scan.table.eq_ignore_ascii_case(&self.view_table) => {
                    return Some((from, child));
                }
                Some(_) => continue,
                None => {
                    if let Some(found) = self.find_view_scan(tree, child) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// Locates the view scan below `send`, gives it the inline projection and
    /// moves filters on aggregated columns up onto `reagg`. With
    /// `replace_scan`, the scan's place in its parent is taken by `reagg`.
    ///
    /// Returns the scan node.
    pub fn process_scan_with_reaggregation(
        &self,
        tree: &mut PlanTree,
        send: NodeId,
        reagg: NodeId,
        replace_scan: bool,
    ) -> Option<NodeId> {
        let (parent, scan) = self.find_view_scan(tree, send)?;
        if replace_scan {
            tree.replace_child(parent, scan, reagg);
        }

        let predicate = tree.node_mut(scan).scan_mut().and_then(|s| s.predicate.take());
        if let Some(predicate) = predicate {
            let (post, kept): (Vec<&Expr>, Vec<&Expr>) =
                predicate.conjuncts().into_iter().partition(|term| {
                    term.base_columns()
                        .iter()
                        .any(|c| c.table == self.view_alias && self.is_aggregated_column(&c.column))
                });
            if let Some(scan_node) = tree.node_mut(scan).scan_mut() {
                scan_node.predicate = conjoin(kept);
            }
            if let Some(post) = conjoin(post) {
                if let Some(agg) = tree.node_mut(reagg).aggregate_node_mut() {
                    agg.post_predicate = Some(match agg.post_predicate.take() {
                        Some(existing) => existing.and(post),
                        None => post,
                    });
                }
            }
        }

        tree.add_inline(scan, self.scan_projection());
        Some(scan)
    }

    /// Inserts the re-aggregation directly above the single receive.
    ///
    /// For a join evaluated below the receive (`multi_table` without the
    /// outer-join edge case), the join moves to the coordinator: the
    /// partitions only scan the view, and the join reads the re-aggregated
    /// rows in place of the view scan.
    pub fn reconcile(&self, tree: &mut PlanTree, multi_table: bool, edge_case: bool) -> PlanResult<()> {
        let root = tree.root();
        let reagg = tree.add_node(self.reaggregation_node());

        let (receive, reagg_parent) = if tree.node_type(root) == PlanNodeType::Receive {
            tree.set_root(reagg);
            (root, None)
        } else {
            let receives = tree.find_all(PlanNodeType::Receive);
            let [receive] = receives.as_slice() else {
                return Err(PlanError::internal(format!(
                    "expected one receive node for view reconciliation, found {}",
                    receives.len()
                )));
            };
            let parent = tree
                .parent(*receive)
                .ok_or_else(|| PlanError::internal("receive node has no parent"))?;
            tree.replace_child(parent, *receive, reagg);
            (*receive, Some(parent))
        };
        tree.add_child(reagg, receive);

        let send = tree
            .child(receive, 0)
            .filter(|s| tree.node_type(*s) == PlanNodeType::Send)
            .ok_or_else(|| PlanError::internal("receive node without a send child"))?;
        let send_child = tree
            .child(send, 0)
            .ok_or_else(|| PlanError::internal("send node without a child"))?;

        let join_case = multi_table && !edge_case;
        let scan = self
            .process_scan_with_reaggregation(tree, send, reagg, join_case)
            .ok_or_else(|| {
                PlanError::internal(format!("no scan of view {} below the send node", self.view_table))
            })?;

        if join_case {
            if !tree.node_type(send_child).is_join() {
                return Err(PlanError::internal("expected a join below the send node"));
            }
            tree.unlink(send, send_child);
            tree.add_child(send, scan);
            match reagg_parent {
                Some(parent) => {
                    tree.replace_child(parent, reagg, send_child);
                }
                None => tree.set_root(send_child),
            }
        }
        Ok(())
    }
}

fn conjoin(terms: Vec<&Expr>) -> Option<Expr> {
    terms.into_iter().cloned().reduce(Expr::and)
}
