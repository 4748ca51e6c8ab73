//! Shapes a single-partition access path into a complete SELECT plan.
//!
//! Order of work per candidate: fragment boundary, aggregation (with
//! push-down), distinct, materialized-view reconciliation, ORDER BY,
//! projection, LIMIT/OFFSET (with push-down).

use tracing::{debug, warn};

use super::compiled::CompiledPlan;
use super::partitioning::StatementPartitioning;
use super::plan::{
    AggregateNode, AggregateStrategy, IndexScanNode, LimitNode, NodeId, OutputColumn, PlanNode,
    PlanNodeKind, PlanNodeType, PlanTree, SortDirection, SortKey,
};
use super::{PlanError, PlanResult};
use crate::config::PlannerSettings;
use crate::expr::{AggregateFunc, Expr};
use crate::statement::{LimitValue, SelectStmt, StmtTableScan};

/// True when some GROUP BY column is the partitioning column of its scan,
/// so every group lives on exactly one partition.
pub fn has_partition_column_in_group_by(stmt: &SelectStmt) -> bool {
    stmt.group_by_columns.iter().any(|g| match &g.expression {
        Expr::Column(col) => stmt
            .scan(&col.table)
            .map(|s| s.partition_columns().iter().any(|p| p.eq_ignore_ascii_case(&col.column)))
            .unwrap_or(false),
        _ => false,
    })
}

pub struct SelectPlanBuilder<'a> {
    stmt: &'a SelectStmt,
    partitioning: &'a StatementPartitioning,
    settings: PlannerSettings,
    group_by_partition_column: bool,
}

impl<'a> SelectPlanBuilder<'a> {
    pub fn new(stmt: &'a SelectStmt, partitioning: &'a StatementPartitioning, settings: PlannerSettings) -> Self {
        Self {
            stmt,
            partitioning,
            settings,
            group_by_partition_column: has_partition_column_in_group_by(stmt),
        }
    }

    /// Completes one candidate. `Ok(None)` rejects the candidate so the
    /// caller can ask the enumerator for the next one.
    pub fn build(&self, mut tree: PlanTree) -> PlanResult<Option<CompiledPlan>> {
        let stmt = self.stmt;
        let multi_table = stmt.scans.len() > 1;
        let mut mv_fix_needed = stmt.mv_fix_needed();
        let mut mv_fix_needs_projection = false;

        if self.partitioning.requires_two_fragments() {
            let mut fix_at_coordinator = true;
            let mut edge_case = false;
            let receives = tree.find_all(PlanNodeType::Receive);
            match receives.as_slice() {
                [] => {
                    let root = tree.root();
                    tree.add_send_receive_pair(root);
                    if multi_table && self.view_scanned_by_inlined_index(&tree) {
                        warn!(sql = %stmt.sql, "Skipping candidate: view reached through an inlined index scan");
                        return Ok(None);
                    }
                }
                [receive] => {
                    if let Some(fix) = stmt.mv_fix.as_ref() {
                        fix_at_coordinator = false;
                        let under_join = tree
                            .parent(*receive)
                            .map(|p| tree.node_type(p) == PlanNodeType::NestLoop)
                            .unwrap_or(false);
                        if under_join {
                            if tree.has_inlined_index_scan_of_table(&fix.view_table) {
                                warn!(sql = %stmt.sql, "Skipping candidate: view reached through an inlined index scan");
                                return Ok(None);
                            }
                            edge_case = tree.find_all_below(*receive, PlanNodeType::NestLoop).is_empty()
                                && tree.find_all_below(*receive, PlanNodeType::NestLoopIndex).is_empty();
                            fix.reconcile(&mut tree, multi_table, edge_case)?;
                        }
                    }
                }
                _ => {
                    return Err(PlanError::planning(
                        "This special case join between an outer replicated table and an inner partitioned table is too complex and is not supported.",
                    ));
                }
            }

            self.handle_aggregation(&mut tree, mv_fix_needed)?;

            if let Some(fix) = stmt.mv_fix.as_ref().filter(|_| fix_at_coordinator) {
                let before = tree.root();
                fix.reconcile(&mut tree, multi_table, edge_case)?;
                mv_fix_needs_projection = tree.root() != before;
            }
        } else {
            mv_fix_needed = false;
            self.handle_aggregation(&mut tree, false)?;
        }

        if stmt.has_complex_agg() {
            let root = tree.root();
            let child = tree
                .child(root, 0)
                .ok_or_else(|| PlanError::internal("projection over a complex aggregate has no input"))?;
            self.handle_order_by(&mut tree, child);
        } else {
            let root = tree.root();
            self.handle_order_by(&mut tree, root);
        }

        if mv_fix_needs_projection || self.need_projection_node(&tree) {
            self.add_projection(&mut tree);
        }

        if stmt.has_limit_or_offset() {
            self.handle_limit(&mut tree, mv_fix_needed);
        }

        let mut plan = CompiledPlan::new(stmt.sql.clone(), tree, true);
        plan.parameters = stmt.parameters.clone();
        plan.statement_guarantees_determinism(stmt.has_limit_or_offset(), stmt.is_order_deterministic());
        Ok(Some(plan))
    }

    fn view_scanned_by_inlined_index(&self, tree: &PlanTree) -> bool {
        self.stmt
            .mv_fix
            .as_ref()
            .map(|fix| tree.has_inlined_index_scan_of_table(&fix.view_table))
            .unwrap_or(false)
    }

    fn need_projection_node(&self, tree: &PlanTree) -> bool {
        match tree.node_type(tree.root()) {
            PlanNodeType::Aggregate
            | PlanNodeType::HashAggregate
            | PlanNodeType::Distinct
            | PlanNodeType::Projection => false,
            // Output columns are already final.
            _ if self.stmt.has_complex_group_by() => false,
            // Top aggregate was elided; the partition aggregate's output is final.
            PlanNodeType::Receive if self.group_by_partition_column => false,
            _ => true,
        }
    }

    /// The final select list, with aggregates replaced by references to the
    /// aggregate node's output.
    fn final_projection(&self) -> PlanNode {
        let stmt = self.stmt;
        PlanNode::projection(
            stmt.display_columns
                .iter()
                .map(|d| OutputColumn::new(d.alias.clone(), stmt.over_aggregate_output(&d.expression)))
                .collect(),
        )
    }

    fn add_projection(&self, tree: &mut PlanTree) {
        let root = tree.root();
        if tree.node_type(root).is_scan() {
            tree.add_inline(root, self.final_projection());
        } else {
            tree.push_above(self.final_projection(), root);
        }
    }

    /// Puts a sort above `node` unless its access path already yields the
    /// requested order. Returns the new top of that subtree.
    fn handle_order_by(&self, tree: &mut PlanTree, node: NodeId) -> NodeId {
        let stmt = self.stmt;
        if !stmt.has_order_by_columns() {
            return node;
        }

        // A serial aggregate keeps its input order.
        let ordered_input = match tree.node_type(node) {
            PlanNodeType::Aggregate => tree.child(node, 0),
            _ => Some(node),
        };
        if let Some(input) = ordered_input {
            if tree.node(input).sort_direction().is_some() {
                debug!(sql = %stmt.sql, "Access path already provides the ORDER BY");
                return node;
            }
        }

        let keys = stmt
            .order_columns
            .iter()
            .map(|o| SortKey {
                expr: stmt.over_aggregate_output(&o.expression),
                direction: if o.ascending {
                    SortDirection::Asc
                } else {
                    SortDirection::Desc
                },
            })
            .collect();
        tree.push_above(PlanNodeKind::OrderBy { keys }.into(), node)
    }

    fn handle_aggregation(&self, tree: &mut PlanTree, mv_fix_needed: bool) -> PlanResult<()> {
        let stmt = self.stmt;

        if stmt.has_aggregate_or_group_by() {
            let index_for_grouping_only = self.use_index_for_group_by(tree);

            let root = tree.root();
            let mut need_hash = stmt.is_grouped();
            if need_hash {
                let node = tree.node(root);
                match &node.kind {
                    PlanNodeKind::IndexScan(ix) if ix.sort_direction.is_none() => {
                        need_hash = !ix.for_grouping_only;
                    }
                    // Rows arrive sorted on the ORDER BY keys.
                    _ if node.sort_direction().is_some() => {
                        need_hash = !stmt.group_by_is_order_by_permutation();
                    }
                    _ => {}
                }
            }

            let (partial_strategy, top_strategy) = match (need_hash, mv_fix_needed) {
                (true, true) => (AggregateStrategy::Hash, None),
                (true, false) if index_for_grouping_only => {
                    (AggregateStrategy::Serial, Some(AggregateStrategy::Hash))
                }
                (true, false) => (AggregateStrategy::Hash, Some(AggregateStrategy::Hash)),
                (false, true) => (AggregateStrategy::Serial, None),
                (false, false) => (AggregateStrategy::Serial, Some(AggregateStrategy::Serial)),
            };

            let (partial, top) = self.split_aggregates()?;
            let top = match (top, top_strategy) {
                (Some(top), Some(strategy)) if self.settings.push_down_aggregates => {
                    Some(PlanNode::aggregate(strategy, top))
                }
                _ => None,
            };
            // Above a receive, merged partition streams are not grouped.
            let below_send = top.is_some() && tree.node_type(tree.root()) == PlanNodeType::Receive;
            let partial_strategy = if need_hash && !below_send {
                AggregateStrategy::Hash
            } else {
                partial_strategy
            };
            self.push_down_aggregate(tree, PlanNode::aggregate(partial_strategy, partial), top)?;
        }

        if stmt.distinct {
            if stmt.is_grouped() {
                if stmt.display_columns_contain_all_group_by_columns() {
                    return Ok(());
                }
            } else if stmt.has_aggregate_expression() {
                return Ok(());
            }
            self.handle_distinct(tree, mv_fix_needed)?;
        }
        Ok(())
    }

    /// Builds the per-partition aggregate and, when every aggregate can be
    /// finished from partial results, its coordinator twin.
    fn split_aggregates(&self) -> PlanResult<(AggregateNode, Option<AggregateNode>)> {
        let stmt = self.stmt;
        let mut partial = AggregateNode::default();
        let mut top = AggregateNode {
            coordinating: true,
            ..AggregateNode::default()
        };
        let mut splittable = true;

        for (i, col) in stmt.agg_result_columns().into_iter().enumerate() {
            let output = Expr::intermediate(col.alias.clone(), col.expression.value_type());
            match &col.expression {
                Expr::Aggregate { func, distinct, arg } => {
                    partial.add_aggregate(*func, *distinct, i, arg.as_deref().cloned());
                    partial.output.push(OutputColumn::new(col.alias.clone(), output.clone()));

                    let finisher = match func {
                        AggregateFunc::Count | AggregateFunc::CountStar | AggregateFunc::Sum => {
                            (!*distinct).then_some(AggregateFunc::Sum)
                        }
                        AggregateFunc::Min | AggregateFunc::Max => Some(*func),
                        AggregateFunc::Avg => None,
                    };
                    match finisher {
                        Some(f) => top.add_aggregate(f, *distinct, i, Some(output.clone())),
                        None => splittable = false,
                    }
                    top.output.push(OutputColumn::new(col.alias, output));
                }
                e if e.contains_aggregate() => {
                    return Err(PlanError::internal(format!(
                        "aggregate output column {} nests an aggregate",
                        col.alias
                    )));
                }
                e => {
                    partial.output.push(OutputColumn::new(col.alias.clone(), e.clone()));
                    let passed = if col.group_by { output } else { e.clone() };
                    top.output.push(OutputColumn::new(col.alias, passed));
                }
            }
        }

        for gb in &stmt.group_by_columns {
            partial.group_by.push(gb.expression.clone());
            top.group_by
                .push(Expr::intermediate(gb.alias.clone(), gb.expression.value_type()));
        }

        Ok((partial, splittable.then_some(top)))
    }

    /// Places the aggregate(s). With a coordinator twin over a receive, the
    /// partial aggregate moves below the send. HAVING goes on whichever
    /// aggregate is final.
    fn push_down_aggregate(&self, tree: &mut PlanTree, mut partial: PlanNode, top: Option<PlanNode>) -> PlanResult<()> {
        let stmt = self.stmt;
        let having = stmt.having.as_ref().map(|h| stmt.over_aggregate_output(h));
        let root = tree.root();

        match top {
            Some(mut top) if tree.node_type(root) == PlanNodeType::Receive => {
                let send = tree
                    .child(root, 0)
                    .ok_or_else(|| PlanError::internal("receive node without a send child"))?;
                let send_child = tree
                    .child(send, 0)
                    .ok_or_else(|| PlanError::internal("send node without a child"))?;
                if self.group_by_partition_column {
                    if let Some(agg) = partial.aggregate_node_mut() {
                        agg.post_predicate = having;
                    }
                    tree.push_above(partial, send_child);
                } else {
                    if let Some(agg) = top.aggregate_node_mut() {
                        agg.post_predicate = having;
                    }
                    tree.push_above(partial, send_child);
                    tree.push_above(top, root);
                }
            }
            _ => {
                if let Some(agg) = partial.aggregate_node_mut() {
                    agg.post_predicate = having;
                }
                tree.push_above(partial, root);
            }
        }

        if stmt.has_complex_agg() {
            let root = tree.root();
            tree.push_above(self.final_projection(), root);
        }
        Ok(())
    }

    /// Replaces a sequential scan feeding the GROUP BY with a grouping-only
    /// index scan. Returns true when the replaced scan sits below a send.
    fn use_index_for_group_by(&self, tree: &mut PlanTree) -> bool {
        if !self.settings.group_by_index_access || !self.stmt.is_grouped() {
            return false;
        }
        let root = tree.root();
        match tree.node_type(root) {
            PlanNodeType::Receive => {
                let Some(send) = tree.child(root, 0) else {
                    return false;
                };
                let Some(candidate) = tree.child(send, 0) else {
                    return false;
                };
                match self.grouping_index_scan(tree.node(candidate)) {
                    Some(index_scan) => {
                        *tree.node_mut(candidate) = index_scan;
                        true
                    }
                    None => false,
                }
            }
            PlanNodeType::SeqScan => {
                if let Some(index_scan) = self.grouping_index_scan(tree.node(root)) {
                    *tree.node_mut(root) = index_scan;
                }
                false
            }
            _ => false,
        }
    }

    fn grouping_index_scan(&self, node: &PlanNode) -> Option<PlanNode> {
        let PlanNodeKind::SeqScan(scan) = &node.kind else {
            return None;
        };
        if scan.subquery {
            return None;
        }
        let gb = &self.stmt.group_by_columns;

        let mut alias: Option<&str> = None;
        for g in gb {
            for col in g.expression.base_columns() {
                match alias {
                    Some(a) if a != col.table => return None,
                    Some(_) => {}
                    None => alias = Some(&col.table),
                }
            }
        }
        let alias = alias?;
        if alias != scan.alias {
            return None;
        }
        let Some(StmtTableScan::Table { table, .. }) = self.stmt.scan(alias) else {
            return None;
        };

        let index = table.indexes.iter().filter(|i| i.is_scannable()).find(|index| {
            if index.is_expression_index() {
                if gb.len() > index.expressions.len() {
                    return false;
                }
                let keys = &index.expressions[..gb.len()];
                gb.iter()
                    .all(|g| keys.iter().any(|k| k.with_table(alias).same_value(&g.expression)))
            } else {
                if gb.len() > index.columns.len() {
                    return false;
                }
                let keys = &index.columns[..gb.len()];
                gb.iter().all(|g| match &g.expression {
                    Expr::Column(col) => {
                        col.table == alias && keys.iter().any(|k| k.eq_ignore_ascii_case(&col.column))
                    }
                    _ => false,
                })
            }
        })?;

        debug!(index = %index.name, table = %table.name, "Using index to feed GROUP BY");
        Some(PlanNode {
            kind: PlanNodeKind::IndexScan(IndexScanNode {
                scan: scan.clone(),
                index: index.name.clone(),
                sort_direction: None,
                for_grouping_only: true,
                search_keys: Vec::new(),
            }),
            inline: node.inline.clone(),
        })
    }

    fn handle_distinct(&self, tree: &mut PlanTree, mv_fix_needed: bool) -> PlanResult<()> {
        let stmt = self.stmt;
        let mut expressions = Vec::with_capacity(stmt.display_columns.len());
        for col in &stmt.display_columns {
            if !matches!(col.expression, Expr::Column(_)) {
                return Err(PlanError::planning("DISTINCT of an expression currently unsupported"));
            }
            expressions.push(stmt.over_aggregate_output(&col.expression));
        }

        let root = tree.root();
        if tree.node_type(root) == PlanNodeType::Receive && !mv_fix_needed {
            let send = tree
                .child(root, 0)
                .ok_or_else(|| PlanError::internal("receive node without a send child"))?;
            let send_child = tree
                .child(send, 0)
                .ok_or_else(|| PlanError::internal("send node without a child"))?;
            tree.push_above(
                PlanNodeKind::Distinct {
                    expressions: expressions.clone(),
                }
                .into(),
                send_child,
            );
        }
        tree.push_above(PlanNodeKind::Distinct { expressions }.into(), root);
        self.add_projection(tree);
        Ok(())
    }

    /// Walks down from the root to the receive; returns the send node when
    /// every node on the way lets a LIMIT move below it.
    fn check_push_down_viability(&self, tree: &PlanTree) -> Option<NodeId> {
        let mut node = tree.root();
        loop {
            match &tree.node(node).kind {
                PlanNodeKind::Receive => return tree.child(node, 0),
                PlanNodeKind::Aggregate(agg) | PlanNodeKind::HashAggregate(agg) if agg.coordinating => {}
                PlanNodeKind::OrderBy { .. } => {
                    if self.stmt.orders_by_aggregate() && !self.group_by_partition_column {
                        return None;
                    }
                }
                PlanNodeKind::Projection { .. } => {}
                _ => return None,
            }
            node = tree.child(node, 0)?;
        }
    }

    fn top_limit(&self) -> PlanNode {
        let lo = self.stmt.limit_offset;
        PlanNode::limit(LimitNode {
            limit: lo.limit,
            offset: lo.offset,
            limit_expr: None,
        })
    }

    /// Per-partition limit covering `limit + offset` rows.
    fn distributed_limit(&self) -> PlanNode {
        let lo = self.stmt.limit_offset;
        let node = match (lo.limit, lo.offset) {
            (Some(LimitValue::Constant(limit)), Some(LimitValue::Constant(offset))) => LimitNode {
                limit: Some(LimitValue::Constant(limit.saturating_add(offset))),
                offset: None,
                limit_expr: None,
            },
            (limit, None) => LimitNode {
                limit,
                offset: None,
                limit_expr: None,
            },
            (limit, Some(offset)) => LimitNode {
                limit,
                offset: None,
                limit_expr: limit.map(|l| l.to_expr().plus(offset.to_expr())),
            },
        };
        PlanNode::limit(node)
    }

    fn handle_limit(&self, tree: &mut PlanTree, mv_fix_needed: bool) {
        let stmt = self.stmt;
        let send = if stmt.distinct || mv_fix_needed || !self.settings.push_down_limits {
            None
        } else {
            self.check_push_down_viability(tree)
                .filter(|_| stmt.limit_offset.can_push_down())
        };

        if let Some(send) = send {
            if let Some(distributed) = tree.child(send, 0) {
                let top = self.handle_order_by(tree, distributed);
                if tree.node_type(top) == PlanNodeType::OrderBy {
                    tree.add_inline(top, self.distributed_limit());
                } else {
                    tree.push_above(self.distributed_limit(), top);
                }
                debug!(sql = %stmt.sql, "Pushed LIMIT below the send node");
            }
        }

        let root = tree.root();
        if stmt.has_complex_agg() {
            match tree.child(root, 0) {
                Some(child) if tree.node_type(child) == PlanNodeType::OrderBy => {
                    tree.add_inline(child, self.top_limit());
                }
                Some(child) => {
                    tree.push_above(self.top_limit(), child);
                }
                None => {
                    tree.push_above(self.top_limit(), root);
                }
            }
            return;
        }

        match tree.node_type(root) {
            PlanNodeType::OrderBy => tree.add_inline(root, self.top_limit()),
            PlanNodeType::Projection => match tree.child(root, 0) {
                Some(child) if tree.node_type(child) == PlanNodeType::OrderBy => {
                    tree.add_inline(child, self.top_limit());
                }
                _ => {
                    tree.push_above(self.top_limit(), root);
                }
            },
            _ => {
                tree.push_above(self.top_limit(), root);
            }
        }
    }
}
