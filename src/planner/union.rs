//! Set operations.

use tracing::debug;

use super::assembler::PlanAssembler;
use super::compiled::CompiledPlan;
use super::partitioning::StatementPartitioning;
use super::plan::{PlanNodeKind, PlanTree};
use super::{PlanError, PlanResult};
use crate::statement::UnionStmt;

const TOO_COMPLEX: &str = "Statements are too complex in set operation using multiple partitioned tables.";
const CONFLICTING_FILTERS: &str =
    "Statements use conflicting partitioned table filters in set operation or sub-query.";

/// Folds one child's partitioning into the common conclusion.
///
/// At most one child may need two fragments, and all children pinned to a
/// single partition must agree on the partitioning value.
pub fn merge_child_partitioning(
    common: &mut Option<StatementPartitioning>,
    child: StatementPartitioning,
) -> PlanResult<()> {
    let Some(current) = common.as_ref() else {
        *common = Some(child);
        return Ok(());
    };

    if current.requires_two_fragments() {
        if child.requires_two_fragments() || child.single_partitioning_expression().is_some() {
            return Err(PlanError::planning(TOO_COMPLEX));
        }
        return Ok(());
    }

    let Some(current_value) = current.single_partitioning_expression() else {
        *common = Some(child);
        return Ok(());
    };
    if child.requires_two_fragments() {
        return Err(PlanError::planning(TOO_COMPLEX));
    }
    match child.single_partitioning_expression() {
        Some(value) if !value.same_value(current_value) => Err(PlanError::planning(CONFLICTING_FILTERS)),
        _ => Ok(()),
    }
}

impl PlanAssembler<'_> {
    /// The only plan for a set operation: each child's best plan beneath a
    /// union node.
    pub(super) fn union_plan(&mut self, stmt: &UnionStmt) -> PlanResult<CompiledPlan> {
        let mut children = Vec::with_capacity(stmt.children.len());
        let mut common = None;

        for child_stmt in &stmt.children {
            let mut child = self.child_assembler();
            let plan = child.plan_statement(child_stmt).map_err(|e| match e {
                PlanError::NoValidPlans => PlanError::planning("Unable to plan for statement. Error unknown."),
                other => other,
            })?;
            self.selector.set_plan_id(child.selector.plan_id());
            merge_child_partitioning(&mut common, child.partitioning)?;
            children.push(plan);
        }
        if let Some(common) = common {
            self.partitioning = common;
        }

        let mut tree = PlanTree::new(PlanNodeKind::Union { kind: stmt.kind }.into());
        let root = tree.root();
        let mut cost = 0.0;
        let mut has_limit_or_offset = false;
        let mut order_deterministic = true;
        for child in &children {
            tree.graft(root, &child.tree);
            cost += child.cost.unwrap_or_default();
            has_limit_or_offset |= child.has_limit_or_offset();
            order_deterministic &= child.is_order_deterministic();
        }
        debug!(sql = %stmt.sql, children = children.len(), cost, "Assembled set operation");

        let mut plan = CompiledPlan::new(stmt.sql.clone(), tree, true);
        plan.cost = Some(cost);
        plan.parameters = stmt.parameters.clone();
        plan.statement_guarantees_determinism(has_limit_or_offset, order_deterministic);
        Ok(plan)
    }
}
