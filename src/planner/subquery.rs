//! FROM-clause sub-queries.
//!
//! Each sub-query is planned once, before its parent, as an independent
//! statement. Its coordinator boundary is stripped because the parent adds
//! its own; after the parent's winner is chosen the cached sub-plan is
//! grafted beneath the placeholder scan that stands for it.

use std::collections::HashMap;

use tracing::debug;

use super::assembler::PlanAssembler;
use super::compiled::CompiledPlan;
use super::plan::{PlanNodeKind, PlanNodeType, PlanTree};
use super::{PlanError, PlanResult};
use crate::statement::ParsedStatement;

/// Determinism facts gathered from all sub-queries of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubqueryDeterminism {
    /// Every sub-query produces rows in a deterministic order.
    pub order_deterministic: bool,
    /// Some sub-query cuts an unordered result with LIMIT/OFFSET.
    pub has_significant_limit_or_offset: bool,
}

impl Default for SubqueryDeterminism {
    fn default() -> Self {
        Self {
            order_deterministic: true,
            has_significant_limit_or_offset: false,
        }
    }
}

impl SubqueryDeterminism {
    fn absorb(&mut self, plan: &CompiledPlan) {
        self.order_deterministic &= plan.is_order_deterministic();
        self.has_significant_limit_or_offset |= !plan.is_order_deterministic() && plan.has_limit_or_offset();
    }
}

/// Removes the send/receive pair from a sub-query plan, keeping what ran
/// below the send.
pub fn strip_send_receive(tree: &mut PlanTree) -> PlanResult<()> {
    for receive in tree.find_all(PlanNodeType::Receive) {
        let send = tree
            .child(receive, 0)
            .filter(|s| tree.node_type(*s) == PlanNodeType::Send)
            .ok_or_else(|| PlanError::internal("receive node without a send child"))?;
        let below = tree
            .child(send, 0)
            .ok_or_else(|| PlanError::internal("send node without a child"))?;
        tree.unlink(send, below);
        match tree.parent(receive) {
            Some(parent) => {
                tree.replace_child(parent, receive, below);
            }
            None => tree.set_root(below),
        }
    }
    Ok(())
}

/// Grafts each cached sub-plan beneath the scan that reads it.
pub fn attach_subquery_plans(tree: &mut PlanTree, plans: &HashMap<String, CompiledPlan>) -> PlanResult<()> {
    let root = tree.root();
    let placeholders: Vec<_> = tree
        .preorder(root)
        .into_iter()
        .filter_map(|id| match &tree.node(id).kind {
            PlanNodeKind::SeqScan(scan) if scan.subquery => Some((id, scan.alias.clone())),
            _ => None,
        })
        .collect();

    for (scan, alias) in placeholders {
        let plan = plans
            .get(&alias)
            .ok_or_else(|| PlanError::internal(format!("no plan for sub-query {}", alias)))?;
        tree.graft(scan, &plan.tree);
    }
    Ok(())
}

impl PlanAssembler<'_> {
    /// Plans every sub-query scan of `stmt` in FROM-clause order, caching
    /// the stripped winners and their partitioning for the parent.
    pub(super) fn plan_subqueries(&mut self, stmt: &ParsedStatement) -> PlanResult<SubqueryDeterminism> {
        let mut determinism = SubqueryDeterminism::default();

        for (alias, subquery) in stmt.subquery_scans() {
            let mut child = self.child_assembler();
            let mut plan = child.plan_statement(subquery).map_err(|e| match e {
                PlanError::NoValidPlans => {
                    PlanError::planning("Unable to plan for subquery statement. Error unknown.")
                }
                other => other,
            })?;
            self.selector.set_plan_id(child.selector.plan_id());

            strip_send_receive(&mut plan.tree)?;
            determinism.absorb(&plan);
            debug!(
                alias,
                plan_id = plan.plan_id,
                cost = plan.cost.unwrap_or_default(),
                "Planned sub-query"
            );
            self.subquery_partitioning.insert(alias.to_string(), child.partitioning);
            self.subquery_plans.insert(alias.to_string(), plan);
        }
        Ok(determinism)
    }
}
