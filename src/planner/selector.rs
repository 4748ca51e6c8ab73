//! Best-plan bookkeeping.

use std::fs;
use std::sync::Arc;

use tracing::{debug, info};

use super::compiled::CompiledPlan;
use super::cost::CostEstimator;
use super::{PlanError, PlanResult};
use crate::catalog::Catalog;
use crate::config::OutputSettings;
use crate::statement::ParsedStatement;

/// Scores candidates and keeps the best one.
///
/// The plan-id sequence is shared across a statement and every sub-query or
/// set-operation child: a child works on a [`fork`](PlanSelector::fork) and
/// the parent picks up the child's final id afterwards.
pub trait PlanSelector {
    /// Assigns the next plan id, costs the plan if it has no cost yet and
    /// keeps it if it beats the current best.
    fn consider_candidate(&mut self, plan: CompiledPlan, statement: &ParsedStatement);

    fn best_plan(&self) -> Option<&CompiledPlan>;

    fn best_plan_mut(&mut self) -> Option<&mut CompiledPlan>;

    fn take_best_plan(&mut self) -> Option<CompiledPlan>;

    /// Last plan id handed out.
    fn plan_id(&self) -> u64;

    fn set_plan_id(&mut self, plan_id: u64);

    /// Fresh selector for a child statement, continuing this id sequence.
    fn fork(&self) -> Box<dyn PlanSelector>;

    /// Called once the winner is complete.
    fn finalize_output(&mut self) -> PlanResult<()>;
}

/// Default selector: lowest [`CostEstimator`] total wins, ties keep the
/// earlier candidate.
pub struct CostBasedSelector {
    catalog: Arc<Catalog>,
    output: OutputSettings,
    plan_id: u64,
    best: Option<CompiledPlan>,
}

impl CostBasedSelector {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            output: OutputSettings::default(),
            plan_id: 0,
            best: None,
        }
    }

    pub fn with_output(mut self, output: OutputSettings) -> Self {
        self.output = output;
        self
    }

    fn write_plan(&self, plan: &CompiledPlan) -> PlanResult<()> {
        let dir = self
            .output
            .resolved_plan_dir()
            .map_err(|e| PlanError::internal(e.to_string()))?;
        let Some(dir) = dir else {
            return Ok(());
        };
        let name = plan
            .sql_fingerprint()
            .map_err(|e| PlanError::internal(e.to_string()))?;
        let json = serde_json::to_string_pretty(plan).map_err(|e| PlanError::internal(e.to_string()))?;
        let path = dir.join(format!("{}.json", name));
        fs::create_dir_all(&dir)
            .and_then(|_| fs::write(&path, json))
            .map_err(|e| PlanError::internal(format!("failed to write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Wrote plan");
        Ok(())
    }
}

impl PlanSelector for CostBasedSelector {
    fn consider_candidate(&mut self, mut plan: CompiledPlan, statement: &ParsedStatement) {
        self.plan_id += 1;
        plan.plan_id = self.plan_id;
        let cost = match plan.cost {
            Some(cost) => cost,
            None => {
                let cost = CostEstimator::new(&self.catalog).estimate(&plan.tree).total();
                plan.cost = Some(cost);
                cost
            }
        };

        let better = match self.best.as_ref().and_then(|b| b.cost) {
            Some(best) => cost < best,
            None => true,
        };
        debug!(
            plan_id = plan.plan_id,
            cost,
            better,
            sql = statement.sql(),
            "Considered candidate plan"
        );
        if better {
            self.best = Some(plan);
        }
    }

    fn best_plan(&self) -> Option<&CompiledPlan> {
        self.best.as_ref()
    }

    fn best_plan_mut(&mut self) -> Option<&mut CompiledPlan> {
        self.best.as_mut()
    }

    fn take_best_plan(&mut self) -> Option<CompiledPlan> {
        self.best.take()
    }

    fn plan_id(&self) -> u64 {
        self.plan_id
    }

    fn set_plan_id(&mut self, plan_id: u64) {
        self.plan_id = plan_id;
    }

    fn fork(&self) -> Box<dyn PlanSelector> {
        Box::new(CostBasedSelector {
            catalog: Arc::clone(&self.catalog),
            output: OutputSettings::default(),
            plan_id: self.plan_id,
            best: None,
        })
    }

    fn finalize_output(&mut self) -> PlanResult<()> {
        let Some(best) = self.best.as_ref() else {
            return Ok(());
        };
        info!(
            plan_id = best.plan_id,
            cost = best.cost.unwrap_or_default(),
            sql = %best.sql,
            "Selected best plan"
        );
        self.write_plan(best)
    }
}
