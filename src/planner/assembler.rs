//! Plan assembly orchestration.
//!
//! One [`PlanAssembler`] plans one statement. Set-operation children and
//! sub-queries are planned by child assemblers that receive a clone of the
//! parent's partitioning and a fork of its selector, so siblings never see
//! each other's conclusions.

use std::collections::HashMap;

use tracing::{debug, error};

use super::access_path::AccessPathProvider;
use super::compiled::CompiledPlan;
use super::dml;
use super::join_simplifier;
use super::partitioning::StatementPartitioning;
use super::select::SelectPlanBuilder;
use super::selector::PlanSelector;
use super::subquery::{attach_subquery_plans, SubqueryDeterminism};
use super::{PlanError, PlanResult};
use crate::catalog::Table;
use crate::config::PlannerSettings;
use crate::statement::{ParsedStatement, SelectStmt, StmtTableScan};

pub struct PlanAssembler<'a> {
    access_paths: &'a dyn AccessPathProvider,
    pub(super) selector: Box<dyn PlanSelector>,
    pub(super) partitioning: StatementPartitioning,
    settings: PlannerSettings,
    /// First failure of this planning call.
    error: Option<PlanError>,
    /// Stripped best plans of FROM-clause sub-queries, keyed by alias.
    pub(super) subquery_plans: HashMap<String, CompiledPlan>,
    pub(super) subquery_partitioning: HashMap<String, StatementPartitioning>,
}

impl<'a> PlanAssembler<'a> {
    pub fn new(
        access_paths: &'a dyn AccessPathProvider,
        selector: Box<dyn PlanSelector>,
        partitioning: StatementPartitioning,
    ) -> Self {
        Self {
            access_paths,
            selector,
            partitioning,
            settings: PlannerSettings::default(),
            error: None,
            subquery_plans: HashMap::new(),
            subquery_partitioning: HashMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: PlannerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Partitioning conclusions after planning.
    pub fn partitioning(&self) -> &StatementPartitioning {
        &self.partitioning
    }

    /// Message of the first failure, if planning failed.
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub fn last_error(&self) -> Option<&PlanError> {
        self.error.as_ref()
    }

    /// Best plan for `stmt`, or `None` with the failure recorded in
    /// [`error_message`](Self::error_message).
    pub fn best_cost_plan(&mut self, stmt: &ParsedStatement) -> Option<CompiledPlan> {
        match self.plan_statement(stmt) {
            Ok(plan) => Some(plan),
            Err(e) => {
                if let PlanError::Internal(message) = &e {
                    error!(sql = stmt.sql(), message = %message, "Planning aborted");
                } else {
                    debug!(sql = stmt.sql(), error = %e, "No plan produced");
                }
                if self.error.is_none() {
                    self.error = Some(e);
                }
                None
            }
        }
    }

    /// Hands the finished winner to the selector's output stage.
    pub fn finalize_best_cost_plan(&mut self) -> PlanResult<()> {
        self.selector.finalize_output()
    }

    /// Fresh assembler for a sub-query or set-operation child.
    pub(super) fn child_assembler(&self) -> PlanAssembler<'a> {
        PlanAssembler {
            access_paths: self.access_paths,
            selector: self.selector.fork(),
            partitioning: self.partitioning.clone(),
            settings: self.settings,
            error: None,
            subquery_plans: HashMap::new(),
            subquery_partitioning: HashMap::new(),
        }
    }

    /// Plans `stmt` and returns a copy of the selector's winner.
    pub fn plan_statement(&mut self, stmt: &ParsedStatement) -> PlanResult<CompiledPlan> {
        let subqueries = if stmt.subquery_scans().is_empty() {
            None
        } else {
            Some(self.plan_subqueries(stmt)?)
        };

        self.setup_for_new_plans(stmt)?;
        let simplified = self.simplify_joins(stmt);
        let stmt = simplified.as_ref().unwrap_or(stmt);

        self.consider_candidates(stmt)?;

        let best = self.selector.best_plan_mut().ok_or(PlanError::NoValidPlans)?;
        if let Some(sub) = subqueries {
            apply_subquery_determinism(best, stmt, sub);
            attach_subquery_plans(&mut best.tree, &self.subquery_plans)?;
        }
        Ok(best.clone())
    }

    /// Classifies the statement, rejects illegal operations and analyzes
    /// partitioning.
    fn setup_for_new_plans(&mut self, stmt: &ParsedStatement) -> PlanResult<()> {
        let scans = stmt.table_scans();
        match stmt {
            ParsedStatement::Union(_) => {
                self.partitioning.analyze_table_partitioning(&scans, false);
                Ok(())
            }
            ParsedStatement::Select(_) => {
                if own_tables(&scans).any(|t| t.export_only) {
                    return Err(PlanError::planning("Illegal to read an export table."));
                }
                self.partitioning.analyze_table_partitioning(&scans, false);
                if !self.partitioning.was_specified_as_single() {
                    let equivalence = stmt.analyze_value_equivalence();
                    self.partitioning
                        .analyze_for_multi_partition_access(&scans, &equivalence, &self.subquery_partitioning)?;
                    if self.partitioning.independent_count() > 1 {
                        return Err(PlanError::planning(
                            "Join of multiple partitioned tables has insufficient join criteria.",
                        ));
                    }
                }
                Ok(())
            }
            ParsedStatement::Insert(_) | ParsedStatement::Update(_) | ParsedStatement::Delete(_) => {
                let table = stmt
                    .target_table()
                    .ok_or_else(|| PlanError::internal("write statement without a target table"))?;
                if table.is_materialized_view() {
                    return Err(PlanError::planning("Illegal to modify a materialized view."));
                }

                self.partitioning.set_is_dml();
                let specified_single = self.partitioning.was_specified_as_single();
                if table.is_replicated() {
                    if specified_single {
                        return Err(PlanError::planning(format!(
                            "Trying to write to replicated table '{}' in a single-partition procedure.",
                            table.name
                        )));
                    }
                } else if !specified_single {
                    if let Some(column) = &table.partition_column {
                        self.partitioning.set_dml_partition_column(column.clone());
                    }
                }
                self.partitioning
                    .analyze_table_partitioning(&scans, table.is_replicated());

                match stmt {
                    ParsedStatement::Update(_) if table.export_only => {
                        return Err(PlanError::planning("Illegal to update an export table."));
                    }
                    ParsedStatement::Delete(_) if table.export_only => {
                        return Err(PlanError::planning("Illegal to delete from an export table."));
                    }
                    ParsedStatement::Insert(_) => return Ok(()),
                    _ => {}
                }
                if !specified_single {
                    let equivalence = stmt.analyze_value_equivalence();
                    self.partitioning
                        .analyze_for_multi_partition_access(&scans, &equivalence, &HashMap::new())?;
                }
                Ok(())
            }
        }
    }

    /// Select statements with a join tree get their outer joins normalized
    /// (and simplified, when enabled) on a private copy.
    fn simplify_joins(&self, stmt: &ParsedStatement) -> Option<ParsedStatement> {
        let ParsedStatement::Select(select) = stmt else {
            return None;
        };
        let join_tree = select.join_tree.as_ref()?;
        let mut join_tree = join_tree.clone();
        if self.settings.simplify_outer_joins {
            join_simplifier::simplify(&mut join_tree);
        } else {
            join_tree.normalize_right_joins();
        }
        Some(ParsedStatement::Select(SelectStmt {
            join_tree: Some(join_tree),
            ..select.clone()
        }))
    }

    /// Pulls every candidate, completes it and offers it to the selector.
    fn consider_candidates(&mut self, stmt: &ParsedStatement) -> PlanResult<()> {
        match stmt {
            ParsedStatement::Insert(insert) => {
                let plan = dml::insert_plan(insert, &mut self.partitioning)?;
                self.selector.consider_candidate(plan, stmt);
                return Ok(());
            }
            ParsedStatement::Union(union) => {
                let plan = self.union_plan(union)?;
                self.selector.consider_candidate(plan, stmt);
                return Ok(());
            }
            _ => {}
        }

        let provider = self.access_paths;
        let mut paths = provider.enumerator(stmt, &self.partitioning);
        let mut produced = 0usize;
        let select = match stmt {
            ParsedStatement::Select(select) => Some(SelectPlanBuilder::new(select, &self.partitioning, self.settings)),
            _ => None,
        };

        while let Some(tree) = paths.next_plan() {
            let plan = match (stmt, &select) {
                (ParsedStatement::Select(_), Some(builder)) => builder.build(tree)?,
                (ParsedStatement::Update(update), _) => dml::update_plan(update, tree, &self.partitioning)?,
                (ParsedStatement::Delete(delete), _) => dml::delete_plan(delete, tree, &self.partitioning)?,
                _ => return Err(PlanError::internal(format!("unexpected {} candidate", stmt.kind()))),
            };
            match plan {
                Some(plan) => {
                    produced += 1;
                    self.selector.consider_candidate(plan, stmt);
                }
                None => debug!(sql = stmt.sql(), "Candidate skipped"),
            }
        }

        if produced == 0 {
            return Err(paths
                .error_message()
                .map(PlanError::Planning)
                .unwrap_or(PlanError::NoValidPlans));
        }
        Ok(())
    }
}

fn own_tables(scans: &[StmtTableScan]) -> impl Iterator<Item = &Table> {
    scans.iter().filter_map(|scan| match scan {
        StmtTableScan::Table { table, .. } => Some(table),
        StmtTableScan::Subquery { .. } => None,
    })
}

/// Folds sub-query determinism into the parent's winner. An unordered
/// sub-query keeps the parent ordered only when the parent's own ORDER BY
/// pins every row.
fn apply_subquery_determinism(best: &mut CompiledPlan, stmt: &ParsedStatement, sub: SubqueryDeterminism) {
    let order_deterministic = if sub.order_deterministic {
        best.is_order_deterministic()
    } else {
        best.is_order_deterministic()
            && match stmt {
                ParsedStatement::Select(select) => select.is_order_deterministic_in_spite_of_unordered_subqueries(),
                _ => false,
            }
    };
    let has_limit_or_offset = sub.has_significant_limit_or_offset || best.has_limit_or_offset();
    best.statement_guarantees_determinism(has_limit_or_offset, order_deterministic);
}
