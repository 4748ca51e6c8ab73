//! Partitioning conclusions for one statement.
//!
//! A statement either runs on a single partition (asserted by the caller, or
//! inferred because every partitioned table is pinned to one constant or
//! parameter value) or needs two fragments: per-partition work below a
//! send/receive pair and coordinator work above it.

use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::{PlanError, PlanResult};
use crate::expr::Expr;
use crate::statement::{StmtTableScan, ValueEquivalence};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementPartitioning {
    /// Caller asserted single-partition execution.
    specified_single: bool,
    /// Value every partitioned table is pinned to, when one was found.
    inferred_expression: Option<Expr>,
    /// `table.column` the inferred value was bound to.
    inferred_column: Option<String>,
    is_dml: bool,
    replicated_dml: bool,
    dml_partition_column: Option<String>,
    partitioned_table_count: usize,
    independent_count: usize,
}

impl StatementPartitioning {
    /// Let the planner decide, based on the statement's filters.
    pub fn infer() -> Self {
        Self::default()
    }

    /// The caller guarantees the statement runs on one partition.
    pub fn single_partition() -> Self {
        Self {
            specified_single: true,
            ..Self::default()
        }
    }

    pub fn was_specified_as_single(&self) -> bool {
        self.specified_single
    }

    pub fn is_dml(&self) -> bool {
        self.is_dml
    }

    pub fn set_is_dml(&mut self) {
        self.is_dml = true;
    }

    pub fn is_replicated_dml(&self) -> bool {
        self.replicated_dml
    }

    /// Pinned to a single partition by an equality on the partitioning
    /// column. Replicated-table writes are never single: every partition
    /// holds a copy.
    pub fn is_inferred_single(&self) -> bool {
        if self.specified_single || self.replicated_dml {
            return false;
        }
        self.partitioned_table_count == 0
            || self
                .inferred_expression
                .as_ref()
                .map(Expr::is_constant_or_parameter)
                .unwrap_or(false)
    }

    pub fn requires_two_fragments(&self) -> bool {
        !self.specified_single
            && !self.is_inferred_single()
            && (self.partitioned_table_count > 0 || self.replicated_dml)
    }

    /// The pinning value, if a single one was found.
    pub fn partitioning_expression(&self) -> Option<&Expr> {
        self.inferred_expression.as_ref()
    }

    /// Value routing a single-partition statement, when it is a constant or
    /// parameter.
    pub fn single_partitioning_expression(&self) -> Option<&Expr> {
        self.inferred_expression
            .as_ref()
            .filter(|e| e.is_constant_or_parameter())
    }

    pub fn partition_column(&self) -> Option<&str> {
        self.inferred_column.as_deref()
    }

    pub fn dml_partition_column(&self) -> Option<&str> {
        self.dml_partition_column.as_deref()
    }

    pub fn set_dml_partition_column(&mut self, column: impl Into<String>) {
        self.dml_partition_column = Some(column.into());
    }

    pub fn partitioned_table_count(&self) -> usize {
        self.partitioned_table_count
    }

    pub fn independent_count(&self) -> usize {
        self.independent_count
    }

    /// Records the value bound to the partitioning column (an INSERT's
    /// supplied value, for instance).
    pub fn add_partitioning_expression(&mut self, column: impl Into<String>, expr: Expr) {
        self.inferred_column = Some(column.into());
        self.inferred_expression = Some(expr);
    }

    /// Counts the partitioned scans. Resets any earlier analysis so a cloned
    /// context can be re-analyzed for a child statement.
    pub fn analyze_table_partitioning(&mut self, scans: &[StmtTableScan], target_replicated: bool) {
        self.partitioned_table_count = scans.iter().filter(|s| !s.is_replicated()).count();
        self.independent_count = self.partitioned_table_count;
        self.replicated_dml = self.is_dml && target_replicated;
        if !self.is_dml {
            self.inferred_expression = None;
            self.inferred_column = None;
        }
    }

    /// Groups partitioned scans joined on their partitioning columns and
    /// looks for a single constant or parameter they are all pinned to.
    ///
    /// `subqueries` holds the already analyzed partitioning of each
    /// sub-query scan, keyed by alias.
    pub fn analyze_for_multi_partition_access(
        &mut self,
        scans: &[StmtTableScan],
        equivalence: &ValueEquivalence,
        subqueries: &HashMap<String, StatementPartitioning>,
    ) -> PlanResult<()> {
        let partitioned: Vec<&StmtTableScan> = scans.iter().filter(|s| !s.is_replicated()).collect();
        let mut sets = UnionFind::<usize>::new(partitioned.len());
        let mut found: Option<(String, Expr)> = None;

        for (i, scan) in partitioned.iter().enumerate() {
            if let StmtTableScan::Subquery { alias, .. } = scan {
                if let Some(pinned) = subqueries
                    .get(alias)
                    .and_then(|p| p.single_partitioning_expression())
                {
                    match &found {
                        Some((_, value)) if !value.same_value(pinned) => {
                            return Err(PlanError::planning(
                                "Statements use conflicting partitioned table filters in set operation or sub-query.",
                            ));
                        }
                        Some(_) => {}
                        None => found = Some((alias.clone(), pinned.clone())),
                    }
                }
            }

            for column in scan.partition_columns() {
                for other in equivalence.equivalents_of_column(scan.alias(), &column) {
                    match other {
                        e if e.is_constant_or_parameter() => {
                            if found.is_none() {
                                found = Some((format!("{}.{}", scan.alias(), column), e.clone()));
                            }
                        }
                        Expr::Column(col) => {
                            let joined = partitioned.iter().position(|s| {
                                s.alias() == col.table && s.partition_columns().contains(&col.column)
                            });
                            if let Some(j) = joined {
                                sets.union(i, j);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        self.independent_count = sets.into_labeling().into_iter().collect::<HashSet<_>>().len();
        if self.independent_count == 1 {
            if let Some((column, value)) = found {
                self.inferred_column = Some(column);
                self.inferred_expression = Some(value);
            }
        }
        Ok(())
    }
}
