//! Cost estimation for plan trees.

use crate::catalog::Catalog;
use crate::expr::{BinaryOp, Expr};
use crate::planner::plan::{LimitNode, NodeId, PlanNode, PlanNodeKind, PlanTree};
use crate::statement::LimitValue;

/// Row count assumed for tables the catalog knows nothing about.
const DEFAULT_ROW_COUNT: usize = 1_000_000;

/// Multi-objective cost estimate with component breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    /// Estimated number of output rows
    pub rows_out: usize,
    /// CPU cost component
    pub cpu_cost: f64,
    /// I/O cost component (weighted higher)
    pub io_cost: f64,
    /// Memory cost component (weighted lower)
    pub memory_cost: f64,
}

impl CostEstimate {
    /// Calculate total weighted cost.
    ///
    /// Weights: CPU = 1.0, IO = 10.0, Memory = 0.1
    pub fn total(&self) -> f64 {
        (self.cpu_cost * 1.0) + (self.io_cost * 10.0) + (self.memory_cost * 0.1)
    }

    fn zero() -> Self {
        Self {
            rows_out: 0,
            cpu_cost: 0.0,
            io_cost: 0.0,
            memory_cost: 0.0,
        }
    }

    fn add(&self, other: &CostEstimate) -> Self {
        Self {
            rows_out: self.rows_out + other.rows_out,
            cpu_cost: self.cpu_cost + other.cpu_cost,
            io_cost: self.io_cost + other.io_cost,
            memory_cost: self.memory_cost + other.memory_cost,
        }
    }
}

pub struct CostEstimator<'a> {
    catalog: &'a Catalog,
}

impl<'a> CostEstimator<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Estimate the whole reachable tree.
    pub fn estimate(&self, plan: &PlanTree) -> CostEstimate {
        self.estimate_node(plan, plan.root())
    }

    fn estimate_node(&self, plan: &PlanTree, id: NodeId) -> CostEstimate {
        let inputs: Vec<CostEstimate> = plan
            .children(id)
            .into_iter()
            .map(|child| self.estimate_node(plan, child))
            .collect();
        let node = plan.node(id);
        let input = inputs
            .iter()
            .fold(CostEstimate::zero(), |acc, c| acc.add(c));

        let mut estimate = match &node.kind {
            PlanNodeKind::SeqScan(scan) => {
                // Sub-query placeholders are costed by their own plan.
                if scan.subquery && !inputs.is_empty() {
                    input
                } else {
                    let rows = self.row_count(&scan.table);
                    let selectivity = scan
                        .predicate
                        .as_ref()
                        .map(|p| self.estimate_filter_selectivity(p))
                        .unwrap_or(1.0);
                    CostEstimate {
                        rows_out: ((rows as f64) * selectivity) as usize,
                        cpu_cost: rows as f64,
                        io_cost: rows as f64,
                        memory_cost: 0.0,
                    }
                }
            }
            PlanNodeKind::IndexScan(ix) => {
                let rows = self.row_count(&ix.scan.table);
                let mut selectivity = if ix.search_keys.is_empty() { 1.0 } else { 0.1 };
                if let Some(p) = &ix.scan.predicate {
                    selectivity *= self.estimate_filter_selectivity(p);
                }
                CostEstimate {
                    rows_out: ((rows as f64) * selectivity) as usize,
                    cpu_cost: (rows as f64) * selectivity,
                    // 10% of rows
                    io_cost: (rows as f64) * 0.1,
                    memory_cost: 0.0,
                }
            }
            PlanNodeKind::NestLoop(_) => {
                let (left, right) = (first(&inputs), second(&inputs));
                let rows_out = left.rows_out.max(right.rows_out);
                CostEstimate {
                    rows_out,
                    // nested loop = left * right comparisons
                    cpu_cost: left.cpu_cost
                        + right.cpu_cost
                        + (left.rows_out as f64 * right.rows_out as f64),
                    io_cost: left.io_cost + right.io_cost,
                    memory_cost: 0.0,
                }
            }
            PlanNodeKind::NestLoopIndex(_) => {
                let outer = first(&inputs);
                let inner_rows = node
                    .inline
                    .iter()
                    .find_map(|n| n.scan())
                    .map(|s| self.row_count(&s.table))
                    .unwrap_or(DEFAULT_ROW_COUNT);
                let probe = (inner_rows.max(2) as f64).log2();
                CostEstimate {
                    rows_out: outer.rows_out,
                    cpu_cost: outer.cpu_cost + (outer.rows_out as f64) * probe,
                    io_cost: outer.io_cost + (outer.rows_out as f64) * probe * 0.1,
                    memory_cost: 0.0,
                }
            }
            PlanNodeKind::Aggregate(agg) | PlanNodeKind::HashAggregate(agg) => {
                let rows_out = Self::estimate_group_cardinality(&input, agg.group_by.len());
                let hashed = matches!(node.kind, PlanNodeKind::HashAggregate(_));
                CostEstimate {
                    rows_out,
                    cpu_cost: input.cpu_cost + (input.rows_out as f64),
                    io_cost: input.io_cost,
                    // hash table for groups
                    memory_cost: input.memory_cost + if hashed { rows_out as f64 } else { 0.0 },
                }
            }
            PlanNodeKind::Distinct { .. } => CostEstimate {
                rows_out: Self::estimate_group_cardinality(&input, 1),
                cpu_cost: input.cpu_cost + (input.rows_out as f64),
                io_cost: input.io_cost,
                memory_cost: input.memory_cost + input.rows_out as f64,
            },
            PlanNodeKind::OrderBy { .. } => {
                let n = input.rows_out.max(1) as f64;
                CostEstimate {
                    rows_out: input.rows_out,
                    // O(n log n)
                    cpu_cost: input.cpu_cost + n * n.log2().max(1.0),
                    io_cost: input.io_cost,
                    memory_cost: input.memory_cost + n,
                }
            }
            PlanNodeKind::Limit(limit) => CostEstimate {
                rows_out: Self::apply_limit(input.rows_out, limit),
                ..input
            },
            PlanNodeKind::Union { .. } => input,
            PlanNodeKind::Projection { .. }
            | PlanNodeKind::Materialize { .. }
            | PlanNodeKind::Send
            | PlanNodeKind::Receive
            | PlanNodeKind::Insert { .. }
            | PlanNodeKind::Update { .. }
            | PlanNodeKind::Delete { .. } => input,
        };

        // An inline limit caps what its host emits.
        if let Some(PlanNode {
            kind: PlanNodeKind::Limit(limit),
            ..
        }) = node.inline.iter().find(|n| matches!(n.kind, PlanNodeKind::Limit(_)))
        {
            estimate.rows_out = Self::apply_limit(estimate.rows_out, limit);
        }
        estimate
    }

    /// Actual row count if the catalog has one, otherwise 1 million.
    fn row_count(&self, table: &str) -> usize {
        self.catalog
            .table(table)
            .and_then(|t| t.estimated_rows)
            .map(|rows| rows as usize)
            .unwrap_or(DEFAULT_ROW_COUNT)
    }

    /// Fraction of rows that pass `predicate`, between 0.0 and 1.0.
    pub fn estimate_filter_selectivity(&self, predicate: &Expr) -> f64 {
        match predicate {
            Expr::BinaryOp { op, left, right } => match op {
                BinaryOp::Eq => 0.1,
                BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Gte | BinaryOp::Lte => 0.33,
                BinaryOp::And => {
                    let left_sel = self.estimate_filter_selectivity(left);
                    let right_sel = self.estimate_filter_selectivity(right);
                    left_sel * right_sel
                }
                BinaryOp::Or => {
                    let left_sel = self.estimate_filter_selectivity(left);
                    let right_sel = self.estimate_filter_selectivity(right);
                    left_sel + right_sel - (left_sel * right_sel)
                }
                _ => 0.5,
            },
            _ => 0.5,
        }
    }

    /// 30% of input rows per grouping key, at least one group.
    fn estimate_group_cardinality(input: &CostEstimate, keys: usize) -> usize {
        if keys == 0 {
            return 1;
        }
        let selectivity = 0.3_f64.powi(keys as i32);
        ((input.rows_out as f64) * selectivity).max(1.0) as usize
    }

    fn apply_limit(rows: usize, limit: &LimitNode) -> usize {
        match limit.limit {
            Some(LimitValue::Constant(n)) => rows.min(n as usize),
            _ => rows,
        }
    }
}

fn first(inputs: &[CostEstimate]) -> CostEstimate {
    inputs.first().cloned().unwrap_or_else(CostEstimate::zero)
}

fn second(inputs: &[CostEstimate]) -> CostEstimate {
    inputs.get(1).cloned().unwrap_or_else(CostEstimate::zero)
}
