//! Plan node variants.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::expr::{AggregateFunc, Expr};
use crate::statement::{JoinType, LimitValue, UnionKind};

/// Discriminant of a plan node, used for searches and shape checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanNodeType {
    SeqScan,
    IndexScan,
    NestLoop,
    NestLoopIndex,
    Aggregate,
    HashAggregate,
    Distinct,
    OrderBy,
    Limit,
    Projection,
    Materialize,
    Insert,
    Update,
    Delete,
    Send,
    Receive,
    Union,
}

impl PlanNodeType {
    pub fn is_scan(&self) -> bool {
        matches!(self, PlanNodeType::SeqScan | PlanNodeType::IndexScan)
    }

    pub fn is_join(&self) -> bool {
        matches!(self, PlanNodeType::NestLoop | PlanNodeType::NestLoopIndex)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, PlanNodeType::Aggregate | PlanNodeType::HashAggregate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Named output column of a projection, materialize or aggregate node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub alias: String,
    pub expr: Expr,
}

impl OutputColumn {
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
        }
    }
}

/// What a scan reads: a persistent table, or the result of a sub-query
/// (in which case `table` is the sub-query alias).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanNode {
    pub table: String,
    pub alias: String,
    #[serde(default)]
    pub subquery: bool,
    #[serde(default)]
    pub predicate: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexScanNode {
    pub scan: ScanNode,
    pub index: String,
    /// Set only when the scan order satisfies the statement's ORDER BY.
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,
    /// Chosen to feed a GROUP BY in key order, not to filter.
    #[serde(default)]
    pub for_grouping_only: bool,
    #[serde(default)]
    pub search_keys: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPlanNode {
    pub join_type: JoinType,
    #[serde(default)]
    pub predicate: Option<Expr>,
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateColumn {
    pub func: AggregateFunc,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub input: Option<Expr>,
    pub output_index: usize,
}

impl fmt::Display for AggregateColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.func, &self.input) {
            (AggregateFunc::CountStar, _) | (_, None) => write!(f, "{}(*)", self.func.name()),
            (func, Some(input)) if self.distinct => write!(f, "{}(DISTINCT {})", func.name(), input),
            (func, Some(input)) => write!(f, "{}({})", func.name(), input),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateNode {
    #[serde(default)]
    pub aggregates: Vec<AggregateColumn>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    #[serde(default)]
    pub output: Vec<OutputColumn>,
    #[serde(default)]
    pub post_predicate: Option<Expr>,
    /// Finishes partial results computed by a pushed-down twin.
    #[serde(default)]
    pub coordinating: bool,
}

impl AggregateNode {
    pub fn add_aggregate(&mut self, func: AggregateFunc, distinct: bool, output_index: usize, input: Option<Expr>) {
        self.aggregates.push(AggregateColumn {
            func,
            distinct,
            input,
            output_index,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStrategy {
    Serial,
    Hash,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitNode {
    #[serde(default)]
    pub limit: Option<LimitValue>,
    #[serde(default)]
    pub offset: Option<LimitValue>,
    /// Computed limit used when LIMIT or OFFSET is parameterized.
    #[serde(default)]
    pub limit_expr: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanNodeKind {
    SeqScan(ScanNode),
    IndexScan(IndexScanNode),
    NestLoop(JoinPlanNode),
    NestLoopIndex(JoinPlanNode),
    Aggregate(AggregateNode),
    HashAggregate(AggregateNode),
    Distinct { expressions: Vec<Expr> },
    OrderBy { keys: Vec<SortKey> },
    Limit(LimitNode),
    Projection { columns: Vec<OutputColumn> },
    Materialize { columns: Vec<OutputColumn> },
    Insert { target: String, multi_partition: bool },
    Update { target: String, update_indexes: bool },
    Delete { target: String, truncate: bool },
    Send,
    Receive,
    Union { kind: UnionKind },
}

/// A plan node together with its inline decorations.
///
/// Inline nodes execute in place inside their host (a projection inside a
/// scan, a limit inside a sort); they are never tree edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(flatten)]
    pub kind: PlanNodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline: Vec<PlanNode>,
}

impl From<PlanNodeKind> for PlanNode {
    fn from(kind: PlanNodeKind) -> Self {
        Self {
            kind,
            inline: Vec::new(),
        }
    }
}

impl PlanNode {
    pub fn node_type(&self) -> PlanNodeType {
        match &self.kind {
            PlanNodeKind::SeqScan(_) => PlanNodeType::SeqScan,
            PlanNodeKind::IndexScan(_) => PlanNodeType::IndexScan,
            PlanNodeKind::NestLoop(_) => PlanNodeType::NestLoop,
            PlanNodeKind::NestLoopIndex(_) => PlanNodeType::NestLoopIndex,
            PlanNodeKind::Aggregate(_) => PlanNodeType::Aggregate,
            PlanNodeKind::HashAggregate(_) => PlanNodeType::HashAggregate,
            PlanNodeKind::Distinct { .. } => PlanNodeType::Distinct,
            PlanNodeKind::OrderBy { .. } => PlanNodeType::OrderBy,
            PlanNodeKind::Limit(_) => PlanNodeType::Limit,
            PlanNodeKind::Projection { .. } => PlanNodeType::Projection,
            PlanNodeKind::Materialize { .. } => PlanNodeType::Materialize,
            PlanNodeKind::Insert { .. } => PlanNodeType::Insert,
            PlanNodeKind::Update { .. } => PlanNodeType::Update,
            PlanNodeKind::Delete { .. } => PlanNodeType::Delete,
            PlanNodeKind::Send => PlanNodeType::Send,
            PlanNodeKind::Receive => PlanNodeType::Receive,
            PlanNodeKind::Union { .. } => PlanNodeType::Union,
        }
    }

    pub fn seq_scan(table: impl Into<String>, alias: impl Into<String>) -> Self {
        PlanNodeKind::SeqScan(ScanNode {
            table: table.into(),
            alias: alias.into(),
            subquery: false,
            predicate: None,
        })
        .into()
    }

    /// Placeholder scan over a sub-query's result.
    pub fn subquery_scan(alias: impl Into<String>) -> Self {
        let alias = alias.into();
        PlanNodeKind::SeqScan(ScanNode {
            table: alias.clone(),
            alias,
            subquery: true,
            predicate: None,
        })
        .into()
    }

    pub fn index_scan(
        table: impl Into<String>,
        alias: impl Into<String>,
        index: impl Into<String>,
    ) -> Self {
        PlanNodeKind::IndexScan(IndexScanNode {
            scan: ScanNode {
                table: table.into(),
                alias: alias.into(),
                subquery: false,
                predicate: None,
            },
            index: index.into(),
            sort_direction: None,
            for_grouping_only: false,
            search_keys: Vec::new(),
        })
        .into()
    }

    pub fn nest_loop(join_type: JoinType, predicate: Option<Expr>) -> Self {
        PlanNodeKind::NestLoop(JoinPlanNode {
            join_type,
            predicate,
            sort_direction: None,
        })
        .into()
    }

    /// Index nested-loop join; `inner` is the inline index scan probed per
    /// outer row.
    pub fn nest_loop_index(join_type: JoinType, inner: PlanNode) -> Self {
        let mut node: PlanNode = PlanNodeKind::NestLoopIndex(JoinPlanNode {
            join_type,
            predicate: None,
            sort_direction: None,
        })
        .into();
        node.inline.push(inner);
        node
    }

    pub fn send() -> Self {
        PlanNodeKind::Send.into()
    }

    pub fn receive() -> Self {
        PlanNodeKind::Receive.into()
    }

    pub fn projection(columns: Vec<OutputColumn>) -> Self {
        PlanNodeKind::Projection { columns }.into()
    }

    pub fn limit(node: LimitNode) -> Self {
        PlanNodeKind::Limit(node).into()
    }

    pub fn aggregate(strategy: AggregateStrategy, node: AggregateNode) -> Self {
        match strategy {
            AggregateStrategy::Serial => PlanNodeKind::Aggregate(node).into(),
            AggregateStrategy::Hash => PlanNodeKind::HashAggregate(node).into(),
        }
    }

    /// Adds a predicate to a scan, AND-ing it with an existing one.
    pub fn with_predicate(mut self, predicate: Expr) -> Self {
        if let Some(scan) = self.scan_mut() {
            scan.predicate = Some(match scan.predicate.take() {
                Some(existing) => existing.and(predicate),
                None => predicate,
            });
        }
        self
    }

    /// Marks an ordered access path (index scan or join) as already
    /// satisfying the ORDER BY.
    pub fn with_sort_direction(mut self, direction: SortDirection) -> Self {
        match &mut self.kind {
            PlanNodeKind::IndexScan(ix) => ix.sort_direction = Some(direction),
            PlanNodeKind::NestLoop(j) | PlanNodeKind::NestLoopIndex(j) => {
                j.sort_direction = Some(direction)
            }
            _ => {}
        }
        self
    }

    pub fn scan(&self) -> Option<&ScanNode> {
        match &self.kind {
            PlanNodeKind::SeqScan(scan) => Some(scan),
            PlanNodeKind::IndexScan(ix) => Some(&ix.scan),
            _ => None,
        }
    }

    pub fn scan_mut(&mut self) -> Option<&mut ScanNode> {
        match &mut self.kind {
            PlanNodeKind::SeqScan(scan) => Some(scan),
            PlanNodeKind::IndexScan(ix) => Some(&mut ix.scan),
            _ => None,
        }
    }

    pub fn aggregate_node(&self) -> Option<&AggregateNode> {
        match &self.kind {
            PlanNodeKind::Aggregate(agg) | PlanNodeKind::HashAggregate(agg) => Some(agg),
            _ => None,
        }
    }

    pub fn aggregate_node_mut(&mut self) -> Option<&mut AggregateNode> {
        match &mut self.kind {
            PlanNodeKind::Aggregate(agg) | PlanNodeKind::HashAggregate(agg) => Some(agg),
            _ => None,
        }
    }

    /// Ordering already provided by this access path, if any.
    pub fn sort_direction(&self) -> Option<SortDirection> {
        match &self.kind {
            PlanNodeKind::IndexScan(ix) => ix.sort_direction,
            PlanNodeKind::NestLoop(j) | PlanNodeKind::NestLoopIndex(j) => j.sort_direction,
            _ => None,
        }
    }

    /// Installs an inline node, replacing any inline node of the same type.
    pub fn set_inline(&mut self, node: PlanNode) {
        let ty = node.node_type();
        self.inline.retain(|n| n.node_type() != ty);
        self.inline.push(node);
    }

    pub fn inline_of(&self, ty: PlanNodeType) -> Option<&PlanNode> {
        self.inline.iter().find(|n| n.node_type() == ty)
    }
}
