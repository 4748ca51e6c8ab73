//! EXPLAIN output for plan trees.
//!
//! One line per node, `Name: detail`, children indented two spaces below
//! their parent. Inline nodes are listed under their host as `inline ...`.

use std::fmt::Write;

use super::node::{LimitNode, OutputColumn, PlanNode, PlanNodeKind, SortDirection};
use super::{NodeId, PlanTree};
use crate::expr::Expr;
use crate::statement::{JoinType, LimitValue};

impl PlanTree {
    /// Formats the reachable tree for display.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.format_node(self.root(), 0, &mut out);
        out
    }

    fn format_node(&self, id: NodeId, indent: usize, out: &mut String) {
        let prefix = "  ".repeat(indent);
        let node = self.node(id);
        let _ = writeln!(out, "{}{}", prefix, headline(node));
        for inline in &node.inline {
            let _ = writeln!(out, "{}  inline {}", prefix, headline(inline));
        }
        for child in self.children(id) {
            self.format_node(child, indent + 1, out);
        }
    }
}

fn headline(node: &PlanNode) -> String {
    match &node.kind {
        PlanNodeKind::SeqScan(scan) => {
            let mut line = if scan.subquery {
                format!("SeqScan: subquery {}", scan.alias)
            } else {
                format!("SeqScan: {} as {}", scan.table, scan.alias)
            };
            if let Some(p) = &scan.predicate {
                let _ = write!(line, " filter {}", p);
            }
            line
        }
        PlanNodeKind::IndexScan(ix) => {
            let mut line = format!(
                "IndexScan: {} as {} using {}",
                ix.scan.table, ix.scan.alias, ix.index
            );
            if !ix.search_keys.is_empty() {
                let _ = write!(line, " keys [{}]", join_exprs(&ix.search_keys));
            }
            if let Some(dir) = ix.sort_direction {
                let _ = write!(line, " {}", direction(dir));
            }
            if ix.for_grouping_only {
                line.push_str(" (grouping)");
            }
            if let Some(p) = &ix.scan.predicate {
                let _ = write!(line, " filter {}", p);
            }
            line
        }
        PlanNodeKind::NestLoop(j) | PlanNodeKind::NestLoopIndex(j) => {
            let name = if matches!(node.kind, PlanNodeKind::NestLoop(_)) {
                "NestLoop"
            } else {
                "NestLoopIndex"
            };
            let mut line = format!("{}: {}", name, join_type(j.join_type));
            if let Some(p) = &j.predicate {
                let _ = write!(line, " on {}", p);
            }
            if let Some(dir) = j.sort_direction {
                let _ = write!(line, " {}", direction(dir));
            }
            line
        }
        PlanNodeKind::Aggregate(agg) | PlanNodeKind::HashAggregate(agg) => {
            let name = if matches!(node.kind, PlanNodeKind::Aggregate(_)) {
                "Aggregate"
            } else {
                "HashAggregate"
            };
            let aggs: Vec<String> = agg.aggregates.iter().map(|a| a.to_string()).collect();
            let mut line = format!("{}: [{}]", name, aggs.join(", "));
            if !agg.group_by.is_empty() {
                let _ = write!(line, " group by [{}]", join_exprs(&agg.group_by));
            }
            if let Some(p) = &agg.post_predicate {
                let _ = write!(line, " having {}", p);
            }
            if agg.coordinating {
                line.push_str(" (coordinator)");
            }
            line
        }
        PlanNodeKind::Distinct { expressions } => {
            format!("Distinct: [{}]", join_exprs(expressions))
        }
        PlanNodeKind::OrderBy { keys } => {
            let keys: Vec<String> = keys
                .iter()
                .map(|k| format!("{} {}", k.expr, direction(k.direction)))
                .collect();
            format!("OrderBy: [{}]", keys.join(", "))
        }
        PlanNodeKind::Limit(limit) => format!("Limit: {}", limit_detail(limit)),
        PlanNodeKind::Projection { columns } => format!("Projection: [{}]", join_columns(columns)),
        PlanNodeKind::Materialize { columns } => {
            format!("Materialize: [{}]", join_columns(columns))
        }
        PlanNodeKind::Insert {
            target,
            multi_partition,
        } => {
            if *multi_partition {
                format!("Insert: {} (multi-partition)", target)
            } else {
                format!("Insert: {}", target)
            }
        }
        PlanNodeKind::Update {
            target,
            update_indexes,
        } => {
            if *update_indexes {
                format!("Update: {} (indexes)", target)
            } else {
                format!("Update: {}", target)
            }
        }
        PlanNodeKind::Delete { target, truncate } => {
            if *truncate {
                format!("Delete: {} (truncate)", target)
            } else {
                format!("Delete: {}", target)
            }
        }
        PlanNodeKind::Send => "Send".to_string(),
        PlanNodeKind::Receive => "Receive".to_string(),
        PlanNodeKind::Union { kind } => {
            let kind = serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("Union: {}", kind)
        }
    }
}

fn join_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_columns(columns: &[OutputColumn]) -> String {
    columns
        .iter()
        .map(|c| {
            let rendered = c.expr.to_string();
            if rendered == c.alias {
                rendered
            } else {
                format!("{} as {}", rendered, c.alias)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn limit_detail(limit: &LimitNode) -> String {
    let mut parts = Vec::new();
    if let Some(expr) = &limit.limit_expr {
        parts.push(format!("limit={}", expr));
    } else if let Some(l) = limit.limit {
        parts.push(format!("limit={}", limit_value(l)));
    }
    if let Some(o) = limit.offset {
        parts.push(format!("offset={}", limit_value(o)));
    }
    parts.join(", ")
}

fn limit_value(value: LimitValue) -> String {
    match value {
        LimitValue::Constant(n) => n.to_string(),
        LimitValue::Parameter(index) => format!("?{}", index),
    }
}

fn join_type(join_type: JoinType) -> &'static str {
    match join_type {
        JoinType::Inner => "inner",
        JoinType::Left => "left",
        JoinType::Right => "right",
    }
}

fn direction(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Asc => "asc",
        SortDirection::Desc => "desc",
    }
}
