//! Parsed SELECT statement and the derived facts the planner asks of it.

use serde::{Deserialize, Serialize};

use super::{JoinNode, StmtTableScan};
use crate::expr::{Expr, ValueType};
use crate::planner::mv_fix::MaterializedViewFix;

fn default_true() -> bool {
    true
}

/// One column of a select list, GROUP BY list, or ORDER BY list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedColInfo {
    pub alias: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub table_alias: Option<String>,
    #[serde(default)]
    pub column_name: Option<String>,
    pub expression: Expr,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default)]
    pub group_by: bool,
}

impl ParsedColInfo {
    /// A plain column of a scanned table, named after the column.
    pub fn column(table_alias: &str, column: &str) -> Self {
        Self {
            alias: column.to_string(),
            table_name: None,
            table_alias: Some(table_alias.to_string()),
            column_name: Some(column.to_string()),
            expression: Expr::col(table_alias, column),
            ascending: true,
            group_by: false,
        }
    }

    pub fn expr(alias: impl Into<String>, expression: Expr) -> Self {
        Self {
            alias: alias.into(),
            table_name: None,
            table_alias: None,
            column_name: None,
            expression,
            ascending: true,
            group_by: false,
        }
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }
}

/// Value of a LIMIT or OFFSET clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitValue {
    Constant(u64),
    Parameter(usize),
}

impl LimitValue {
    pub fn to_expr(self) -> Expr {
        use crate::catalog::DataType;
        match self {
            LimitValue::Constant(n) => Expr::int(i64::try_from(n).unwrap_or(i64::MAX)),
            LimitValue::Parameter(index) => Expr::param(index, ValueType::of(DataType::BigInt)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOffset {
    #[serde(default)]
    pub limit: Option<LimitValue>,
    #[serde(default)]
    pub offset: Option<LimitValue>,
}

impl LimitOffset {
    pub fn has_limit_or_offset(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Only a LIMIT can be distributed; an OFFSET on its own cannot.
    pub fn can_push_down(&self) -> bool {
        self.limit.is_some()
    }
}

/// A resolved SELECT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStmt {
    pub sql: String,
    pub scans: Vec<StmtTableScan>,
    #[serde(default)]
    pub join_tree: Option<JoinNode>,
    pub display_columns: Vec<ParsedColInfo>,
    #[serde(default)]
    pub group_by_columns: Vec<ParsedColInfo>,
    #[serde(default)]
    pub order_columns: Vec<ParsedColInfo>,
    #[serde(default)]
    pub having: Option<Expr>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub limit_offset: LimitOffset,
    #[serde(default)]
    pub mv_fix: Option<MaterializedViewFix>,
    #[serde(default)]
    pub parameters: Vec<ValueType>,
}

impl SelectStmt {
    pub fn new(sql: impl Into<String>, scans: Vec<StmtTableScan>, join_tree: JoinNode) -> Self {
        Self {
            sql: sql.into(),
            scans,
            join_tree: Some(join_tree),
            display_columns: Vec::new(),
            group_by_columns: Vec::new(),
            order_columns: Vec::new(),
            having: None,
            distinct: false,
            limit_offset: LimitOffset::default(),
            mv_fix: None,
            parameters: Vec::new(),
        }
    }

    pub fn display(mut self, col: ParsedColInfo) -> Self {
        self.display_columns.push(col);
        self
    }

    pub fn group_by(mut self, mut col: ParsedColInfo) -> Self {
        col.group_by = true;
        self.group_by_columns.push(col);
        self
    }

    pub fn order_by(mut self, col: ParsedColInfo) -> Self {
        self.order_columns.push(col);
        self
    }

    pub fn having(mut self, expr: Expr) -> Self {
        self.having = Some(expr);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn limit(mut self, limit: LimitValue) -> Self {
        self.limit_offset.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: LimitValue) -> Self {
        self.limit_offset.offset = Some(offset);
        self
    }

    pub fn with_mv_fix(mut self, fix: MaterializedViewFix) -> Self {
        self.mv_fix = Some(fix);
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<ValueType>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn scan(&self, alias: &str) -> Option<&StmtTableScan> {
        self.scans.iter().find(|s| s.alias() == alias)
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by_columns.is_empty()
    }

    pub fn has_aggregate_expression(&self) -> bool {
        self.display_columns
            .iter()
            .any(|c| c.expression.contains_aggregate())
    }

    pub fn has_aggregate_or_group_by(&self) -> bool {
        self.is_grouped() || self.has_aggregate_expression()
    }

    pub fn has_order_by_columns(&self) -> bool {
        !self.order_columns.is_empty()
    }

    pub fn has_limit_or_offset(&self) -> bool {
        self.limit_offset.has_limit_or_offset()
    }

    pub fn mv_fix_needed(&self) -> bool {
        self.mv_fix.is_some()
    }

    fn is_group_by_expression(&self, expr: &Expr) -> bool {
        self.group_by_columns
            .iter()
            .any(|g| g.expression.same_value(expr))
    }

    pub fn display_columns_contain_all_group_by_columns(&self) -> bool {
        self.group_by_columns.iter().all(|g| {
            self.display_columns
                .iter()
                .any(|d| d.expression.same_value(&g.expression))
        })
    }

    /// True when the GROUP BY keys, in any order, form a prefix of the
    /// ORDER BY keys.
    pub fn group_by_is_order_by_permutation(&self) -> bool {
        let n = self.group_by_columns.len();
        if n == 0 || n > self.order_columns.len() {
            return false;
        }
        self.order_columns[..n]
            .iter()
            .all(|o| self.is_group_by_expression(&o.expression))
            && self.group_by_columns.iter().all(|g| {
                self.order_columns[..n]
                    .iter()
                    .any(|o| o.expression.same_value(&g.expression))
            })
    }

    pub fn orders_by_aggregate(&self) -> bool {
        self.order_columns
            .iter()
            .any(|o| o.expression.contains_aggregate())
    }

    /// Columns produced by the (first) aggregate node: each aggregate once,
    /// grouped pass-through columns, then any GROUP BY key not yet present.
    pub fn agg_result_columns(&self) -> Vec<ParsedColInfo> {
        let mut out: Vec<ParsedColInfo> = Vec::new();
        let present =
            |out: &[ParsedColInfo], e: &Expr| out.iter().any(|c| c.expression.same_value(e));

        for col in &self.display_columns {
            match &col.expression {
                Expr::Aggregate { .. } => {
                    if !present(&out, &col.expression) {
                        out.push(col.clone());
                    }
                }
                e if e.contains_aggregate() => {
                    for agg in e.aggregates() {
                        if !present(&out, agg) {
                            out.push(ParsedColInfo::expr(agg.to_string(), agg.clone()));
                        }
                    }
                }
                e if self.is_group_by_expression(e) => {
                    if !present(&out, e) {
                        let mut pass = col.clone();
                        pass.group_by = true;
                        out.push(pass);
                    }
                }
                _ => {}
            }
        }
        for gb in &self.group_by_columns {
            if !present(&out, &gb.expression) {
                out.push(gb.clone());
            }
        }
        out
    }

    /// The aggregate output differs from the select list, so a projection
    /// has to follow the aggregation.
    pub fn has_complex_agg(&self) -> bool {
        if !self.has_aggregate_or_group_by() {
            return false;
        }
        let agg = self.agg_result_columns();
        agg.len() != self.display_columns.len()
            || agg.iter().zip(&self.display_columns).any(|(a, d)| {
                a.alias != d.alias || !a.expression.same_value(&d.expression)
            })
    }

    pub fn has_complex_group_by(&self) -> bool {
        self.group_by_columns
            .iter()
            .any(|g| !matches!(g.expression, Expr::Column(_)))
    }

    /// Rewrites `expr` so that aggregates and grouped expressions refer to the
    /// aggregate node's output columns.
    pub fn over_aggregate_output(&self, expr: &Expr) -> Expr {
        let agg = self.agg_result_columns();
        expr.transform(&mut |e| {
            agg.iter()
                .find(|c| c.expression.same_value(e))
                .map(|c| Expr::intermediate(c.alias.clone(), c.expression.value_type()))
        })
    }

    fn orders_all_display_columns(&self) -> bool {
        !self.order_columns.is_empty()
            && self.display_columns.iter().all(|d| {
                self.order_columns
                    .iter()
                    .any(|o| o.expression.same_value(&d.expression) || o.alias == d.alias)
            })
    }

    fn is_single_row(&self) -> bool {
        self.has_aggregate_expression() && !self.is_grouped()
    }

    pub fn is_order_deterministic(&self) -> bool {
        if self.is_single_row() || self.orders_all_display_columns() {
            return true;
        }
        self.is_grouped()
            && self.group_by_columns.iter().all(|g| {
                self.order_columns
                    .iter()
                    .any(|o| o.expression.same_value(&g.expression))
            })
    }

    /// Ordering that holds even when a scanned sub-query produces rows in
    /// no particular order.
    pub fn is_order_deterministic_in_spite_of_unordered_subqueries(&self) -> bool {
        self.is_single_row() || self.orders_all_display_columns()
    }
}
