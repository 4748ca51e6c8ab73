//! Parsed, schema-resolved statements handed to the planner.
//!
//! Parsing and name resolution happen upstream. Everything here is plain data
//! plus the derived facts the planner queries (grouping, ordering,
//! determinism, value equivalence).

pub mod equivalence;
pub mod join_tree;
pub mod select;

pub use equivalence::ValueEquivalence;
pub use join_tree::{JoinNode, JoinType};
pub use select::{LimitOffset, LimitValue, ParsedColInfo, SelectStmt};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::Table;
use crate::expr::{Expr, ValueType};

/// A table reference in a FROM clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StmtTableScan {
    Table {
        alias: String,
        table: Table,
    },
    Subquery {
        alias: String,
        statement: Box<ParsedStatement>,
    },
}

impl StmtTableScan {
    pub fn table(alias: impl Into<String>, table: Table) -> Self {
        StmtTableScan::Table {
            alias: alias.into(),
            table,
        }
    }

    pub fn subquery(alias: impl Into<String>, statement: ParsedStatement) -> Self {
        StmtTableScan::Subquery {
            alias: alias.into(),
            statement: Box::new(statement),
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            StmtTableScan::Table { alias, .. } | StmtTableScan::Subquery { alias, .. } => alias,
        }
    }

    /// A sub-query scan is replicated when every table it reads is.
    pub fn is_replicated(&self) -> bool {
        match self {
            StmtTableScan::Table { table, .. } => table.is_replicated(),
            StmtTableScan::Subquery { statement, .. } => statement.base_tables().iter().all(|t| t.is_replicated()),
        }
    }

    /// Columns of this scan that carry the partitioning key.
    ///
    /// For a sub-query these are the select-list aliases that project a
    /// partitioning column of one of its own scans.
    pub fn partition_columns(&self) -> Vec<String> {
        match self {
            StmtTableScan::Table { table, .. } => table.partition_column.iter().cloned().collect(),
            StmtTableScan::Subquery { statement, .. } => match statement.as_ref() {
                ParsedStatement::Select(select) => select
                    .display_columns
                    .iter()
                    .filter(|d| match &d.expression {
                        Expr::Column(col) => select
                            .scan(&col.table)
                            .map(|s| s.partition_columns().contains(&col.column))
                            .unwrap_or(false),
                        _ => false,
                    })
                    .map(|d| d.alias.clone())
                    .collect(),
                _ => Vec::new(),
            },
        }
    }
}

/// One `column = value` assignment of an UPDATE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertStmt {
    pub sql: String,
    pub table: Table,
    /// Supplied values keyed by target column name.
    pub values: BTreeMap<String, Expr>,
    #[serde(default)]
    pub parameters: Vec<ValueType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStmt {
    pub sql: String,
    pub alias: String,
    pub table: Table,
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub where_expr: Option<Expr>,
    #[serde(default)]
    pub parameters: Vec<ValueType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteStmt {
    pub sql: String,
    pub alias: String,
    pub table: Table,
    #[serde(default)]
    pub where_expr: Option<Expr>,
    #[serde(default)]
    pub parameters: Vec<ValueType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnionKind {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionStmt {
    pub sql: String,
    pub kind: UnionKind,
    pub children: Vec<ParsedStatement>,
    #[serde(default)]
    pub parameters: Vec<ValueType>,
}

/// A statement of any supported kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedStatement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Union(UnionStmt),
}

impl ParsedStatement {
    pub fn sql(&self) -> &str {
        match self {
            ParsedStatement::Select(s) => &s.sql,
            ParsedStatement::Insert(s) => &s.sql,
            ParsedStatement::Update(s) => &s.sql,
            ParsedStatement::Delete(s) => &s.sql,
            ParsedStatement::Union(s) => &s.sql,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ParsedStatement::Select(_) => "select",
            ParsedStatement::Insert(_) => "insert",
            ParsedStatement::Update(_) => "update",
            ParsedStatement::Delete(_) => "delete",
            ParsedStatement::Union(_) => "union",
        }
    }

    pub fn parameters(&self) -> &[ValueType] {
        match self {
            ParsedStatement::Select(s) => &s.parameters,
            ParsedStatement::Insert(s) => &s.parameters,
            ParsedStatement::Update(s) => &s.parameters,
            ParsedStatement::Delete(s) => &s.parameters,
            ParsedStatement::Union(s) => &s.parameters,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, ParsedStatement::Select(_) | ParsedStatement::Union(_))
    }

    /// The target table of an INSERT, UPDATE or DELETE.
    pub fn target_table(&self) -> Option<&Table> {
        match self {
            ParsedStatement::Insert(s) => Some(&s.table),
            ParsedStatement::Update(s) => Some(&s.table),
            ParsedStatement::Delete(s) => Some(&s.table),
            ParsedStatement::Select(_) | ParsedStatement::Union(_) => None,
        }
    }

    /// Table scans visible at this statement's own level.
    pub fn table_scans(&self) -> Vec<StmtTableScan> {
        match self {
            ParsedStatement::Select(s) => s.scans.clone(),
            ParsedStatement::Insert(s) => vec![StmtTableScan::table(s.table.name.clone(), s.table.clone())],
            ParsedStatement::Update(s) => vec![StmtTableScan::table(s.alias.clone(), s.table.clone())],
            ParsedStatement::Delete(s) => vec![StmtTableScan::table(s.alias.clone(), s.table.clone())],
            ParsedStatement::Union(_) => Vec::new(),
        }
    }

    /// Every persistent table read, including through sub-queries and set
    /// operation children.
    pub fn base_tables(&self) -> Vec<&Table> {
        match self {
            ParsedStatement::Select(s) => s
                .scans
                .iter()
                .flat_map(|scan| match scan {
                    StmtTableScan::Table { table, .. } => vec![table],
                    StmtTableScan::Subquery { statement, .. } => statement.base_tables(),
                })
                .collect(),
            ParsedStatement::Union(u) => u.children.iter().flat_map(|c| c.base_tables()).collect(),
            other => other.target_table().into_iter().collect(),
        }
    }

    /// Sub-query scans in FROM-clause order.
    pub fn subquery_scans(&self) -> Vec<(&str, &ParsedStatement)> {
        match self {
            ParsedStatement::Select(s) => s
                .scans
                .iter()
                .filter_map(|scan| match scan {
                    StmtTableScan::Subquery { alias, statement } => {
                        Some((alias.as_str(), statement.as_ref()))
                    }
                    StmtTableScan::Table { .. } => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Equivalence classes implied by the statement's equality filters.
    pub fn analyze_value_equivalence(&self) -> ValueEquivalence {
        match self {
            ParsedStatement::Select(s) => match &s.join_tree {
                Some(tree) => ValueEquivalence::from_filters(tree.all_expressions()),
                None => ValueEquivalence::new(),
            },
            ParsedStatement::Update(s) => ValueEquivalence::from_filters(s.where_expr.iter()),
            ParsedStatement::Delete(s) => ValueEquivalence::from_filters(s.where_expr.iter()),
            ParsedStatement::Insert(_) | ParsedStatement::Union(_) => ValueEquivalence::new(),
        }
    }
}
