//! Schema objects the planner consults: tables, columns, indexes.
//!
//! The catalog is owned elsewhere; the planner only ever reads it. Tables are
//! either partitioned (they name a partitioning column) or replicated (a full
//! copy lives on every partition).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::expr::{Expr, Literal};

/// Column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Decimal,
    Timestamp,
    Boolean,
    Varchar,
    Varbinary,
}

impl DataType {
    /// Storage width for fixed-size types, `None` for variable-length ones.
    pub fn fixed_size(&self) -> Option<u32> {
        match self {
            DataType::TinyInt | DataType::Boolean => Some(1),
            DataType::SmallInt => Some(2),
            DataType::Integer => Some(4),
            DataType::BigInt | DataType::Float | DataType::Timestamp => Some(8),
            DataType::Decimal => Some(16),
            DataType::Varchar | DataType::Varbinary => None,
        }
    }

    pub fn is_variable_length(&self) -> bool {
        self.fixed_size().is_none()
    }
}

/// Declared default of a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    /// A literal value, typed as the column.
    Value(Literal),
    /// A generating function evaluated at insert time (e.g. `NOW`).
    Function { name: String, id: i32 },
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    /// Declared size; for fixed-size types this is the storage width.
    pub size: u32,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefault>,
    /// Varchar length is counted in bytes rather than characters.
    #[serde(default)]
    pub in_bytes: bool,
}

fn default_true() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            size: data_type.fixed_size().unwrap_or(0),
            nullable: true,
            default: None,
            in_bytes: false,
        }
    }

    pub fn varchar(name: impl Into<String>, size: u32) -> Self {
        Self {
            size,
            ..Self::new(name, DataType::Varchar)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }
}

/// Physical structure of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Ordered; supports range scans and ordered output.
    Tree,
    /// Unordered; equality lookups only.
    Hash,
}

/// A secondary or primary-key index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    /// Indexed columns in key order. Empty for a pure expression index.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Indexed expressions in key order, for expression indexes.
    #[serde(default)]
    pub expressions: Vec<Expr>,
    pub kind: IndexKind,
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    pub fn tree(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            expressions: Vec::new(),
            kind: IndexKind::Tree,
            unique: false,
        }
    }

    pub fn is_scannable(&self) -> bool {
        self.kind == IndexKind::Tree
    }

    pub fn is_expression_index(&self) -> bool {
        !self.expressions.is_empty()
    }
}

/// A persistent table, stream, or materialized view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    /// Partitioning column; `None` means the table is replicated.
    #[serde(default)]
    pub partition_column: Option<String>,
    /// Source table name when this table is a materialized view.
    #[serde(default)]
    pub materializer: Option<String>,
    /// Append-only export stream; never readable by queries.
    #[serde(default)]
    pub export_only: bool,
    /// Row count statistic for cost estimation.
    #[serde(default)]
    pub estimated_rows: Option<u64>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            partition_column: None,
            materializer: None,
            export_only: false,
            estimated_rows: None,
        }
    }

    pub fn partitioned_on(mut self, column: impl Into<String>) -> Self {
        self.partition_column = Some(column.into());
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.estimated_rows = Some(rows);
        self
    }

    pub fn is_replicated(&self) -> bool {
        self.partition_column.is_none()
    }

    pub fn is_materialized_view(&self) -> bool {
        self.materializer.is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of every column that participates in some index.
    pub fn indexed_columns(&self) -> BTreeSet<&str> {
        let mut columns = BTreeSet::new();
        for index in &self.indexes {
            for column in &index.columns {
                columns.insert(column.as_str());
            }
            for expr in &index.expressions {
                for col in expr.base_columns() {
                    columns.insert(col.column.as_str());
                }
            }
        }
        columns
    }
}

/// Table lookup by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    tables: BTreeMap<String, Table>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.name.to_ascii_lowercase(), table);
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.add_table(table);
        self
    }

    /// Case-insensitive lookup, as SQL identifiers are.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }
}
