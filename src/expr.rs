//! Resolved scalar expressions.
//!
//! Expressions arrive already bound to table aliases and types. The planner
//! only inspects them (null rejection, aggregate discovery, column lineage)
//! and occasionally wraps them (casts, partial-aggregate references); it
//! never evaluates them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::DataType;

/// Alias used for columns of intermediate results (aggregate output,
/// materialized insert tuples, modified-row counts).
pub const INTERMEDIATE_TABLE: &str = "$intermediate";

/// Type and declared size of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType {
    pub data_type: DataType,
    pub size: u32,
}

impl ValueType {
    pub fn new(data_type: DataType, size: u32) -> Self {
        Self { data_type, size }
    }

    /// Fixed-size types carry their storage width.
    pub fn of(data_type: DataType) -> Self {
        Self {
            data_type,
            size: data_type.fixed_size().unwrap_or(0),
        }
    }
}

/// Literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Literal {
    fn natural_type(&self) -> Option<ValueType> {
        match self {
            Literal::Null => None,
            Literal::Bool(_) => Some(ValueType::of(DataType::Boolean)),
            Literal::Int(_) => Some(ValueType::of(DataType::BigInt)),
            Literal::Float(_) => Some(ValueType::of(DataType::Float)),
            Literal::String(s) => Some(ValueType::new(DataType::Varchar, s.len() as u32)),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "NULL"),
            Literal::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Reference to a column of a table alias (or of an intermediate result).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub value_type: Option<ValueType>,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            value_type: None,
        }
    }

    pub fn is_intermediate(&self) -> bool {
        self.table == INTERMEDIATE_TABLE
    }
}

/// Aggregate functions the planner knows how to place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    Count,
    CountStar,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count | AggregateFunc::CountStar => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Like => "LIKE",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }

    /// Arithmetic operators propagate NULL but hide the column from the
    /// null-rejection test, which stays conservative about them.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Resolved expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Column(ColumnRef),
    Constant {
        value: Literal,
        #[serde(default)]
        value_type: Option<ValueType>,
    },
    Parameter {
        index: usize,
        value_type: ValueType,
    },
    Aggregate {
        func: AggregateFunc,
        #[serde(default)]
        distinct: bool,
        #[serde(default)]
        arg: Option<Box<Expr>>,
    },
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    IsNull(Box<Expr>),
    Function {
        name: String,
        id: i32,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        value_type: Option<ValueType>,
    },
    Cast {
        expr: Box<Expr>,
        value_type: ValueType,
    },
    /// Physical address of the scanned row; consumed by update/delete.
    TupleAddress,
}

impl Expr {
    pub fn col(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::new(table, column))
    }

    pub fn typed_col(
        table: impl Into<String>,
        column: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        Expr::Column(ColumnRef {
            table: table.into(),
            column: column.into(),
            value_type: Some(value_type),
        })
    }

    /// Reference to a named column of an intermediate result.
    pub fn intermediate(column: impl Into<String>, value_type: Option<ValueType>) -> Self {
        Expr::Column(ColumnRef {
            table: INTERMEDIATE_TABLE.to_string(),
            column: column.into(),
            value_type,
        })
    }

    pub fn literal(value: Literal) -> Self {
        let value_type = value.natural_type();
        Expr::Constant { value, value_type }
    }

    pub fn int(value: i64) -> Self {
        Self::literal(Literal::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::literal(Literal::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::literal(Literal::String(value.into()))
    }

    pub fn bool(value: bool) -> Self {
        Self::literal(Literal::Bool(value))
    }

    /// A constant already refined to a target type.
    pub fn typed_constant(value: Literal, value_type: ValueType) -> Self {
        Expr::Constant {
            value,
            value_type: Some(value_type),
        }
    }

    pub fn null_of(value_type: ValueType) -> Self {
        Self::typed_constant(Literal::Null, value_type)
    }

    pub fn param(index: usize, value_type: ValueType) -> Self {
        Expr::Parameter { index, value_type }
    }

    pub fn agg(func: AggregateFunc, arg: Expr) -> Self {
        Expr::Aggregate {
            func,
            distinct: false,
            arg: Some(Box::new(arg)),
        }
    }

    pub fn agg_distinct(func: AggregateFunc, arg: Expr) -> Self {
        Expr::Aggregate {
            func,
            distinct: true,
            arg: Some(Box::new(arg)),
        }
    }

    pub fn count_star() -> Self {
        Expr::Aggregate {
            func: AggregateFunc::CountStar,
            distinct: false,
            arg: None,
        }
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Eq, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Gt, other)
    }

    pub fn and(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Or, other)
    }

    pub fn plus(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Plus, other)
    }

    pub fn not(self) -> Self {
        Expr::UnaryOp {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Self {
        self.is_null().not()
    }

    pub fn cast_to(self, value_type: ValueType) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            value_type,
        }
    }

    /// Type of the value this expression produces, when known.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Expr::Column(col) => col.value_type,
            Expr::Constant { value_type, .. } => *value_type,
            Expr::Parameter { value_type, .. } => Some(*value_type),
            Expr::Aggregate { func, arg, .. } => match func {
                AggregateFunc::Count | AggregateFunc::CountStar => {
                    Some(ValueType::of(DataType::BigInt))
                }
                AggregateFunc::Avg => Some(ValueType::of(DataType::Float)),
                AggregateFunc::Sum | AggregateFunc::Min | AggregateFunc::Max => {
                    arg.as_ref().and_then(|a| a.value_type())
                }
            },
            Expr::BinaryOp { left, op, right } => {
                if op.is_arithmetic() {
                    left.value_type().or_else(|| right.value_type())
                } else {
                    Some(ValueType::of(DataType::Boolean))
                }
            }
            Expr::UnaryOp { op, expr } => match op {
                UnaryOp::Not => Some(ValueType::of(DataType::Boolean)),
                UnaryOp::Negate => expr.value_type(),
            },
            Expr::IsNull(_) => Some(ValueType::of(DataType::Boolean)),
            Expr::Function { value_type, .. } => *value_type,
            Expr::Cast { value_type, .. } => Some(*value_type),
            Expr::TupleAddress => Some(ValueType::of(DataType::BigInt)),
        }
    }

    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_) | Expr::Constant { .. } | Expr::Parameter { .. } | Expr::TupleAddress => {
                Vec::new()
            }
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
            Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::UnaryOp { expr, .. } | Expr::IsNull(expr) | Expr::Cast { expr, .. } => {
                vec![expr.as_ref()]
            }
            Expr::Function { args, .. } => args.iter().collect(),
        }
    }

    /// Pre-order walk; stops early when `visit` returns true.
    pub fn any(&self, visit: &mut impl FnMut(&Expr) -> bool) -> bool {
        if visit(self) {
            return true;
        }
        self.children().into_iter().any(|c| c.any(visit))
    }

    /// All column references beneath this expression.
    pub fn base_columns(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        if let Expr::Column(col) = self {
            out.push(col);
        }
        for child in self.children() {
            child.collect_columns(out);
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        self.any(&mut |e| matches!(e, Expr::Aggregate { .. }))
    }

    pub fn references_table(&self, alias: &str) -> bool {
        self.base_columns().iter().any(|c| c.table == alias)
    }

    pub fn is_constant_or_parameter(&self) -> bool {
        matches!(self, Expr::Constant { .. } | Expr::Parameter { .. })
    }

    /// Splits a conjunction into its terms.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::BinaryOp {
                left,
                op: BinaryOp::And,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// True when the expression cannot evaluate to TRUE if every column of
    /// `alias` is NULL.
    ///
    /// Conservative: operators that can turn NULL into a value (IS NULL,
    /// casts, arithmetic, functions) are never treated as null-rejecting.
    pub fn is_null_rejecting(&self, alias: &str) -> bool {
        self.null_rejecting_with(alias, false)
    }

    /// `negated` is the parity of the NOT operators above `self`.
    fn null_rejecting_with(&self, alias: &str, negated: bool) -> bool {
        match self {
            // NOT (P AND Q) == NOT P OR NOT Q
            Expr::BinaryOp {
                left,
                op: BinaryOp::And,
                right,
            } if negated => left.null_rejecting_with(alias, true) && right.null_rejecting_with(alias, true),
            Expr::BinaryOp {
                left,
                op: BinaryOp::And,
                right,
            } => left.null_rejecting_with(alias, false) || right.null_rejecting_with(alias, false),
            // NOT (P OR Q) == NOT P AND NOT Q
            Expr::BinaryOp {
                left,
                op: BinaryOp::Or,
                right,
            } if negated => left.null_rejecting_with(alias, true) || right.null_rejecting_with(alias, true),
            Expr::BinaryOp {
                left,
                op: BinaryOp::Or,
                right,
            } => left.null_rejecting_with(alias, false) && right.null_rejecting_with(alias, false),
            Expr::UnaryOp {
                op: UnaryOp::Not,
                expr,
            } => expr.null_rejecting_with(alias, !negated),
            // Only IS NOT NULL rejects.
            Expr::IsNull(inner) => negated && inner.references_table(alias),
            _ if self.has_null_masking_subexpression() => false,
            _ => self.references_table(alias),
        }
    }

    /// Aggregate sub-expressions, outermost first; aggregates nested inside
    /// other aggregates are not reported separately.
    pub fn aggregates(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.collect_aggregates(&mut out);
        out
    }

    fn collect_aggregates<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        if let Expr::Aggregate { .. } = self {
            out.push(self);
            return;
        }
        for child in self.children() {
            child.collect_aggregates(out);
        }
    }

    /// Structural equality that ignores type annotations on column references.
    pub fn same_value(&self, other: &Expr) -> bool {
        self.normalized() == other.normalized()
    }

    fn normalized(&self) -> Expr {
        self.transform(&mut |e| match e {
            Expr::Column(col) => Some(Expr::col(col.table.clone(), col.column.clone())),
            _ => None,
        })
    }

    /// Copy with every column re-qualified by `table`.
    pub fn with_table(&self, table: &str) -> Expr {
        self.transform(&mut |e| match e {
            Expr::Column(col) => Some(Expr::Column(ColumnRef {
                table: table.to_string(),
                ..col.clone()
            })),
            _ => None,
        })
    }

    /// Top-down rewrite. `f` returns a replacement for a node, or `None` to
    /// keep it and descend into its children.
    pub fn transform(&self, f: &mut impl FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        match self {
            Expr::Column(_) | Expr::Constant { .. } | Expr::Parameter { .. } | Expr::TupleAddress => {
                self.clone()
            }
            Expr::Aggregate {
                func,
                distinct,
                arg,
            } => Expr::Aggregate {
                func: *func,
                distinct: *distinct,
                arg: arg.as_ref().map(|a| Box::new(a.transform(f))),
            },
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: Box::new(left.transform(f)),
                op: *op,
                right: Box::new(right.transform(f)),
            },
            Expr::UnaryOp { op, expr } => Expr::UnaryOp {
                op: *op,
                expr: Box::new(expr.transform(f)),
            },
            Expr::IsNull(expr) => Expr::IsNull(Box::new(expr.transform(f))),
            Expr::Function {
                name,
                id,
                args,
                value_type,
            } => Expr::Function {
                name: name.clone(),
                id: *id,
                args: args.iter().map(|a| a.transform(f)).collect(),
                value_type: *value_type,
            },
            Expr::Cast { expr, value_type } => Expr::Cast {
                expr: Box::new(expr.transform(f)),
                value_type: *value_type,
            },
        }
    }

    fn has_null_masking_subexpression(&self) -> bool {
        self.any(&mut |e| match e {
            Expr::UnaryOp { .. } | Expr::IsNull(_) | Expr::Cast { .. } | Expr::Function { .. } => {
                true
            }
            Expr::BinaryOp { op, .. } => op.is_arithmetic(),
            _ => false,
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(col) if col.is_intermediate() => write!(f, "{}", col.column),
            Expr::Column(col) => write!(f, "{}.{}", col.table, col.column),
            Expr::Constant { value, .. } => write!(f, "{}", value),
            Expr::Parameter { index, .. } => write!(f, "?{}", index),
            Expr::Aggregate {
                func: AggregateFunc::CountStar,
                ..
            } => write!(f, "COUNT(*)"),
            Expr::Aggregate {
                func,
                distinct,
                arg,
            } => {
                write!(f, "{}(", func.name())?;
                if *distinct {
                    write!(f, "DISTINCT ")?;
                }
                if let Some(arg) = arg {
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::BinaryOp { left, op, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::UnaryOp {
                op: UnaryOp::Not,
                expr,
            } => write!(f, "NOT {}", expr),
            Expr::UnaryOp {
                op: UnaryOp::Negate,
                expr,
            } => write!(f, "-{}", expr),
            Expr::IsNull(expr) => write!(f, "{} IS NULL", expr),
            Expr::Function { name, args, .. } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
            Expr::Cast { expr, value_type } => {
                write!(f, "CAST({} AS {:?})", expr, value_type.data_type)
            }
            Expr::TupleAddress => write!(f, "tuple_address"),
        }
    }
}
