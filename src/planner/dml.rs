//! INSERT, UPDATE and DELETE plans.
//!
//! A write plan is a modification node over an input that supplies the row
//! identity (and new values). Distributed writes add a fragment boundary
//! above the modification node and reduce the per-partition results at the
//! coordinator.

use tracing::debug;

use super::compiled::CompiledPlan;
use super::partitioning::StatementPartitioning;
use super::plan::{
    AggregateNode, AggregateStrategy, LimitNode, NodeId, OutputColumn, PlanNode, PlanNodeKind,
    PlanNodeType, PlanTree,
};
use super::{PlanError, PlanResult};
use crate::catalog::{Column, ColumnDefault, DataType, Table};
use crate::expr::{AggregateFunc, Expr, ValueType};
use crate::statement::{DeleteStmt, InsertStmt, LimitValue, UpdateStmt};

/// Per-partition count of modified rows.
pub const MODIFIED_TUPLES: &str = "modified_tuples";

const TUPLE_ADDRESS: &str = "tuple_address";

fn column_type(column: &Column) -> ValueType {
    ValueType::new(column.data_type, column.size)
}

/// Casts `expr` to the column's exact type and size when they differ.
fn coerce_to_column(expr: Expr, column: &Column) -> Expr {
    let target = column_type(column);
    if expr.value_type() == Some(target) {
        expr
    } else {
        expr.cast_to(target)
    }
}

fn runs_single_partition(partitioning: &StatementPartitioning) -> bool {
    partitioning.was_specified_as_single() || partitioning.is_inferred_single()
}

/// Value for a column the INSERT leaves out.
fn default_value(column: &Column) -> PlanResult<Expr> {
    let value_type = column_type(column);
    match &column.default {
        None if !column.nullable => Err(PlanError::planning(format!(
            "Column {} has no default and is not nullable.",
            column.name
        ))),
        None => Ok(Expr::null_of(value_type)),
        Some(ColumnDefault::Value(value)) => Ok(Expr::typed_constant(value.clone(), value_type)),
        Some(ColumnDefault::Function { name, id }) => Ok(Expr::Function {
            name: name.clone(),
            id: *id,
            args: Vec::new(),
            value_type: Some(value_type),
        }),
    }
}

/// Reduces per-partition results above `receive`: a replicated table gives
/// the same count on every partition, so one is kept; partitioned counts are
/// summed.
fn add_sum_or_limit(tree: &mut PlanTree, receive: NodeId, replicated: bool) -> NodeId {
    let reducer = if replicated {
        PlanNode::limit(LimitNode {
            limit: Some(LimitValue::Constant(1)),
            offset: None,
            limit_expr: None,
        })
    } else {
        let count = Expr::intermediate(MODIFIED_TUPLES, Some(ValueType::of(DataType::BigInt)));
        let mut sum = AggregateNode {
            coordinating: true,
            ..AggregateNode::default()
        };
        sum.add_aggregate(AggregateFunc::Sum, false, 0, Some(count.clone()));
        sum.output.push(OutputColumn::new(MODIFIED_TUPLES, count));
        PlanNode::aggregate(AggregateStrategy::Serial, sum)
    };
    tree.push_above(reducer, receive)
}

/// Adds the fragment boundary and coordinator reduction unless the write
/// runs on one partition.
fn distribute(tree: &mut PlanTree, dml_root: NodeId, table: &Table, partitioning: &StatementPartitioning) {
    if runs_single_partition(partitioning) {
        return;
    }
    let receive = tree.add_send_receive_pair(dml_root);
    add_sum_or_limit(tree, receive, table.is_replicated());
}

fn write_plan(sql: &str, tree: PlanTree, table: &Table, parameters: &[ValueType]) -> CompiledPlan {
    let mut plan = CompiledPlan::new(sql, tree, false);
    plan.parameters = parameters.to_vec();
    plan.replicated_table_dml = table.is_replicated();
    plan.statement_guarantees_determinism(false, true);
    plan
}

/// The executor cannot drive a write from an index nested-loop join.
fn is_unsupported_input(tree: &PlanTree) -> bool {
    tree.node_type(tree.root()) == PlanNodeType::NestLoopIndex
}

fn tuple_address_column() -> OutputColumn {
    OutputColumn::new(TUPLE_ADDRESS, Expr::TupleAddress)
}

/// The only plan for an INSERT: a materialized tuple fed to the insert node.
///
/// Records the value bound to the partitioning column, which can make the
/// statement single-partition.
pub fn insert_plan(stmt: &InsertStmt, partitioning: &mut StatementPartitioning) -> PlanResult<CompiledPlan> {
    let table = &stmt.table;
    let mut columns = Vec::with_capacity(table.columns.len());

    for column in &table.columns {
        let expr = match stmt.values.get(&column.name) {
            Some(expr) => expr.clone(),
            None => default_value(column)?,
        };
        if partitioning
            .dml_partition_column()
            .is_some_and(|p| p.eq_ignore_ascii_case(&column.name))
        {
            partitioning.add_partitioning_expression(format!("{}.{}", table.name, column.name), expr.clone());
        }
        columns.push(OutputColumn::new(column.name.clone(), coerce_to_column(expr, column)));
    }

    let multi_partition = !runs_single_partition(partitioning);
    let mut tree = PlanTree::new(PlanNode::from(PlanNodeKind::Insert {
        target: table.name.clone(),
        multi_partition,
    }));
    let insert = tree.root();
    tree.add_new_child(insert, PlanNodeKind::Materialize { columns }.into());
    distribute(&mut tree, insert, table, partitioning);

    Ok(write_plan(&stmt.sql, tree, table, &stmt.parameters))
}

/// Completes one UPDATE candidate; `Ok(None)` skips it.
pub fn update_plan(
    stmt: &UpdateStmt,
    mut tree: PlanTree,
    partitioning: &StatementPartitioning,
) -> PlanResult<Option<CompiledPlan>> {
    if is_unsupported_input(&tree) {
        debug!(sql = %stmt.sql, "Skipping index nested-loop candidate for UPDATE");
        return Ok(None);
    }
    let scan = tree.root();
    if !tree.node_type(scan).is_scan() {
        return Err(PlanError::internal("UPDATE input must be a scan"));
    }

    let table = &stmt.table;
    let indexed = table.indexed_columns();
    let mut update_indexes = false;
    let mut columns = vec![tuple_address_column()];
    for assignment in &stmt.assignments {
        let column = table.column(&assignment.column).ok_or_else(|| {
            PlanError::internal(format!("column {} not found in {}", assignment.column, table.name))
        })?;
        update_indexes |= indexed.contains(column.name.as_str());
        columns.push(OutputColumn::new(
            column.name.clone(),
            coerce_to_column(assignment.value.clone(), column),
        ));
    }
    // Replaces any column-culling projection the access path inlined.
    tree.add_inline(scan, PlanNode::projection(columns));

    let update = tree.push_above(
        PlanNodeKind::Update {
            target: table.name.clone(),
            update_indexes,
        }
        .into(),
        scan,
    );
    distribute(&mut tree, update, table, partitioning);

    Ok(Some(write_plan(&stmt.sql, tree, table, &stmt.parameters)))
}

/// Completes one DELETE candidate; `Ok(None)` skips it.
///
/// An unfiltered sequential scan becomes a truncate that reads nothing.
pub fn delete_plan(
    stmt: &DeleteStmt,
    mut tree: PlanTree,
    partitioning: &StatementPartitioning,
) -> PlanResult<Option<CompiledPlan>> {
    if is_unsupported_input(&tree) {
        debug!(sql = %stmt.sql, "Skipping index nested-loop candidate for DELETE");
        return Ok(None);
    }
    let table = &stmt.table;
    let scan = tree.root();

    let unfiltered = matches!(
        &tree.node(scan).kind,
        PlanNodeKind::SeqScan(s) if s.predicate.is_none()
    );
    let (mut tree, delete) = if unfiltered {
        let tree = PlanTree::new(
            PlanNodeKind::Delete {
                target: table.name.clone(),
                truncate: true,
            }
            .into(),
        );
        let delete = tree.root();
        (tree, delete)
    } else {
        if !tree.node_type(scan).is_scan() {
            return Err(PlanError::internal("DELETE input must be a scan"));
        }
        tree.add_inline(scan, PlanNode::projection(vec![tuple_address_column()]));
        let delete = tree.push_above(
            PlanNodeKind::Delete {
                target: table.name.clone(),
                truncate: false,
            }
            .into(),
            scan,
        );
        (tree, delete)
    };
    distribute(&mut tree, delete, table, partitioning);

    Ok(Some(write_plan(&stmt.sql, tree, table, &stmt.parameters)))
}
