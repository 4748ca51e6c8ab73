//! Tests for INSERT, UPDATE and DELETE plans.

mod common;

use std::collections::BTreeMap;

use insta::assert_snapshot;
use shardplan::catalog::{DataType, Table};
use shardplan::expr::{Expr, Literal, ValueType};
use shardplan::planner::{FixedAccessPaths, PlanNode, PlanTree, StatementPartitioning};
use shardplan::statement::{Assignment, DeleteStmt, InsertStmt, ParsedStatement, UpdateStmt};

use common::{assert_fragment_pairs, audit_log, orders, plan, region_totals, regions};

fn insert(sql: &str, table: Table, values: &[(&str, Expr)]) -> ParsedStatement {
    ParsedStatement::Insert(InsertStmt {
        sql: sql.to_string(),
        table,
        values: values
            .iter()
            .map(|(c, e)| (c.to_string(), e.clone()))
            .collect::<BTreeMap<_, _>>(),
        parameters: Vec::new(),
    })
}

fn delete(sql: &str, alias: &str, table: Table, where_expr: Option<Expr>) -> ParsedStatement {
    ParsedStatement::Delete(DeleteStmt {
        sql: sql.to_string(),
        alias: alias.to_string(),
        table,
        where_expr,
        parameters: Vec::new(),
    })
}

fn update(sql: &str, assignments: Vec<Assignment>, where_expr: Expr) -> ParsedStatement {
    ParsedStatement::Update(UpdateStmt {
        sql: sql.to_string(),
        alias: "o".to_string(),
        table: orders(),
        assignments,
        where_expr: Some(where_expr),
        parameters: Vec::new(),
    })
}

fn filtered_scan(sql: &str, table: &str, alias: &str, filter: Expr) -> FixedAccessPaths {
    FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan(table, alias).with_predicate(filter)))
}

#[test]
fn test_insert_with_constant_partition_key_is_single_partition() {
    let sql = "INSERT INTO orders (id, region, amount) VALUES (7, 'west', 3)";
    let stmt = insert(
        sql,
        orders(),
        &[
            ("id", Expr::int(7)),
            ("region", Expr::string("west")),
            ("amount", Expr::typed_constant(Literal::Int(3), ValueType::of(DataType::Integer))),
        ],
    );

    let plan = plan(&stmt, &FixedAccessPaths::new(), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Insert: orders
      Materialize: [7 as id, CAST('west' AS Varchar) as region, 3 as amount, NULL as customer_id]
    ");
    assert!(!plan.read_only);
    assert!(!plan.replicated_table_dml);
}

#[test]
fn test_insert_into_replicated_table_keeps_one_count() {
    let sql = "INSERT INTO regions VALUES (1, 'north')";
    let stmt = insert(sql, regions(), &[("id", Expr::int(1)), ("name", Expr::string("north"))]);

    let plan = plan(&stmt, &FixedAccessPaths::new(), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Limit: limit=1
      Receive
        Send
          Insert: regions (multi-partition)
            Materialize: [1 as id, CAST('north' AS Varchar) as name]
    ");
    assert!(plan.replicated_table_dml);
    assert_fragment_pairs(&plan.tree);
}

#[test]
fn test_insert_missing_required_column() {
    let sql = "INSERT INTO orders (amount) VALUES (3)";
    let stmt = insert(sql, orders(), &[("amount", Expr::int(3))]);

    let err = plan(&stmt, &FixedAccessPaths::new(), StatementPartitioning::infer()).unwrap_err();
    assert_eq!(err, "Column id has no default and is not nullable.");
}

#[test]
fn test_insert_into_view_rejected() {
    let sql = "INSERT INTO region_totals VALUES ('west', 1, 1)";
    let stmt = insert(sql, region_totals(), &[("region", Expr::string("west"))]);

    let err = plan(&stmt, &FixedAccessPaths::new(), StatementPartitioning::infer()).unwrap_err();
    assert_eq!(err, "Illegal to modify a materialized view.");
}

#[test]
fn test_pinned_update_computes_new_values_in_scan() {
    let sql = "UPDATE orders o SET amount = amount + 1 WHERE o.id = 3";
    let integer = ValueType::of(DataType::Integer);
    let filter = Expr::col("o", "id").eq(Expr::int(3));
    let stmt = update(
        sql,
        vec![Assignment {
            column: "amount".to_string(),
            value: Expr::typed_col("o", "amount", integer).plus(Expr::typed_constant(Literal::Int(1), integer)),
        }],
        filter.clone(),
    );

    let plan = plan(&stmt, &filtered_scan(sql, "orders", "o", filter), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Update: orders
      SeqScan: orders as o filter (o.id = 3)
        inline Projection: [tuple_address, (o.amount + 1) as amount]
    ");
}

#[test]
fn test_distributed_update_of_indexed_column_sums_counts() {
    let sql = "UPDATE orders o SET region = 'east' WHERE o.amount > 5";
    let filter = Expr::col("o", "amount").gt(Expr::int(5));
    let stmt = update(
        sql,
        vec![Assignment {
            column: "region".to_string(),
            value: Expr::string("east"),
        }],
        filter.clone(),
    );

    let plan = plan(&stmt, &filtered_scan(sql, "orders", "o", filter), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Aggregate: [SUM(modified_tuples)] (coordinator)
      Receive
        Send
          Update: orders (indexes)
            SeqScan: orders as o filter (o.amount > 5)
              inline Projection: [tuple_address, CAST('east' AS Varchar) as region]
    ");
    assert_fragment_pairs(&plan.tree);
}

#[test]
fn test_export_table_cannot_be_updated() {
    let sql = "UPDATE audit_log a SET event = 'x'";
    let stmt = ParsedStatement::Update(UpdateStmt {
        sql: sql.to_string(),
        alias: "a".to_string(),
        table: audit_log(),
        assignments: vec![Assignment {
            column: "event".to_string(),
            value: Expr::string("x"),
        }],
        where_expr: None,
        parameters: Vec::new(),
    });

    let err = plan(&stmt, &FixedAccessPaths::new(), StatementPartitioning::infer()).unwrap_err();
    assert_eq!(err, "Illegal to update an export table.");
}

#[test]
fn test_replicated_delete_all_truncates_everywhere() {
    let sql = "DELETE FROM regions";
    let stmt = delete(sql, "r", regions(), None);
    let paths = FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan("regions", "r")));

    let plan = plan(&stmt, &paths, StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Limit: limit=1
      Receive
        Send
          Delete: regions (truncate)
    ");
    assert!(plan.replicated_table_dml);
}

#[test]
fn test_replicated_write_in_single_partition_procedure_rejected() {
    let sql = "DELETE FROM regions";
    let stmt = delete(sql, "r", regions(), None);
    let paths = FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan("regions", "r")));

    let err = plan(&stmt, &paths, StatementPartitioning::single_partition()).unwrap_err();
    assert_eq!(
        err,
        "Trying to write to replicated table 'regions' in a single-partition procedure."
    );
}

#[test]
fn test_single_partition_truncate() {
    let sql = "DELETE FROM orders";
    let stmt = delete(sql, "o", orders(), None);
    let paths = FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan("orders", "o")));

    let plan = plan(&stmt, &paths, StatementPartitioning::single_partition()).unwrap();
    assert_snapshot!(plan.tree.explain(), @"Delete: orders (truncate)");
}

#[test]
fn test_filtered_partitioned_delete_sums_counts() {
    let sql = "DELETE FROM orders o WHERE o.amount > 5";
    let filter = Expr::col("o", "amount").gt(Expr::int(5));
    let stmt = delete(sql, "o", orders(), Some(filter.clone()));

    let plan = plan(&stmt, &filtered_scan(sql, "orders", "o", filter), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Aggregate: [SUM(modified_tuples)] (coordinator)
      Receive
        Send
          Delete: orders
            SeqScan: orders as o filter (o.amount > 5)
              inline Projection: [tuple_address]
    ");
    assert_fragment_pairs(&plan.tree);
    assert!(plan.is_content_deterministic());
}

#[test]
fn test_export_table_cannot_be_deleted_from() {
    let sql = "DELETE FROM audit_log";
    let stmt = delete(sql, "a", audit_log(), None);

    let err = plan(&stmt, &FixedAccessPaths::new(), StatementPartitioning::infer()).unwrap_err();
    assert_eq!(err, "Illegal to delete from an export table.");
}
