//! End-to-end tests for the assembler: error reporting, plan-id sequencing
//! and plan output.

mod common;

use std::fs;
use std::sync::Arc;

use shardplan::config::{OutputFormat, OutputSettings};
use shardplan::expr::Expr;
use shardplan::planner::{
    CompiledPlan, CostBasedSelector, FixedAccessPaths, PlanAssembler, PlanError, PlanNode, PlanTree,
    StatementPartitioning,
};
use shardplan::statement::{
    Assignment, JoinNode, JoinType, ParsedColInfo, ParsedStatement, SelectStmt, StmtTableScan, UnionKind,
    UnionStmt, UpdateStmt,
};

use common::{assembler, audit_log, catalog, orders, regions};

fn export_read() -> ParsedStatement {
    ParsedStatement::Select(
        SelectStmt::new(
            "SELECT a.event FROM audit_log a",
            vec![StmtTableScan::table("a", audit_log())],
            JoinNode::leaf("a"),
        )
        .display(ParsedColInfo::column("a", "event")),
    )
}

fn pinned_orders(sql: &str, value: i64) -> (ParsedStatement, Expr) {
    let filter = Expr::col("o", "id").eq(Expr::int(value));
    let mut stmt = SelectStmt::new(sql, vec![StmtTableScan::table("o", orders())], JoinNode::leaf("o"))
        .display(ParsedColInfo::column("o", "id"));
    stmt.join_tree = Some(JoinNode::leaf("o").with_where(filter.clone()));
    (ParsedStatement::Select(stmt), filter)
}

#[test]
fn test_first_error_is_kept() {
    let paths = FixedAccessPaths::new();
    let mut assembler = assembler(&paths, StatementPartitioning::infer());

    assert!(assembler.best_cost_plan(&export_read()).is_none());
    let (unplannable, _) = pinned_orders("SELECT o.id FROM orders o WHERE o.id = 1", 1);
    assert!(assembler.best_cost_plan(&unplannable).is_none());

    assert_eq!(assembler.error_message().as_deref(), Some("Illegal to read an export table."));
}

#[test]
fn test_malformed_candidate_is_an_internal_error() {
    let sql = "UPDATE orders o SET amount = 1 WHERE o.id = 2";
    let stmt = ParsedStatement::Update(UpdateStmt {
        sql: sql.to_string(),
        alias: "o".to_string(),
        table: orders(),
        assignments: vec![Assignment {
            column: "amount".to_string(),
            value: Expr::int(1),
        }],
        where_expr: Some(Expr::col("o", "id").eq(Expr::int(2))),
        parameters: Vec::new(),
    });
    let mut candidate = PlanTree::new(PlanNode::nest_loop(JoinType::Inner, None));
    let join = candidate.root();
    candidate.add_new_child(join, PlanNode::seq_scan("orders", "o"));
    candidate.add_new_child(join, PlanNode::seq_scan("regions", "r"));
    let paths = FixedAccessPaths::new().with(sql, candidate);

    let mut assembler = assembler(&paths, StatementPartitioning::infer());
    assert!(assembler.best_cost_plan(&stmt).is_none());
    assert!(matches!(assembler.last_error(), Some(PlanError::Internal(_))));
    assert_eq!(
        assembler.error_message().as_deref(),
        Some("Internal planner error: UPDATE input must be a scan")
    );
}

#[test]
fn test_plan_ids_continue_through_set_operation_children() {
    let (first, filter) = pinned_orders("SELECT o.id FROM orders o WHERE o.id = 9", 9);
    let second = ParsedStatement::Select(
        SelectStmt::new(
            "SELECT r.id FROM regions r",
            vec![StmtTableScan::table("r", regions())],
            JoinNode::leaf("r"),
        )
        .display(ParsedColInfo::column("r", "id")),
    );
    let paths = FixedAccessPaths::new()
        .with(first.sql(), PlanTree::new(PlanNode::seq_scan("orders", "o").with_predicate(filter.clone())))
        .with(first.sql(), PlanTree::new(PlanNode::seq_scan("orders", "o").with_predicate(filter)))
        .with(second.sql(), PlanTree::new(PlanNode::seq_scan("regions", "r")));
    let union = ParsedStatement::Union(UnionStmt {
        sql: format!("{} UNION ALL {}", first.sql(), second.sql()),
        kind: UnionKind::UnionAll,
        children: vec![first, second],
        parameters: Vec::new(),
    });

    let mut assembler = assembler(&paths, StatementPartitioning::infer());
    let plan = assembler.best_cost_plan(&union).unwrap();
    // Two candidates for the first child, one for the second, then the union.
    assert_eq!(plan.plan_id, 4);
    assert!(plan.tree.explain().starts_with("Union: union_all\n"));
}

#[test]
fn test_finalize_writes_winner_named_by_sql_fingerprint() {
    let dir = std::env::temp_dir().join(format!("shardplan-plans-{}", std::process::id()));
    let (stmt, filter) = pinned_orders("SELECT o.id FROM orders o WHERE o.id = 12", 12);
    let paths = FixedAccessPaths::new().with(
        stmt.sql(),
        PlanTree::new(PlanNode::seq_scan("orders", "o").with_predicate(filter)),
    );
    let selector = CostBasedSelector::new(Arc::new(catalog())).with_output(OutputSettings {
        plan_dir: Some(dir.to_string_lossy().into_owned()),
        format: OutputFormat::Json,
    });

    let mut assembler = PlanAssembler::new(&paths, Box::new(selector), StatementPartitioning::infer());
    let plan = assembler.best_cost_plan(&stmt).unwrap();
    assembler.finalize_best_cost_plan().unwrap();

    let path = dir.join(format!("{}.json", plan.sql_fingerprint().unwrap()));
    let written: CompiledPlan = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written.sql, plan.sql);
    assert_eq!(written.plan_id, plan.plan_id);
    assert_eq!(written.tree.explain(), plan.tree.explain());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_finalize_without_plan_dir_writes_nothing() {
    let (stmt, filter) = pinned_orders("SELECT o.id FROM orders o WHERE o.id = 13", 13);
    let paths = FixedAccessPaths::new().with(
        stmt.sql(),
        PlanTree::new(PlanNode::seq_scan("orders", "o").with_predicate(filter)),
    );
    let mut assembler = assembler(&paths, StatementPartitioning::infer());
    assert!(assembler.best_cost_plan(&stmt).is_some());
    assert!(assembler.finalize_best_cost_plan().is_ok());
}
