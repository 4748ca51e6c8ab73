//! Tests for FROM-clause sub-queries.

mod common;

use insta::assert_snapshot;
use shardplan::expr::Expr;
use shardplan::planner::{FixedAccessPaths, PlanNode, PlanNodeType, PlanTree, StatementPartitioning};
use shardplan::statement::{JoinNode, LimitValue, ParsedColInfo, ParsedStatement, SelectStmt, StmtTableScan};

use common::{assembler, assert_fragment_pairs, orders, plan};

const OUTER_SQL: &str = "SELECT s.id FROM (SELECT o.id FROM orders o ...) s";

fn outer(inner: SelectStmt) -> ParsedStatement {
    ParsedStatement::Select(
        SelectStmt::new(
            OUTER_SQL,
            vec![StmtTableScan::subquery("s", ParsedStatement::Select(inner))],
            JoinNode::leaf("s"),
        )
        .display(ParsedColInfo::column("s", "id")),
    )
}

fn inner_select(sql: &str) -> SelectStmt {
    SelectStmt::new(sql, vec![StmtTableScan::table("o", orders())], JoinNode::leaf("o"))
        .display(ParsedColInfo::column("o", "id"))
}

#[test]
fn test_pinned_subquery_pins_parent_and_is_grafted() {
    let inner_sql = "SELECT o.id FROM orders o WHERE o.id = 4";
    let filter = Expr::col("o", "id").eq(Expr::int(4));
    let mut inner = inner_select(inner_sql);
    inner.join_tree = Some(JoinNode::leaf("o").with_where(filter.clone()));

    let paths = FixedAccessPaths::new()
        .with(inner_sql, PlanTree::new(PlanNode::seq_scan("orders", "o").with_predicate(filter)))
        .with(OUTER_SQL, PlanTree::new(PlanNode::subquery_scan("s")));

    let mut assembler = assembler(&paths, StatementPartitioning::infer());
    let plan = assembler.best_cost_plan(&outer(inner)).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    SeqScan: subquery s
      inline Projection: [s.id as id]
      SeqScan: orders as o filter (o.id = 4)
        inline Projection: [o.id as id]
    ");
    assert_eq!(plan.plan_id, 2);
    assert!(assembler.partitioning().is_inferred_single());
}

#[test]
fn test_distributed_subquery_boundary_moves_to_parent() {
    let inner_sql = "SELECT o.id FROM orders o LIMIT 3";
    let inner = inner_select(inner_sql).limit(LimitValue::Constant(3));

    let paths = FixedAccessPaths::new()
        .with(inner_sql, PlanTree::new(PlanNode::seq_scan("orders", "o")))
        .with(OUTER_SQL, PlanTree::new(PlanNode::subquery_scan("s")));

    let plan = plan(&outer(inner), &paths, StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [s.id as id]
      Receive
        Send
          SeqScan: subquery s
            Limit: limit=3
              Projection: [o.id as id]
                Limit: limit=3
                  SeqScan: orders as o
    ");
    assert_fragment_pairs(&plan.tree);
    assert_eq!(plan.tree.find_all(PlanNodeType::Receive).len(), 1);
    assert!(plan.has_limit_or_offset());
    assert!(!plan.is_order_deterministic());
    assert!(!plan.is_content_deterministic());
}

#[test]
fn test_subquery_failure_reported_for_parent() {
    let inner_sql = "SELECT o.id FROM orders o";
    let paths = FixedAccessPaths::new().with(OUTER_SQL, PlanTree::new(PlanNode::subquery_scan("s")));

    let err = plan(&outer(inner_select(inner_sql)), &paths, StatementPartitioning::infer()).unwrap_err();
    assert_eq!(err, "No access paths available for statement: SELECT o.id FROM orders o");
}
