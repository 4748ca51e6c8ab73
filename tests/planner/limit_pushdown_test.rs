//! Tests for LIMIT/OFFSET placement and distributed limits.

mod common;

use insta::assert_snapshot;
use shardplan::catalog::DataType;
use shardplan::config::PlannerSettings;
use shardplan::expr::{Expr, ValueType};
use shardplan::planner::{FixedAccessPaths, PlanNode, PlanTree, StatementPartitioning};
use shardplan::statement::{JoinNode, LimitValue, ParsedColInfo, ParsedStatement, SelectStmt, StmtTableScan};

use common::{assert_fragment_pairs, orders, plan, plan_with_settings};

fn orders_select(sql: &str) -> SelectStmt {
    SelectStmt::new(sql, vec![StmtTableScan::table("o", orders())], JoinNode::leaf("o"))
}

fn seq_scan(sql: &str) -> FixedAccessPaths {
    FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan("orders", "o")))
}

#[test]
fn test_ordered_limit_pushed_with_offset_folded() {
    let sql = "SELECT o.id FROM orders o ORDER BY o.id LIMIT 10 OFFSET 5";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "id"))
        .order_by(ParsedColInfo::column("o", "id"))
        .limit(LimitValue::Constant(10))
        .offset(LimitValue::Constant(5));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [o.id as id]
      OrderBy: [o.id asc]
        inline Limit: limit=10, offset=5
        Receive
          Send
            OrderBy: [o.id asc]
              inline Limit: limit=15
              SeqScan: orders as o
    ");
    assert_fragment_pairs(&plan.tree);
    assert!(plan.is_content_deterministic());
}

#[test]
fn test_push_down_disabled_keeps_limit_at_coordinator() {
    let sql = "SELECT o.id FROM orders o ORDER BY o.id LIMIT 10";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "id"))
        .order_by(ParsedColInfo::column("o", "id"))
        .limit(LimitValue::Constant(10));
    let settings = PlannerSettings {
        push_down_limits: false,
        ..PlannerSettings::default()
    };

    let plan = plan_with_settings(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer(), settings)
        .unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [o.id as id]
      OrderBy: [o.id asc]
        inline Limit: limit=10
        Receive
          Send
            SeqScan: orders as o
    ");
}

#[test]
fn test_order_by_aggregate_blocks_push_down() {
    let sql = "SELECT o.region, COUNT(*) FROM orders o GROUP BY o.region ORDER BY 2 DESC LIMIT 5";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "region"))
        .display(ParsedColInfo::expr("cnt", Expr::count_star()))
        .group_by(ParsedColInfo::column("o", "region"))
        .order_by(ParsedColInfo::expr("cnt", Expr::count_star()).descending())
        .limit(LimitValue::Constant(5));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [region, cnt]
      OrderBy: [cnt desc]
        inline Limit: limit=5
        HashAggregate: [SUM(cnt)] group by [region] (coordinator)
          Receive
            Send
              Aggregate: [COUNT(*)] group by [o.region]
                IndexScan: orders as o using orders_region (grouping)
    ");
}

#[test]
fn test_order_by_aggregate_pushed_when_groups_are_partition_local() {
    let sql = "SELECT o.id, COUNT(*) FROM orders o GROUP BY o.id ORDER BY 2 DESC LIMIT 5";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "id"))
        .display(ParsedColInfo::expr("cnt", Expr::count_star()))
        .group_by(ParsedColInfo::column("o", "id"))
        .order_by(ParsedColInfo::expr("cnt", Expr::count_star()).descending())
        .limit(LimitValue::Constant(5));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [id, cnt]
      OrderBy: [cnt desc]
        inline Limit: limit=5
        Receive
          Send
            OrderBy: [cnt desc]
              inline Limit: limit=5
              HashAggregate: [COUNT(*)] group by [o.id]
                SeqScan: orders as o
    ");
    assert_fragment_pairs(&plan.tree);
}

#[test]
fn test_parameterized_limit_and_offset_sum_below_send() {
    let sql = "SELECT o.id FROM orders o LIMIT ? OFFSET ?";
    let bigint = ValueType::of(DataType::BigInt);
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "id"))
        .limit(LimitValue::Parameter(0))
        .offset(LimitValue::Parameter(1))
        .with_parameters(vec![bigint, bigint]);

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Limit: limit=?0, offset=?1
      Projection: [o.id as id]
        Receive
          Send
            Limit: limit=(?0 + ?1)
              SeqScan: orders as o
    ");
    assert_eq!(plan.parameters.len(), 2);
    assert!(plan.has_limit_or_offset());
    assert!(!plan.is_content_deterministic());
}

#[test]
fn test_distinct_keeps_limit_at_coordinator() {
    let sql = "SELECT DISTINCT o.region FROM orders o LIMIT 3";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "region"))
        .distinct()
        .limit(LimitValue::Constant(3));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Limit: limit=3
      Projection: [o.region as region]
        Distinct: [o.region]
          Receive
            Send
              Distinct: [o.region]
                SeqScan: orders as o
    ");
    assert_fragment_pairs(&plan.tree);
}

#[test]
fn test_huge_limit_saturates_partition_limit() {
    let sql = "SELECT o.id FROM orders o ORDER BY o.id LIMIT 18446744073709551615 OFFSET 1";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "id"))
        .order_by(ParsedColInfo::column("o", "id"))
        .limit(LimitValue::Constant(u64::MAX))
        .offset(LimitValue::Constant(1));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [o.id as id]
      OrderBy: [o.id asc]
        inline Limit: limit=18446744073709551615, offset=1
        Receive
          Send
            OrderBy: [o.id asc]
              inline Limit: limit=18446744073709551615
              SeqScan: orders as o
    ");
}
