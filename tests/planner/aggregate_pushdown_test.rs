//! Tests for splitting aggregates across the fragment boundary.

mod common;

use insta::assert_snapshot;
use shardplan::config::PlannerSettings;
use shardplan::expr::{AggregateFunc, Expr};
use shardplan::planner::{FixedAccessPaths, PlanNode, PlanTree, StatementPartitioning};
use shardplan::statement::{JoinNode, ParsedColInfo, ParsedStatement, SelectStmt, StmtTableScan};

use common::{assert_fragment_pairs, orders, plan, plan_with_settings};

fn orders_select(sql: &str) -> SelectStmt {
    SelectStmt::new(sql, vec![StmtTableScan::table("o", orders())], JoinNode::leaf("o"))
}

fn seq_scan(sql: &str) -> FixedAccessPaths {
    FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan("orders", "o")))
}

#[test]
fn test_count_star_summed_at_coordinator() {
    let sql = "SELECT COUNT(*) FROM orders o";
    let stmt = orders_select(sql).display(ParsedColInfo::expr("cnt", Expr::count_star()));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Aggregate: [SUM(cnt)] (coordinator)
      Receive
        Send
          Aggregate: [COUNT(*)]
            SeqScan: orders as o
    ");
    assert_fragment_pairs(&plan.tree);
    assert!(plan.is_order_deterministic());
}

#[test]
fn test_push_down_disabled_aggregates_at_coordinator() {
    let sql = "SELECT COUNT(*) FROM orders o";
    let stmt = orders_select(sql).display(ParsedColInfo::expr("cnt", Expr::count_star()));
    let settings = PlannerSettings {
        push_down_aggregates: false,
        ..PlannerSettings::default()
    };

    let plan = plan_with_settings(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer(), settings)
        .unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Aggregate: [COUNT(*)]
      Receive
        Send
          SeqScan: orders as o
    ");
}

#[test]
fn test_avg_is_not_split() {
    let sql = "SELECT AVG(o.amount) FROM orders o";
    let stmt = orders_select(sql).display(ParsedColInfo::expr(
        "avg_amount",
        Expr::agg(AggregateFunc::Avg, Expr::col("o", "amount")),
    ));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Aggregate: [AVG(o.amount)]
      Receive
        Send
          SeqScan: orders as o
    ");
}

#[test]
fn test_group_by_uses_grouping_index_below_send() {
    let sql = "SELECT o.region, COUNT(*) FROM orders o GROUP BY o.region";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "region"))
        .display(ParsedColInfo::expr("cnt", Expr::count_star()))
        .group_by(ParsedColInfo::column("o", "region"));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    HashAggregate: [SUM(cnt)] group by [region] (coordinator)
      Receive
        Send
          Aggregate: [COUNT(*)] group by [o.region]
            IndexScan: orders as o using orders_region (grouping)
    ");
    assert_fragment_pairs(&plan.tree);
}

#[test]
fn test_group_by_partition_column_keeps_having_below_send() {
    let sql = "SELECT o.id, SUM(o.amount) FROM orders o GROUP BY o.id HAVING SUM(o.amount) > 100";
    let total = Expr::agg(AggregateFunc::Sum, Expr::col("o", "amount"));
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "id"))
        .display(ParsedColInfo::expr("total", total.clone()))
        .group_by(ParsedColInfo::column("o", "id"))
        .having(total.gt(Expr::int(100)));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Receive
      Send
        HashAggregate: [SUM(o.amount)] group by [o.id] having (total > 100)
          SeqScan: orders as o
    ");
}

#[test]
fn test_single_partition_group_by_streams_from_index() {
    let sql = "SELECT o.region, COUNT(*) FROM orders o GROUP BY o.region";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "region"))
        .display(ParsedColInfo::expr("cnt", Expr::count_star()))
        .group_by(ParsedColInfo::column("o", "region"));

    let plan = plan(
        &ParsedStatement::Select(stmt),
        &seq_scan(sql),
        StatementPartitioning::single_partition(),
    )
    .unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Aggregate: [COUNT(*)] group by [o.region]
      IndexScan: orders as o using orders_region (grouping)
    ");
}

#[test]
fn test_unsplit_group_by_over_receive_hashes() {
    let sql = "SELECT o.region, AVG(o.amount) FROM orders o GROUP BY o.region";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "region"))
        .display(ParsedColInfo::expr(
            "avg_amount",
            Expr::agg(AggregateFunc::Avg, Expr::col("o", "amount")),
        ))
        .group_by(ParsedColInfo::column("o", "region"));

    let plan = plan(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    HashAggregate: [AVG(o.amount)] group by [o.region]
      Receive
        Send
          IndexScan: orders as o using orders_region (grouping)
    ");
    assert_fragment_pairs(&plan.tree);
}

#[test]
fn test_push_down_disabled_group_by_over_receive_hashes() {
    let sql = "SELECT o.region, COUNT(*) FROM orders o GROUP BY o.region";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "region"))
        .display(ParsedColInfo::expr("cnt", Expr::count_star()))
        .group_by(ParsedColInfo::column("o", "region"));
    let settings = PlannerSettings {
        push_down_aggregates: false,
        ..PlannerSettings::default()
    };

    let plan = plan_with_settings(&ParsedStatement::Select(stmt), &seq_scan(sql), StatementPartitioning::infer(), settings)
        .unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    HashAggregate: [COUNT(*)] group by [o.region]
      Receive
        Send
          IndexScan: orders as o using orders_region (grouping)
    ");
}
