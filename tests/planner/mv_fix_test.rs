//! Tests for re-aggregating materialized views read across partitions.

mod common;

use insta::assert_snapshot;
use shardplan::expr::Expr;
use shardplan::planner::{FixedAccessPaths, PlanNode, PlanNodeType, PlanTree, StatementPartitioning};
use shardplan::statement::{JoinNode, JoinType, ParsedColInfo, ParsedStatement, SelectStmt, StmtTableScan};

use common::{assert_fragment_pairs, plan, region_totals, region_totals_fix, regions};

fn view_select(sql: &str, filter: Expr) -> SelectStmt {
    let mut stmt = SelectStmt::new(sql, vec![StmtTableScan::table("v", region_totals())], JoinNode::leaf("v"))
        .display(ParsedColInfo::column("v", "region"))
        .display(ParsedColInfo::column("v", "cnt"))
        .with_mv_fix(region_totals_fix("v", &["region", "cnt"]));
    stmt.join_tree = Some(JoinNode::leaf("v").with_where(filter));
    stmt
}

fn view_filter() -> Expr {
    Expr::col("v", "region")
        .eq(Expr::string("west"))
        .and(Expr::col("v", "cnt").gt(Expr::int(10)))
}

#[test]
fn test_view_scan_reaggregated_at_coordinator() {
    let sql = "SELECT v.region, v.cnt FROM region_totals v WHERE v.region = 'west' AND v.cnt > 10";
    let stmt = view_select(sql, view_filter());
    let paths = FixedAccessPaths::new().with(
        sql,
        PlanTree::new(PlanNode::seq_scan("region_totals", "v").with_predicate(view_filter())),
    );

    let plan = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [v.region as region, v.cnt as cnt]
      HashAggregate: [SUM(v.cnt)] group by [v.region] having (v.cnt > 10) (coordinator)
        Receive
          Send
            SeqScan: region_totals as v filter (v.region = 'west')
              inline Projection: [v.region as region, v.cnt as cnt]
    ");
    assert_fragment_pairs(&plan.tree);
}

#[test]
fn test_single_partition_view_read_needs_no_fix() {
    let sql = "SELECT v.region, v.cnt FROM region_totals v WHERE v.region = 'west' AND v.cnt > 10";
    let stmt = view_select(sql, view_filter());
    let paths = FixedAccessPaths::new().with(
        sql,
        PlanTree::new(PlanNode::seq_scan("region_totals", "v").with_predicate(view_filter())),
    );

    let plan = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::single_partition()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    SeqScan: region_totals as v filter ((v.region = 'west') AND (v.cnt > 10))
      inline Projection: [v.region as region, v.cnt as cnt]
    ");
}

fn join_select(sql: &str) -> SelectStmt {
    let on = Expr::col("r", "name").eq(Expr::col("v", "region"));
    SelectStmt::new(
        sql,
        vec![StmtTableScan::table("r", regions()), StmtTableScan::table("v", region_totals())],
        JoinNode::inner(JoinNode::leaf("r"), JoinNode::leaf("v"), on),
    )
    .display(ParsedColInfo::column("r", "name"))
    .display(ParsedColInfo::column("v", "cnt"))
    .with_mv_fix(region_totals_fix("v", &["region", "cnt"]))
}

#[test]
fn test_join_moves_above_reaggregation() {
    let sql = "SELECT r.name, v.cnt FROM regions r JOIN region_totals v ON r.name = v.region";
    let stmt = join_select(sql);

    let mut candidate = PlanTree::new(PlanNode::nest_loop(
        JoinType::Inner,
        Some(Expr::col("r", "name").eq(Expr::col("v", "region"))),
    ));
    let join = candidate.root();
    candidate.add_new_child(join, PlanNode::seq_scan("regions", "r"));
    candidate.add_new_child(join, PlanNode::seq_scan("region_totals", "v"));
    let paths = FixedAccessPaths::new().with(sql, candidate);

    let plan = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [r.name as name, v.cnt as cnt]
      NestLoop: inner on (r.name = v.region)
        SeqScan: regions as r
        HashAggregate: [SUM(v.cnt)] group by [v.region] (coordinator)
          Receive
            Send
              SeqScan: region_totals as v
                inline Projection: [v.region as region, v.cnt as cnt]
    ");
    assert_fragment_pairs(&plan.tree);
    assert_eq!(plan.tree.find_all(PlanNodeType::NestLoop).len(), 1);
}

#[test]
fn test_view_behind_inlined_index_scan_is_skipped() {
    let sql = "SELECT r.name, v.cnt FROM regions r JOIN region_totals v ON r.name = v.region";
    let stmt = join_select(sql);

    let mut candidate = PlanTree::new(PlanNode::nest_loop_index(
        JoinType::Inner,
        PlanNode::index_scan("region_totals", "v", "region_totals_region"),
    ));
    let join = candidate.root();
    candidate.add_new_child(join, PlanNode::seq_scan("regions", "r"));
    let paths = FixedAccessPaths::new().with(sql, candidate);

    let err = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap_err();
    assert_eq!(err, "No valid plans generated");
}
