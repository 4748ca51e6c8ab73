//! Tests for SELECT plan shaping: fragment boundaries, projection, ORDER BY
//! and the setup-time legality checks.

mod common;

use insta::assert_snapshot;
use shardplan::expr::Expr;
use shardplan::planner::{FixedAccessPaths, PlanNode, PlanNodeType, PlanTree, StatementPartitioning};
use shardplan::statement::{JoinNode, JoinType, ParsedColInfo, ParsedStatement, SelectStmt, StmtTableScan};

use common::{assert_fragment_pairs, audit_log, customers, orders, plan, regions};

fn orders_select(sql: &str) -> SelectStmt {
    SelectStmt::new(sql, vec![StmtTableScan::table("o", orders())], JoinNode::leaf("o"))
}

#[test]
fn test_pinned_select_projects_inside_scan() {
    let sql = "SELECT o.id, o.amount FROM orders o WHERE o.id = 5";
    let filter = Expr::col("o", "id").eq(Expr::int(5));
    let mut stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "id"))
        .display(ParsedColInfo::column("o", "amount"));
    stmt.join_tree = Some(JoinNode::leaf("o").with_where(filter.clone()));

    let paths = FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan("orders", "o").with_predicate(filter)));
    let plan = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap();

    assert_snapshot!(plan.tree.explain(), @r"
    SeqScan: orders as o filter (o.id = 5)
      inline Projection: [o.id as id, o.amount as amount]
    ");
    assert!(plan.read_only);
    assert_eq!(plan.plan_id, 1);
}

#[test]
fn test_distributed_select_sorts_at_coordinator() {
    let sql = "SELECT o.id FROM orders o ORDER BY o.amount DESC";
    let stmt = orders_select(sql)
        .display(ParsedColInfo::column("o", "id"))
        .order_by(ParsedColInfo::column("o", "amount").descending());

    let paths = FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan("orders", "o")));
    let plan = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap();

    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [o.id as id]
      OrderBy: [o.amount desc]
        Receive
          Send
            SeqScan: orders as o
    ");
    assert_fragment_pairs(&plan.tree);
    assert!(!plan.is_order_deterministic());
}

#[test]
fn test_co_partitioned_join_shares_one_fragment() {
    let sql = "SELECT o.id, c.name FROM orders o JOIN customers c ON o.id = c.id";
    let on = Expr::col("o", "id").eq(Expr::col("c", "id"));
    let stmt = SelectStmt::new(
        sql,
        vec![StmtTableScan::table("o", orders()), StmtTableScan::table("c", customers())],
        JoinNode::inner(JoinNode::leaf("o"), JoinNode::leaf("c"), on.clone()),
    )
    .display(ParsedColInfo::column("o", "id"))
    .display(ParsedColInfo::column("c", "name"));

    let mut candidate = PlanTree::new(PlanNode::nest_loop(JoinType::Inner, Some(on)));
    let join = candidate.root();
    candidate.add_new_child(join, PlanNode::seq_scan("orders", "o"));
    candidate.add_new_child(join, PlanNode::seq_scan("customers", "c"));
    let paths = FixedAccessPaths::new().with(sql, candidate);

    let plan = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap();
    assert_snapshot!(plan.tree.explain(), @r"
    Projection: [o.id as id, c.name as name]
      Receive
        Send
          NestLoop: inner on (o.id = c.id)
            SeqScan: orders as o
            SeqScan: customers as c
    ");
    assert_fragment_pairs(&plan.tree);
}

#[test]
fn test_join_off_partition_columns_rejected() {
    let sql = "SELECT o.id FROM orders o JOIN customers c ON o.customer_id = c.id";
    let stmt = SelectStmt::new(
        sql,
        vec![StmtTableScan::table("o", orders()), StmtTableScan::table("c", customers())],
        JoinNode::inner(
            JoinNode::leaf("o"),
            JoinNode::leaf("c"),
            Expr::col("o", "customer_id").eq(Expr::col("c", "id")),
        ),
    )
    .display(ParsedColInfo::column("o", "id"));

    let err = plan(&ParsedStatement::Select(stmt), &FixedAccessPaths::new(), StatementPartitioning::infer()).unwrap_err();
    assert_eq!(err, "Join of multiple partitioned tables has insufficient join criteria.");
}

#[test]
fn test_two_receives_rejected() {
    let sql = "SELECT r.name, o.id FROM regions r LEFT JOIN orders o ON r.id = o.customer_id";
    let on = Expr::col("r", "id").eq(Expr::col("o", "customer_id"));
    let stmt = SelectStmt::new(
        sql,
        vec![StmtTableScan::table("r", regions()), StmtTableScan::table("o", orders())],
        JoinNode::left_outer(JoinNode::leaf("r"), JoinNode::leaf("o"), on.clone()),
    )
    .display(ParsedColInfo::column("r", "name"))
    .display(ParsedColInfo::column("o", "id"));

    let mut candidate = PlanTree::new(PlanNode::nest_loop(JoinType::Left, Some(on)));
    let join = candidate.root();
    let outer = candidate.add_new_child(join, PlanNode::seq_scan("regions", "r"));
    let inner = candidate.add_new_child(join, PlanNode::seq_scan("orders", "o"));
    candidate.add_send_receive_pair(outer);
    candidate.add_send_receive_pair(inner);
    let paths = FixedAccessPaths::new().with(sql, candidate);

    let err = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap_err();
    assert_eq!(
        err,
        "This special case join between an outer replicated table and an inner partitioned table is too complex and is not supported."
    );
}

#[test]
fn test_export_table_cannot_be_read() {
    let sql = "SELECT a.event FROM audit_log a";
    let stmt = SelectStmt::new(sql, vec![StmtTableScan::table("a", audit_log())], JoinNode::leaf("a"))
        .display(ParsedColInfo::column("a", "event"));
    let paths = FixedAccessPaths::new().with(sql, PlanTree::new(PlanNode::seq_scan("audit_log", "a")));

    let err = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap_err();
    assert_eq!(err, "Illegal to read an export table.");
}

#[test]
fn test_cheapest_candidate_wins() {
    let sql = "SELECT o.region FROM orders o WHERE o.region = 'west'";
    let filter = Expr::col("o", "region").eq(Expr::string("west"));
    let mut stmt = orders_select(sql).display(ParsedColInfo::column("o", "region"));
    stmt.join_tree = Some(JoinNode::leaf("o").with_where(filter.clone()));

    let mut index_scan = PlanNode::index_scan("orders", "o", "orders_region").with_predicate(filter.clone());
    if let shardplan::planner::PlanNodeKind::IndexScan(ix) = &mut index_scan.kind {
        ix.search_keys.push(Expr::string("west"));
    }
    let paths = FixedAccessPaths::new()
        .with(sql, PlanTree::new(PlanNode::seq_scan("orders", "o").with_predicate(filter)))
        .with(sql, PlanTree::new(index_scan));

    let plan = plan(&ParsedStatement::Select(stmt), &paths, StatementPartitioning::infer()).unwrap();
    assert_eq!(plan.plan_id, 2);
    assert!(!plan.tree.find_all(PlanNodeType::IndexScan).is_empty());
}
