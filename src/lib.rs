//! # Shardplan
//!
//! Plan assembly for a partitioned, distributed SQL engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        ParsedStatement (select/insert/update/...)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [setup: legality, partitioning]
//! ┌─────────────────────────────────────────────────────────┐
//! │   AccessPathProvider → single-partition candidates      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [select / dml / union builders]
//! ┌─────────────────────────────────────────────────────────┐
//! │   CompiledPlan (fragments, aggregation, limits, ...)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [PlanSelector]
//! ┌─────────────────────────────────────────────────────────┐
//! │              Best plan + sub-query grafting             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod expr;
pub mod planner;
pub mod statement;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::catalog::{Catalog, Column, ColumnDefault, DataType, Index, Table};
    pub use crate::expr::{AggregateFunc, Expr, Literal, ValueType};
    pub use crate::planner::{
        AccessPathProvider, CompiledPlan, CostBasedSelector, FixedAccessPaths, PlanAssembler,
        PlanError, PlanResult, PlanSelector, PlanTree, StatementPartitioning,
    };
    pub use crate::statement::{
        JoinNode, JoinType, LimitValue, ParsedColInfo, ParsedStatement, SelectStmt, StmtTableScan,
    };
}

pub use planner::{CompiledPlan, PlanAssembler, PlanError, PlanResult};
pub use statement::ParsedStatement;
