//! Plan assembly for partitioned SQL statements.
//!
//! The assembler pulls single-partition candidate trees from an
//! [`AccessPathProvider`], shapes each one into a complete (possibly
//! distributed) plan and hands it to a [`PlanSelector`]:
//!
//! 1. Setup: classify the statement, reject illegal writes, analyze
//!    partitioning, simplify outer joins.
//! 2. Candidates: shape every enumerated access path (select/DML builders).
//! 3. Finish: graft sub-query plans into the winner and finalize output.

pub mod access_path;
pub mod assembler;
pub mod compiled;
pub mod cost;
pub mod dml;
pub mod join_simplifier;
pub mod mv_fix;
pub mod partitioning;
pub mod plan;
pub mod select;
pub mod selector;
pub mod subquery;
pub mod union;

pub use access_path::{AccessPathEnumerator, AccessPathProvider, FixedAccessPaths};
pub use assembler::PlanAssembler;
pub use compiled::CompiledPlan;
pub use cost::{CostEstimate, CostEstimator};
pub use mv_fix::MaterializedViewFix;
pub use partitioning::StatementPartitioning;
pub use plan::{NodeId, PlanNode, PlanNodeKind, PlanNodeType, PlanSpec, PlanTree};
pub use selector::{CostBasedSelector, PlanSelector};

use thiserror::Error;

/// Errors that can occur during planning.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// The statement cannot be planned as written.
    #[error("{0}")]
    Planning(String),

    /// A tree-shape assumption did not hold.
    #[error("Internal planner error: {0}")]
    Internal(String),

    #[error("No valid plans generated")]
    NoValidPlans,
}

impl PlanError {
    pub fn planning(message: impl Into<String>) -> Self {
        PlanError::Planning(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PlanError::Internal(message.into())
    }
}

pub type PlanResult<T> = Result<T, PlanError>;
