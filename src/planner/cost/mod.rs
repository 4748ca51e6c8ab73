//! Heuristic cost model used by the default plan selector.

mod estimator;

pub use estimator::{CostEstimate, CostEstimator};
