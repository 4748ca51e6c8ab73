//! A finished candidate plan plus statement-level metadata.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::plan::PlanTree;
use crate::expr::ValueType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledPlan {
    pub sql: String,
    pub tree: PlanTree,
    pub read_only: bool,
    /// Filled in by the plan selector.
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub plan_id: u64,
    #[serde(default)]
    pub parameters: Vec<ValueType>,
    /// Writes a replicated table from a multi-partition statement.
    #[serde(default)]
    pub replicated_table_dml: bool,
    order_deterministic: bool,
    has_limit_or_offset: bool,
}

impl CompiledPlan {
    pub fn new(sql: impl Into<String>, tree: PlanTree, read_only: bool) -> Self {
        Self {
            sql: sql.into(),
            tree,
            read_only,
            cost: None,
            plan_id: 0,
            parameters: Vec::new(),
            replicated_table_dml: false,
            order_deterministic: false,
            has_limit_or_offset: false,
        }
    }

    /// Records what the statement itself guarantees about its result.
    pub fn statement_guarantees_determinism(&mut self, has_limit_or_offset: bool, order_deterministic: bool) {
        self.has_limit_or_offset = has_limit_or_offset;
        self.order_deterministic = order_deterministic;
    }

    pub fn is_order_deterministic(&self) -> bool {
        self.order_deterministic
    }

    pub fn has_limit_or_offset(&self) -> bool {
        self.has_limit_or_offset
    }

    /// Row content is fixed unless a LIMIT/OFFSET cuts an unordered result.
    pub fn is_content_deterministic(&self) -> bool {
        !self.has_limit_or_offset || self.order_deterministic
    }

    /// SHA-256 of the plan's JSON form, as 64 lowercase hex characters.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        compute_hash(self)
    }

    /// SHA-256 of the statement text; names output files.
    pub fn sql_fingerprint(&self) -> Result<String, serde_json::Error> {
        compute_hash(&self.sql)
    }
}

fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
