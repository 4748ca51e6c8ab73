//! Access-path enumeration seam.
//!
//! Choosing scan types and join orders happens outside the assembler. An
//! enumerator yields single-partition candidate trees one at a time; the
//! assembler only ever pulls forward.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::partitioning::StatementPartitioning;
use super::plan::{PlanSpec, PlanTree};
use crate::statement::ParsedStatement;

/// A finite, forward-only sequence of candidate access paths.
pub trait AccessPathEnumerator {
    /// The next candidate, or `None` once exhausted.
    fn next_plan(&mut self) -> Option<PlanTree>;

    /// Why the enumerator stopped early, if it did.
    fn error_message(&self) -> Option<String> {
        None
    }
}

/// Builds an enumerator for one statement.
pub trait AccessPathProvider {
    fn enumerator<'a>(
        &'a self,
        statement: &ParsedStatement,
        partitioning: &StatementPartitioning,
    ) -> Box<dyn AccessPathEnumerator + 'a>;
}

/// Canned candidates keyed by statement SQL text.
///
/// Used by the command-line front end, which reads candidates from a
/// request file, and by tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedAccessPaths {
    candidates: HashMap<String, Vec<PlanSpec>>,
}

impl FixedAccessPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sql: impl Into<String>, candidate: impl Into<PlanSpec>) {
        self.candidates
            .entry(sql.into())
            .or_default()
            .push(candidate.into());
    }

    pub fn with(mut self, sql: impl Into<String>, candidate: impl Into<PlanSpec>) -> Self {
        self.add(sql, candidate);
        self
    }

    pub fn candidate_count(&self, sql: &str) -> usize {
        self.candidates.get(sql).map(Vec::len).unwrap_or(0)
    }
}

impl AccessPathProvider for FixedAccessPaths {
    fn enumerator<'a>(
        &'a self,
        statement: &ParsedStatement,
        _partitioning: &StatementPartitioning,
    ) -> Box<dyn AccessPathEnumerator + 'a> {
        let sql = statement.sql();
        match self.candidates.get(sql) {
            Some(candidates) => Box::new(FixedEnumerator {
                candidates: Some(candidates.iter()),
                error: None,
            }),
            None => Box::new(FixedEnumerator {
                candidates: None,
                error: Some(format!("No access paths available for statement: {}", sql)),
            }),
        }
    }
}

struct FixedEnumerator<'a> {
    candidates: Option<std::slice::Iter<'a, PlanSpec>>,
    error: Option<String>,
}

impl AccessPathEnumerator for FixedEnumerator<'_> {
    fn next_plan(&mut self) -> Option<PlanTree> {
        self.candidates
            .as_mut()?
            .next()
            .map(|spec| PlanTree::from(spec.clone()))
    }

    fn error_message(&self) -> Option<String> {
        self.error.clone()
    }
}
