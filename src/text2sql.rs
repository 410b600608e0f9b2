//! Seam for the structured-query subsystem.
//!
//! Queries routed to the structured path are handed to an executor that
//! translates natural language into a data-store query and returns a
//! formatted text answer. The SQL generation itself lives behind this trait;
//! the pipeline treats it as opaque.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructuredQueryError {
    #[error("structured query failed: {0}")]
    Execution(String),

    #[error("structured querying is not configured")]
    NotConfigured,
}

/// Executes an intent-routed query against the structured store.
#[async_trait]
pub trait StructuredQueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<String, StructuredQueryError>;
}

/// Fold the guest filter into the query text before execution, the way the
/// retrieval path folds it into the search filter.
pub fn with_guest_clause(query: &str, guest: Option<&str>) -> String {
    match guest {
        Some(guest) => format!("{query} where {guest} is the guest"),
        None => query.to_string(),
    }
}
