//! Query Service trait - contract for anything that runs validated SQL
//!
//! The session loop only ever talks to this trait, so the Postgres adapter can
//! be swapped for a stub in tests.

use crate::error::Result;
use crate::execution::result::QueryResult;
use crate::schema_scope::{SchemaScope, TableDescription};
use crate::scope_guard::ValidatedStatement;
use async_trait::async_trait;

pub type ExecutionResult = Result<QueryResult>;

#[async_trait]
pub trait QueryService: Send + Sync {
    /// Service name for logs (e.g. "postgres").
    fn name(&self) -> &'static str;

    /// Execute a validated statement, returning at most `row_limit` rows.
    ///
    /// Statement-level problems come back as `SearchError::Execution`; a lost
    /// connection is `SearchError::Connectivity`.
    async fn execute(&self, statement: &ValidatedStatement, row_limit: usize) -> ExecutionResult;

    /// Column layout of the scoped tables. Services without a catalog return
    /// nothing and the prompt falls back to table names only.
    async fn describe_tables(&self, _scope: &SchemaScope) -> Result<Vec<TableDescription>> {
        Ok(Vec::new())
    }

    /// Release the underlying handle. Called once, when the session ends.
    async fn close(&self) {}
}
