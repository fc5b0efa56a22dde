pub mod config;
pub mod error;
pub mod execution;
pub mod formatter;
pub mod llm;
pub mod schema_scope;
pub mod scope_guard;
pub mod session;
pub mod startup;
pub mod translation;

// Database module for PostgreSQL
pub mod db;

pub use error::{Result, SearchError};
pub use execution::engine::ExecutionResult;
pub use execution::{CellValue, QueryResult, QueryService};
pub use schema_scope::SchemaScope;
pub use scope_guard::ValidatedStatement;
pub use session::{Session, SessionEnd, SessionOptions, SessionSummary};
pub use translation::{TranslatedSql, TranslationResult, TranslationService, Utterance};
