//! Query execution
//!
//! The `QueryService` contract, its Postgres implementation, and the result
//! types they produce.

pub mod engine;
pub mod postgres_engine;
pub mod result;

pub use engine::QueryService;
pub use postgres_engine::PostgresQueryService;
pub use result::{CellValue, QueryResult};
