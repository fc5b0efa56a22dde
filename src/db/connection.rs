//! Database connection management using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use std::time::Duration;

/// Initialize the database connection pool.
///
/// Turns run one at a time, so a single connection is enough. Every
/// connection is read-only and carries a server-side statement timeout.
pub async fn init_pool(database_url: &str, statement_timeout: Duration) -> Result<PgPool, sqlx::Error> {
    let timeout_ms = statement_timeout.as_millis();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute(format!("SET statement_timeout = {}", timeout_ms).as_str())
                    .await?;
                conn.execute("SET default_transaction_read_only = on").await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}
