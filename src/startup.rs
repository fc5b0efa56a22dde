//! Wires a resolved configuration into a ready-to-run session.

use crate::config::SearchConfig;
use crate::error::Result;
use crate::execution::engine::QueryService;
use crate::execution::postgres_engine::PostgresQueryService;
use crate::llm::LlmClient;
use crate::schema_scope::SchemaScope;
use crate::session::Session;
use crate::translation::LlmTranslator;
use std::sync::Arc;
use tracing::{info, warn};

pub type LiveSession = Session<LlmTranslator, PostgresQueryService>;

/// Open the database, describe the scoped tables, then check the translation
/// backend. The pool is closed again if a later step fails.
pub async fn connect(config: &SearchConfig) -> Result<LiveSession> {
    info!("Starting with {:?}", config);
    let scope = Arc::new(SchemaScope::iam());

    let query_service = PostgresQueryService::connect(&config.psql_dsn, config.statement_timeout).await?;
    info!("Query service {} ready", query_service.name());

    match build_translator(config, &scope, &query_service).await {
        Ok(translator) => Ok(Session::new(
            scope,
            translator,
            query_service,
            config.session_options(),
        )),
        Err(e) => {
            query_service.close().await;
            Err(e)
        }
    }
}

async fn build_translator(
    config: &SearchConfig,
    scope: &SchemaScope,
    query_service: &PostgresQueryService,
) -> Result<LlmTranslator> {
    let tables = match query_service.describe_tables(scope).await {
        Ok(tables) => tables,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!("Could not describe scoped tables, prompting with names only: {}", e);
            Vec::new()
        }
    };
    info!("Described {} of {} scoped tables", tables.len(), scope.len());

    let client = LlmClient::new(
        config.openai_token.clone(),
        config.openai_model.clone(),
        config.openai_base_url.clone(),
        config.translation_timeout,
    )?;
    client.probe().await?;

    Ok(LlmTranslator::new(client, tables, config.max_rows))
}
