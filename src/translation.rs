//! Translation Service
//!
//! Turns an utterance into SQL constrained to a SchemaScope. The session loop
//! only depends on the `TranslationService` trait; `LlmTranslator` is the
//! chat-completions implementation.

use crate::error::{Result, SearchError};
use crate::execution::result::QueryResult;
use crate::llm::LlmClient;
use crate::schema_scope::{SchemaScope, TableDescription};
use crate::scope_guard::ValidatedStatement;
use async_trait::async_trait;
use itertools::Itertools;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Rows of a result shown to the model when it writes a summary.
const SUMMARY_SAMPLE_ROWS: usize = 20;

/// One line of user input for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub turn: u64,
    pub text: String,
}

impl Utterance {
    pub fn new(turn: u64, text: impl Into<String>) -> Self {
        Self {
            turn,
            text: text.into(),
        }
    }
}

/// SQL produced for one utterance, tagged with the scope it was constrained to.
#[derive(Debug, Clone)]
pub struct TranslatedSql {
    pub sql: String,
    pub scope: Arc<SchemaScope>,
}

impl TranslatedSql {
    pub fn new(sql: impl Into<String>, scope: &Arc<SchemaScope>) -> Self {
        Self {
            sql: sql.into(),
            scope: Arc::clone(scope),
        }
    }

    /// Whether this statement was produced for exactly this scope instance.
    pub fn produced_for(&self, scope: &Arc<SchemaScope>) -> bool {
        Arc::ptr_eq(&self.scope, scope)
    }
}

/// Generated SQL, or the reason none could be produced.
pub type TranslationResult = Result<TranslatedSql>;

#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Produce a statement for the utterance using only tables in `scope`.
    ///
    /// Inability to translate is `SearchError::Translation`; an unreachable
    /// backend is `SearchError::Connectivity`.
    async fn translate(&self, utterance: &Utterance, scope: &Arc<SchemaScope>) -> TranslationResult;

    /// Natural-language answer for an executed statement.
    async fn summarize(
        &self,
        _utterance: &Utterance,
        _statement: &ValidatedStatement,
        _result: &QueryResult,
    ) -> Result<String> {
        Err(SearchError::Translation("summaries are not supported by this backend".to_string()))
    }
}

/// Shape the model is asked to answer with.
#[derive(Debug, Deserialize)]
struct TranslationReply {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct LlmTranslator {
    client: LlmClient,
    tables: Vec<TableDescription>,
    row_limit: usize,
}

impl LlmTranslator {
    /// `tables` are the introspected layouts of scoped tables; `row_limit`
    /// becomes the default LIMIT the model is asked to apply.
    pub fn new(client: LlmClient, tables: Vec<TableDescription>, row_limit: usize) -> Self {
        Self {
            client,
            tables,
            row_limit,
        }
    }

    fn system_prompt(&self, scope: &SchemaScope) -> String {
        let described: Vec<String> = scope
            .tables()
            .iter()
            .map(|table| {
                self.tables
                    .iter()
                    .find(|d| &d.name == table)
                    .map(|d| d.to_prompt_line())
                    .unwrap_or_else(|| table.clone())
            })
            .collect();

        format!(
            r#"You translate questions into a single PostgreSQL SELECT statement.
Only these tables in schema "{}" exist for you; never reference any other table, view, or system catalog:
{}

Rules:
- One read-only query. No INSERT, UPDATE, DELETE, DDL, or SELECT INTO.
- Unless the question asks for a specific number of rows, LIMIT the result to {} rows.
- Select only the columns needed to answer; never SELECT * across joins.
- Cast non-text types such as inet to text.
- Use plain aggregates and string/date functions only.

Return JSON only: {{"sql": "<statement>"}}.
If the question cannot be answered from these tables, return {{"sql": null, "reason": "<why>"}}."#,
            scope.schema(),
            described.iter().map(|line| format!("- {}", line)).join("\n"),
            self.row_limit
        )
    }
}

#[async_trait]
impl TranslationService for LlmTranslator {
    async fn translate(&self, utterance: &Utterance, scope: &Arc<SchemaScope>) -> TranslationResult {
        info!("Translating turn {} with model {}", utterance.turn, self.client.model());
        let system = self.system_prompt(scope);
        let raw = self.client.chat(&system, &utterance.text).await?;
        let sql = parse_translation_response(&raw)?;
        debug!("Turn {} translated to: {}", utterance.turn, sql);
        Ok(TranslatedSql::new(sql, scope))
    }

    async fn summarize(
        &self,
        utterance: &Utterance,
        statement: &ValidatedStatement,
        result: &QueryResult,
    ) -> Result<String> {
        let sample = result
            .rows
            .iter()
            .take(SUMMARY_SAMPLE_ROWS)
            .map(|row| row.iter().map(|cell| cell.to_string()).join("\t"))
            .join("\n");

        let user = format!(
            "Question: {}\nSQL: {}\nColumns: {}\nRows ({} total{}):\n{}",
            utterance.text,
            statement.sql(),
            result.columns.join("\t"),
            result.row_count(),
            if result.is_truncated() { ", truncated" } else { "" },
            sample
        );

        self.client
            .chat(
                "Answer the question in one short paragraph using only the SQL result given. \
                 Do not invent rows that are not shown.",
                &user,
            )
            .await
    }
}

/// Pull the SQL out of a model reply.
///
/// Accepts the requested JSON shape, optionally inside a code fence, and
/// tolerates a bare SELECT/WITH statement or a `SQLQuery:` line.
pub fn parse_translation_response(raw: &str) -> Result<String> {
    let cleaned = strip_code_fence(raw.trim());
    if cleaned.is_empty() {
        return Err(SearchError::Translation("empty response from model".to_string()));
    }

    if cleaned.starts_with('{') {
        let reply: TranslationReply = serde_json::from_str(cleaned).map_err(|e| {
            SearchError::Translation(format!("malformed model response: {}", e))
        })?;
        return match reply.sql.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            Some(sql) => Ok(sql),
            None => Err(SearchError::Translation(format!(
                "model could not produce SQL: {}",
                reply.reason.as_deref().unwrap_or("no reason given")
            ))),
        };
    }

    let upper = cleaned.to_uppercase();
    if upper.starts_with("SELECT") || upper.starts_with("WITH") {
        return Ok(cleaned.to_string());
    }

    if let Some(idx) = cleaned.find("SQLQuery:") {
        let rest = &cleaned[idx + "SQLQuery:".len()..];
        let sql = rest.split("SQLResult:").next().unwrap_or("").trim();
        if !sql.is_empty() {
            return Ok(sql.to_string());
        }
    }

    Err(SearchError::Translation(format!(
        "malformed model response: {}",
        cleaned.chars().take(120).collect::<String>()
    )))
}

fn strip_code_fence(text: &str) -> &str {
    let fence = regex::Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").ok();
    match fence.and_then(|re| re.captures(text)).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text,
    }
}
