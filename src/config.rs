//! Startup configuration
//!
//! Flags are parsed by the binary; this module turns them plus the
//! environment into a validated `SearchConfig`.

use crate::error::{Result, SearchError};
use crate::formatter::OutputFormat;
use crate::session::SessionOptions;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_ROWS: usize = 10;
pub const MAX_ROWS_LIMIT: usize = 10_000;
pub const DEFAULT_TRANSLATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Values as given on the command line, before environment fallbacks.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub openai_token: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub psql_dsn: Option<String>,
    pub max_rows: usize,
    pub translation_timeout_secs: u64,
    pub statement_timeout_secs: u64,
    pub format: OutputFormat,
    pub show_sql: bool,
    pub summarize: bool,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            openai_token: None,
            openai_model: None,
            openai_base_url: None,
            psql_dsn: None,
            max_rows: DEFAULT_MAX_ROWS,
            translation_timeout_secs: DEFAULT_TRANSLATION_TIMEOUT_SECS,
            statement_timeout_secs: DEFAULT_STATEMENT_TIMEOUT_SECS,
            format: OutputFormat::Table,
            show_sql: false,
            summarize: false,
        }
    }
}

#[derive(Clone)]
pub struct SearchConfig {
    pub openai_token: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub psql_dsn: String,
    pub max_rows: usize,
    pub translation_timeout: Duration,
    pub statement_timeout: Duration,
    pub format: OutputFormat,
    pub show_sql: bool,
    pub summarize: bool,
}

// Credentials stay out of logs.
impl fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchConfig")
            .field("openai_token", &"<redacted>")
            .field("openai_model", &self.openai_model)
            .field("openai_base_url", &self.openai_base_url)
            .field("psql_dsn", &"<redacted>")
            .field("max_rows", &self.max_rows)
            .field("translation_timeout", &self.translation_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .field("format", &self.format)
            .field("show_sql", &self.show_sql)
            .field("summarize", &self.summarize)
            .finish()
    }
}

impl SearchConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            row_limit: self.max_rows,
            format: self.format,
            show_sql: self.show_sql,
            summarize: self.summarize,
        }
    }
}

/// Resolve against the process environment.
pub fn resolve(opts: StartupOptions) -> Result<SearchConfig> {
    resolve_with(opts, |key| std::env::var(key).ok())
}

/// Flags win over environment variables. Blank values count as missing.
pub fn resolve_with<F>(opts: StartupOptions, env: F) -> Result<SearchConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let pick = |flag: Option<String>, keys: &[&str]| -> Option<String> {
        flag.or_else(|| keys.iter().find_map(|key| env(key)))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let openai_token = pick(opts.openai_token, &["OPENAI_TOKEN", "OPENAI_API_KEY"]).ok_or_else(|| {
        SearchError::Configuration(
            "missing translation credential: pass --openai-token or set OPENAI_TOKEN".to_string(),
        )
    })?;

    let openai_model =
        pick(opts.openai_model, &["OPENAI_MODEL"]).unwrap_or_else(|| DEFAULT_MODEL.to_string());
    if openai_model.chars().any(char::is_whitespace) {
        return Err(SearchError::Configuration(format!(
            "invalid model name '{}'",
            openai_model
        )));
    }

    let openai_base_url =
        pick(opts.openai_base_url, &["OPENAI_BASE_URL"]).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    if !(openai_base_url.starts_with("http://") || openai_base_url.starts_with("https://")) {
        return Err(SearchError::Configuration(format!(
            "translation base URL must be http(s): {}",
            openai_base_url
        )));
    }

    let psql_dsn = pick(opts.psql_dsn, &["PSQL_DSN"]).ok_or_else(|| {
        SearchError::Configuration("missing database DSN: pass --psql-dsn or set PSQL_DSN".to_string())
    })?;
    if !(psql_dsn.starts_with("postgres://") || psql_dsn.starts_with("postgresql://")) {
        return Err(SearchError::Configuration(
            "database DSN must start with postgres:// or postgresql://".to_string(),
        ));
    }

    if !(1..=MAX_ROWS_LIMIT).contains(&opts.max_rows) {
        return Err(SearchError::Configuration(format!(
            "--max-rows must be between 1 and {}, got {}",
            MAX_ROWS_LIMIT, opts.max_rows
        )));
    }
    if opts.translation_timeout_secs == 0 || opts.statement_timeout_secs == 0 {
        return Err(SearchError::Configuration("timeouts must be at least one second".to_string()));
    }

    Ok(SearchConfig {
        openai_token,
        openai_model,
        openai_base_url,
        psql_dsn,
        max_rows: opts.max_rows,
        translation_timeout: Duration::from_secs(opts.translation_timeout_secs),
        statement_timeout: Duration::from_secs(opts.statement_timeout_secs),
        format: opts.format,
        show_sql: opts.show_sql,
        summarize: opts.summarize,
    })
}
