//! Session Loop
//!
//! Reads one utterance per line, translates it, checks it against the scope,
//! executes it and prints one block per turn. Per-turn failures are printed
//! and the loop goes on; fatal errors are returned to the caller.

use crate::error::{Result, SearchError};
use crate::execution::engine::QueryService;
use crate::formatter::{format_error, format_result, format_scope, help_text, OutputFormat};
use crate::schema_scope::SchemaScope;
use crate::scope_guard;
use crate::translation::{TranslationService, Utterance};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

pub const PROMPT: &str = "> ";
pub const BANNER: &str = "Conversation\n---------------------\n";

const INVALID_INPUT: &str = "error: input line is not valid UTF-8\n";

const QUIT_WORDS: &[&str] = &["quit", "exit", "\\q", ".quit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub row_limit: usize,
    pub format: OutputFormat,
    pub show_sql: bool,
    pub summarize: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            row_limit: crate::config::DEFAULT_MAX_ROWS,
            format: OutputFormat::Table,
            show_sql: false,
            summarize: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    EndOfInput,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Utterances processed, successful or not.
    pub turns: u64,
    pub failed_turns: u64,
    pub end: SessionEnd,
}

pub struct Session<T, Q> {
    scope: Arc<SchemaScope>,
    translator: T,
    query_service: Q,
    options: SessionOptions,
    turn: u64,
    failed_turns: u64,
}

impl<T, Q> Session<T, Q>
where
    T: TranslationService,
    Q: QueryService,
{
    pub fn new(scope: Arc<SchemaScope>, translator: T, query_service: Q, options: SessionOptions) -> Self {
        Self {
            scope,
            translator,
            query_service,
            options,
            turn: 0,
            failed_turns: 0,
        }
    }

    pub fn scope(&self) -> &Arc<SchemaScope> {
        &self.scope
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Drive the loop until end of input, a quit word, or a fatal error.
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> Result<SessionSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input;
        write_block(output, BANNER).await?;

        let end = loop {
            write_block(output, PROMPT).await?;

            let mut raw = Vec::new();
            if lines.read_until(b'\n', &mut raw).await? == 0 {
                break SessionEnd::EndOfInput;
            }
            // A line that is not UTF-8 is rejected on its own; the stream stays usable.
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Discarding input line that is not valid UTF-8: {}", e);
                    write_block(output, INVALID_INPUT).await?;
                    continue;
                }
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if QUIT_WORDS.contains(&text) {
                break SessionEnd::Quit;
            }
            if text.starts_with('.') {
                let block = self.session_command(text);
                write_block(output, &block).await?;
                continue;
            }

            self.turn += 1;
            let utterance = Utterance::new(self.turn, text);
            let block = match self.run_turn(&utterance).await {
                Ok(block) => block,
                Err(e) if e.is_fatal() => {
                    warn!("Turn {} hit a fatal error: {}", utterance.turn, e);
                    return Err(e);
                }
                Err(e) => {
                    self.failed_turns += 1;
                    info!("Turn {} failed: {}", utterance.turn, e);
                    format_error(&e)
                }
            };
            write_block(output, &block).await?;
        };

        info!(
            "Session ended after {} turns ({} failed)",
            self.turn, self.failed_turns
        );
        Ok(SessionSummary {
            turns: self.turn,
            failed_turns: self.failed_turns,
            end,
        })
    }

    /// Translate, check, execute, format. The whole block is built before
    /// anything is written.
    async fn run_turn(&self, utterance: &Utterance) -> Result<String> {
        let translated = self.translator.translate(utterance, &self.scope).await?;
        if !translated.produced_for(&self.scope) {
            return Err(SearchError::Translation(
                "translation was produced for a different scope".to_string(),
            ));
        }

        let statement = scope_guard::validate(&translated.sql, &self.scope)?;
        debug!("Turn {} validated: {}", utterance.turn, statement.sql());

        let result = self
            .query_service
            .execute(&statement, self.options.row_limit)
            .await?;

        let mut block = String::new();
        if self.options.show_sql {
            block.push_str(statement.sql());
            block.push('\n');
        }
        block.push_str(&format_result(&result, self.options.format)?);

        if self.options.summarize {
            match self.translator.summarize(utterance, &statement, &result).await {
                Ok(answer) => {
                    block.push('\n');
                    block.push_str(answer.trim());
                    block.push('\n');
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => block.push_str(&format_error(&e)),
            }
        }
        Ok(block)
    }

    fn session_command(&self, command: &str) -> String {
        match command.split_whitespace().next().unwrap_or("") {
            ".help" => help_text().to_string(),
            ".tables" => format_scope(&self.scope),
            other => format!("unknown command {} (try .help)\n", other),
        }
    }

    /// Single teardown point: releases the database pool.
    pub async fn close(self) {
        self.query_service.close().await;
    }
}

async fn write_block<W: AsyncWrite + Unpin>(output: &mut W, block: &str) -> Result<()> {
    output.write_all(block.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_words() {
        for word in ["quit", "exit", "\\q", ".quit"] {
            assert!(QUIT_WORDS.contains(&word));
        }
        assert!(!QUIT_WORDS.contains(&"list all users"));
    }

    #[test]
    fn test_banner_precedes_prompt_text() {
        assert!(BANNER.starts_with("Conversation\n"));
        assert!(BANNER.ends_with("-\n"));
        assert_eq!(PROMPT, "> ");
    }
}
