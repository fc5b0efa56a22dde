use anyhow::Context;
use clap::Parser;
use sqlscope::config::{self, StartupOptions};
use sqlscope::formatter::OutputFormat;
use sqlscope::{startup, SearchError};
use std::process::ExitCode;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlscope")]
#[command(about = "Ask questions about the IAM tables in plain language")]
struct Args {
    /// OpenAI API token (or set OPENAI_TOKEN / OPENAI_API_KEY)
    #[arg(long)]
    openai_token: Option<String>,

    /// Chat model used for translation (or set OPENAI_MODEL, default gpt-4)
    #[arg(long)]
    openai_model: Option<String>,

    /// OpenAI-compatible API base URL (or set OPENAI_BASE_URL)
    #[arg(long)]
    openai_base_url: Option<String>,

    /// PostgreSQL connection string (or set PSQL_DSN)
    #[arg(long)]
    psql_dsn: Option<String>,

    /// Maximum rows printed per question
    #[arg(long, default_value_t = config::DEFAULT_MAX_ROWS)]
    max_rows: usize,

    #[arg(long, default_value_t = config::DEFAULT_TRANSLATION_TIMEOUT_SECS)]
    translation_timeout_secs: u64,

    #[arg(long, default_value_t = config::DEFAULT_STATEMENT_TIMEOUT_SECS)]
    statement_timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Print the generated SQL above each result
    #[arg(long)]
    show_sql: bool,

    /// Follow each result with a short natural-language answer
    #[arg(long)]
    summarize: bool,

    /// Log filter when RUST_LOG is not set (logs go to stderr)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn startup_options(&self) -> StartupOptions {
        StartupOptions {
            openai_token: self.openai_token.clone(),
            openai_model: self.openai_model.clone(),
            openai_base_url: self.openai_base_url.clone(),
            psql_dsn: self.psql_dsn.clone(),
            max_rows: self.max_rows,
            translation_timeout_secs: self.translation_timeout_secs,
            statement_timeout_secs: self.statement_timeout_secs,
            format: self.format,
            show_sql: self.show_sql,
            summarize: self.summarize,
        }
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid --log-level '{}'", level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))
}

async fn run(args: Args) -> Result<(), SearchError> {
    let config = config::resolve(args.startup_options())?;
    let mut session = startup::connect(&config).await?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let outcome = session.run(stdin, &mut stdout).await;
    session.close().await;

    let summary = outcome?;
    info!("Session finished: {:?}", summary);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level) {
        eprintln!("error: {:#}", e);
        return ExitCode::from(1);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
