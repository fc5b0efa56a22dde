use async_trait::async_trait;
use sqlscope::formatter::OutputFormat;
use sqlscope::session::{BANNER, PROMPT};
use sqlscope::{
    CellValue, QueryResult, QueryService, Result, SchemaScope, SearchError, Session, SessionEnd,
    SessionOptions, TranslatedSql, TranslationService, Utterance, ValidatedStatement,
};
use std::sync::{Arc, Mutex};

/// Canned translator: maps utterances to SQL or to a failure.
struct StubTranslator {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TranslationService for StubTranslator {
    async fn translate(&self, utterance: &Utterance, scope: &Arc<SchemaScope>) -> Result<TranslatedSql> {
        self.calls.lock().unwrap().push(utterance.text.clone());
        match utterance.text.as_str() {
            "list all users" => Ok(TranslatedSql::new("SELECT * FROM iam_user", scope)),
            "list roles" => Ok(TranslatedSql::new("select name from IAM_ROLE", scope)),
            "list hosts" => Ok(TranslatedSql::new("SELECT public_id FROM host", scope)),
            "show password hashes" => Ok(TranslatedSql::new("SELECT * FROM pg_shadow", scope)),
            "drop everything" => Ok(TranslatedSql::new("DROP TABLE iam_user", scope)),
            "backend gone" => Err(SearchError::Connectivity("connection refused".to_string())),
            "other scope" => {
                let foreign = Arc::new(SchemaScope::iam());
                Ok(TranslatedSql::new("SELECT * FROM iam_user", &foreign))
            }
            _ => Err(SearchError::Translation("model could not produce SQL".to_string())),
        }
    }

    async fn summarize(
        &self,
        _utterance: &Utterance,
        _statement: &ValidatedStatement,
        result: &QueryResult,
    ) -> Result<String> {
        Ok(format!("There are {} users.", result.row_count()))
    }
}

/// Records every statement it is asked to run.
struct StubQueryService {
    executed: Arc<Mutex<Vec<(String, usize)>>>,
}

#[async_trait]
impl QueryService for StubQueryService {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn execute(&self, statement: &ValidatedStatement, row_limit: usize) -> Result<QueryResult> {
        self.executed
            .lock()
            .unwrap()
            .push((statement.sql().to_string(), row_limit));
        if statement.tables().iter().any(|t| t == "host") {
            return Err(SearchError::Connectivity("server closed the connection unexpectedly".to_string()));
        }
        if statement.tables().iter().any(|t| t == "iam_role") {
            return Err(SearchError::Execution("permission denied for table iam_role".to_string()));
        }
        Ok(QueryResult::new(
            vec!["public_id".to_string(), "name".to_string()],
            vec![
                vec![CellValue::Text("u_1234567890".to_string()), CellValue::Text("zed".to_string())],
                vec![CellValue::Text("u_0987654321".to_string()), CellValue::Text("alice".to_string())],
            ],
        ))
    }
}

struct Harness {
    session: Session<StubTranslator, StubQueryService>,
    calls: Arc<Mutex<Vec<String>>>,
    executed: Arc<Mutex<Vec<(String, usize)>>>,
}

fn harness(options: SessionOptions) -> Harness {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let executed = Arc::new(Mutex::new(Vec::new()));
    let session = Session::new(
        Arc::new(SchemaScope::iam()),
        StubTranslator { calls: Arc::clone(&calls) },
        StubQueryService { executed: Arc::clone(&executed) },
        options,
    );
    Harness {
        session,
        calls,
        executed,
    }
}

async fn drive(h: &mut Harness, input: &str) -> (Result<sqlscope::SessionSummary>, String) {
    drive_bytes(h, input.as_bytes()).await
}

async fn drive_bytes(h: &mut Harness, input: &[u8]) -> (Result<sqlscope::SessionSummary>, String) {
    let mut output: Vec<u8> = Vec::new();
    let outcome = h.session.run(input, &mut output).await;
    (outcome, String::from_utf8(output).unwrap())
}

fn prompts(output: &str) -> usize {
    output.matches(PROMPT).count()
}

#[tokio::test]
async fn test_rows_printed_in_returned_order() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, "list all users\n").await;

    let summary = outcome.unwrap();
    assert_eq!(summary.turns, 1);
    assert_eq!(summary.failed_turns, 0);
    assert_eq!(summary.end, SessionEnd::EndOfInput);

    assert_eq!(
        *h.executed.lock().unwrap(),
        vec![("SELECT * FROM iam_user".to_string(), 10)]
    );
    assert!(output.starts_with(BANNER));
    let zed = output.find("zed").unwrap();
    let alice = output.find("alice").unwrap();
    assert!(zed < alice, "rows must keep the service's order");
    assert!(output.contains("(2 rows)"));
}

#[tokio::test]
async fn test_out_of_scope_sql_never_executes() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, "show password hashes\ndrop everything\n").await;

    let summary = outcome.unwrap();
    assert_eq!(summary.turns, 2);
    assert_eq!(summary.failed_turns, 2);
    assert!(h.executed.lock().unwrap().is_empty());
    assert!(output.contains("error: scope violation: table pg_shadow"));
    assert!(output.contains("error: scope violation: DROP statement"));
}

#[tokio::test]
async fn test_per_turn_failures_do_not_end_session() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, "what is the weather\nlist roles\nlist all users\n").await;

    let summary = outcome.unwrap();
    assert_eq!(summary.turns, 3);
    assert_eq!(summary.failed_turns, 2);
    assert!(output.contains("error: translation failed: model could not produce SQL"));
    assert!(output.contains("error: execution failed: permission denied for table iam_role"));
    assert!(output.contains("alice"));
    assert_eq!(prompts(&output), 4);
}

#[tokio::test]
async fn test_connectivity_error_ends_session() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, "backend gone\nlist all users\n").await;

    match outcome {
        Err(e) => {
            assert!(e.is_fatal());
            assert_ne!(e.exit_code(), 0);
        }
        Ok(summary) => panic!("expected a fatal error, got {:?}", summary),
    }
    assert_eq!(*h.calls.lock().unwrap(), vec!["backend gone".to_string()]);
    assert!(h.executed.lock().unwrap().is_empty());
    assert_eq!(h.session.turn(), 1);
    assert!(!output.contains("alice"));
}

#[tokio::test]
async fn test_lost_database_connection_ends_session() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, "list hosts\nlist all users\n").await;

    let err = outcome.unwrap_err();
    assert!(matches!(err, SearchError::Connectivity(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(*h.calls.lock().unwrap(), vec!["list hosts".to_string()]);
    assert_eq!(h.executed.lock().unwrap().len(), 1);
    assert_eq!(h.session.turn(), 1);
    assert!(!output.contains("alice"));
}

#[tokio::test]
async fn test_invalid_utf8_line_is_skipped() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive_bytes(&mut h, b"caf\xe9 users\nlist all users\n").await;

    let summary = outcome.unwrap();
    assert_eq!(summary.turns, 1);
    assert_eq!(summary.end, SessionEnd::EndOfInput);
    assert_eq!(*h.calls.lock().unwrap(), vec!["list all users".to_string()]);
    assert!(output.contains("error: input line is not valid UTF-8"));
    assert!(output.contains("alice"));
    assert_eq!(prompts(&output), 3);
}

#[tokio::test]
async fn test_end_of_input_after_n_lines() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, "list all users\nlist all users\nlist all users").await;

    let summary = outcome.unwrap();
    assert_eq!(summary.turns, 3);
    assert_eq!(h.calls.lock().unwrap().len(), 3);
    assert_eq!(prompts(&output), 4);
    assert!(output.ends_with(PROMPT));
}

#[tokio::test]
async fn test_blank_lines_invoke_no_service() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, "\n   \n\t\n").await;

    let summary = outcome.unwrap();
    assert_eq!(summary.turns, 0);
    assert!(h.calls.lock().unwrap().is_empty());
    assert!(h.executed.lock().unwrap().is_empty());
    assert_eq!(output, format!("{}{}", BANNER, PROMPT.repeat(4)));
}

#[tokio::test]
async fn test_quit_word_stops_reading() {
    let mut h = harness(SessionOptions::default());
    let (outcome, _) = drive(&mut h, "list all users\nquit\nlist all users\n").await;

    let summary = outcome.unwrap();
    assert_eq!(summary.turns, 1);
    assert_eq!(summary.end, SessionEnd::Quit);
    assert_eq!(h.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_statement_for_another_scope_is_rejected() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, "other scope\n").await;

    assert_eq!(outcome.unwrap().failed_turns, 1);
    assert!(h.executed.lock().unwrap().is_empty());
    assert!(output.contains("different scope"));
}

#[tokio::test]
async fn test_session_commands_do_not_consume_turns() {
    let mut h = harness(SessionOptions::default());
    let (outcome, output) = drive(&mut h, ".tables\n.help\n.bogus\nlist all users\n").await;

    let summary = outcome.unwrap();
    assert_eq!(summary.turns, 1);
    assert_eq!(h.calls.lock().unwrap().len(), 1);
    assert!(output.contains("schema public (23 tables)"));
    assert!(output.contains("  iam_user_role\n"));
    assert!(output.contains(".quit"));
    assert!(output.contains("unknown command .bogus"));
}

#[tokio::test]
async fn test_options_shape_the_block() {
    let mut h = harness(SessionOptions {
        row_limit: 5,
        format: OutputFormat::Csv,
        show_sql: true,
        summarize: true,
    });
    let (outcome, output) = drive(&mut h, "list all users\n").await;

    outcome.unwrap();
    assert_eq!(h.executed.lock().unwrap()[0].1, 5);
    assert!(output.contains(
        "SELECT * FROM iam_user\npublic_id,name\nu_1234567890,zed\nu_0987654321,alice\n"
    ));
    assert!(output.contains("There are 2 users."));
}
