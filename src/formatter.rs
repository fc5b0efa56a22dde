//! Output formatting for result blocks and session messages.

use crate::error::{Result, SearchError};
use crate::execution::result::QueryResult;
use crate::schema_scope::SchemaScope;
use itertools::Itertools;
use tabled::builder::Builder;
use tabled::settings::Style;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

/// Render one result block. The returned text always ends with a newline.
pub fn format_result(result: &QueryResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(format_as_table(result)),
        OutputFormat::Json => format_as_json(result),
        OutputFormat::Csv => format_as_csv(result),
    }
}

fn format_as_table(result: &QueryResult) -> String {
    let mut builder = Builder::new();
    builder.push_record(result.columns.iter().cloned());
    for row in &result.rows {
        builder.push_record(row.iter().map(|cell| cell.to_string()));
    }

    let mut table = builder.build();
    table.with(Style::rounded());

    format!("{}\n{}\n", table, row_footer(result))
}

fn row_footer(result: &QueryResult) -> String {
    let count = result.row_count();
    let noun = if count == 1 { "row" } else { "rows" };
    match result.truncated_at {
        Some(cap) => format!("({} {}, truncated at {})", count, noun, cap),
        None => format!("({} {})", count, noun),
    }
}

/// Rows stay arrays keyed by position so duplicate column names survive.
fn format_as_json(result: &QueryResult) -> Result<String> {
    let rows: Vec<serde_json::Value> = result
        .rows
        .iter()
        .map(|row| serde_json::Value::Array(row.iter().map(|cell| cell.to_json()).collect()))
        .collect();
    let block = serde_json::json!({
        "columns": result.columns,
        "rows": rows,
        "truncated": result.is_truncated(),
    });
    Ok(format!("{}\n", serde_json::to_string_pretty(&block)?))
}

fn format_as_csv(result: &QueryResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(&result.columns).map_err(csv_error)?;
    for row in &result.rows {
        let record: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
        wtr.write_record(&record).map_err(csv_error)?;
    }
    let data = wtr
        .into_inner()
        .map_err(|e| SearchError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

fn csv_error(err: csv::Error) -> SearchError {
    SearchError::Io(err.into())
}

pub fn format_error(err: &SearchError) -> String {
    format!("error: {}\n", err)
}

/// Listing printed by `.tables`.
pub fn format_scope(scope: &SchemaScope) -> String {
    format!(
        "schema {} ({} tables)\n{}\n",
        scope.schema(),
        scope.len(),
        scope.tables().iter().map(|t| format!("  {}", t)).join("\n")
    )
}

pub fn help_text() -> &'static str {
    "Ask a question about the IAM tables in plain language.\n\
     \n\
     Commands:\n  \
     .help     Show this message\n  \
     .tables   List the tables questions may use\n  \
     .quit     End the session (also quit, exit, \\q, or end of input)\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::result::CellValue;

    fn users() -> QueryResult {
        QueryResult::new(
            vec!["public_id".to_string(), "name".to_string()],
            vec![
                vec![CellValue::Text("u_1".to_string()), CellValue::Text("alice".to_string())],
                vec![CellValue::Text("u_2".to_string()), CellValue::Null],
            ],
        )
    }

    #[test]
    fn test_table_keeps_row_order() {
        let out = format_result(&users(), OutputFormat::Table).unwrap();
        let alice = out.find("alice").unwrap();
        let second = out.find("u_2").unwrap();
        assert!(alice < second);
        assert!(out.contains("NULL"));
        assert!(out.ends_with("(2 rows)\n"));
    }

    #[test]
    fn test_table_footer_variants() {
        let mut one = QueryResult::new(vec!["n".to_string()], vec![vec![CellValue::Int(1)]]);
        assert!(format_result(&one, OutputFormat::Table).unwrap().ends_with("(1 row)\n"));

        one.truncated_at = Some(5);
        assert!(format_result(&one, OutputFormat::Table)
            .unwrap()
            .ends_with("(1 row, truncated at 5)\n"));

        let empty = QueryResult::new(vec!["n".to_string()], vec![]);
        let out = format_result(&empty, OutputFormat::Table).unwrap();
        assert!(out.contains('n'));
        assert!(out.ends_with("(0 rows)\n"));
    }

    #[test]
    fn test_json_block() {
        let out = format_result(&users(), OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["columns"], serde_json::json!(["public_id", "name"]));
        assert_eq!(parsed["rows"][0], serde_json::json!(["u_1", "alice"]));
        assert_eq!(parsed["rows"][1][1], serde_json::Value::Null);
        assert_eq!(parsed["truncated"], false);
    }

    #[test]
    fn test_csv_block() {
        let out = format_result(&users(), OutputFormat::Csv).unwrap();
        assert_eq!(out, "public_id,name\nu_1,alice\nu_2,NULL\n");
    }

    #[test]
    fn test_error_and_scope_listing() {
        let err = SearchError::Translation("empty response from model".to_string());
        assert_eq!(format_error(&err), "error: translation failed: empty response from model\n");

        let listing = format_scope(&SchemaScope::new("public", ["iam_user", "host"]));
        assert_eq!(listing, "schema public (2 tables)\n  iam_user\n  host\n");
    }
}
