//! Scope Guard
//!
//! Parses translated SQL and checks every relation and function it touches
//! against the session's SchemaScope before anything is executed.

use crate::error::{Result, SearchError};
use crate::schema_scope::SchemaScope;
use sqlparser::ast::{Expr, Ident, ObjectName, Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// Side-effect-free functions a translated query may call. Anything else
/// (`query_to_xml`, `dblink`, `pg_read_file`, ...) could reach data outside
/// the scope.
const ALLOWED_FUNCTIONS: &[&str] = &[
    // aggregates
    "count", "sum", "avg", "min", "max", "bool_and", "bool_or", "every",
    "string_agg", "array_agg",
    // window
    "row_number", "rank", "dense_rank", "percent_rank", "ntile", "lag", "lead",
    "first_value", "last_value",
    // conditional
    "coalesce", "nullif", "greatest", "least",
    // strings
    "lower", "upper", "length", "char_length", "concat", "concat_ws", "btrim",
    "ltrim", "rtrim", "replace", "left", "right", "split_part", "strpos",
    "starts_with", "initcap", "lpad", "rpad", "md5", "encode",
    // date and time
    "now", "current_date", "current_timestamp", "date_trunc", "date_part",
    "age", "to_char", "to_date", "to_timestamp", "make_interval",
    // numeric
    "abs", "round", "ceil", "ceiling", "floor", "trunc", "mod", "power", "sqrt",
    // arrays and network addresses
    "array_length", "cardinality", "host", "family", "masklen",
];

/// A statement that passed scope validation. Only this module can build one,
/// so the query service cannot be handed unchecked SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    sql: String,
    tables: Vec<String>,
}

impl ValidatedStatement {
    /// Canonical rendering of the validated AST. This is what gets executed.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Scoped tables the statement reads, in order of first reference.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}

/// Validate translated SQL against the scope.
///
/// Parse failures are translation failures; anything that parses but reaches
/// outside the scope (or writes) is a scope violation.
pub fn validate(sql: &str, scope: &SchemaScope) -> Result<ValidatedStatement> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SearchError::Translation("empty SQL statement".to_string()));
    }

    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, trimmed)
        .map_err(|e| SearchError::Translation(format!("generated SQL does not parse: {}", e)))?;

    let statement = match statements.len() {
        0 => return Err(SearchError::Translation("no SQL statement in response".to_string())),
        1 => statements.remove(0),
        n => {
            return Err(SearchError::ScopeViolation {
                offenders: vec![format!("{} statements (only one is allowed)", n)],
            })
        }
    };

    if !matches!(statement, Statement::Query(_)) {
        return Err(SearchError::ScopeViolation {
            offenders: vec![format!("{} statement (only read-only queries are allowed)", statement_kind(&statement))],
        });
    }

    let mut walker = ScopeWalker::new(scope);
    // The walker never breaks; it records every offender and keeps going.
    let _ = statement.visit(&mut walker);

    if !walker.offenders.is_empty() {
        warn!("Rejected statement outside scope: {:?}", walker.offenders);
        return Err(SearchError::ScopeViolation { offenders: walker.offenders });
    }

    debug!("Statement validated, tables: {:?}", walker.tables);
    Ok(ValidatedStatement {
        sql: statement.to_string(),
        tables: walker.tables,
    })
}

fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("unknown")
        .to_uppercase()
}

/// PostgreSQL folds unquoted identifiers to lower case.
fn normalize(ident: &Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_lowercase()
    }
}

/// CTE names introduced by one query. Non-recursive siblings only see the
/// CTEs defined before them; the query body sees all of them.
struct CteFrame {
    names: Vec<String>,
    bodies: Vec<*const Query>,
    visible: usize,
    recursive: bool,
}

impl CteFrame {
    fn for_query(query: &Query) -> Self {
        let (names, bodies, recursive) = match &query.with {
            Some(with) => (
                with.cte_tables.iter().map(|cte| normalize(&cte.alias.name)).collect::<Vec<_>>(),
                with.cte_tables.iter().map(|cte| &*cte.query as *const Query).collect(),
                with.recursive,
            ),
            None => (Vec::new(), Vec::new(), false),
        };
        let visible = if recursive { names.len() } else { 0 };
        Self { names, bodies, visible, recursive }
    }

    fn body_index(&self, query: &Query) -> Option<usize> {
        self.bodies.iter().position(|body| std::ptr::eq(*body, query))
    }
}

struct ScopeWalker<'s> {
    scope: &'s SchemaScope,
    frames: Vec<CteFrame>,
    tables: Vec<String>,
    offenders: Vec<String>,
}

impl<'s> ScopeWalker<'s> {
    fn new(scope: &'s SchemaScope) -> Self {
        Self {
            scope,
            frames: Vec::new(),
            tables: Vec::new(),
            offenders: Vec::new(),
        }
    }

    fn cte_visible(&self, name: &str) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.names[..frame.visible].iter().any(|n| n == name))
    }

    fn offend(&mut self, what: String) {
        if !self.offenders.contains(&what) {
            self.offenders.push(what);
        }
    }

    fn check_relation(&mut self, relation: &ObjectName) {
        let idents = &relation.0;
        let resolved = match idents.as_slice() {
            [table] => {
                let table = normalize(table);
                if self.cte_visible(&table) {
                    return;
                }
                Some(table)
            }
            [schema, table] if normalize(schema) == self.scope.schema() => Some(normalize(table)),
            _ => None,
        };

        match resolved {
            Some(table) if self.scope.contains(&table) => {
                if !self.tables.contains(&table) {
                    self.tables.push(table);
                }
            }
            _ => self.offend(format!("table {}", relation)),
        }
    }

    fn check_function(&mut self, name: &ObjectName) {
        let allowed = match name.0.as_slice() {
            [ident] => ALLOWED_FUNCTIONS.contains(&normalize(ident).as_str()),
            _ => false,
        };
        if !allowed {
            self.offend(format!("function {}", name));
        }
    }
}

impl Visitor for ScopeWalker<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(parent) = self.frames.last_mut() {
            if let Some(idx) = parent.body_index(query) {
                if !parent.recursive {
                    parent.visible = idx;
                }
            }
        }

        if !query.locks.is_empty() {
            self.offend("row locking clause".to_string());
        }
        if let SetExpr::Select(select) = query.body.as_ref() {
            if select.into.is_some() {
                self.offend("SELECT INTO".to_string());
            }
        }

        self.frames.push(CteFrame::for_query(query));
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.frames.pop();
        if let Some(parent) = self.frames.last_mut() {
            if let Some(idx) = parent.body_index(query) {
                if !parent.recursive {
                    parent.visible = idx + 1;
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.check_relation(relation);
        ControlFlow::Continue(())
    }

    // `LATERAL f(...)` in FROM is a function call, not a relation.
    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Function { name, .. } = table_factor {
            self.check_function(name);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if let Expr::Function(func) = expr {
            self.check_function(&func.name);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        // Data-modifying statements nested inside a query (e.g. in a CTE).
        if !matches!(statement, Statement::Query(_)) {
            self.offend(format!("{} statement", statement_kind(statement)));
        }
        ControlFlow::Continue(())
    }
}
