//! Schema Scope
//!
//! The allow-list of tables a session may query. Compiled into the process.

use serde::Serialize;

/// Tables covering auth methods/accounts, hosts, and IAM records.
pub const IAM_TABLES: &[&str] = &[
    "auth_method",
    "auth_account",
    "auth_oidc_account",
    "auth_oidc_method",
    "auth_password_account",
    "auth_password_method",
    "auth_token",
    "host",
    "host_catalog",
    "host_dns_name",
    "host_ip_address",
    "host_set",
    "iam_group",
    "iam_group_member_user",
    "iam_group_role",
    "iam_role",
    "iam_role_grant",
    "iam_scope",
    "iam_scope_global",
    "iam_scope_org",
    "iam_scope_project",
    "iam_user",
    "iam_user_role",
];

pub const DEFAULT_SCHEMA: &str = "public";

/// Ordered, duplicate-free set of table names plus the schema they live in.
///
/// Names are stored lowercased, matching how PostgreSQL folds unquoted
/// identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaScope {
    schema: String,
    tables: Vec<String>,
}

impl SchemaScope {
    pub fn new<I, S>(schema: &str, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for table in tables {
            let name = table.as_ref().trim().to_lowercase();
            if !name.is_empty() && !ordered.contains(&name) {
                ordered.push(name);
            }
        }
        Self {
            schema: schema.to_lowercase(),
            tables: ordered,
        }
    }

    /// The identity/access-management scope shipped with the binary.
    pub fn iam() -> Self {
        Self::new(DEFAULT_SCHEMA, IAM_TABLES.iter())
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Tables in display order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Column layout of one scoped table, as introspected at startup. Fed to the
/// translation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl TableDescription {
    /// Compact DDL-like line, e.g. `iam_user(public_id text NOT NULL, name text)`.
    pub fn to_prompt_line(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.nullable {
                    format!("{} {}", c.name, c.data_type)
                } else {
                    format!("{} {} NOT NULL", c.name, c.data_type)
                }
            })
            .collect();
        format!("{}({})", self.name, columns.join(", "))
    }
}
