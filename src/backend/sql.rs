//! SQL collaborator seam used by the JDBC-style and data-source realms.
//! Statements use `?` placeholders; drivers translate them as needed.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SqlError;

static IDENTIFIER_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").ok());

/// An open connection. Rows are single-column string projections, which is all a
/// credential or role lookup needs. A NULL column comes back as `None`.
pub trait SqlConnection: Send {
    fn query_column(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Option<String>>, SqlError>;

    fn close(&mut self) {}
}

/// Opens connections from a URL plus properties (user/password and driver extras).
pub trait SqlDriver: Send + Sync {
    fn connect(&self, url: &str, props: &ConnectionProps) -> Result<Box<dyn SqlConnection>, SqlError>;
}

/// Pooled connection source resolved through the naming context.
pub trait DataSource: Send + Sync {
    fn get_connection(&self) -> Result<Box<dyn SqlConnection>, SqlError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionProps {
    pub user: Option<String>,
    pub password: Option<String>,
    pub extra: BTreeMap<String, String>,
}

/// The two lookups a SQL realm runs, built once at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatements {
    pub credentials: String,
    pub roles: String,
}

impl SqlStatements {
    pub fn build(user_table: &str, user_name_col: &str, user_cred_col: &str, user_role_table: &str, role_name_col: &str) -> Self {
        let credentials = format!("SELECT {} FROM {} WHERE {} = ?", user_cred_col, user_table, user_name_col);
        let roles = format!("SELECT {} FROM {} WHERE {} = ?", role_name_col, user_role_table, user_name_col);
        Self { credentials, roles }
    }

    /// Stored credential for `username`; `None` when no row or a NULL column.
    pub fn fetch_credential(&self, conn: &mut dyn SqlConnection, username: &str) -> Result<Option<String>, SqlError> {
        let rows = conn.query_column(&self.credentials, &[username])?;
        Ok(rows.into_iter().next().flatten())
    }

    /// All role rows for `username`, duplicates included.
    pub fn fetch_roles(&self, conn: &mut dyn SqlConnection, username: &str) -> Result<Vec<String>, SqlError> {
        let rows = conn.query_column(&self.roles, &[username])?;
        Ok(rows.into_iter().flatten().collect())
    }
}

/// Rewrite `?` placeholders to `$1..$n`, leaving quoted literals untouched.
pub fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 4);
    let mut n = 0;
    let mut in_quote = false;
    for c in sql.chars() {
        match c {
            '\'' => { in_quote = !in_quote; out.push(c); }
            '?' if !in_quote => { n += 1; out.push('$'); out.push_str(&n.to_string()); }
            _ => out.push(c),
        }
    }
    out
}

/// Only plain identifiers (optionally schema-qualified) may be spliced into statement text.
pub fn validate_identifier(kind: &str, ident: &str) -> Result<(), String> {
    let ok = IDENTIFIER_RE.as_ref().is_some_and(|re| re.is_match(ident));
    if ok { Ok(()) } else { Err(format!("invalid {} '{}'", kind, ident)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_shape() {
        let s = SqlStatements::build("users", "user_name", "user_pass", "user_roles", "role_name");
        assert_eq!(s.credentials, "SELECT user_pass FROM users WHERE user_name = ?");
        assert_eq!(s.roles, "SELECT role_name FROM user_roles WHERE user_name = ?");
    }

    #[test]
    fn placeholder_rewrite_skips_literals() {
        assert_eq!(numbered_placeholders("SELECT a FROM t WHERE b = ? AND c = '?' AND d = ?"),
                   "SELECT a FROM t WHERE b = $1 AND c = '?' AND d = $2");
    }

    #[test]
    fn identifiers() {
        assert!(validate_identifier("table", "security.users").is_ok());
        assert!(validate_identifier("column", "_x1").is_ok());
        assert!(validate_identifier("table", "users; DROP TABLE x").is_err());
        assert!(validate_identifier("table", "").is_err());
        assert!(validate_identifier("table", "1abc").is_err());
        assert!(validate_identifier("table", "security.").is_err());
        assert!(validate_identifier("table", "users\n").is_err());
    }
}
