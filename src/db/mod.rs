mod connection;
mod introspection;
mod query;
#[cfg(test)]
pub(crate) mod testing;

pub use connection::*;
pub use introspection::*;
pub use query::*;

use anyhow::Result;
use async_trait::async_trait;

/// The operations the gateway needs from the analytical database.
///
/// Failures are always surfaced as `Err`; an empty result set is `Ok(vec![])`.
#[async_trait]
pub trait Database: Send + Sync {
    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Runs a statement that returns no rows and reports the affected row count.
    async fn execute_update(&self, sql: &str) -> Result<u64>;

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>>;
}

/// Quote an identifier for Doris (MySQL dialect).
pub fn quote_ident(s: &str) -> String {
    format!("`{}`", s.replace('`', "``"))
}

/// Render a string as a single-quoted SQL literal.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_backticks() {
        assert_eq!(quote_ident("城市"), "`城市`");
        assert_eq!(quote_ident("a`b"), "`a``b`");
    }

    #[test]
    fn quote_literal_escapes_quotes_and_backslashes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"C:\tmp"), r"'C:\\tmp'");
    }
}
