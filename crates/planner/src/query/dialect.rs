//! Defines the `Dialect` trait for database-specific SQL syntax.

use model::core::value::Value;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Alias given to the wrapped source query.
pub const SOURCE_ALIAS: &str = "chunk_src";

/// Alias of the numbered derived table used by row-window chunking.
pub const NUMBERED_ALIAS: &str = "chunk_numbered";

/// Synthetic column added by row-window chunking. Workers drop it before
/// rows reach transforms.
pub const ROW_NUMBER_COLUMN: &str = "chunk_rn";

pub trait Dialect: Send + Sync + fmt::Debug {
    /// Wraps an identifier (like a table or column name) in the correct
    /// quotation marks for the dialect.
    ///
    /// - PostgreSQL uses double quotes: `"my_column"`
    /// - MySQL uses backticks: `` `my_column` ``
    /// - SQL Server uses brackets: `[my_column]`
    fn quote_identifier(&self, ident: &str) -> String;

    /// Returns the placeholder for a parameterized query.
    ///
    /// - PostgreSQL uses `$1`, `$2`, etc.
    /// - MySQL uses `?`
    fn get_placeholder(&self, index: usize) -> String;

    /// Returns the name of the dialect (e.g., "PostgreSQL", "MySQL").
    fn name(&self) -> String;

    fn kind(&self) -> DialectKind;

    /// Whether the dialect pages with OFFSET / LIMIT (or an equivalent).
    fn supports_offset_limit(&self) -> bool {
        true
    }

    /// Whether `key > a AND key <= b` over an ordered key is an efficient
    /// range scan.
    fn supports_key_range(&self) -> bool {
        true
    }

    /// Pseudo-column that identifies physical row position, if any.
    fn rowid_pseudo_column(&self) -> Option<&'static str> {
        None
    }

    /// Alias clause for a derived table.
    fn derived_alias(&self, alias: &str) -> String {
        format!("AS {alias}")
    }

    /// Renders a value as an inline SQL literal.
    fn render_literal(&self, value: &Value) -> String {
        value.to_string()
    }

    fn modulo(&self, lhs: &str, rhs: u64) -> String {
        format!("MOD({lhs}, {rhs})")
    }

    /// Pages `base` by position. `limit` is `None` for the open-ended last
    /// chunk.
    fn render_offset_limit(
        &self,
        base: &str,
        order_by: Option<&str>,
        offset: u64,
        limit: Option<u64>,
    ) -> String {
        let mut sql = format!("SELECT * FROM ({base}) {}", self.derived_alias(SOURCE_ALIAS));
        if let Some(order) = order_by {
            sql.push_str(&format!(" ORDER BY {order}"));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql.push_str(&format!(" OFFSET {offset}"));
        sql
    }

    /// Selects rows `lower < n <= upper` by row number.
    fn render_row_window(
        &self,
        base: &str,
        order_by: Option<&str>,
        lower: u64,
        upper: Option<u64>,
    ) -> String {
        let order = order_by
            .map(str::to_string)
            .or_else(|| self.rowid_pseudo_column().map(str::to_string))
            .unwrap_or_else(|| "(SELECT NULL)".to_string());
        let rn = self.quote_identifier(ROW_NUMBER_COLUMN);
        let mut sql = format!(
            "SELECT * FROM (SELECT {SOURCE_ALIAS}.*, ROW_NUMBER() OVER (ORDER BY {order}) AS {rn} FROM ({base}) {}) {} WHERE {rn} > {lower}",
            self.derived_alias(SOURCE_ALIAS),
            self.derived_alias(NUMBERED_ALIAS),
        );
        if let Some(upper) = upper {
            sql.push_str(&format!(" AND {rn} <= {upper}"));
        }
        sql.push_str(&format!(" ORDER BY {rn}"));
        sql
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Postgres,
    MySql,
    SqlServer,
    Oracle,
}

impl DialectKind {
    pub fn dialect(&self) -> Arc<dyn Dialect> {
        match self {
            DialectKind::Postgres => Arc::new(Postgres),
            DialectKind::MySql => Arc::new(MySql),
            DialectKind::SqlServer => Arc::new(SqlServer),
            DialectKind::Oracle => Arc::new(Oracle),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Postgres;

impl Dialect for Postgres {
    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{}""#, ident.replace('"', "\"\""))
    }

    fn get_placeholder(&self, index: usize) -> String {
        // PostgreSQL uses $1, $2, etc.
        format!("${}", index + 1)
    }

    fn name(&self) -> String {
        "PostgreSQL".into()
    }

    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }
}

#[derive(Debug, Clone)]
pub struct MySql;

impl Dialect for MySql {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn get_placeholder(&self, _index: usize) -> String {
        // MySQL uses ?
        "?".into()
    }

    fn name(&self) -> String {
        "MySQL".into()
    }

    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                format!("X'{hex}'")
            }
            Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''")),
            other => other.to_string(),
        }
    }

    fn render_offset_limit(
        &self,
        base: &str,
        order_by: Option<&str>,
        offset: u64,
        limit: Option<u64>,
    ) -> String {
        // MySQL has no OFFSET without LIMIT.
        let mut sql = format!("SELECT * FROM ({base}) {}", self.derived_alias(SOURCE_ALIAS));
        if let Some(order) = order_by {
            sql.push_str(&format!(" ORDER BY {order}"));
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {offset}", limit.unwrap_or(u64::MAX)));
        sql
    }
}

#[derive(Debug, Clone)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn get_placeholder(&self, index: usize) -> String {
        format!("@P{}", index + 1)
    }

    fn name(&self) -> String {
        "SQL Server".into()
    }

    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Value::String(s) => format!("N'{}'", s.replace('\'', "''")),
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("0x{hex}")
            }
            other => other.to_string(),
        }
    }

    fn modulo(&self, lhs: &str, rhs: u64) -> String {
        format!("{lhs} % {rhs}")
    }

    fn render_offset_limit(
        &self,
        base: &str,
        order_by: Option<&str>,
        offset: u64,
        limit: Option<u64>,
    ) -> String {
        // OFFSET / FETCH is only legal after an ORDER BY.
        let order = order_by.unwrap_or("(SELECT NULL)");
        let mut sql = format!(
            "SELECT * FROM ({base}) {} ORDER BY {order} OFFSET {offset} ROWS",
            self.derived_alias(SOURCE_ALIAS)
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
        }
        sql
    }
}

/// Oracle before 12c: no OFFSET / FETCH, rows are numbered with ROWNUM.
#[derive(Debug, Clone)]
pub struct Oracle;

impl Dialect for Oracle {
    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{}""#, ident.replace('"', "\"\""))
    }

    fn get_placeholder(&self, index: usize) -> String {
        format!(":{}", index + 1)
    }

    fn name(&self) -> String {
        "Oracle".into()
    }

    fn kind(&self) -> DialectKind {
        DialectKind::Oracle
    }

    fn supports_offset_limit(&self) -> bool {
        false
    }

    fn rowid_pseudo_column(&self) -> Option<&'static str> {
        Some("ROWNUM")
    }

    fn derived_alias(&self, alias: &str) -> String {
        // Oracle rejects AS before a table alias.
        alias.to_string()
    }

    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Date(d) => format!("DATE '{d}'"),
            Value::Timestamp(_) | Value::TimestampNaive(_) => format!("TIMESTAMP {value}"),
            other => other.to_string(),
        }
    }

    fn render_offset_limit(
        &self,
        base: &str,
        order_by: Option<&str>,
        offset: u64,
        limit: Option<u64>,
    ) -> String {
        self.render_row_window(base, order_by, offset, limit.map(|l| offset + l))
    }

    fn render_row_window(
        &self,
        base: &str,
        order_by: Option<&str>,
        lower: u64,
        upper: Option<u64>,
    ) -> String {
        // ROWNUM is assigned after the inner ORDER BY, so the ordering has to
        // be applied one level below the numbering.
        let rn = self.quote_identifier(ROW_NUMBER_COLUMN);
        let ordered = match order_by {
            Some(order) => format!("SELECT * FROM ({base}) {SOURCE_ALIAS} ORDER BY {order}"),
            None => base.to_string(),
        };
        let mut inner = format!(
            "SELECT {SOURCE_ALIAS}.*, ROWNUM AS {rn} FROM ({ordered}) {SOURCE_ALIAS}"
        );
        if let Some(upper) = upper {
            inner.push_str(&format!(" WHERE ROWNUM <= {upper}"));
        }
        format!("SELECT * FROM ({inner}) {NUMBERED_ALIAS} WHERE {rn} > {lower} ORDER BY {rn}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier_escapes_delimiters() {
        assert_eq!(Postgres.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(MySql.quote_identifier("order"), "`order`");
        assert_eq!(SqlServer.quote_identifier("x]y"), "[x]]y]");
    }

    #[test]
    fn test_offset_limit_per_dialect() {
        let base = "SELECT id FROM t";
        assert_eq!(
            Postgres.render_offset_limit(base, Some("\"id\" ASC"), 100, Some(50)),
            "SELECT * FROM (SELECT id FROM t) AS chunk_src ORDER BY \"id\" ASC LIMIT 50 OFFSET 100"
        );
        assert_eq!(
            Postgres.render_offset_limit(base, None, 100, None),
            "SELECT * FROM (SELECT id FROM t) AS chunk_src OFFSET 100"
        );
        assert_eq!(
            MySql.render_offset_limit(base, None, 0, None),
            format!("SELECT * FROM (SELECT id FROM t) AS chunk_src LIMIT {} OFFSET 0", u64::MAX)
        );
        assert_eq!(
            SqlServer.render_offset_limit(base, None, 10, Some(5)),
            "SELECT * FROM (SELECT id FROM t) AS chunk_src ORDER BY (SELECT NULL) OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn test_oracle_pages_with_rownum() {
        let sql = Oracle.render_offset_limit("SELECT id FROM t", None, 20, Some(10));
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT chunk_src.*, ROWNUM AS \"chunk_rn\" FROM (SELECT id FROM t) chunk_src WHERE ROWNUM <= 30) chunk_numbered WHERE \"chunk_rn\" > 20 ORDER BY \"chunk_rn\""
        );
        assert!(!Oracle.supports_offset_limit());
    }

    #[test]
    fn test_literals_per_dialect() {
        assert_eq!(SqlServer.render_literal(&Value::Boolean(true)), "1");
        assert_eq!(SqlServer.render_literal(&Value::String("x".into())), "N'x'");
        assert_eq!(MySql.render_literal(&Value::String("a\\b".into())), "'a\\\\b'");
        assert_eq!(Postgres.render_literal(&Value::Int(5)), "5");
    }
}
