//! Inspection of the user-supplied source query: ordering key and projected
//! columns. Queries the parser cannot read are still usable; they simply
//! have no detectable key.

use crate::query::dialect::{Dialect, DialectKind};
use sqlparser::{
    ast::{Expr, SelectItem, SetExpr, Statement},
    dialect::{GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect},
    parser::Parser,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// The query could not be inspected.
    Unknown,
    /// At least one `*` or `t.*` item.
    Wildcard,
    Columns(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct SourceQuery {
    original: String,
    base: String,
    order_by: Vec<OrderKey>,
    projection: Projection,
    order_stripped: bool,
}

fn parser_dialect(kind: DialectKind) -> Box<dyn sqlparser::dialect::Dialect> {
    match kind {
        DialectKind::Postgres => Box::new(PostgreSqlDialect {}),
        DialectKind::MySql => Box::new(MySqlDialect {}),
        DialectKind::SqlServer => Box::new(MsSqlDialect {}),
        DialectKind::Oracle => Box::new(GenericDialect {}),
    }
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        Expr::Nested(inner) => column_name(inner),
        _ => None,
    }
}

fn projection_of(items: &[SelectItem]) -> Projection {
    let mut columns = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectItem::Wildcard(..) | SelectItem::QualifiedWildcard(..) => {
                return Projection::Wildcard;
            }
            SelectItem::ExprWithAlias { alias, .. } => columns.push(alias.value.clone()),
            SelectItem::UnnamedExpr(expr) => {
                if let Some(name) = column_name(expr) {
                    columns.push(name);
                }
            }
        }
    }
    Projection::Columns(columns)
}

impl SourceQuery {
    pub fn parse(sql: &str, kind: DialectKind) -> Self {
        let trimmed = sql.trim().trim_end_matches(';').trim().to_string();
        let fallback = SourceQuery {
            original: trimmed.clone(),
            base: trimmed.clone(),
            order_by: Vec::new(),
            projection: Projection::Unknown,
            order_stripped: false,
        };

        let dialect = parser_dialect(kind);
        let mut statements = match Parser::parse_sql(dialect.as_ref(), &trimmed) {
            Ok(statements) => statements,
            Err(err) => {
                debug!(error = %err, "Source query not parseable; treating it as opaque");
                return fallback;
            }
        };
        if statements.len() != 1 {
            return fallback;
        }
        let Statement::Query(mut query) = statements.remove(0) else {
            return fallback;
        };

        let projection = match query.body.as_ref() {
            SetExpr::Select(select) => projection_of(&select.projection),
            _ => Projection::Unknown,
        };

        let mut order_by = Vec::new();
        if let Some(order) = &query.order_by {
            for item in &order.exprs {
                match column_name(&item.expr) {
                    Some(column) => order_by.push(OrderKey {
                        column,
                        descending: item.asc == Some(false),
                    }),
                    None => {
                        order_by.clear();
                        break;
                    }
                }
            }
        }

        let mut source = SourceQuery {
            original: trimmed.clone(),
            base: trimmed,
            order_by,
            projection,
            order_stripped: false,
        };

        // A top-level LIMIT / OFFSET depends on the ordering, so the ORDER BY
        // stays inside the wrapped query in that case.
        let paged = query.limit.is_some() || query.offset.is_some() || query.fetch.is_some();
        let all_projected = source.order_by.iter().all(|k| source.projects(&k.column));
        if !source.order_by.is_empty() && !paged && all_projected {
            query.order_by = None;
            source.base = query.to_string();
            source.order_stripped = true;
        }
        source
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    /// The query to wrap: the original, minus its ORDER BY when the ordering
    /// can be re-applied outside.
    pub fn base_sql(&self) -> &str {
        &self.base
    }

    pub fn order_keys(&self) -> &[OrderKey] {
        &self.order_by
    }

    /// First ORDER BY column, the candidate for key-based chunking.
    pub fn key_column(&self) -> Option<&str> {
        self.order_by.first().map(|k| k.column.as_str())
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn projects(&self, column: &str) -> bool {
        match &self.projection {
            Projection::Unknown | Projection::Wildcard => true,
            Projection::Columns(columns) => columns.iter().any(|c| c.eq_ignore_ascii_case(column)),
        }
    }

    /// ORDER BY list for the outer query, when the inner one was stripped.
    pub fn outer_order_clause(&self, dialect: &dyn Dialect) -> Option<String> {
        if !self.order_stripped {
            return None;
        }
        let clause = self
            .order_by
            .iter()
            .map(|k| {
                let dir = if k.descending { "DESC" } else { "ASC" };
                format!("{} {dir}", dialect.quote_identifier(&k.column))
            })
            .collect::<Vec<_>>()
            .join(", ");
        Some(clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::Postgres;

    #[test]
    fn test_detects_first_order_by_column() {
        let q = SourceQuery::parse(
            "SELECT txn_id, amount FROM txns WHERE amount > 0 ORDER BY txn_id, amount DESC;",
            DialectKind::Postgres,
        );
        assert_eq!(q.key_column(), Some("txn_id"));
        assert_eq!(q.order_keys().len(), 2);
        assert!(q.order_keys()[1].descending);
        assert!(!q.base_sql().to_uppercase().contains("ORDER BY"));
        assert_eq!(
            q.outer_order_clause(&Postgres).as_deref(),
            Some("\"txn_id\" ASC, \"amount\" DESC")
        );
    }

    #[test]
    fn test_qualified_key_and_alias_projection() {
        let q = SourceQuery::parse(
            "SELECT t.id AS txn, t.amount FROM txns t ORDER BY t.amount",
            DialectKind::Postgres,
        );
        assert_eq!(q.key_column(), Some("amount"));
        assert_eq!(
            q.projection(),
            &Projection::Columns(vec!["txn".into(), "amount".into()])
        );
        assert!(q.projects("TXN"));
        assert!(!q.projects("id"));
    }

    #[test]
    fn test_wildcard_projects_everything() {
        let q = SourceQuery::parse("SELECT * FROM txns ORDER BY txn_id", DialectKind::MySql);
        assert_eq!(q.projection(), &Projection::Wildcard);
        assert!(q.projects("anything"));
    }

    #[test]
    fn test_order_kept_inside_when_query_is_limited() {
        let q = SourceQuery::parse(
            "SELECT id FROM t ORDER BY id LIMIT 10",
            DialectKind::Postgres,
        );
        assert_eq!(q.key_column(), Some("id"));
        assert!(q.base_sql().contains("ORDER BY"));
        assert!(q.outer_order_clause(&Postgres).is_none());
    }

    #[test]
    fn test_expression_ordering_has_no_key() {
        let q = SourceQuery::parse("SELECT id FROM t ORDER BY lower(name)", DialectKind::Postgres);
        assert_eq!(q.key_column(), None);
    }

    #[test]
    fn test_unparseable_sql_is_opaque() {
        let q = SourceQuery::parse("EXEC dbo.export_rows @day = 1", DialectKind::Postgres);
        assert_eq!(q.key_column(), None);
        assert_eq!(q.projection(), &Projection::Unknown);
        assert_eq!(q.base_sql(), "EXEC dbo.export_rows @day = 1");
    }

    #[test]
    fn test_unprojected_order_column_is_not_stripped() {
        let q = SourceQuery::parse("SELECT amount FROM t ORDER BY id", DialectKind::Postgres);
        assert_eq!(q.key_column(), Some("id"));
        assert!(!q.projects("id"));
        assert!(q.base_sql().contains("ORDER BY"));
    }
}
