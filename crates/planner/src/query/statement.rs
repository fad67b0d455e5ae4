//! Write-side statements issued against a target table.

use crate::query::renderer::{Render, Renderer};
use model::core::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct TableRef<'a> {
    pub schema: Option<&'a str>,
    pub name: &'a str,
}

impl<'a> TableRef<'a> {
    pub fn new(schema: Option<&'a str>, name: &'a str) -> Self {
        TableRef { schema, name }
    }
}

impl Render for TableRef<'_> {
    fn render(&self, r: &mut Renderer) {
        if let Some(schema) = self.schema {
            r.push_ident(schema);
            r.push(".");
        }
        r.push_ident(self.name);
    }
}

/// `col = value` terms joined with AND; NULL compares with IS NULL.
fn render_filter(r: &mut Renderer, filter: &[(&str, &Value)]) {
    r.push_list(filter, " AND ", |r, (col, value)| {
        r.push_ident(col);
        if value.is_null() {
            r.push(" IS NULL");
        } else {
            r.push(" = ");
            r.push_literal(value);
        }
    });
}

#[derive(Debug, Clone)]
pub struct Insert<'a> {
    pub table: TableRef<'a>,
    pub columns: &'a [String],
    pub rows: &'a [Vec<Value>],
}

impl Render for Insert<'_> {
    fn render(&self, r: &mut Renderer) {
        r.push("INSERT INTO ");
        self.table.render(r);
        r.push(" (");
        r.push_list(self.columns, ", ", |r, col| r.push_ident(col));
        r.push(") VALUES ");
        r.push_list(self.rows, ", ", |r, row| {
            r.push("(");
            r.push_list(row, ", ", |r, value| r.push_literal(value));
            r.push(")");
        });
    }
}

#[derive(Debug, Clone)]
pub struct Update<'a> {
    pub table: TableRef<'a>,
    pub assignments: Vec<(&'a str, &'a Value)>,
    pub filter: Vec<(&'a str, &'a Value)>,
}

impl Render for Update<'_> {
    fn render(&self, r: &mut Renderer) {
        r.push("UPDATE ");
        self.table.render(r);
        r.push(" SET ");
        r.push_list(&self.assignments, ", ", |r, (col, value)| {
            r.push_ident(col);
            r.push(" = ");
            r.push_literal(value);
        });
        if !self.filter.is_empty() {
            r.push(" WHERE ");
            render_filter(r, &self.filter);
        }
    }
}

/// Looks up rows by business key, optionally restricted by extra equality
/// terms such as the current-version flag.
#[derive(Debug, Clone)]
pub struct SelectByKeys<'a> {
    pub table: TableRef<'a>,
    pub columns: &'a [String],
    pub key_columns: &'a [String],
    pub keys: &'a [Vec<Value>],
    pub filter: Vec<(&'a str, &'a Value)>,
}

impl Render for SelectByKeys<'_> {
    fn render(&self, r: &mut Renderer) {
        r.push("SELECT ");
        r.push_list(self.columns, ", ", |r, col| r.push_ident(col));
        r.push(" FROM ");
        self.table.render(r);
        r.push(" WHERE ");
        if self.key_columns.len() == 1 {
            r.push_ident(&self.key_columns[0]);
            r.push(" IN (");
            r.push_list(self.keys, ", ", |r, key| {
                if let Some(value) = key.first() {
                    r.push_literal(value);
                }
            });
            r.push(")");
        } else {
            r.push("(");
            r.push_list(self.key_columns, ", ", |r, col| r.push_ident(col));
            r.push(") IN (");
            r.push_list(self.keys, ", ", |r, key| {
                r.push("(");
                r.push_list(key, ", ", |r, value| r.push_literal(value));
                r.push(")");
            });
            r.push(")");
        }
        if !self.filter.is_empty() {
            r.push(" AND ");
            render_filter(r, &self.filter);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Truncate<'a> {
    pub table: TableRef<'a>,
}

impl Render for Truncate<'_> {
    fn render(&self, r: &mut Renderer) {
        r.push("TRUNCATE TABLE ");
        self.table.render(r);
    }
}
