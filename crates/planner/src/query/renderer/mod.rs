//! Defines the core rendering trait and context for converting statements
//! to SQL.

use crate::query::dialect::Dialect;
use model::core::value::Value;

/// A trait for any statement node that can be rendered into a SQL string.
pub trait Render {
    fn render(&self, renderer: &mut Renderer);
}

/// A context that accumulates the SQL string and provides access to the
/// dialect for syntax-specific details. Values are rendered inline as
/// literals so the server coerces them to the column types.
pub struct Renderer<'a> {
    pub sql: String,
    pub dialect: &'a dyn Dialect,
}

impl<'a> Renderer<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            sql: String::new(),
            dialect,
        }
    }

    /// Consumes the renderer and returns the final SQL string.
    pub fn finish(self) -> String {
        self.sql
    }

    pub fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    pub fn push_ident(&mut self, ident: &str) {
        let quoted = self.dialect.quote_identifier(ident);
        self.sql.push_str(&quoted);
    }

    pub fn push_literal(&mut self, value: &Value) {
        let literal = self.dialect.render_literal(value);
        self.sql.push_str(&literal);
    }

    /// Pushes `items` separated by `sep`, rendering each with `f`.
    pub fn push_list<T>(&mut self, items: &[T], sep: &str, mut f: impl FnMut(&mut Self, &T)) {
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                self.sql.push_str(sep);
            }
            f(self, item);
        }
    }

    pub fn render_node(dialect: &'a dyn Dialect, node: &dyn Render) -> String {
        let mut renderer = Renderer::new(dialect);
        node.render(&mut renderer);
        renderer.finish()
    }
}
