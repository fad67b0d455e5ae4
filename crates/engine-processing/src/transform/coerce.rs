use super::{error::TransformError, pipeline::RowTransform};
use model::{core::value::Value, records::row::RowData};

pub use model::execution::transform::TargetKind;

fn kind_name(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Int => "an integer",
        TargetKind::Float => "a float",
        TargetKind::Text => "text",
        TargetKind::Boolean => "a boolean",
    }
}

fn convert(kind: TargetKind, value: &Value) -> Option<Value> {
    match kind {
        TargetKind::Int => value.as_i64().map(Value::Int),
        TargetKind::Float => value.as_f64().map(Value::Float),
        TargetKind::Text => value.as_string().map(Value::String),
        TargetKind::Boolean => value.as_bool().map(Value::Boolean),
    }
}

/// Converts one column to the type the target expects. NULL stays NULL; a
/// value that does not convert fails the row.
pub struct CoerceColumn {
    column: String,
    kind: TargetKind,
}

impl CoerceColumn {
    pub fn new(column: &str, kind: TargetKind) -> Self {
        Self {
            column: column.to_string(),
            kind,
        }
    }
}

impl RowTransform for CoerceColumn {
    fn apply(&self, mut row: RowData) -> Result<RowData, TransformError> {
        let Some(field) = row.get(&self.column) else {
            return Err(TransformError::MissingColumn(self.column.clone()));
        };
        if field.value.is_null() {
            return Ok(row);
        }
        let converted =
            convert(self.kind, &field.value).ok_or_else(|| TransformError::TypeMismatch {
                column: self.column.clone(),
                expected: kind_name(self.kind),
                found: field.value.to_string(),
            })?;
        row.set(&self.column, converted);
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerces_numeric_text() {
        let row = RowData::from_pairs("t", [("amount", Value::String(" 42 ".into()))]);
        let out = CoerceColumn::new("amount", TargetKind::Int).apply(row).unwrap();
        assert_eq!(out.get_value("amount"), Value::Int(42));
    }

    #[test]
    fn test_null_passes_through() {
        let row = RowData::from_pairs("t", [("amount", Value::Null)]);
        let out = CoerceColumn::new("amount", TargetKind::Float).apply(row).unwrap();
        assert!(out.get_value("amount").is_null());
    }

    #[test]
    fn test_unconvertible_value_fails_the_row() {
        let row = RowData::from_pairs("t", [("flag", Value::String("maybe".into()))]);
        let err = CoerceColumn::new("flag", TargetKind::Boolean).apply(row).unwrap_err();
        assert_eq!(err.code(), "TYPE_MISMATCH");
    }
}
