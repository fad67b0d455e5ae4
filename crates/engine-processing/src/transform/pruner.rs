use super::{error::TransformError, pipeline::RowTransform};
use model::records::row::RowData;

/// Removes the listed columns from every row.
pub struct DropColumns {
    columns: Vec<String>,
}

impl DropColumns {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_lowercase()).collect(),
        }
    }
}

impl RowTransform for DropColumns {
    fn apply(&self, mut row: RowData) -> Result<RowData, TransformError> {
        row.field_values
            .retain(|field| !self.columns.contains(&field.name.to_lowercase()));
        Ok(row)
    }
}

/// Keeps only the listed columns, failing the row when one is absent.
pub struct KeepColumns {
    columns: Vec<String>,
}

impl KeepColumns {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl RowTransform for KeepColumns {
    fn apply(&self, mut row: RowData) -> Result<RowData, TransformError> {
        if let Some(missing) = self.columns.iter().find(|c| !row.contains(c)) {
            return Err(TransformError::MissingColumn(missing.clone()));
        }
        row.field_values.retain(|field| {
            self.columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&field.name))
        });
        Ok(row)
    }
}
