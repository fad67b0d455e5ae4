use super::{error::TransformError, pipeline::RowTransform};
use model::records::row::RowData;
use std::collections::HashMap;

/// Renames source columns to their target names. Matching is
/// case-insensitive; unmapped columns keep their name.
pub struct RenameColumns {
    renames: HashMap<String, String>,
}

impl RenameColumns {
    pub fn new<I, K, V>(renames: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let renames = renames
            .into_iter()
            .map(|(from, to)| (from.into().to_lowercase(), to.into()))
            .collect();
        Self { renames }
    }
}

impl RowTransform for RenameColumns {
    fn apply(&self, mut row: RowData) -> Result<RowData, TransformError> {
        for field in &mut row.field_values {
            if let Some(target) = self.renames.get(&field.name.to_lowercase()) {
                field.name = target.clone();
            }
        }
        Ok(row)
    }
}

/// Points rows at a different entity name.
pub struct SetEntity(pub String);

impl RowTransform for SetEntity {
    fn apply(&self, mut row: RowData) -> Result<RowData, TransformError> {
        row.entity = self.0.clone();
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::value::Value;

    #[test]
    fn test_renames_case_insensitively() {
        let row = RowData::from_pairs("src", [("CUST_ID", Value::Int(1)), ("name", Value::Null)]);
        let out = RenameColumns::new([("cust_id", "customer_id")]).apply(row).unwrap();
        assert_eq!(out.columns(), vec!["customer_id", "name"]);
        assert_eq!(out.get_value("customer_id"), Value::Int(1));
    }

    #[test]
    fn test_set_entity() {
        let row = RowData::from_pairs("src", [("id", Value::Int(1))]);
        let out = SetEntity("dim_customer".into()).apply(row).unwrap();
        assert_eq!(out.entity, "dim_customer");
    }
}
