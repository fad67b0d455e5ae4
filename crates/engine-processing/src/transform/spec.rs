use super::{
    coerce::CoerceColumn,
    mapping::{RenameColumns, SetEntity},
    pipeline::TransformPipeline,
    pruner::{DropColumns, KeepColumns},
};
use model::execution::transform::TransformSpec;

fn as_strs(columns: &[String]) -> Vec<&str> {
    columns.iter().map(String::as_str).collect()
}

impl TransformPipeline {
    /// Builds the pipeline a job file declares, keeping declaration order.
    pub fn from_specs(specs: &[TransformSpec]) -> Self {
        specs.iter().fold(TransformPipeline::new(), |pipeline, spec| match spec {
            TransformSpec::Rename(renames) => pipeline.add_transform(RenameColumns::new(
                renames.iter().map(|(from, to)| (from.clone(), to.clone())),
            )),
            TransformSpec::Drop(columns) => {
                pipeline.add_transform(DropColumns::new(&as_strs(columns)))
            }
            TransformSpec::Keep(columns) => {
                pipeline.add_transform(KeepColumns::new(&as_strs(columns)))
            }
            TransformSpec::Coerce { column, to } => {
                pipeline.add_transform(CoerceColumn::new(column, *to))
            }
            TransformSpec::SetEntity(entity) => pipeline.add_transform(SetEntity(entity.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformError;
    use model::{core::value::Value, records::row::RowData};

    fn specs(json: &str) -> Vec<TransformSpec> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_declared_transforms_run_in_file_order() {
        let pipeline = TransformPipeline::from_specs(&specs(
            r#"[
                { "rename": { "CUST_ID": "customer_id" } },
                { "drop": ["ssn"] },
                { "coerce": { "column": "amount", "to": "float" } },
                { "set_entity": "dim_customer" }
            ]"#,
        ));
        assert_eq!(pipeline.len(), 4);

        let row = RowData::from_pairs(
            "src",
            [
                ("CUST_ID", Value::Int(7)),
                ("ssn", Value::String("000".into())),
                ("amount", Value::String("12.5".into())),
            ],
        );
        let out = pipeline.apply(row).unwrap();
        assert_eq!(out.entity, "dim_customer");
        assert_eq!(out.columns(), vec!["customer_id", "amount"]);
        assert_eq!(out.get_value("amount"), Value::Float(12.5));
    }

    #[test]
    fn test_keep_sees_renamed_columns() {
        let pipeline = TransformPipeline::from_specs(&specs(
            r#"[{ "rename": { "id": "order_id" } }, { "keep": ["order_id", "status"] }]"#,
        ));
        let row = RowData::from_pairs("src", [("id", Value::Int(1)), ("note", Value::Null)]);
        let err = pipeline.apply(row).unwrap_err();
        assert_eq!(err, TransformError::MissingColumn("status".into()));
    }

    #[test]
    fn test_no_specs_is_identity() {
        assert!(TransformPipeline::from_specs(&[]).is_empty());
    }
}
