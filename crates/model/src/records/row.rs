use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub name: String,
    pub value: Value,
}

impl FieldValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        FieldValue {
            name: name.into(),
            value,
        }
    }
}

/// An ordered column -> value record as produced by a record source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowData {
    pub entity: String,
    pub field_values: Vec<FieldValue>,
}

impl RowData {
    pub fn new(entity: &str, field_values: Vec<FieldValue>) -> Self {
        RowData {
            entity: entity.to_string(),
            field_values,
        }
    }

    pub fn from_pairs<I, K>(entity: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let field_values = pairs
            .into_iter()
            .map(|(name, value)| FieldValue::new(name, value))
            .collect();
        RowData::new(entity, field_values)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.field_values
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
    }

    pub fn get_value(&self, field: &str) -> Value {
        self.get(field)
            .map(|f| f.value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Replaces the value of an existing column or appends a new one.
    pub fn set(&mut self, field: &str, value: Value) {
        match self
            .field_values
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(field))
        {
            Some(existing) => existing.value = value,
            None => self.field_values.push(FieldValue::new(field, value)),
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let pos = self
            .field_values
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(field))?;
        Some(self.field_values.remove(pos).value)
    }

    pub fn columns(&self) -> Vec<&str> {
        self.field_values.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.field_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_values.is_empty()
    }

    /// Column snapshot used when a row has to be reported outside the engine.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.field_values
            .iter()
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let row = RowData::from_pairs("orders", [("Order_Id", Value::Int(7))]);
        assert_eq!(row.get_value("order_id"), Value::Int(7));
        assert_eq!(row.get_value("missing"), Value::Null);
    }

    #[test]
    fn test_set_replaces_in_place_and_appends_new() {
        let mut row = RowData::from_pairs(
            "orders",
            [("id", Value::Int(1)), ("status", Value::String("new".into()))],
        );
        row.set("STATUS", Value::String("paid".into()));
        row.set("amount", Value::Float(9.5));

        assert_eq!(row.columns(), vec!["id", "status", "amount"]);
        assert_eq!(row.get_value("status"), Value::String("paid".into()));
        assert_eq!(row.remove("id"), Some(Value::Int(1)));
        assert_eq!(row.len(), 2);
    }
}
