use serde::{Deserialize, Serialize};

fn default_hash_column() -> String {
    "row_hash".to_string()
}

/// Bookkeeping columns maintained on SCD Type 2 targets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScdColumns {
    pub valid_from: String,
    pub valid_to: String,
    pub is_current: String,
}

impl Default for ScdColumns {
    fn default() -> Self {
        ScdColumns {
            valid_from: "valid_from".to_string(),
            valid_to: "valid_to".to_string(),
            is_current: "is_current".to_string(),
        }
    }
}

impl ScdColumns {
    pub fn all(&self) -> [&str; 3] {
        [
            self.valid_from.as_str(),
            self.valid_to.as_str(),
            self.is_current.as_str(),
        ]
    }
}

/// Destination table of a job and the columns the engine manages on it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub business_key: Vec<String>,
    #[serde(default = "default_hash_column")]
    pub hash_column: String,
    #[serde(default)]
    pub surrogate_key: Option<String>,
    #[serde(default)]
    pub audit_columns: Vec<String>,
    #[serde(default)]
    pub scd: ScdColumns,
    /// Columns hashed for change detection, in this order. When unset every
    /// non-managed column is hashed in name order.
    #[serde(default)]
    pub hash_columns: Option<Vec<String>>,
}

impl TargetTable {
    pub fn new(name: &str) -> Self {
        TargetTable {
            name: name.to_string(),
            schema: None,
            business_key: Vec::new(),
            hash_column: default_hash_column(),
            surrogate_key: None,
            audit_columns: Vec::new(),
            scd: ScdColumns::default(),
            hash_columns: None,
        }
    }

    pub fn with_business_key(mut self, columns: &[&str]) -> Self {
        self.business_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_surrogate_key(mut self, column: &str) -> Self {
        self.surrogate_key = Some(column.to_string());
        self
    }

    pub fn with_hash_columns(mut self, columns: &[&str]) -> Self {
        self.hash_columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_audit_columns(mut self, columns: &[&str]) -> Self {
        self.audit_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn qualified_name(&self) -> (Option<&str>, &str) {
        (self.schema.as_deref(), &self.name)
    }

    /// Columns that never take part in the change hash.
    pub fn hash_excluded_columns(&self) -> Vec<String> {
        let mut excluded = vec![self.hash_column.clone()];
        excluded.extend(self.surrogate_key.iter().cloned());
        excluded.extend(self.audit_columns.iter().cloned());
        excluded.extend(self.scd.all().iter().map(|c| c.to_string()));
        excluded
    }

    pub fn is_managed_column(&self, column: &str) -> bool {
        self.hash_excluded_columns()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_columns_cover_bookkeeping() {
        let table = TargetTable::new("dim_customer")
            .with_business_key(&["customer_id"])
            .with_surrogate_key("customer_sk")
            .with_audit_columns(&["loaded_at"]);

        let excluded = table.hash_excluded_columns();
        for col in ["row_hash", "customer_sk", "loaded_at", "valid_from", "valid_to", "is_current"] {
            assert!(excluded.iter().any(|c| c == col), "{col} should be excluded");
        }
        assert!(!table.is_managed_column("customer_id"));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let table: TargetTable =
            serde_json::from_str(r#"{"name":"orders","business_key":["order_id"]}"#).unwrap();
        assert_eq!(table.hash_column, "row_hash");
        assert_eq!(table.scd, ScdColumns::default());
        assert!(table.schema.is_none());
    }
}
