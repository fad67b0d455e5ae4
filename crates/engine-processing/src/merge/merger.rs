use super::classify::{DigestIndex, RowClass};
use chrono::{DateTime, Utc};
use connectors::target::{ExistingRow, WriteOp};
use engine_core::hash::{ChangeHashEngine, canonical_key};
use model::{
    core::value::Value,
    execution::{load::LoadMode, target::TargetTable},
    records::row::{FieldValue, RowData},
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Business key column '{0}' is missing from the row")]
    MissingKey(String),

    #[error("Business key column '{0}' is NULL")]
    NullKey(String),
}

impl MergeError {
    pub fn code(&self) -> &'static str {
        match self {
            MergeError::MissingKey(_) => "MISSING_KEY",
            MergeError::NullKey(_) => "NULL_KEY",
        }
    }
}

/// A transformed row with its business key and change hash resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    pub row_index: usize,
    pub row: RowData,
    pub key: Vec<Value>,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRow {
    pub row_index: usize,
    pub class: RowClass,
    /// `None` when the row needs no write.
    pub op: Option<WriteOp>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    pub rows: Vec<PlannedRow>,
}

impl MergePlan {
    pub fn write_count(&self) -> usize {
        self.rows.iter().filter(|r| r.op.is_some()).count()
    }

    pub fn count(&self, class: RowClass) -> usize {
        self.rows.iter().filter(|r| r.class == class).count()
    }
}

/// Turns classified rows into target writes for one load mode.
#[derive(Debug)]
pub struct ScdMerger {
    mode: LoadMode,
    table: TargetTable,
    hasher: ChangeHashEngine,
}

impl ScdMerger {
    pub fn new(mode: LoadMode, table: TargetTable) -> Self {
        let hasher = ChangeHashEngine::for_table(&table);
        ScdMerger {
            mode,
            table,
            hasher,
        }
    }

    pub fn mode(&self) -> LoadMode {
        self.mode
    }

    pub fn table(&self) -> &TargetTable {
        &self.table
    }

    /// Whether rows are compared with what the target already holds.
    pub fn needs_lookup(&self) -> bool {
        match self.mode {
            LoadMode::Insert => !self.table.business_key.is_empty(),
            LoadMode::TruncateLoad => false,
            LoadMode::Upsert | LoadMode::Scd2 => true,
        }
    }

    /// SCD2 compares against current versions only.
    pub fn current_only(&self) -> bool {
        self.mode == LoadMode::Scd2
    }

    /// The row's business key, empty when the mode does no lookups.
    pub fn business_key(&self, row: &RowData) -> Result<Vec<Value>, MergeError> {
        if !self.needs_lookup() {
            return Ok(Vec::new());
        }
        let mut key = Vec::with_capacity(self.table.business_key.len());
        for column in &self.table.business_key {
            let value = row
                .get(column)
                .map(|f| f.value.clone())
                .ok_or_else(|| MergeError::MissingKey(column.clone()))?;
            if value.is_null() {
                return Err(MergeError::NullKey(column.clone()));
            }
            key.push(value);
        }
        Ok(key)
    }

    /// Stamps the change hash onto a row whose key is already resolved.
    pub fn keyed(&self, row_index: usize, mut row: RowData, key: Vec<Value>) -> KeyedRow {
        let hash = self.hasher.hash(&row);
        row.set(&self.table.hash_column, Value::String(hash.clone()));
        KeyedRow {
            row_index,
            row,
            key,
            hash,
        }
    }

    pub fn prepare(&self, row_index: usize, row: RowData) -> Result<KeyedRow, MergeError> {
        let key = self.business_key(&row)?;
        Ok(self.keyed(row_index, row, key))
    }

    /// Classifies `rows` in order against `existing` and builds the writes.
    /// A key repeated inside the batch is compared with its earlier
    /// occurrence, not with the target.
    pub fn plan(&self, rows: Vec<KeyedRow>, existing: &[ExistingRow], now: DateTime<Utc>) -> MergePlan {
        let mut index = DigestIndex::from_existing(existing);
        let mut planned = Vec::with_capacity(rows.len());

        for keyed in rows {
            let key_text = canonical_key(&keyed.key);
            let class = if self.needs_lookup() {
                index.classify(&key_text, &keyed.hash)
            } else {
                RowClass::New
            };
            if self.needs_lookup() && class != RowClass::Unchanged {
                index.record(key_text, keyed.hash.clone());
            }

            let op = self.write_for(class, &keyed, now);
            planned.push(PlannedRow {
                row_index: keyed.row_index,
                class,
                op,
            });
        }

        MergePlan { rows: planned }
    }

    fn write_for(&self, class: RowClass, keyed: &KeyedRow, now: DateTime<Utc>) -> Option<WriteOp> {
        match (self.mode, class) {
            (_, RowClass::Unchanged) => None,
            (LoadMode::Insert | LoadMode::TruncateLoad, RowClass::New) => Some(WriteOp::Insert {
                row: keyed.row.clone(),
            }),
            (LoadMode::Insert | LoadMode::TruncateLoad, RowClass::Changed) => None,
            (LoadMode::Upsert, RowClass::New) => Some(WriteOp::Insert {
                row: keyed.row.clone(),
            }),
            (LoadMode::Upsert, RowClass::Changed) => Some(WriteOp::Overwrite {
                key: self.key_fields(&keyed.key),
                row: keyed.row.clone(),
            }),
            (LoadMode::Scd2, RowClass::New) => Some(WriteOp::Insert {
                row: self.current_version(&keyed.row, now),
            }),
            (LoadMode::Scd2, RowClass::Changed) => {
                let scd = &self.table.scd;
                Some(WriteOp::NewVersion {
                    key: self.key_fields(&keyed.key),
                    close: vec![
                        FieldValue::new(scd.valid_to.clone(), Value::Timestamp(now)),
                        FieldValue::new(scd.is_current.clone(), Value::Boolean(false)),
                    ],
                    current: FieldValue::new(scd.is_current.clone(), Value::Boolean(true)),
                    row: self.current_version(&keyed.row, now),
                })
            }
        }
    }

    fn key_fields(&self, key: &[Value]) -> Vec<FieldValue> {
        self.table
            .business_key
            .iter()
            .zip(key)
            .map(|(column, value)| FieldValue::new(column.clone(), value.clone()))
            .collect()
    }

    fn current_version(&self, row: &RowData, now: DateTime<Utc>) -> RowData {
        let scd = &self.table.scd;
        let mut row = row.clone();
        row.set(&scd.valid_from, Value::Timestamp(now));
        row.set(&scd.valid_to, Value::Null);
        row.set(&scd.is_current, Value::Boolean(true));
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TargetTable {
        TargetTable::new("dim_customer").with_business_key(&["customer_id"])
    }

    fn row(id: i64, city: &str) -> RowData {
        RowData::from_pairs(
            "customers",
            [
                ("customer_id", Value::Int(id)),
                ("city", Value::String(city.into())),
            ],
        )
    }

    fn keyed(merger: &ScdMerger, rows: Vec<RowData>) -> Vec<KeyedRow> {
        rows.into_iter()
            .enumerate()
            .map(|(i, r)| merger.prepare(i, r).unwrap())
            .collect()
    }

    fn stored(merger: &ScdMerger, id: i64, city: &str) -> ExistingRow {
        let prepared = merger.prepare(0, row(id, city)).unwrap();
        ExistingRow {
            key: prepared.key,
            hash: Some(prepared.hash),
        }
    }

    #[test]
    fn test_prepare_stamps_hash_and_key() {
        let merger = ScdMerger::new(LoadMode::Upsert, table());
        let prepared = merger.prepare(3, row(1, "Oslo")).unwrap();
        assert_eq!(prepared.row_index, 3);
        assert_eq!(prepared.key, vec![Value::Int(1)]);
        assert_eq!(
            prepared.row.get_value("row_hash"),
            Value::String(prepared.hash.clone())
        );
    }

    #[test]
    fn test_prepare_rejects_missing_or_null_keys() {
        let merger = ScdMerger::new(LoadMode::Scd2, table());
        let no_key = RowData::from_pairs("c", [("city", Value::String("x".into()))]);
        assert_eq!(
            merger.prepare(0, no_key).unwrap_err(),
            MergeError::MissingKey("customer_id".into())
        );
        let null_key = RowData::from_pairs("c", [("customer_id", Value::Null)]);
        assert_eq!(merger.prepare(0, null_key).unwrap_err().code(), "NULL_KEY");
    }

    #[test]
    fn test_upsert_inserts_new_and_overwrites_changed() {
        let merger = ScdMerger::new(LoadMode::Upsert, table());
        let existing = vec![stored(&merger, 1, "Oslo"), stored(&merger, 2, "Rome")];
        let rows = keyed(&merger, vec![row(1, "Oslo"), row(2, "Paris"), row(3, "Lima")]);

        let plan = merger.plan(rows, &existing, Utc::now());
        let classes: Vec<_> = plan.rows.iter().map(|r| r.class).collect();
        assert_eq!(
            classes,
            vec![RowClass::Unchanged, RowClass::Changed, RowClass::New]
        );
        assert!(plan.rows[0].op.is_none());
        assert!(matches!(plan.rows[1].op, Some(WriteOp::Overwrite { .. })));
        assert!(matches!(plan.rows[2].op, Some(WriteOp::Insert { .. })));
        assert_eq!(plan.write_count(), 2);
    }

    #[test]
    fn test_undeclared_hash_columns_do_not_count_as_changes() {
        let merger = ScdMerger::new(
            LoadMode::Upsert,
            table().with_hash_columns(&["customer_id"]),
        );
        let existing = vec![stored(&merger, 1, "Oslo")];
        let plan = merger.plan(keyed(&merger, vec![row(1, "Paris")]), &existing, Utc::now());
        assert_eq!(plan.rows[0].class, RowClass::Unchanged);
        assert_eq!(plan.write_count(), 0);
    }

    #[test]
    fn test_scd2_closes_and_versions_changed_keys() {
        let merger = ScdMerger::new(LoadMode::Scd2, table());
        let existing = vec![stored(&merger, 1, "Oslo")];
        let now = Utc::now();
        let plan = merger.plan(keyed(&merger, vec![row(1, "Bergen"), row(2, "Lima")]), &existing, now);

        match &plan.rows[0].op {
            Some(WriteOp::NewVersion {
                key,
                close,
                current,
                row,
            }) => {
                assert_eq!(key, &vec![FieldValue::new("customer_id", Value::Int(1))]);
                assert!(close.contains(&FieldValue::new("is_current", Value::Boolean(false))));
                assert!(close.contains(&FieldValue::new("valid_to", Value::Timestamp(now))));
                assert_eq!(current.value, Value::Boolean(true));
                assert_eq!(row.get_value("valid_from"), Value::Timestamp(now));
                assert!(row.get_value("valid_to").is_null());
                assert_eq!(row.get_value("is_current"), Value::Boolean(true));
            }
            other => panic!("expected a new version, got {other:?}"),
        }
        match &plan.rows[1].op {
            Some(WriteOp::Insert { row }) => {
                assert_eq!(row.get_value("is_current"), Value::Boolean(true));
            }
            other => panic!("expected an insert, got {other:?}"),
        }
    }

    #[test]
    fn test_repeated_key_in_batch_compares_with_earlier_row() {
        let merger = ScdMerger::new(LoadMode::Upsert, table());
        let rows = keyed(
            &merger,
            vec![row(5, "Oslo"), row(5, "Oslo"), row(5, "Rome")],
        );
        let plan = merger.plan(rows, &[], Utc::now());
        let classes: Vec<_> = plan.rows.iter().map(|r| r.class).collect();
        assert_eq!(
            classes,
            vec![RowClass::New, RowClass::Unchanged, RowClass::Changed]
        );
    }

    #[test]
    fn test_insert_mode_skips_known_keys() {
        let merger = ScdMerger::new(LoadMode::Insert, table());
        let existing = vec![stored(&merger, 1, "Oslo")];
        let plan = merger.plan(keyed(&merger, vec![row(1, "Rome"), row(2, "Lima")]), &existing, Utc::now());
        assert!(plan.rows[0].op.is_none());
        assert_eq!(plan.rows[0].class, RowClass::Changed);
        assert!(matches!(plan.rows[1].op, Some(WriteOp::Insert { .. })));
    }

    #[test]
    fn test_truncate_load_writes_every_row() {
        let merger = ScdMerger::new(LoadMode::TruncateLoad, table());
        assert!(!merger.needs_lookup());
        let plan = merger.plan(keyed(&merger, vec![row(1, "a"), row(1, "a")]), &[], Utc::now());
        assert_eq!(plan.count(RowClass::New), 2);
        assert_eq!(plan.write_count(), 2);
    }

    #[test]
    fn test_managed_columns_do_not_change_the_hash() {
        let merger = ScdMerger::new(LoadMode::Scd2, table());
        let plain = merger.prepare(0, row(1, "Oslo")).unwrap();
        let mut versioned = row(1, "Oslo");
        versioned.set("is_current", Value::Boolean(true));
        versioned.set("row_hash", Value::String("stale".into()));
        assert_eq!(merger.prepare(0, versioned).unwrap().hash, plain.hash);
    }
}
