use connectors::target::ExistingRow;
use engine_core::hash::canonical_key;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowClass {
    /// No target row carries the business key.
    New,
    /// The key exists with a different digest.
    Changed,
    /// The key exists with the same digest; nothing is written.
    Unchanged,
}

/// Stored digests of target rows, keyed by canonical business key.
#[derive(Debug, Default)]
pub struct DigestIndex {
    digests: HashMap<String, Option<String>>,
}

impl DigestIndex {
    pub fn from_existing(rows: &[ExistingRow]) -> Self {
        let digests = rows
            .iter()
            .map(|row| (canonical_key(&row.key), row.hash.clone()))
            .collect();
        DigestIndex { digests }
    }

    /// A stored NULL digest always counts as changed.
    pub fn classify(&self, key: &str, hash: &str) -> RowClass {
        match self.digests.get(key) {
            None => RowClass::New,
            Some(Some(stored)) if stored.eq_ignore_ascii_case(hash) => RowClass::Unchanged,
            Some(_) => RowClass::Changed,
        }
    }

    /// Makes a row written earlier in the chunk the version later rows with
    /// the same key are compared against.
    pub fn record(&mut self, key: String, hash: String) {
        self.digests.insert(key, Some(hash));
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::core::value::Value;

    fn existing(id: i64, hash: Option<&str>) -> ExistingRow {
        ExistingRow {
            key: vec![Value::Int(id)],
            hash: hash.map(str::to_string),
        }
    }

    #[test]
    fn test_classifies_against_stored_digest() {
        let index = DigestIndex::from_existing(&[existing(1, Some("ABC")), existing(2, None)]);
        let one = canonical_key(&[Value::Int(1)]);
        let two = canonical_key(&[Value::Int(2)]);
        let three = canonical_key(&[Value::Int(3)]);

        assert_eq!(index.classify(&one, "abc"), RowClass::Unchanged);
        assert_eq!(index.classify(&one, "def"), RowClass::Changed);
        assert_eq!(index.classify(&two, "abc"), RowClass::Changed);
        assert_eq!(index.classify(&three, "abc"), RowClass::New);
    }

    #[test]
    fn test_keys_match_across_driver_types() {
        let index = DigestIndex::from_existing(&[existing(7, Some("h"))]);
        assert_eq!(index.classify(&canonical_key(&[Value::Uint(7)]), "h"), RowClass::Unchanged);
        assert_eq!(index.classify(&canonical_key(&[Value::String("7".into())]), "h"), RowClass::Unchanged);
    }

    #[test]
    fn test_recorded_rows_shadow_the_target() {
        let mut index = DigestIndex::default();
        let key = canonical_key(&[Value::Int(9)]);
        assert_eq!(index.classify(&key, "a"), RowClass::New);
        index.record(key.clone(), "a".into());
        assert_eq!(index.classify(&key, "a"), RowClass::Unchanged);
        assert_eq!(index.classify(&key, "b"), RowClass::Changed);
    }
}
