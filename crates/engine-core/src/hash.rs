//! Content digests used to tell whether a target row needs rewriting.
//!
//! Every business column is rendered to a canonical string, escaped, and the
//! fields are joined with `|` in a fixed column order before hashing with
//! MD5. Escaping makes the joined text unambiguous: `\` and `|` inside a
//! field are backslash-escaped, and NULL is the bare token `\N`, which no
//! escaped field can produce.

use model::{core::value::Value, execution::target::TargetTable, records::row::RowData};
use rust_decimal::Decimal;
use std::fmt::Write;

pub const NULL_TOKEN: &str = "\\N";
pub const DELIMITER: char = '|';

/// Floats with an integral value below this magnitude render as integers.
const INTEGRAL_FLOAT_LIMIT: f64 = 1e15;

#[derive(Debug, Clone, Default)]
pub struct ChangeHashEngine {
    excluded: Vec<String>,
    column_order: Option<Vec<String>>,
}

impl ChangeHashEngine {
    pub fn new(excluded: &[String]) -> Self {
        ChangeHashEngine {
            excluded: excluded.iter().map(|c| c.to_lowercase()).collect(),
            column_order: None,
        }
    }

    /// Excludes the table's hash, surrogate, audit and SCD columns and
    /// follows the table's declared hash column order, if any.
    pub fn for_table(table: &TargetTable) -> Self {
        let engine = Self::new(&table.hash_excluded_columns());
        match &table.hash_columns {
            Some(columns) => engine.with_column_order(columns.clone()),
            None => engine,
        }
    }

    /// Hashes columns in exactly this order. Without an explicit order the
    /// row's columns are taken sorted by lowercase name.
    pub fn with_column_order(mut self, columns: Vec<String>) -> Self {
        self.column_order = Some(columns);
        self
    }

    pub fn is_excluded(&self, column: &str) -> bool {
        let column = column.to_lowercase();
        self.excluded.iter().any(|c| *c == column)
    }

    /// The columns that take part in the digest, in canonical order.
    pub fn hash_columns(&self, row: &RowData) -> Vec<String> {
        match &self.column_order {
            Some(order) => order
                .iter()
                .filter(|c| !self.is_excluded(c))
                .cloned()
                .collect(),
            None => {
                let mut columns: Vec<String> = row
                    .field_values
                    .iter()
                    .map(|f| f.name.to_lowercase())
                    .filter(|c| !self.is_excluded(c))
                    .collect();
                columns.sort();
                columns.dedup();
                columns
            }
        }
    }

    /// The pre-digest text; exposed for diagnostics.
    pub fn canonical_text(&self, row: &RowData) -> String {
        let fields: Vec<Value> = self
            .hash_columns(row)
            .iter()
            .map(|column| row.get_value(column))
            .collect();
        join_canonical(&fields)
    }

    /// 32 lowercase hex characters.
    pub fn hash(&self, row: &RowData) -> String {
        format!("{:x}", md5::compute(self.canonical_text(row).as_bytes()))
    }
}

/// Stable text form of a business key, used to match source rows against
/// target rows regardless of the driver types on each side.
pub fn canonical_key(values: &[Value]) -> String {
    join_canonical(values)
}

fn join_canonical(values: &[Value]) -> String {
    let mut out = String::new();
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            out.push(DELIMITER);
        }
        match canonical_value(value) {
            None => out.push_str(NULL_TOKEN),
            Some(text) => escape_into(&mut out, &text),
        }
    }
    out
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        if ch == '\\' || ch == DELIMITER {
            out.push('\\');
        }
        out.push(ch);
    }
}

fn canonical_float(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v.fract() == 0.0 && v.abs() < INTEGRAL_FLOAT_LIMIT {
        return format!("{}", v as i64);
    }
    format!("{v}")
}

fn canonical_decimal(v: &Decimal) -> String {
    let normalized = v.normalize();
    if normalized.is_zero() {
        return "0".to_string();
    }
    normalized.to_string()
}

/// `None` for NULL.
pub fn canonical_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::Int(v) => v.to_string(),
        Value::Uint(v) => v.to_string(),
        Value::Float(v) => canonical_float(*v),
        Value::Decimal(v) => canonical_decimal(v),
        Value::String(v) => v.clone(),
        Value::Boolean(v) => v.to_string(),
        Value::Json(v) => v.to_string(),
        Value::Uuid(v) => v.hyphenated().to_string(),
        Value::Bytes(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for b in bytes {
                let _ = write!(hex, "{b:02x}");
            }
            hex
        }
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Timestamp(ts) => ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        Value::TimestampNaive(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::str::FromStr;

    fn row(pairs: Vec<(&str, Value)>) -> RowData {
        RowData::from_pairs("t", pairs)
    }

    #[test]
    fn test_digest_is_32_hex_chars() {
        let engine = ChangeHashEngine::default();
        let digest = engine.hash(&row(vec![("id", Value::Int(1))]));
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_independent_of_source_column_order() {
        let engine = ChangeHashEngine::default();
        let a = row(vec![
            ("name", Value::String("Ada".into())),
            ("id", Value::Int(1)),
            ("city", Value::Null),
        ]);
        let b = row(vec![
            ("id", Value::Int(1)),
            ("city", Value::Null),
            ("NAME", Value::String("Ada".into())),
        ]);
        assert_eq!(engine.hash(&a), engine.hash(&b));
    }

    #[test]
    fn test_explicit_order_is_used_as_given() {
        let r = row(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let ab = ChangeHashEngine::default().with_column_order(vec!["a".into(), "b".into()]);
        let ba = ChangeHashEngine::default().with_column_order(vec!["b".into(), "a".into()]);
        assert_eq!(ab.canonical_text(&r), "1|2");
        assert_eq!(ba.canonical_text(&r), "2|1");
    }

    #[test]
    fn test_excluded_columns_do_not_change_digest() {
        let table = TargetTable::new("dim")
            .with_surrogate_key("sk")
            .with_audit_columns(&["loaded_at"]);
        let engine = ChangeHashEngine::for_table(&table);
        let a = row(vec![("id", Value::Int(1)), ("sk", Value::Int(10))]);
        let b = row(vec![
            ("id", Value::Int(1)),
            ("sk", Value::Int(99)),
            ("loaded_at", Value::String("now".into())),
            ("row_hash", Value::String("stale".into())),
            ("is_current", Value::Boolean(true)),
        ]);
        assert_eq!(engine.hash(&a), engine.hash(&b));
    }

    #[test]
    fn test_table_declared_order_drives_canonical_text() {
        let r = row(vec![
            ("amount", Value::Int(5)),
            ("account", Value::String("acc-1".into())),
            ("note", Value::String("ignored".into())),
        ]);
        let by_name = ChangeHashEngine::for_table(&TargetTable::new("fact"));
        let table = TargetTable::new("fact").with_hash_columns(&["amount", "account"]);
        let declared = ChangeHashEngine::for_table(&table);

        assert_eq!(by_name.canonical_text(&r), "acc-1|5|ignored");
        assert_eq!(declared.canonical_text(&r), "5|acc-1");
        assert_ne!(by_name.hash(&r), declared.hash(&r));
    }

    #[test]
    fn test_null_differs_from_literal_marker_text() {
        let engine = ChangeHashEngine::default();
        let null = row(vec![("a", Value::Null)]);
        let text = row(vec![("a", Value::String("\\N".into()))]);
        assert_eq!(engine.canonical_text(&text), "\\\\N");
        assert_ne!(engine.hash(&null), engine.hash(&text));
    }

    #[test]
    fn test_delimiter_inside_values_cannot_collide() {
        let engine = ChangeHashEngine::default();
        let a = row(vec![("a", Value::String("x|y".into())), ("b", Value::String("z".into()))]);
        let b = row(vec![("a", Value::String("x".into())), ("b", Value::String("y|z".into()))]);
        assert_ne!(engine.hash(&a), engine.hash(&b));
    }

    #[test]
    fn test_numbers_render_without_type_noise() {
        assert_eq!(canonical_value(&Value::Float(12.0)).as_deref(), Some("12"));
        assert_eq!(canonical_value(&Value::Float(0.5)).as_deref(), Some("0.5"));
        let dec = Decimal::from_str("12.500").unwrap();
        assert_eq!(canonical_value(&Value::Decimal(dec)).as_deref(), Some("12.5"));
        let whole = Decimal::from_str("12.00").unwrap();
        assert_eq!(canonical_value(&Value::Decimal(whole)).as_deref(), Some("12"));
    }

    #[test]
    fn test_timestamps_are_utc_microseconds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(
            canonical_value(&Value::Timestamp(ts)).as_deref(),
            Some("2024-03-01T08:30:00.000000")
        );
        let naive = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            canonical_value(&Value::Timestamp(ts)),
            canonical_value(&Value::TimestampNaive(naive))
        );
    }

    #[test]
    fn test_canonical_key_matches_across_driver_types() {
        assert_eq!(
            canonical_key(&[Value::Int(7), Value::String("EU".into())]),
            canonical_key(&[Value::Uint(7), Value::String("EU".into())])
        );
    }
}
