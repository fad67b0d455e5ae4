//! Conversion of `tokio_postgres` rows into engine records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use model::{
    core::value::Value,
    records::row::{FieldValue, RowData},
};
use rust_decimal::Decimal;
use tokio_postgres::{
    Row as PgRow,
    types::{FromSql, Json as PgJson, Type},
};
use tracing::warn;
use uuid::Uuid;

fn get<'a, T, F>(row: &'a PgRow, idx: usize, wrap: F) -> Value
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(value)) => wrap(value),
        Ok(None) => Value::Null,
        Err(err) => {
            let column = row.columns()[idx].name();
            warn!(column, %err, "Could not decode Postgres value; using NULL");
            Value::Null
        }
    }
}

pub fn column_value(row: &PgRow, idx: usize) -> Value {
    let ty = row.columns()[idx].type_().clone();
    match ty {
        Type::BOOL => get(row, idx, Value::Boolean),
        Type::INT2 => get(row, idx, |v: i16| Value::Int(v as i64)),
        Type::INT4 => get(row, idx, |v: i32| Value::Int(v as i64)),
        Type::INT8 => get(row, idx, Value::Int),
        Type::OID => get(row, idx, |v: u32| Value::Uint(v as u64)),
        Type::FLOAT4 => get(row, idx, |v: f32| Value::Float(v as f64)),
        Type::FLOAT8 => get(row, idx, Value::Float),
        Type::NUMERIC => get(row, idx, |v: Decimal| Value::Decimal(v)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get(row, idx, Value::String)
        }
        Type::JSON | Type::JSONB => {
            get(row, idx, |v: PgJson<serde_json::Value>| Value::Json(v.0))
        }
        Type::UUID => get(row, idx, |v: Uuid| Value::Uuid(v)),
        Type::BYTEA => get(row, idx, Value::Bytes),
        Type::DATE => get(row, idx, |v: NaiveDate| Value::Date(v)),
        Type::TIMESTAMP => get(row, idx, |v: NaiveDateTime| Value::TimestampNaive(v)),
        Type::TIMESTAMPTZ => get(row, idx, |v: DateTime<Utc>| Value::Timestamp(v)),
        other => {
            warn!(column = row.columns()[idx].name(), pg_type = %other, "Unsupported Postgres type; using NULL");
            Value::Null
        }
    }
}

pub fn to_row_data(entity: &str, row: &PgRow) -> RowData {
    let fields = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| FieldValue::new(column.name(), column_value(row, idx)))
        .collect();
    RowData::new(entity, fields)
}
