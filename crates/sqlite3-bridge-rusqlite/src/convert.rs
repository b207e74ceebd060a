//! Conversion between bridge values and rusqlite values.

use rusqlite::types::{Value as SqlValue, ValueRef};
use sqlite3_bridge::{NativeError, Row, Value};

/// Bound parameter for rusqlite.
pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
    }
}

/// Row cell read from a live cursor. Invalid UTF-8 text is replaced lossily.
pub(crate) fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Copy the current cursor row into a [`Row`] keyed by `columns`.
pub(crate) fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (index, column) in columns.iter().enumerate() {
        out.insert(column.as_str(), from_sql(row.get_ref(index)?));
    }
    Ok(out)
}

/// SQLite's own message, e.g. `no such table: t`.
pub(crate) fn native_error(err: &rusqlite::Error) -> NativeError {
    NativeError::new(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_blob_to_sql() {
        assert_eq!(to_sql(&Value::from("abc")), SqlValue::Text("abc".to_string()));
        assert_eq!(to_sql(&Value::from(vec![1_u8, 2])), SqlValue::Blob(vec![1, 2]));
        assert_eq!(to_sql(&Value::Null), SqlValue::Null);
    }

    #[test]
    fn test_from_sql_lossy_text() {
        let value = from_sql(ValueRef::Text(&[0x66, 0x6f, 0xff]));
        assert_eq!(value.as_text(), Some("fo\u{fffd}"));
        assert_eq!(from_sql(ValueRef::Integer(7)), Value::Integer(7));
    }
}
