use std::borrow::Cow;

use async_trait::async_trait;
use serde::Serialize;

use crate::detect::BackendKind;
use crate::error::{Result, SeekDbError};
use crate::version::Version;

/// Connection lifecycle shared by every backend.
///
/// Construction never touches the transport; the first `connect` (or any call
/// that needs it, such as `execute`) establishes it. `connect` is idempotent.
#[async_trait]
pub trait BaseConnection: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Current liveness, without side effects.
    fn is_connected(&self) -> bool;

    /// Run a raw statement, connecting first if needed.
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;

    async fn close(&self) -> Result<()>;

    /// Backend identity, computed at most once per established connection.
    async fn detect_db_type_and_version(&self) -> Result<(BackendKind, Version)>;

    /// Short mode label ("embedded", "server", "oceanbase") for logs and descriptions.
    fn mode(&self) -> &'static str;
}

/// One column value, independent of the driver that produced it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Text view; binary values are decoded as UTF-8 (lossy), numbers are rendered.
    pub fn as_str(&self) -> Option<Cow<'_, str>> {
        match self {
            Cell::Null => None,
            Cell::Text(s) => Some(Cow::Borrowed(s)),
            Cell::Bytes(b) => Some(String::from_utf8_lossy(b)),
            Cell::Int(i) => Some(Cow::Owned(i.to_string())),
            Cell::Float(f) => Some(Cow::Owned(f.to_string())),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            // only whole floats inside the i64 range convert
            Cell::Float(f) => (f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .then_some(*f as i64),
            Cell::Text(_) | Cell::Bytes(_) => self.as_str()?.trim().parse().ok(),
            Cell::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(_) | Cell::Bytes(_) => self.as_str()?.trim().parse().ok(),
            Cell::Null => None,
        }
    }
}

/// Owned result row: ordered `(column, value)` pairs.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Row {
    columns: Vec<(String, Cell)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Cell)>) -> Self {
        Self { columns }
    }

    pub fn push(&mut self, column: impl Into<String>, cell: Cell) {
        self.columns.push((column.into(), cell));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Case-insensitive column lookup; the first match wins.
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, cell)| cell)
    }

    pub fn get_index(&self, index: usize) -> Option<&Cell> {
        self.columns.get(index).map(|(_, cell)| cell)
    }

    pub fn get_string(&self, column: &str) -> Option<String> {
        self.get(column)?.as_str().map(Cow::into_owned)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column)?.as_i64()
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column)?.as_f64()
    }

    /// Like [`Row::get_i64`], but a missing or non-integer value is a `Format` error.
    pub fn require_i64(&self, column: &str) -> Result<i64> {
        self.get_i64(column)
            .ok_or_else(|| SeekDbError::Format(format!("column `{column}` is missing or not an integer")))
    }

    pub fn require_f64(&self, column: &str) -> Result<f64> {
        self.get_f64(column)
            .ok_or_else(|| SeekDbError::Format(format!("column `{column}` is missing or not a number")))
    }

    pub fn get_string_by_index(&self, index: usize) -> Option<String> {
        self.get_index(index)?.as_str().map(Cow::into_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_convert_between_cells() {
        let row = Row::new(vec![
            ("_id".into(), Cell::Bytes(b"doc-1".to_vec())),
            ("cnt".into(), Cell::Text(" 42 ".into())),
            ("dist".into(), Cell::Float(0.25)),
            ("meta".into(), Cell::Null),
        ]);
        assert_eq!(row.get_string("_ID").as_deref(), Some("doc-1"));
        assert_eq!(row.get_i64("cnt"), Some(42));
        assert_eq!(row.get_f64("dist"), Some(0.25));
        assert_eq!(row.get_string("meta"), None);
        assert_eq!(row.get_string("missing"), None);
        assert_eq!(row.get_string_by_index(2).as_deref(), Some("0.25"));
        assert_eq!(row.column_names().collect::<Vec<_>>(), ["_id", "cnt", "dist", "meta"]);
    }

    #[test]
    fn integer_reads_never_truncate() {
        assert_eq!(Cell::Float(3.0).as_i64(), Some(3));
        assert_eq!(Cell::Float(2.5).as_i64(), None);
        assert_eq!(Cell::Float(1e30).as_i64(), None);
        assert_eq!(Cell::Float(f64::NAN).as_i64(), None);
        assert_eq!(Cell::Text(u64::MAX.to_string()).as_i64(), None);

        let row = Row::new(vec![("cnt".into(), Cell::Float(0.5))]);
        assert!(matches!(row.require_i64("cnt"), Err(SeekDbError::Format(_))));
        assert!(matches!(row.require_f64("missing"), Err(SeekDbError::Format(_))));
        assert_eq!(row.require_f64("cnt").unwrap(), 0.5);
    }
}
