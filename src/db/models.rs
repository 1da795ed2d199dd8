use std::fmt;

use serde::Serialize;

/// An album row read from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Album {
    pub album_id: i64,
    pub artist_id: i64,
    pub title: String,
    pub release_year: i32,
    /// Snapshot of the artist's name taken from the join at query time.
    /// For display only; it is not kept in sync with the artist entity.
    pub artist_name: String,
}

/// One cell of a report row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReportValue {
    Text(String),
    Integer(i32),
    Long(i64),
}

impl ReportValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value, widening `Integer` to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(i64::from(*n)),
            Self::Long(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for ReportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Long(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for ReportValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ReportValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i32> for ReportValue {
    fn from(n: i32) -> Self {
        Self::Integer(n)
    }
}

impl From<i64> for ReportValue {
    fn from(n: i64) -> Self {
        Self::Long(n)
    }
}

/// One row of tabular report output whose columns vary by report.
/// Columns keep the order in which they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportResult {
    columns: Vec<(String, ReportValue)>,
}

impl ReportResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(&mut self, name: impl Into<String>, value: impl Into<ReportValue>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Builder form of [`add_column`](Self::add_column).
    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<ReportValue>) -> Self {
        self.add_column(name, value);
        self
    }

    /// First column with this name.
    pub fn get(&self, name: &str) -> Option<&ReportValue> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, value)| value)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ReportValue::as_text)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ReportValue::as_i64)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &ReportValue> {
        self.columns.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReportValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// Serialized as a JSON object; serde_json's map keeps insertion order only
// with `preserve_order`, so emit entries directly instead.
impl Serialize for ReportResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
