//! Table extraction
//!
//! The schema types live here; each submodule covers one step of turning
//! table rows into typed records.

mod coerce;
mod driver;
mod extractor;
mod html_page;

pub use coerce::{clean_text, parse_date, parse_float, parse_integer, strip_numeric};
pub use driver::*;
pub use extractor::*;
pub use html_page::*;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ExtractError;

/// Name of the implicit timestamp field carried by every record
pub const QUERY_DATE: &str = "query_date";

/// Semantic type of a column, with its type-specific configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    /// Parsed with a chrono `strftime` format such as `%Y-%m-%d`
    Date { format: String },
    /// Read from an attribute of the cell (or its first descendant carrying it)
    Link {
        #[serde(default = "default_link_attr")]
        attr: String,
    },
}

fn default_link_attr() -> String {
    "href".to_string()
}

/// One logical column of the schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Key of this column in every emitted record
    pub name: String,
    #[serde(flatten)]
    pub kind: ColumnType,
    /// When false an empty cell aborts the run instead of becoming NULL
    #[serde(default = "default_optional")]
    pub optional: bool,
}

fn default_optional() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Float)
    }

    pub fn date(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self::new(
            name,
            ColumnType::Date {
                format: format.into(),
            },
        )
    }

    pub fn link(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ColumnType::Link {
                attr: default_link_attr(),
            },
        )
    }

    /// Mark the column as required: an empty cell becomes a fatal error
    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }
}

/// A coerced cell value. `Null` is the NULL sentinel, not a missing key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Extraction wall-clock time, only used for `query_date`
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::DateTime(dt) => Some(dt.date()),
            Value::Timestamp(ts) => Some(ts.date_naive()),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// One output row: every schema column in order, plus `query_date`
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<(String, Value)>,
    query_date: Value,
}

impl Record {
    pub(crate) fn new(values: Vec<(String, Value)>, query_date: DateTime<Utc>) -> Self {
        Self {
            values,
            query_date: Value::Timestamp(query_date),
        }
    }

    /// Value of a column; `query_date` resolves to a `Value::Timestamp`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .or_else(|| (name == QUERY_DATE).then_some(&self.query_date))
    }

    pub fn query_date(&self) -> DateTime<Utc> {
        self.query_date.as_timestamp().unwrap_or_default()
    }

    /// All fields in order, `query_date` last
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value))
            .chain(std::iter::once((QUERY_DATE, &self.query_date)))
    }

    /// All keys, `query_date` last
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values().map(|(key, _)| key)
    }

    /// Number of keys including `query_date`
    pub fn len(&self) -> usize {
        self.values.len() + 1
    }

    /// Always false: `query_date` is present in every record
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.values() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Physical rows to read: `start` is 1-based inclusive, `end` exclusive.
/// `end: None` reads until the row source is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl Default for RowRange {
    fn default() -> Self {
        Self {
            start: 1,
            end: None,
        }
    }
}

impl RowRange {
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self {
            start: start.max(1),
            end,
        }
    }

    /// Build from signed bounds where a negative `end` means "no bound"
    pub fn from_bounds(start: i64, end: i64) -> Self {
        let start = usize::try_from(start).unwrap_or(1);
        let end = usize::try_from(end).ok();
        Self::new(start, end)
    }

    pub(crate) fn reached_end(&self, position: usize) -> bool {
        matches!(self.end, Some(end) if position >= end)
    }
}

/// What to do when a row runs out of cells before the schema does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortRowPolicy {
    /// A missing cell marks the end of the table; the partial row is dropped
    #[default]
    EndOfTable,
    /// Fill the remaining columns with NULL and keep reading.
    /// A row without even a first cell still ends the table.
    PadNull,
}

/// Rows that label the data rows below them, e.g. a company name spanning
/// the whole table above that company's filings.
///
/// A row is a header when its first cell spans at least `min_span` slots and
/// has text. Header rows are not emitted; their text fills the `name` column
/// of every following record until the next header (NULL before the first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupHeader {
    pub name: String,
    pub min_span: usize,
}

impl GroupHeader {
    pub fn new(name: impl Into<String>, min_span: usize) -> Self {
        Self {
            name: name.into(),
            min_span,
        }
    }
}

/// Keep only records whose `column` text contains `contains`, ignoring case.
/// Records where the column is NULL or not text are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub contains: String,
}

impl RowFilter {
    pub fn new(column: impl Into<String>, contains: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            contains: contains.into(),
        }
    }

    pub(crate) fn matches(&self, record: &Record) -> bool {
        record
            .get(&self.column)
            .and_then(Value::as_str)
            .is_some_and(|text| text.to_lowercase().contains(&self.contains.to_lowercase()))
    }
}

/// JSON-configurable extraction request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRequest {
    /// Selector matching every row of the table, e.g. `tbody > tr`
    pub rows: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default = "default_start_row")]
    pub start_row: usize,
    /// Exclusive bound; absent or negative reads until exhaustion
    #[serde(default, deserialize_with = "deserialize_end_row")]
    pub end_row: Option<usize>,
    #[serde(default)]
    pub short_rows: ShortRowPolicy,
    #[serde(default)]
    pub group_header: Option<GroupHeader>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

fn default_start_row() -> usize {
    1
}

fn deserialize_end_row<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    let raw: Option<i64> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|n| usize::try_from(n).ok()))
}

impl TableRequest {
    pub fn from_json(json: &str) -> Result<Self, ExtractError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn range(&self) -> RowRange {
        RowRange::new(self.start_row, self.end_row)
    }

    /// Run the request against a page and collect every record
    pub fn run<D: PageDriver + ?Sized>(&self, driver: &D) -> Result<Vec<Record>, ExtractError> {
        let mut extractor = TableExtractor::new(driver, self.rows.as_str())
            .rows(self.range())
            .short_rows(self.short_rows);
        if let Some(header) = &self.group_header {
            extractor = extractor.group_header(header.clone());
        }
        if let Some(filter) = &self.filter {
            extractor = extractor.filter(filter.clone());
        }
        extractor.extract_all(&self.columns)
    }
}
