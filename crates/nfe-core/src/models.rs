use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key under which every row carries its entity identifier.
pub const AUTORIZADOR_KEY: &str = "autorizador";

/// Key under which every row carries its availability status.
pub const STATUS_KEY: &str = "status";

/// Availability reported for one gateway, decoded from the status image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    Verde,
    Amarelo,
    Vermelho,
    Cinza,
    Desconhecido,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Verde => "verde",
            StatusCode::Amarelo => "amarelo",
            StatusCode::Vermelho => "vermelho",
            StatusCode::Cinza => "cinza",
            StatusCode::Desconhecido => "desconhecido",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StatusCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "verde" => Ok(StatusCode::Verde),
            "amarelo" => Ok(StatusCode::Amarelo),
            "vermelho" => Ok(StatusCode::Vermelho),
            "cinza" => Ok(StatusCode::Cinza),
            "desconhecido" => Ok(StatusCode::Desconhecido),
            _ => Err(format!("Unknown status code: {}", s)),
        }
    }
}

/// A single cell or metadata value inside a [`StatusRow`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(s: Option<String>) -> Self {
        s.map_or(FieldValue::Null, FieldValue::Text)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::List(v)
    }
}

impl From<StatusCode> for FieldValue {
    fn from(code: StatusCode) -> Self {
        FieldValue::Text(code.as_str().to_string())
    }
}

/// One extracted (and possibly enriched) table row.
///
/// Keys keep insertion order, so serialized rows list the page's columns
/// first and the merged metadata after them. Equality ignores order: two
/// rows are equal when they hold the same keys with equal values.
#[derive(Debug, Clone, Default)]
pub struct StatusRow {
    fields: Vec<(String, FieldValue)>,
}

impl StatusRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Text value under `key`; `None` when missing, null or a list.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    /// The row's entity identifier, if it has a non-empty one.
    pub fn autorizador(&self) -> Option<&str> {
        self.text(AUTORIZADOR_KEY).filter(|s| !s.is_empty())
    }

    pub fn status(&self) -> Option<&str> {
        self.text(STATUS_KEY)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize to the compact JSON text stored in the history table.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl PartialEq for StatusRow {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

impl Eq for StatusRow {}

impl<K, V> FromIterator<(K, V)> for StatusRow
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = StatusRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for StatusRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StatusRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = StatusRow;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object of status fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<StatusRow, A::Error> {
                let mut row = StatusRow::new();
                while let Some((k, v)) = access.next_entry::<String, FieldValue>()? {
                    row.insert(k, v);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Outcome of one extraction + enrichment cycle.
///
/// Only constructible through [`SnapshotResult::succeeded`] and
/// [`SnapshotResult::failed`], so a failed snapshot never carries rows or
/// a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotResult {
    checked_at: Option<NaiveDateTime>,
    statuses: Vec<StatusRow>,
    success: bool,
    error_message: Option<String>,
}

impl SnapshotResult {
    pub fn succeeded(checked_at: Option<NaiveDateTime>, statuses: Vec<StatusRow>) -> Self {
        Self {
            checked_at,
            statuses,
            success: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            checked_at: None,
            statuses: Vec::new(),
            success: false,
            error_message: Some(message.into()),
        }
    }

    /// Page-local observation time, as printed in the table caption.
    pub fn checked_at(&self) -> Option<NaiveDateTime> {
        self.checked_at
    }

    pub fn statuses(&self) -> &[StatusRow] {
        &self.statuses
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

/// One SCD2 version of an autorizador's row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub autorizador: String,
    pub status: StatusRow,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub is_current: bool,
}

/// Counters reported by a successful persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    /// New current versions written.
    pub inserted: usize,
    /// Previous current versions closed.
    pub closed: usize,
    /// Rows identical to their current version.
    pub unchanged: usize,
    /// Rows without an autorizador.
    pub skipped: usize,
}
