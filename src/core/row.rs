//! Row store model - one contact/company record flowing through the pipeline

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

/// Field names consulted for the composite key when a row has no `id`
const NAME_FIELDS: [&str; 2] = ["name", "full_name"];
const POSITION_FIELDS: [&str; 3] = ["title", "position", "job_title"];

/// Stable identity of a row, computed once at ingestion
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(String);

impl RowKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a key from raw fields: `id` first, then name+position, then ordinal
    pub fn derive(fields: &Map<String, Value>, ordinal: usize) -> Self {
        if let Some(id) = fields.get("id").and_then(scalar_text) {
            if !id.is_empty() {
                return RowKey(format!("id:{}", id));
            }
        }

        let name = NAME_FIELDS
            .iter()
            .find_map(|f| fields.get(*f).and_then(scalar_text).filter(|s| !s.is_empty()))
            .or_else(|| {
                let first = fields.get("first_name").and_then(scalar_text).unwrap_or_default();
                let last = fields.get("last_name").and_then(scalar_text).unwrap_or_default();
                let joined = format!("{} {}", first, last);
                let joined = joined.trim();
                (!joined.is_empty()).then(|| joined.to_string())
            });
        let position = POSITION_FIELDS
            .iter()
            .find_map(|f| fields.get(*f).and_then(scalar_text).filter(|s| !s.is_empty()));

        match (name, position) {
            (None, None) => RowKey(format!("row:{}", ordinal)),
            (name, position) => RowKey(format!(
                "np:{}|{}",
                normalize(name.as_deref().unwrap_or("")),
                normalize(position.as_deref().unwrap_or(""))
            )),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey(s.to_string())
    }
}

fn normalize(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let ws = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    ws.replace_all(text.trim(), " ").to_lowercase()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A `null` tag from a service means untagged
fn tag_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single contact/company record
///
/// Rows are never removed from a run. A non-empty `relevance_tag` excludes
/// the row from every later step while keeping it in the export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(rename = "_rowKey")]
    key: RowKey,

    #[serde(rename = "relevanceTag", default, deserialize_with = "tag_or_empty")]
    relevance_tag: String,

    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Row {
    /// Build a row from ingested fields. A `relevanceTag` column, if present,
    /// is lifted out of the fields; otherwise the tag starts empty.
    pub fn ingest(mut fields: Map<String, Value>, ordinal: usize) -> Self {
        fields.remove("_rowKey");
        let relevance_tag = match fields.remove("relevanceTag") {
            Some(Value::String(tag)) => tag,
            _ => String::new(),
        };
        let key = RowKey::derive(&fields, ordinal);
        Self {
            key,
            relevance_tag,
            fields,
        }
    }

    /// Build a row with an explicit key (used by services that rebuild rows)
    pub fn with_key(key: RowKey, fields: Map<String, Value>) -> Self {
        Self {
            key,
            relevance_tag: String::new(),
            fields,
        }
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    pub fn relevance_tag(&self) -> &str {
        &self.relevance_tag
    }

    /// Whether this row is still eligible for step processing
    pub fn is_eligible(&self) -> bool {
        self.relevance_tag.is_empty()
    }

    pub fn set_relevance_tag(&mut self, tag: impl Into<String>) {
        self.relevance_tag = tag.into();
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Resolve a possibly dotted path (`company.headcount`) into nested data.
    ///
    /// A top-level field whose name literally contains the dots wins over
    /// traversal. `null` counts as missing.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.fields.get(path) {
            return (!value.is_null()).then_some(value);
        }

        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                _ => return None,
            };
        }
        (!current.is_null()).then_some(current)
    }
}

/// Build rows from a list of JSON objects, skipping non-object entries
pub fn ingest_rows(values: Vec<Value>) -> Vec<Row> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .enumerate()
        .map(|(ordinal, map)| Row::ingest(map, ordinal))
        .collect()
}
