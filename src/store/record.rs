use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::{FreshetError, Result};

/// The persisted form of any model: an opaque JSON object.
///
/// `id`, `created` and `modified` are owned by the store; everything else is
/// whatever the model serializes to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_model<T: Serialize>(model: &T) -> Result<Self> {
        match serde_json::to_value(model)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(FreshetError::Other(format!(
                "record must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn into_model<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.0))?)
    }

    pub fn id(&self) -> Option<&str> {
        self.0
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn created(&self) -> Option<i64> {
        self.0.get("created").and_then(Value::as_i64)
    }

    pub fn modified(&self) -> Option<i64> {
        self.0.get("modified").and_then(Value::as_i64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// Builder-style [`set`](Self::set), handy for ad-hoc records.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub(crate) fn stamp(&mut self, id: &str, now: i64, created: bool) {
        self.set("id", id);
        if created && self.created().is_none() {
            self.set("created", now);
        }
        self.set("modified", now);
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Sorting and truncation applied by [`Store::list`](super::Store::list).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// `"field"` sorts ascending, `"-field"` descending. Defaults to `created`.
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Parse the textual form, e.g. `"orderBy:-published, limit:2"`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut options = Self::default();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part
                .split_once(':')
                .ok_or_else(|| FreshetError::Other(format!("Invalid list option: {}", part)))?;

            match name.trim() {
                "orderBy" => options.order_by = Some(value.trim().to_string()),
                "limit" => {
                    let limit = value
                        .trim()
                        .parse()
                        .map_err(|_| FreshetError::Other(format!("Invalid limit: {}", value)))?;
                    options.limit = Some(limit);
                }
                other => {
                    return Err(FreshetError::Other(format!("Unknown list option: {}", other)));
                }
            }
        }

        Ok(options)
    }

    pub(crate) fn sort_key(&self) -> (&str, bool) {
        match self.order_by.as_deref() {
            Some(field) => match field.strip_prefix('-') {
                Some(field) => (field, true),
                None => (field, false),
            },
            None => ("created", false),
        }
    }
}

/// Result of a dedup-aware bulk insert.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Records that were newly stored.
    pub successes: Vec<Record>,
    /// Records whose key already existed; the stored copy was left untouched.
    pub failures: Vec<Record>,
}

/// Total order over JSON values used for sorting listings:
/// missing/null < bool < number < string < array < object.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x
                    .as_f64()
                    .partial_cmp(&y.as_f64())
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
