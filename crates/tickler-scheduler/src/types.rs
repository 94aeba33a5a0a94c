use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SchedulerError;

/// A persisted job record.
///
/// Records are immutable once stored: a job is either claimed (and removed)
/// when it fires, or cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// UUID v7, assigned at submission.
    pub id: Uuid,
    /// Name of the handler that processes this job.
    pub name: String,
    /// Due date, millisecond precision.
    pub date: DateTime<Utc>,
    /// Opaque payload forwarded verbatim to the handler.
    pub data: Value,
    /// Marks the single stored occurrence of a recurring job.
    #[serde(default)]
    pub recurrent: bool,
}

impl Job {
    /// Build a one-shot job. The date is truncated to whole milliseconds.
    pub fn new(name: impl Into<String>, date: DateTime<Utc>, data: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            date: truncate_to_millis(date),
            data,
            recurrent: false,
        }
    }

    /// Build the stored occurrence of a recurring job.
    pub fn recurring(name: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            recurrent: true,
            ..Self::new(name, date, Value::Null)
        }
    }
}

/// Drop sub-millisecond precision so stored dates compare exactly with the
/// values a store hands back.
pub fn truncate_to_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = date.nanosecond() / 1_000_000 * 1_000_000;
    date.with_nanosecond(nanos).unwrap_or(date)
}

/// A due date as supplied by a caller, validated on submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DueDate {
    At(DateTime<Utc>),
    /// Milliseconds since the Unix epoch.
    Millis(i64),
    /// RFC 3339 timestamp, or epoch milliseconds written as digits.
    Text(String),
}

impl DueDate {
    /// Resolve to an instant, or fail with [`SchedulerError::InvalidDate`].
    pub fn resolve(&self) -> Result<DateTime<Utc>, SchedulerError> {
        let resolved = match self {
            DueDate::At(at) => Some(*at),
            DueDate::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            DueDate::Text(text) => parse_text(text.trim()),
        };
        resolved
            .map(truncate_to_millis)
            .ok_or_else(|| SchedulerError::InvalidDate {
                input: self.to_string(),
            })
    }
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    text.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

impl std::fmt::Display for DueDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DueDate::At(at) => write!(f, "{}", at.to_rfc3339()),
            DueDate::Millis(ms) => write!(f, "{ms}"),
            DueDate::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<DateTime<Utc>> for DueDate {
    fn from(at: DateTime<Utc>) -> Self {
        DueDate::At(at)
    }
}

impl From<i64> for DueDate {
    fn from(ms: i64) -> Self {
        DueDate::Millis(ms)
    }
}

impl From<&str> for DueDate {
    fn from(text: &str) -> Self {
        DueDate::Text(text.to_string())
    }
}

impl From<String> for DueDate {
    fn from(text: String) -> Self {
        DueDate::Text(text)
    }
}

/// A job submission before validation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub date: DueDate,
    pub data: Value,
}

impl NewJob {
    pub fn new(name: impl Into<String>, date: impl Into<DueDate>, data: Value) -> Self {
        Self {
            name: name.into(),
            date: date.into(),
            data,
        }
    }

    /// Validate the due date and produce the record to persist.
    pub fn into_job(self) -> Result<Job, SchedulerError> {
        let date = self.date.resolve()?;
        Ok(Job::new(self.name, date, self.data))
    }
}

/// Field-match predicate used by cancellation and lookup.
///
/// `data` is matched by flattening it into paths: every leaf of the filter
/// must equal the value at the same path inside the job payload. A filter
/// `data` that is not an object must equal the whole payload.
///
/// Nested objects are matched partially at every depth: `{"user": {"id": 1}}`
/// matches a payload `{"user": {"id": 1, "name": "a"}}`. Document stores that
/// flatten only the top level treat a nested object as an exact subdocument
/// instead, so filters ported from such a store may match more jobs here. An
/// empty object nested inside the filter still has to match exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JobFilter {
    /// Matches every job.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_recurrent(mut self, recurrent: bool) -> Self {
        self.recurrent = Some(recurrent);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        if self.name.as_ref().is_some_and(|name| *name != job.name) {
            return false;
        }
        if self.recurrent.is_some_and(|recurrent| recurrent != job.recurrent) {
            return false;
        }
        match &self.data {
            None => true,
            Some(pattern) => data_matches(pattern, &job.data),
        }
    }
}

fn data_matches(pattern: &Value, data: &Value) -> bool {
    if !pattern.is_object() {
        return pattern == data;
    }
    let mut leaves = Vec::new();
    flatten(pattern, &mut Vec::new(), &mut leaves);
    leaves
        .into_iter()
        .all(|(path, expected)| lookup(data, &path) == Some(expected))
}

fn flatten<'a>(value: &'a Value, path: &mut Vec<&'a str>, out: &mut Vec<(Vec<&'a str>, &'a Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                path.push(key);
                flatten(child, path, out);
                path.pop();
            }
        }
        // `{}` at the top means "no constraint"; nested, it is a literal.
        Value::Object(_) if path.is_empty() => {}
        leaf => out.push((path.clone(), leaf)),
    }
}

fn lookup<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(data, |current, key| match current {
        Value::Object(map) => map.get(*key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
