//! Replication-key bookmarking.
//!
//! [`BookmarkTracker`] watches every emitted record, remembers the greatest
//! replication-key value and applies the configured [`MissingKeyPolicy`] to
//! records that carry none.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::{ExtractError, Record};

/// What to do with a record that has no replication-key value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingKeyPolicy {
    /// Emit the record unchanged; the bookmark is not affected.
    #[default]
    Ignore,
    /// Copy the last value seen in this stream into the record.
    InheritLastSeen,
    /// Fail the extraction with [`ExtractError::MissingReplicationKey`].
    Reject,
}

/// Opaque position a host stores and passes back as the next window start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeCursor(String);

impl ResumeCursor {
    /// Wraps a replication-key value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The stored value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwraps the stored value.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ResumeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracks the highest replication-key value emitted by a fetch.
#[derive(Clone, Debug)]
pub struct BookmarkTracker {
    key: Option<String>,
    policy: MissingKeyPolicy,
    last_seen: Option<Value>,
    max: Option<Value>,
}

impl BookmarkTracker {
    /// Creates a tracker for `key` (`None` for streams without one).
    #[must_use]
    pub fn new(key: Option<&str>, policy: MissingKeyPolicy) -> Self {
        Self {
            key: key.map(String::from),
            policy,
            last_seen: None,
            max: None,
        }
    }

    /// Observes a record about to be emitted.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::MissingReplicationKey`] under
    /// [`MissingKeyPolicy::Reject`] when the record has no key value.
    pub fn track(&mut self, record: &mut Record) -> Result<(), ExtractError> {
        let Some(key) = &self.key else {
            return Ok(());
        };

        match record.get(key).filter(|value| !value.is_null()) {
            Some(value) => {
                if self
                    .max
                    .as_ref()
                    .map_or(true, |max| compare(value, max) == Ordering::Greater)
                {
                    self.max = Some(value.clone());
                }
                self.last_seen = Some(value.clone());
            }
            None => match self.policy {
                MissingKeyPolicy::Ignore => {}
                MissingKeyPolicy::InheritLastSeen => {
                    if let Some(last) = &self.last_seen {
                        tracing::debug!(key = %key, value = %last, "Record missing replication key, inheriting last seen value");
                        record.insert(key.clone(), last.clone());
                    }
                }
                MissingKeyPolicy::Reject => {
                    return Err(ExtractError::MissingReplicationKey {
                        key: key.clone(),
                        record: Value::Object(record.clone()),
                    })
                }
            },
        }
        Ok(())
    }

    /// The cursor to resume from, if any key value was emitted.
    #[must_use]
    pub fn resume_cursor(&self) -> Option<ResumeCursor> {
        self.max.as_ref().map(|value| match value {
            Value::String(s) => ResumeCursor::new(s.clone()),
            other => ResumeCursor::new(other.to_string()),
        })
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}
