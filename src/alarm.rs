//! Alarm data types and request validation.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Maximum number of visible characters kept from an alarm message.
pub const MAX_MESSAGE_LEN: usize = 63;

/// Errors returned by the external request operations.
#[derive(Debug, PartialEq, Eq)]
pub enum RequestError {
    /// A field failed validation; the repository was not touched.
    InvalidArgument(String),
    /// No alarm carries the given id.
    NotFound(i64),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            Self::NotFound(id) => write!(f, "no alarm found with id {id}"),
        }
    }
}

/// A parsed, not-yet-validated alarm request from the command layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRequest {
    /// Caller-assigned handle. Not guaranteed unique.
    pub id: i64,
    /// Group the alarm belongs to.
    pub group_id: i64,
    /// Recurrence period in seconds; 0 means one-shot.
    pub interval_seconds: i64,
    /// Message text (truncated to [`MAX_MESSAGE_LEN`] on accept).
    pub message: String,
}

impl AlarmRequest {
    /// Validate the request and build the alarm, scheduling its first
    /// firing one interval from now.
    ///
    /// Negative `id`, `group_id`, or `interval_seconds` are rejected
    /// without touching any state.
    pub fn validate(&self) -> Result<Alarm, RequestError> {
        if self.id < 0 {
            return Err(RequestError::InvalidArgument(format!(
                "alarm id must be non-negative, got {}",
                self.id
            )));
        }
        if self.group_id < 0 {
            return Err(RequestError::InvalidArgument(format!(
                "group id must be non-negative, got {}",
                self.group_id
            )));
        }
        if self.interval_seconds < 0 {
            return Err(RequestError::InvalidArgument(format!(
                "interval must be non-negative, got {}",
                self.interval_seconds
            )));
        }

        let interval = Duration::from_secs(self.interval_seconds as u64);
        Ok(Alarm {
            id: self.id,
            group_id: self.group_id,
            interval,
            next_fire: Instant::now() + interval,
            message: truncate_message(&self.message),
            suspended: false,
            assigned: false,
            last_fired: None,
            created_at: Utc::now(),
        })
    }
}

/// A pending or recurring notification, owned by the repository once
/// inserted. Values are only copied out of the lock for reporting.
#[derive(Debug, Clone)]
pub struct Alarm {
    pub id: i64,
    pub group_id: i64,
    /// Recurrence period; zero means one-shot.
    pub interval: Duration,
    /// When this alarm is next due.
    pub next_fire: Instant,
    pub message: String,
    /// Suspended alarms never arm the dispatcher and never fire, but
    /// still count toward their group's presence.
    pub suspended: bool,
    /// Whether the creation reaction has already announced this alarm.
    pub assigned: bool,
    /// Stamped by the dispatcher on each firing; display workers read it.
    pub last_fired: Option<Instant>,
    pub created_at: DateTime<Utc>,
}

impl Alarm {
    pub fn is_recurring(&self) -> bool {
        self.interval > Duration::ZERO
    }
}

/// Truncate a message to [`MAX_MESSAGE_LEN`] visible characters.
fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        message.to_owned()
    } else {
        message.chars().take(MAX_MESSAGE_LEN).collect()
    }
}
