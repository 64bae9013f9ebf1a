//! Events the core emits outward for the presentation layer to render.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Sender half of the core event channel. Unbounded so emitting under the
/// shared lock never blocks.
pub type EventSender = mpsc::UnboundedSender<CoreEvent>;

/// Emit an event, ignoring a closed channel (the presentation layer may
/// already be gone during shutdown).
pub fn emit(events: &EventSender, event: CoreEvent) {
    let _ = events.send(event);
}

/// A log-worthy occurrence inside the scheduler core. Every variant
/// carries the ids needed to attribute it and a wall-clock timestamp.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    AlarmInserted {
        alarm_id: i64,
        group_id: i64,
        at: DateTime<Utc>,
    },
    AlarmFired {
        alarm_id: i64,
        group_id: i64,
        message: String,
        at: DateTime<Utc>,
    },
    AlarmChanged {
        alarm_id: i64,
        group_id: i64,
        at: DateTime<Utc>,
    },
    AlarmCancelled {
        alarm_id: i64,
        group_id: i64,
        at: DateTime<Utc>,
    },
    AlarmSuspended {
        alarm_id: i64,
        group_id: i64,
        at: DateTime<Utc>,
    },
    AlarmReactivated {
        alarm_id: i64,
        group_id: i64,
        at: DateTime<Utc>,
    },
    WorkerCreated {
        group_id: i64,
        alarm_id: i64,
        at: DateTime<Utc>,
    },
    WorkerAssignedExisting {
        group_id: i64,
        alarm_id: i64,
        at: DateTime<Utc>,
    },
    WorkerRemoved {
        group_id: i64,
        at: DateTime<Utc>,
    },
    AlarmDisplayed {
        alarm_id: i64,
        group_id: i64,
        message: String,
        at: DateTime<Utc>,
    },
}

/// Timestamp format shared by all rendered event lines.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl std::fmt::Display for CoreEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlarmInserted {
                alarm_id,
                group_id,
                at,
            } => write!(
                f,
                "Alarm({alarm_id}) inserted into alarm list at {}: Group({group_id})",
                at.format(TIME_FORMAT)
            ),
            Self::AlarmFired {
                alarm_id,
                group_id,
                message,
                at,
            } => write!(
                f,
                "Alarm({alarm_id}) fired at {}: Group({group_id}) {message}",
                at.format(TIME_FORMAT)
            ),
            Self::AlarmChanged {
                alarm_id,
                group_id,
                at,
            } => write!(
                f,
                "Alarm({alarm_id}) changed at {}: Group({group_id})",
                at.format(TIME_FORMAT)
            ),
            Self::AlarmCancelled {
                alarm_id,
                group_id,
                at,
            } => write!(
                f,
                "Alarm({alarm_id}) cancelled at {}: Group({group_id})",
                at.format(TIME_FORMAT)
            ),
            Self::AlarmSuspended {
                alarm_id,
                group_id,
                at,
            } => write!(
                f,
                "Alarm({alarm_id}) suspended at {}: Group({group_id})",
                at.format(TIME_FORMAT)
            ),
            Self::AlarmReactivated {
                alarm_id,
                group_id,
                at,
            } => write!(
                f,
                "Alarm({alarm_id}) reactivated at {}: Group({group_id})",
                at.format(TIME_FORMAT)
            ),
            Self::WorkerCreated {
                group_id,
                alarm_id,
                at,
            } => write!(
                f,
                "Display worker created for Group({group_id}) at {} (first alarm {alarm_id})",
                at.format(TIME_FORMAT)
            ),
            Self::WorkerAssignedExisting {
                group_id,
                alarm_id,
                at,
            } => write!(
                f,
                "Alarm({alarm_id}) assigned to existing display worker for Group({group_id}) at {}",
                at.format(TIME_FORMAT)
            ),
            Self::WorkerRemoved { group_id, at } => write!(
                f,
                "No more alarms in Group({group_id}): display worker removed at {}",
                at.format(TIME_FORMAT)
            ),
            Self::AlarmDisplayed {
                alarm_id,
                group_id,
                message,
                at,
            } => write!(
                f,
                "Alarm({alarm_id}) displayed by Group({group_id}) worker at {}: {message}",
                at.format(TIME_FORMAT)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_fired_line() {
        let event = CoreEvent::AlarmFired {
            alarm_id: 7,
            group_id: 2,
            message: "hello".into(),
            at: Utc::now(),
        };
        let line = event.to_string();
        assert!(line.starts_with("Alarm(7) fired at "), "got: {line}");
        assert!(line.contains("Group(2)"), "got: {line}");
        assert!(line.ends_with("hello"), "got: {line}");
    }

    #[test]
    fn display_worker_lines() {
        let created = CoreEvent::WorkerCreated {
            group_id: 3,
            alarm_id: 1,
            at: Utc::now(),
        };
        assert!(created.to_string().starts_with("Display worker created for Group(3)"));

        let removed = CoreEvent::WorkerRemoved {
            group_id: 3,
            at: Utc::now(),
        };
        assert!(removed.to_string().starts_with("No more alarms in Group(3)"));
    }

    #[test]
    fn serializes_with_event_tag() {
        let event = CoreEvent::AlarmInserted {
            alarm_id: 1,
            group_id: 0,
            at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"alarm_inserted\""), "got: {json}");
        assert!(json.contains("\"alarm_id\":1"), "got: {json}");
    }

    #[test]
    fn emit_ignores_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        emit(
            &tx,
            CoreEvent::WorkerRemoved {
                group_id: 0,
                at: Utc::now(),
            },
        );
    }
}
