//! Group lifecycle management: one display worker per active group.
//!
//! Two reactor tasks watch the repository's mutation revision. The
//! creation reaction spawns a display worker the first time a group
//! appears; the removal reaction cancels and retires the worker once its
//! group holds no alarms. Both reactions are idempotent against an
//! unchanged repository.

use crate::display;
use crate::event::{CoreEvent, EventSender, emit};
use crate::scheduler::{CoreState, Shared};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Registry entry for a running display worker.
#[derive(Debug)]
pub struct WorkerEntry {
    /// Cancelling this token stops the worker task.
    token: CancellationToken,
    pub created_at: DateTime<Utc>,
}

/// Mapping from group id to its display worker. Dynamically sized: there
/// is no fixed group-count ceiling.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    entries: HashMap<i64, WorkerEntry>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, group_id: i64) -> bool {
        self.entries.contains_key(&group_id)
    }

    /// Record a freshly spawned worker for the group.
    pub fn activate(&mut self, group_id: i64, token: CancellationToken) {
        self.entries.insert(
            group_id,
            WorkerEntry {
                token,
                created_at: Utc::now(),
            },
        );
    }

    /// Retire every worker whose group is absent from `live`, cancelling
    /// its token. Returns the retired group ids in ascending order.
    pub fn retire_absent(&mut self, live: &HashSet<i64>) -> Vec<i64> {
        let mut retired: Vec<i64> = self
            .entries
            .keys()
            .filter(|group_id| !live.contains(group_id))
            .copied()
            .collect();
        retired.sort_unstable();

        for group_id in &retired {
            if let Some(entry) = self.entries.remove(group_id) {
                entry.token.cancel();
            }
        }
        retired
    }

    pub fn active_groups(&self) -> HashSet<i64> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The lifecycle manager shared by both reactor tasks.
#[derive(Clone)]
pub struct Lifecycle {
    shared: Arc<Shared>,
    events: EventSender,
    /// Root token: reactors exit on it, and each worker gets a child of it
    /// so scheduler shutdown fans out.
    cancel: CancellationToken,
    /// Display worker tick interval.
    tick: Duration,
}

impl Lifecycle {
    pub fn new(
        shared: Arc<Shared>,
        events: EventSender,
        cancel: CancellationToken,
        tick: Duration,
    ) -> Self {
        Self {
            shared,
            events,
            cancel,
            tick,
        }
    }

    /// Creation reactor: on every mutation, spawn workers for new groups.
    pub async fn run_creation(self, mut revisions: watch::Receiver<u64>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            self.creation_pass();
        }
    }

    /// Removal reactor: on every mutation, retire workers for empty groups.
    pub async fn run_removal(self, mut revisions: watch::Receiver<u64>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            self.removal_pass();
        }
    }

    /// Scan the repository and spawn a display worker for every group that
    /// has none. Alarms landing in an already-covered group are announced
    /// once, when first seen.
    pub fn creation_pass(&self) {
        let mut state = self.shared.state.lock();
        let CoreState {
            repository,
            registry,
        } = &mut *state;

        for alarm in repository.alarms_mut() {
            if alarm.assigned {
                continue;
            }
            alarm.assigned = true;

            let group_id = alarm.group_id;
            if registry.is_active(group_id) {
                emit(
                    &self.events,
                    CoreEvent::WorkerAssignedExisting {
                        group_id,
                        alarm_id: alarm.id,
                        at: Utc::now(),
                    },
                );
            } else {
                let token = self.cancel.child_token();
                tokio::spawn(display::run(
                    group_id,
                    Arc::clone(&self.shared),
                    self.events.clone(),
                    token.clone(),
                    self.tick,
                ));
                // Activate only after the spawn: a failed spawn must leave
                // the entry absent so a later mutation retries.
                registry.activate(group_id, token);
                emit(
                    &self.events,
                    CoreEvent::WorkerCreated {
                        group_id,
                        alarm_id: alarm.id,
                        at: Utc::now(),
                    },
                );
            }
        }
    }

    /// Retire workers whose groups no longer hold any alarms.
    pub fn removal_pass(&self) {
        let retired = {
            let mut state = self.shared.state.lock();
            let live = state.repository.group_ids();
            state.registry.retire_absent(&live)
        };

        for group_id in retired {
            emit(
                &self.events,
                CoreEvent::WorkerRemoved {
                    group_id,
                    at: Utc::now(),
                },
            );
        }
    }
}
