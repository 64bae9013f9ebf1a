//! Engine wiring: the shared critical section, the scheduler that spawns
//! the long-running tasks, and the handle exposing the external operations.

use crate::alarm::{AlarmRequest, RequestError};
use crate::config::Config;
use crate::dispatcher;
use crate::event::{CoreEvent, EventSender, emit};
use crate::lifecycle::{GroupRegistry, Lifecycle};
use crate::repository::Repository;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything behind the single lock. Repository and registry form one
/// critical section; there is no finer-grained locking.
#[derive(Debug, Default)]
pub struct CoreState {
    pub repository: Repository,
    pub registry: GroupRegistry,
}

/// State shared by the dispatcher, the lifecycle reactors, the display
/// workers, and the external handle.
///
/// Locking discipline: `state` is never held across an await point.
pub struct Shared {
    pub state: Mutex<CoreState>,
    /// Single-wake signal for the dispatcher (never a broadcast).
    pub dispatch_wake: Notify,
    /// Mutation revision, bumped on every repository change the lifecycle
    /// reactors must see. Bumps with no subscribers are fine.
    mutations: watch::Sender<u64>,
}

impl Shared {
    pub fn new() -> Arc<Self> {
        let (mutations, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(CoreState::default()),
            dispatch_wake: Notify::new(),
            mutations,
        })
    }

    pub fn subscribe_mutations(&self) -> watch::Receiver<u64> {
        self.mutations.subscribe()
    }

    pub fn mark_mutated(&self) {
        self.mutations.send_modify(|revision| *revision += 1);
    }
}

/// The scheduler engine. Owns the shared state and the root cancellation
/// token; `spawn` launches the dispatcher and both lifecycle reactors.
pub struct Scheduler {
    shared: Arc<Shared>,
    events: EventSender,
    cancel: CancellationToken,
    tick: Duration,
}

impl Scheduler {
    /// Build the engine and return it along with the event stream the
    /// presentation layer consumes.
    pub fn new(config: &Config) -> (Self, UnboundedReceiver<CoreEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            shared: Shared::new(),
            events,
            cancel: CancellationToken::new(),
            tick: config.tick(),
        };
        (scheduler, events_rx)
    }

    /// Launch the dispatcher and the creation/removal reactors. Display
    /// workers are spawned later by the creation reaction, one per group.
    pub fn spawn(&self) {
        tokio::spawn(dispatcher::run(
            Arc::clone(&self.shared),
            self.events.clone(),
            self.cancel.child_token(),
        ));

        let lifecycle = Lifecycle::new(
            Arc::clone(&self.shared),
            self.events.clone(),
            self.cancel.clone(),
            self.tick,
        );
        tokio::spawn(
            lifecycle
                .clone()
                .run_creation(self.shared.subscribe_mutations()),
        );
        tokio::spawn(lifecycle.run_removal(self.shared.subscribe_mutations()));
    }

    /// Handle for submitting external operations.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
        }
    }

    /// Cancel every task this scheduler spawned, display workers included.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Cheaply cloneable front door for the external command layer.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    events: EventSender,
}

impl SchedulerHandle {
    /// Insert a new alarm. Wakes the dispatcher when the new deadline is
    /// the earliest, per the armed-deadline protocol.
    pub fn add_alarm(&self, request: AlarmRequest) -> Result<(), RequestError> {
        let alarm = request.validate()?;
        let (alarm_id, group_id) = (alarm.id, alarm.group_id);

        let wake = self.shared.state.lock().repository.insert(alarm);
        if wake {
            self.shared.dispatch_wake.notify_one();
        }
        self.shared.mark_mutated();

        emit(
            &self.events,
            CoreEvent::AlarmInserted {
                alarm_id,
                group_id,
                at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Rewrite group, interval, and message for every alarm carrying the
    /// id, rescheduling one interval from now.
    pub fn change_alarm(&self, request: AlarmRequest) -> Result<(), RequestError> {
        let template = request.validate()?;
        let alarm_id = template.id;

        {
            let mut state = self.shared.state.lock();
            let now = Instant::now();
            let matches = state.repository.find_all_mut(alarm_id);
            if matches.is_empty() {
                return Err(RequestError::NotFound(alarm_id));
            }
            for alarm in matches {
                alarm.group_id = template.group_id;
                alarm.interval = template.interval;
                alarm.message = template.message.clone();
                alarm.next_fire = now + template.interval;
                // A group change may need a new display worker; let the
                // creation reaction see this alarm again.
                alarm.assigned = false;
            }
            state.repository.resort();
        }
        // Deadlines moved in an unknown direction: re-evaluate rather than
        // compare against the armed deadline.
        self.shared.dispatch_wake.notify_one();
        self.shared.mark_mutated();

        emit(
            &self.events,
            CoreEvent::AlarmChanged {
                alarm_id,
                group_id: template.group_id,
                at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Remove every alarm carrying the id.
    pub fn cancel_alarm(&self, alarm_id: i64) -> Result<(), RequestError> {
        if alarm_id < 0 {
            return Err(RequestError::InvalidArgument(format!(
                "alarm id must be non-negative, got {alarm_id}"
            )));
        }

        let removed = self.shared.state.lock().repository.cancel(alarm_id);
        if removed.is_empty() {
            return Err(RequestError::NotFound(alarm_id));
        }
        self.shared.dispatch_wake.notify_one();
        self.shared.mark_mutated();

        for alarm in removed {
            emit(
                &self.events,
                CoreEvent::AlarmCancelled {
                    alarm_id: alarm.id,
                    group_id: alarm.group_id,
                    at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    /// Park every alarm carrying the id. A suspended alarm never fires but
    /// still holds its group open.
    pub fn suspend_alarm(&self, alarm_id: i64) -> Result<(), RequestError> {
        if alarm_id < 0 {
            return Err(RequestError::InvalidArgument(format!(
                "alarm id must be non-negative, got {alarm_id}"
            )));
        }

        let affected = {
            let mut state = self.shared.state.lock();
            let matches = state.repository.find_all_mut(alarm_id);
            if matches.is_empty() {
                return Err(RequestError::NotFound(alarm_id));
            }
            matches
                .into_iter()
                .map(|alarm| {
                    alarm.suspended = true;
                    alarm.group_id
                })
                .collect::<Vec<_>>()
        };
        // The armed deadline may belong to a now-parked alarm.
        self.shared.dispatch_wake.notify_one();
        self.shared.mark_mutated();

        for group_id in affected {
            emit(
                &self.events,
                CoreEvent::AlarmSuspended {
                    alarm_id,
                    group_id,
                    at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    /// Resume every suspended alarm carrying the id, rescheduling one
    /// interval from now.
    pub fn reactivate_alarm(&self, alarm_id: i64) -> Result<(), RequestError> {
        if alarm_id < 0 {
            return Err(RequestError::InvalidArgument(format!(
                "alarm id must be non-negative, got {alarm_id}"
            )));
        }

        let affected = {
            let mut state = self.shared.state.lock();
            let now = Instant::now();
            let matches = state.repository.find_all_mut(alarm_id);
            if matches.is_empty() {
                return Err(RequestError::NotFound(alarm_id));
            }
            let affected = matches
                .into_iter()
                .map(|alarm| {
                    alarm.suspended = false;
                    alarm.next_fire = now + alarm.interval;
                    alarm.group_id
                })
                .collect::<Vec<_>>();
            state.repository.resort();
            affected
        };
        self.shared.dispatch_wake.notify_one();
        self.shared.mark_mutated();

        for group_id in affected {
            emit(
                &self.events,
                CoreEvent::AlarmReactivated {
                    alarm_id,
                    group_id,
                    at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    /// One consistent snapshot: every alarm in exactly one bucket matching
    /// its group id, with the group's worker status.
    pub fn view_alarms(&self) -> Vec<GroupView> {
        let state = self.shared.state.lock();
        let mut buckets: BTreeMap<i64, GroupView> = BTreeMap::new();

        for alarm in state.repository.alarms() {
            buckets
                .entry(alarm.group_id)
                .or_insert_with(|| GroupView {
                    group_id: alarm.group_id,
                    worker_active: state.registry.is_active(alarm.group_id),
                    alarms: Vec::new(),
                })
                .alarms
                .push(AlarmView {
                    id: alarm.id,
                    message: alarm.message.clone(),
                    interval_seconds: alarm.interval.as_secs(),
                    suspended: alarm.suspended,
                    created_at: alarm.created_at,
                });
        }

        buckets.into_values().collect()
    }
}

/// One group's bucket in the [`SchedulerHandle::view_alarms`] report.
#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub group_id: i64,
    pub worker_active: bool,
    pub alarms: Vec<AlarmView>,
}

/// Identifying fields of one alarm, copied out under the lock.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmView {
    pub id: i64,
    pub message: String,
    pub interval_seconds: u64,
    pub suspended: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (SchedulerHandle, UnboundedReceiver<CoreEvent>) {
        let config = Config::default();
        let (scheduler, rx) = Scheduler::new(&config);
        (scheduler.handle(), rx)
    }

    fn request(id: i64, group_id: i64, interval_seconds: i64, message: &str) -> AlarmRequest {
        AlarmRequest {
            id,
            group_id,
            interval_seconds,
            message: message.into(),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<CoreEvent>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn add_emits_inserted_event() {
        let (handle, mut rx) = setup();
        handle.add_alarm(request(1, 2, 5, "hello")).unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            CoreEvent::AlarmInserted {
                alarm_id: 1,
                group_id: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_add_leaves_no_trace() {
        let (handle, mut rx) = setup();
        let err = handle.add_alarm(request(-1, 0, 5, "bad")).unwrap_err();
        assert!(matches!(err, RequestError::InvalidArgument(_)));

        // Repository unchanged, no events emitted.
        assert!(drain(&mut rx).is_empty());
        assert!(handle.view_alarms().is_empty());
    }

    #[tokio::test]
    async fn change_rewrites_fields_and_clears_assignment() {
        let (handle, mut rx) = setup();
        handle.add_alarm(request(1, 0, 5, "before")).unwrap();
        drain(&mut rx);

        handle.change_alarm(request(1, 4, 9, "after")).unwrap();

        let view = handle.view_alarms();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].group_id, 4);
        assert_eq!(view[0].alarms[0].message, "after");
        assert_eq!(view[0].alarms[0].interval_seconds, 9);

        let events = drain(&mut rx);
        assert!(matches!(
            events[0],
            CoreEvent::AlarmChanged {
                alarm_id: 1,
                group_id: 4,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn change_unknown_id_is_not_found() {
        let (handle, _rx) = setup();
        let err = handle.change_alarm(request(9, 0, 5, "x")).unwrap_err();
        assert_eq!(err, RequestError::NotFound(9));
    }

    #[tokio::test]
    async fn cancel_removes_all_matching_alarms() {
        let (handle, mut rx) = setup();
        handle.add_alarm(request(7, 0, 5, "a")).unwrap();
        handle.add_alarm(request(7, 1, 5, "b")).unwrap();
        handle.add_alarm(request(8, 0, 5, "c")).unwrap();
        drain(&mut rx);

        handle.cancel_alarm(7).unwrap();

        let cancelled: Vec<i64> = drain(&mut rx)
            .iter()
            .filter_map(|e| match e {
                CoreEvent::AlarmCancelled { alarm_id, .. } => Some(*alarm_id),
                _ => None,
            })
            .collect();
        assert_eq!(cancelled, vec![7, 7]);

        let view = handle.view_alarms();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].alarms[0].id, 8);

        assert_eq!(handle.cancel_alarm(7), Err(RequestError::NotFound(7)));
    }

    #[tokio::test]
    async fn suspend_and_reactivate_round_trip() {
        let (handle, mut rx) = setup();
        handle.add_alarm(request(1, 0, 5, "x")).unwrap();
        drain(&mut rx);

        handle.suspend_alarm(1).unwrap();
        let view = handle.view_alarms();
        assert!(view[0].alarms[0].suspended);
        assert!(matches!(
            drain(&mut rx)[0],
            CoreEvent::AlarmSuspended { alarm_id: 1, .. }
        ));

        handle.reactivate_alarm(1).unwrap();
        let view = handle.view_alarms();
        assert!(!view[0].alarms[0].suspended);
        assert!(matches!(
            drain(&mut rx)[0],
            CoreEvent::AlarmReactivated { alarm_id: 1, .. }
        ));
    }

    #[tokio::test]
    async fn suspend_unknown_id_is_not_found() {
        let (handle, _rx) = setup();
        assert_eq!(handle.suspend_alarm(5), Err(RequestError::NotFound(5)));
        assert_eq!(handle.reactivate_alarm(5), Err(RequestError::NotFound(5)));
    }

    #[tokio::test]
    async fn view_partitions_alarms_by_group() {
        let (handle, _rx) = setup();
        handle.add_alarm(request(1, 0, 5, "a")).unwrap();
        handle.add_alarm(request(2, 3, 5, "b")).unwrap();
        handle.add_alarm(request(3, 0, 6, "c")).unwrap();

        let view = handle.view_alarms();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].group_id, 0);
        assert_eq!(view[1].group_id, 3);

        // Every alarm lands in exactly one bucket matching its group.
        let total: usize = view.iter().map(|g| g.alarms.len()).sum();
        assert_eq!(total, 3);
        for group in &view {
            assert!(!group.alarms.is_empty());
        }
        let group0: Vec<i64> = view[0].alarms.iter().map(|a| a.id).collect();
        assert_eq!(group0, vec![1, 3]);
    }

    #[tokio::test]
    async fn add_wakes_dispatcher_only_for_earlier_deadline() {
        let config = Config::default();
        let (scheduler, _rx) = Scheduler::new(&config);
        let handle = scheduler.handle();

        handle.add_alarm(request(1, 0, 10, "late")).unwrap();
        let armed_first = scheduler.shared.state.lock().repository.armed().unwrap();

        handle.add_alarm(request(2, 0, 2, "early")).unwrap();
        let armed_second = scheduler.shared.state.lock().repository.armed().unwrap();
        assert!(armed_second < armed_first);

        handle.add_alarm(request(3, 0, 30, "later")).unwrap();
        assert_eq!(
            scheduler.shared.state.lock().repository.armed().unwrap(),
            armed_second
        );
    }
}
