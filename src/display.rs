//! Per-group display workers.
//!
//! A display worker periodically reports its group's alarms as they fire.
//! It reads scheduling state only (the dispatcher owns recurrence): each
//! tick it scans for alarms whose `last_fired` stamp landed inside the
//! window since its previous tick.

use crate::event::{CoreEvent, EventSender, emit};
use crate::scheduler::Shared;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Run a display worker for one group until cancelled by the lifecycle
/// manager's removal reaction (or by scheduler shutdown).
pub async fn run(
    group_id: i64,
    shared: Arc<Shared>,
    events: EventSender,
    cancel: CancellationToken,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Consume the immediate first tick; the first scan happens one tick in.
    ticker.tick().await;

    let mut window_start = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let scan_at = Instant::now();
        // Copy ids and messages out under the lock; emit after releasing it.
        let fired: Vec<(i64, String)> = {
            let state = shared.state.lock();
            state
                .repository
                .alarms()
                .iter()
                .filter(|a| a.group_id == group_id && !a.suspended)
                .filter(|a| {
                    a.last_fired
                        .is_some_and(|at| at >= window_start && at < scan_at)
                })
                .map(|a| (a.id, a.message.clone()))
                .collect()
        };
        window_start = scan_at;

        for (alarm_id, message) in fired {
            emit(
                &events,
                CoreEvent::AlarmDisplayed {
                    alarm_id,
                    group_id,
                    message,
                    at: Utc::now(),
                },
            );
        }
    }
}
