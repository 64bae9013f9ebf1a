//! The deadline dispatcher — one long-lived task that always sleeps until
//! the earliest pending alarm is due.
//!
//! The dispatcher is the single recurrence authority: it alone rewrites
//! `next_fire`. Display workers only read the `last_fired` stamp it leaves
//! behind.

use crate::event::{CoreEvent, EventSender, emit};
use crate::scheduler::Shared;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the dispatcher decided while holding the lock.
enum Step {
    /// An alarm fired. `disposed` is true when a one-shot was removed for
    /// good, which can empty its group.
    Fired { disposed: bool },
    /// Sleep until the head alarm's deadline, or until signalled.
    Sleep(Instant),
    /// Nothing to arm; block until an insert signals.
    Idle,
}

/// Run the dispatcher until cancelled.
///
/// Loop shape: evaluate the repository head under the lock, then suspend
/// outside it. A wake signal always routes back through evaluation, so a
/// spurious wake (signalled but head unchanged and not yet due) simply
/// re-arms the same deadline and no alarm ever fires early.
pub async fn run(shared: Arc<Shared>, events: EventSender, cancel: CancellationToken) {
    loop {
        match evaluate(&shared, &events) {
            Step::Fired { disposed } => {
                // Re-examine the head immediately; a one-shot disposal may
                // have emptied its group, so let the removal reaction know.
                if disposed {
                    shared.mark_mutated();
                }
            }
            Step::Sleep(deadline) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shared.dispatch_wake.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            Step::Idle => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shared.dispatch_wake.notified() => {}
                }
            }
        }
    }
}

/// One lock-held pass: fire the head if due, otherwise record what to
/// sleep on.
fn evaluate(shared: &Shared, events: &EventSender) -> Step {
    let mut state = shared.state.lock();
    let now = Instant::now();

    if let Some(mut alarm) = state.repository.pop_due(now) {
        emit(
            events,
            CoreEvent::AlarmFired {
                alarm_id: alarm.id,
                group_id: alarm.group_id,
                message: alarm.message.clone(),
                at: Utc::now(),
            },
        );

        if alarm.is_recurring() {
            alarm.last_fired = Some(now);
            alarm.next_fire = now + alarm.interval;
            state.repository.reinsert(alarm);
            Step::Fired { disposed: false }
        } else {
            // One-shot: terminal, permanently discarded.
            Step::Fired { disposed: true }
        }
    } else if let Some(deadline) = state.repository.earliest_deadline() {
        state.repository.arm(deadline);
        Step::Sleep(deadline)
    } else {
        state.repository.disarm();
        Step::Idle
    }
}
