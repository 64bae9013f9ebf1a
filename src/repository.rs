//! The shared, time-ordered alarm collection.
//!
//! The repository is a plain struct with no interior locking: callers hold
//! the scheduler's single lock for every call, including read-only scans,
//! so a traversal can never race the dispatcher's detach.

use crate::alarm::Alarm;
use std::collections::HashSet;
use tokio::time::Instant;

/// Pending alarms kept ascending by `next_fire`, plus the deadline the
/// dispatcher is currently sleeping on (`None` while it is idle).
#[derive(Debug, Default)]
pub struct Repository {
    alarms: Vec<Alarm>,
    armed: Option<Instant>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an alarm from the external request path, keeping the list
    /// ordered by deadline.
    ///
    /// Returns `true` when the caller must wake the dispatcher with a
    /// single-target signal: the dispatcher was idle, or the new alarm's
    /// deadline precedes the one it is sleeping on. In that case the armed
    /// deadline is updated here so concurrent inserts compare against the
    /// new value.
    pub fn insert(&mut self, alarm: Alarm) -> bool {
        let deadline = alarm.next_fire;
        self.insert_ordered(alarm);

        match self.armed {
            Some(armed) if deadline >= armed => false,
            _ => {
                self.armed = Some(deadline);
                true
            }
        }
    }

    /// Re-insert an alarm from the dispatcher's recurrence path. The
    /// dispatcher re-examines the head right after, so no wake is needed.
    pub fn reinsert(&mut self, alarm: Alarm) {
        self.insert_ordered(alarm);
    }

    /// Ordered insert: before the first alarm with an equal or later
    /// deadline, or at the tail.
    fn insert_ordered(&mut self, alarm: Alarm) {
        let at = self
            .alarms
            .iter()
            .position(|a| a.next_fire >= alarm.next_fire)
            .unwrap_or(self.alarms.len());
        self.alarms.insert(at, alarm);
    }

    /// Detach and return the earliest non-suspended alarm if it is due.
    ///
    /// The list is deadline-ordered, so if the first active alarm is not
    /// due, none are.
    pub fn pop_due(&mut self, now: Instant) -> Option<Alarm> {
        let at = self.alarms.iter().position(|a| !a.suspended)?;
        if self.alarms[at].next_fire <= now {
            Some(self.alarms.remove(at))
        } else {
            None
        }
    }

    /// Deadline of the earliest non-suspended alarm.
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.alarms
            .iter()
            .find(|a| !a.suspended)
            .map(|a| a.next_fire)
    }

    /// Record the deadline the dispatcher is about to sleep on.
    pub fn arm(&mut self, deadline: Instant) {
        self.armed = Some(deadline);
    }

    /// Mark the dispatcher idle (empty list, nothing to sleep on).
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn armed(&self) -> Option<Instant> {
        self.armed
    }

    /// Full read-only traversal, in deadline order.
    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    /// Mutable traversal for lifecycle bookkeeping. Callers that rewrite
    /// `next_fire` through this must call [`Repository::resort`] after.
    pub fn alarms_mut(&mut self) -> impl Iterator<Item = &mut Alarm> {
        self.alarms.iter_mut()
    }

    /// All alarms carrying the given id (ids are not guaranteed unique).
    pub fn find_all_mut(&mut self, id: i64) -> Vec<&mut Alarm> {
        self.alarms.iter_mut().filter(|a| a.id == id).collect()
    }

    /// Remove every alarm with the given id, returning the removed alarms.
    pub fn cancel(&mut self, id: i64) -> Vec<Alarm> {
        let mut removed = Vec::new();
        let mut at = 0;
        while at < self.alarms.len() {
            if self.alarms[at].id == id {
                removed.push(self.alarms.remove(at));
            } else {
                at += 1;
            }
        }
        removed
    }

    /// Restore deadline order after an in-place `next_fire` rewrite.
    pub fn resort(&mut self) {
        self.alarms.sort_by_key(|a| a.next_fire);
    }

    /// The set of group ids currently present (suspended alarms included:
    /// a parked alarm still holds its group open).
    pub fn group_ids(&self) -> HashSet<i64> {
        self.alarms.iter().map(|a| a.group_id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    /// Check the ordering invariant. Used by tests; a violation anywhere
    /// else is a programming error.
    pub fn is_ordered(&self) -> bool {
        self.alarms
            .windows(2)
            .all(|pair| pair[0].next_fire <= pair[1].next_fire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::AlarmRequest;
    use std::time::Duration;

    fn make_alarm(id: i64, group_id: i64, interval_seconds: i64) -> Alarm {
        AlarmRequest {
            id,
            group_id,
            interval_seconds,
            message: format!("alarm {id}"),
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn insert_keeps_deadline_order() {
        let mut repo = Repository::new();
        repo.insert(make_alarm(1, 0, 30));
        repo.insert(make_alarm(2, 0, 10));
        repo.insert(make_alarm(3, 0, 20));
        repo.insert(make_alarm(4, 0, 5));

        assert!(repo.is_ordered());
        let ids: Vec<i64> = repo.alarms().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }

    #[tokio::test]
    async fn insert_into_idle_repository_requests_wake() {
        let mut repo = Repository::new();
        assert!(repo.armed().is_none());
        assert!(repo.insert(make_alarm(1, 0, 10)));
        assert!(repo.armed().is_some());
    }

    #[tokio::test]
    async fn earlier_insert_preempts_armed_deadline() {
        let mut repo = Repository::new();
        repo.insert(make_alarm(1, 0, 10));
        let first_armed = repo.armed().unwrap();

        assert!(repo.insert(make_alarm(2, 0, 2)));
        assert!(repo.armed().unwrap() < first_armed);
    }

    #[tokio::test]
    async fn later_insert_does_not_request_wake() {
        let mut repo = Repository::new();
        repo.insert(make_alarm(1, 0, 10));
        let armed = repo.armed().unwrap();

        assert!(!repo.insert(make_alarm(2, 0, 30)));
        assert_eq!(repo.armed().unwrap(), armed);
    }

    #[tokio::test]
    async fn pop_due_detaches_only_due_head() {
        let mut repo = Repository::new();
        repo.insert(make_alarm(1, 0, 10));
        assert!(repo.pop_due(Instant::now()).is_none());
        assert_eq!(repo.len(), 1);

        let popped = repo.pop_due(Instant::now() + Duration::from_secs(11)).unwrap();
        assert_eq!(popped.id, 1);
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn pop_due_skips_suspended_head() {
        let mut repo = Repository::new();
        let mut parked = make_alarm(1, 0, 1);
        parked.suspended = true;
        repo.insert(parked);
        repo.insert(make_alarm(2, 0, 3));

        let later = Instant::now() + Duration::from_secs(10);
        let popped = repo.pop_due(later).unwrap();
        assert_eq!(popped.id, 2);
        // The suspended alarm stays parked even though it is past due.
        assert_eq!(repo.len(), 1);
        assert!(repo.pop_due(later).is_none());
    }

    #[tokio::test]
    async fn earliest_deadline_ignores_suspended() {
        let mut repo = Repository::new();
        let mut parked = make_alarm(1, 0, 1);
        parked.suspended = true;
        repo.insert(parked);
        assert!(repo.earliest_deadline().is_none());

        repo.insert(make_alarm(2, 0, 5));
        assert!(repo.earliest_deadline().is_some());
    }

    #[tokio::test]
    async fn cancel_removes_every_alarm_with_id() {
        let mut repo = Repository::new();
        repo.insert(make_alarm(7, 0, 5));
        repo.insert(make_alarm(7, 1, 10));
        repo.insert(make_alarm(8, 0, 3));

        let removed = repo.cancel(7);
        assert_eq!(removed.len(), 2);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.alarms()[0].id, 8);

        assert!(repo.cancel(99).is_empty());
    }

    #[tokio::test]
    async fn resort_restores_order_after_rewrite() {
        let mut repo = Repository::new();
        repo.insert(make_alarm(1, 0, 5));
        repo.insert(make_alarm(2, 0, 10));

        for alarm in repo.find_all_mut(1) {
            alarm.next_fire = Instant::now() + Duration::from_secs(60);
        }
        repo.resort();
        assert!(repo.is_ordered());
        assert_eq!(repo.alarms()[0].id, 2);
    }

    #[tokio::test]
    async fn group_ids_counts_suspended_alarms() {
        let mut repo = Repository::new();
        repo.insert(make_alarm(1, 0, 5));
        let mut parked = make_alarm(2, 3, 5);
        parked.suspended = true;
        repo.insert(parked);

        let groups = repo.group_ids();
        assert!(groups.contains(&0));
        assert!(groups.contains(&3));
        assert_eq!(groups.len(), 2);
    }
}
