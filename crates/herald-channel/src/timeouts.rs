//! Named deadlines raced against incoming data.
//!
//! [`Timeouts`] holds at most one armed deadline per [`Timeout`] name.
//! [`Timeouts::wait`] resolves to whichever armed deadline passes first;
//! arming or cancelling while a wait is outstanding wakes it so it can
//! re-evaluate against the new earliest deadline.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

/// The deadlines the channel driver arms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// The channel's hard lifetime ran out.
    ChannelExpired,
    /// The server stopped sending heartbeats.
    NoHeartbeat,
    /// A health probe got no reply.
    NoHealthCheckResponse,
    /// A subscribe request was never confirmed.
    NoSubscriptionConfirmation,
}

impl Timeout {
    /// Name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChannelExpired => "ChannelExpired",
            Self::NoHeartbeat => "NoHeartbeat",
            Self::NoHealthCheckResponse => "NoHealthCheckResponse",
            Self::NoSubscriptionConfirmation => "NoSubscriptionConfirmation",
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the timeout registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeoutError {
    /// `reschedule` was called for a name that was never scheduled.
    #[error("timeout {0} was never scheduled")]
    NeverScheduled(Timeout),
}

#[derive(Debug)]
struct Entry {
    name: Timeout,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct State {
    /// Armed entries in arming order. Re-arming keeps an entry's slot.
    entries: Vec<Entry>,
    /// Last duration each name was scheduled with, kept after it fires.
    durations: HashMap<Timeout, Duration>,
}

impl State {
    fn earliest(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Remove and return the earliest entry whose deadline has passed.
    /// Ties go to the entry armed first.
    fn pop_due(&mut self, now: Instant) -> Option<Timeout> {
        let (index, _) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline <= now)
            .min_by_key(|(_, e)| e.deadline)?;
        Some(self.entries.remove(index).name)
    }
}

/// Registry of named pending deadlines.
#[derive(Debug, Default)]
pub struct Timeouts {
    state: Mutex<State>,
    changed: Notify,
}

impl Timeouts {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `name` to fire `duration` from now, replacing any armed entry.
    pub fn schedule(&self, name: Timeout, duration: Duration) {
        let deadline = Instant::now() + duration;
        {
            let mut state = self.state.lock();
            let _ = state.durations.insert(name, duration);
            if let Some(entry) = state.entries.iter_mut().find(|e| e.name == name) {
                entry.deadline = deadline;
            } else {
                state.entries.push(Entry { name, deadline });
            }
        }
        self.changed.notify_waiters();
    }

    /// Re-arm `name` from now with the duration it was last scheduled with.
    pub fn reschedule(&self, name: Timeout) -> Result<(), TimeoutError> {
        let duration = self
            .state
            .lock()
            .durations
            .get(&name)
            .copied()
            .ok_or(TimeoutError::NeverScheduled(name))?;
        self.schedule(name, duration);
        Ok(())
    }

    /// Disarm `name`. Returns whether it was armed; cancelling an unarmed
    /// name is not an error.
    pub fn cancel(&self, name: Timeout) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let before = state.entries.len();
            state.entries.retain(|e| e.name != name);
            state.entries.len() != before
        };
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Disarm everything.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
        self.changed.notify_waiters();
    }

    /// Deadline of `name`, if armed.
    pub fn deadline(&self, name: Timeout) -> Option<Instant> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.deadline)
    }

    /// Whether `name` is armed.
    pub fn is_armed(&self, name: Timeout) -> bool {
        self.deadline(name).is_some()
    }

    /// Armed names in arming order.
    pub fn armed(&self) -> Vec<Timeout> {
        self.state.lock().entries.iter().map(|e| e.name).collect()
    }

    /// Wait for the earliest armed deadline to pass, then disarm and return it.
    ///
    /// Pends while nothing is armed. Cancel-safe: dropping the future before
    /// it resolves leaves every entry armed.
    pub async fn wait(&self) -> Timeout {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            // Register before reading state so a concurrent change is not lost.
            let _ = changed.as_mut().enable();

            let earliest = self.state.lock().earliest();
            match earliest {
                None => changed.await,
                Some(deadline) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(deadline) => {
                            if let Some(name) = self.state.lock().pop_due(Instant::now()) {
                                return name;
                            }
                        }
                        () = &mut changed => {}
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn earliest_fires_first() {
        let t = Timeouts::new();
        t.schedule(Timeout::ChannelExpired, 30 * SEC);
        t.schedule(Timeout::NoHeartbeat, 10 * SEC);

        let start = Instant::now();
        assert_eq!(t.wait().await, Timeout::NoHeartbeat);
        assert_eq!(start.elapsed(), 10 * SEC);
        assert!(!t.is_armed(Timeout::NoHeartbeat));
        assert!(t.is_armed(Timeout::ChannelExpired));

        assert_eq!(t.wait().await, Timeout::ChannelExpired);
        assert!(t.armed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_replaces_existing_entry() {
        let t = Timeouts::new();
        t.schedule(Timeout::NoHeartbeat, 5 * SEC);
        t.schedule(Timeout::NoHeartbeat, 20 * SEC);
        assert_eq!(t.armed(), vec![Timeout::NoHeartbeat]);

        let start = Instant::now();
        assert_eq!(t.wait().await, Timeout::NoHeartbeat);
        assert_eq!(start.elapsed(), 20 * SEC);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_deadlines_resolve_in_arming_order() {
        let t = Timeouts::new();
        t.schedule(Timeout::NoSubscriptionConfirmation, 5 * SEC);
        t.schedule(Timeout::NoHeartbeat, 5 * SEC);
        t.schedule(Timeout::NoHealthCheckResponse, 5 * SEC);

        assert_eq!(t.wait().await, Timeout::NoSubscriptionConfirmation);
        assert_eq!(t.wait().await, Timeout::NoHeartbeat);
        assert_eq!(t.wait().await, Timeout::NoHealthCheckResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn due_entries_resolve_earliest_deadline_first() {
        let t = Timeouts::new();
        t.schedule(Timeout::ChannelExpired, 3 * SEC);
        t.schedule(Timeout::NoHeartbeat, SEC);
        tokio::time::advance(10 * SEC).await;

        assert_eq!(t.wait().await, Timeout::NoHeartbeat);
        assert_eq!(t.wait().await, Timeout::ChannelExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_uses_last_duration() {
        let t = Timeouts::new();
        t.schedule(Timeout::ChannelExpired, 10 * SEC);
        let first = t.deadline(Timeout::ChannelExpired).unwrap();

        tokio::time::advance(4 * SEC).await;
        t.reschedule(Timeout::ChannelExpired).unwrap();
        let second = t.deadline(Timeout::ChannelExpired).unwrap();
        assert_eq!(second - first, 4 * SEC);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_after_fire_rearms() {
        let t = Timeouts::new();
        t.schedule(Timeout::NoHeartbeat, SEC);
        assert_eq!(t.wait().await, Timeout::NoHeartbeat);
        t.reschedule(Timeout::NoHeartbeat).unwrap();
        assert!(t.is_armed(Timeout::NoHeartbeat));
    }

    #[test]
    fn reschedule_never_scheduled_is_error() {
        let t = Timeouts::new();
        assert_eq!(
            t.reschedule(Timeout::NoHealthCheckResponse),
            Err(TimeoutError::NeverScheduled(Timeout::NoHealthCheckResponse))
        );
        assert!(!t.is_armed(Timeout::NoHealthCheckResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let t = Timeouts::new();
        assert!(!t.cancel(Timeout::NoHeartbeat));
        t.schedule(Timeout::NoHeartbeat, SEC);
        assert!(t.cancel(Timeout::NoHeartbeat));
        assert!(!t.cancel(Timeout::NoHeartbeat));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_honors_earlier_deadline_armed_mid_wait() {
        let t = Arc::new(Timeouts::new());
        t.schedule(Timeout::ChannelExpired, 100 * SEC);

        let armer = Arc::clone(&t);
        let _task = tokio::spawn(async move {
            tokio::time::sleep(SEC).await;
            armer.schedule(Timeout::NoHealthCheckResponse, 2 * SEC);
        });

        let start = Instant::now();
        assert_eq!(t.wait().await, Timeout::NoHealthCheckResponse);
        assert_eq!(start.elapsed(), 3 * SEC);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_pends_until_something_is_armed() {
        let t = Arc::new(Timeouts::new());
        let armer = Arc::clone(&t);
        let _task = tokio::spawn(async move {
            tokio::time::sleep(5 * SEC).await;
            armer.schedule(Timeout::NoHeartbeat, SEC);
        });

        let start = Instant::now();
        assert_eq!(t.wait().await, Timeout::NoHeartbeat);
        assert_eq!(start.elapsed(), 6 * SEC);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_entry_does_not_fire() {
        let t = Arc::new(Timeouts::new());
        t.schedule(Timeout::NoSubscriptionConfirmation, SEC);
        t.schedule(Timeout::NoHeartbeat, 10 * SEC);

        let canceller = Arc::clone(&t);
        let _task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = canceller.cancel(Timeout::NoSubscriptionConfirmation);
        });

        assert_eq!(t.wait().await, Timeout::NoHeartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_removes_nothing() {
        let t = Timeouts::new();
        t.schedule(Timeout::NoHeartbeat, 10 * SEC);

        let raced = tokio::time::timeout(SEC, t.wait()).await;
        assert!(raced.is_err());
        assert!(t.is_armed(Timeout::NoHeartbeat));
    }

    #[test]
    fn clear_disarms_all() {
        let t = Timeouts::new();
        t.schedule(Timeout::NoHeartbeat, SEC);
        t.schedule(Timeout::ChannelExpired, SEC);
        t.clear();
        assert!(t.armed().is_empty());
    }

    #[test]
    fn display_names() {
        assert_eq!(Timeout::NoHeartbeat.to_string(), "NoHeartbeat");
        assert_eq!(
            TimeoutError::NeverScheduled(Timeout::ChannelExpired).to_string(),
            "timeout ChannelExpired was never scheduled"
        );
    }
}
