//! Debounced regeneration scheduling.
//!
//! [`RegenerationScheduler`] keeps the remote service from being hammered
//! while the user is dragging parameters. It is a plain value type: at most
//! one pending prompt and one armed deadline, no hidden timers or closures.
//! Time enters only through [`Instant`] arguments, so tests simulate the
//! clock directly.
//!
//! Coalescing rule: every change overwrites the pending state and re-arms
//! the deadline, so only the last state of a burst survives. At most one
//! remote call may be outstanding; while one is in flight the pending state
//! is retained and re-evaluated after the call resolves.

use std::time::Duration;

use tokio::time::Instant;

use crate::prompt::CompiledPrompt;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

/// A coalesced parameter state waiting for its debounce window to close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    pub key: String,
    pub prompt: CompiledPrompt,
}

#[derive(Debug)]
pub struct RegenerationScheduler {
    debounce: Duration,
    pending: Option<PendingPrompt>,
    /// Armed while a debounce window is open.
    deadline: Option<Instant>,
}

impl Default for RegenerationScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl RegenerationScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: None,
            deadline: None,
        }
    }

    /// Record a new pending prompt and re-arm the debounce deadline.
    /// Intermediate states are coalesced, never queued.
    pub fn note_change(&mut self, prompt: CompiledPrompt, now: Instant) {
        tracing::debug!(key = %prompt.cache_key, "prompt change noted, debounce re-armed");
        self.pending = Some(PendingPrompt {
            key: prompt.cache_key.clone(),
            prompt,
        });
        self.deadline = Some(now + self.debounce);
    }

    /// Evaluate the armed deadline.
    ///
    /// Returns the pending prompt when its window has closed and it should
    /// be generated. `busy` (a call already in flight) retains the pending
    /// state for re-evaluation after the call resolves. A pending key equal
    /// to `current_key` is dropped: the user dragged back to the current
    /// sound.
    pub fn poll(
        &mut self,
        now: Instant,
        current_key: Option<&str>,
        busy: bool,
    ) -> Option<PendingPrompt> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        if busy {
            // Keep both pending and deadline; the controller re-polls once
            // the in-flight call resolves.
            return None;
        }
        self.deadline = None;
        let pending = self.pending.take()?;
        if current_key == Some(pending.key.as_str()) {
            tracing::debug!(key = %pending.key, "pending equals current segment, dropped");
            return None;
        }
        Some(pending)
    }

    /// Disarm the timer and drop any pending state.
    pub fn cancel(&mut self) {
        if self.pending.is_some() || self.deadline.is_some() {
            tracing::debug!("regeneration scheduler cancelled");
        }
        self.pending = None;
        self.deadline = None;
    }

    /// Whether a debounce window is currently open.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The armed deadline, if any (for event-loop wakeup scheduling).
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(key: &str) -> CompiledPrompt {
        CompiledPrompt {
            text: format!("text for {key}"),
            cache_key: key.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_only_after_debounce_window() {
        let mut sched = RegenerationScheduler::new(Duration::from_secs(2));
        let t0 = Instant::now();
        sched.note_change(prompt("a"), t0);

        assert!(sched
            .poll(t0 + Duration::from_millis(1999), None, false)
            .is_none());
        let fired = sched.poll(t0 + Duration::from_secs(2), None, false).unwrap();
        assert_eq!(fired.key, "a");
        assert!(!sched.is_armed());
        assert!(!sched.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_to_last_state() {
        let mut sched = RegenerationScheduler::new(Duration::from_secs(2));
        let t0 = Instant::now();
        sched.note_change(prompt("a"), t0);
        sched.note_change(prompt("b"), t0 + Duration::from_millis(500));
        sched.note_change(prompt("c"), t0 + Duration::from_millis(900));

        // Window is measured from the last change.
        assert!(sched
            .poll(t0 + Duration::from_millis(2100), None, false)
            .is_none());
        let fired = sched
            .poll(t0 + Duration::from_millis(2900), None, false)
            .unwrap();
        assert_eq!(fired.key, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn drag_back_to_current_is_a_noop() {
        let mut sched = RegenerationScheduler::new(Duration::from_secs(2));
        let t0 = Instant::now();
        sched.note_change(prompt("current"), t0);
        let fired = sched.poll(t0 + Duration::from_secs(3), Some("current"), false);
        assert!(fired.is_none());
        assert!(!sched.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_retains_pending_for_reevaluation() {
        let mut sched = RegenerationScheduler::new(Duration::from_secs(2));
        let t0 = Instant::now();
        sched.note_change(prompt("next"), t0);

        let due = t0 + Duration::from_secs(3);
        assert!(sched.poll(due, None, true).is_none());
        assert!(sched.has_pending());

        // Once the in-flight call resolves, the same poll succeeds.
        let fired = sched.poll(due, None, false).unwrap();
        assert_eq!(fired.key, "next");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms_and_drops_pending() {
        let mut sched = RegenerationScheduler::default();
        sched.note_change(prompt("a"), Instant::now());
        sched.cancel();
        assert!(!sched.is_armed());
        assert!(sched
            .poll(Instant::now() + Duration::from_secs(10), None, false)
            .is_none());
    }
}
