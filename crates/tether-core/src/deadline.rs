//! Confirm-within-deadline primitive.
//!
//! Session registration, inbound accepts and outbound connects all follow the
//! same protocol: start a timer, wait for the transport to confirm, cancel the
//! timer on confirmation, otherwise fail and record a fault. [`Deadline`] is
//! that protocol, once.
//!
//! # Races
//!
//! The timer and the confirmation are independent events that can arrive in
//! either order:
//!
//! - Confirmation first: [`Deadline::confirm`] settles the deadline, so a
//!   later [`Deadline::expire`] is a no-op.
//! - Expiry first: [`Deadline::expire`] settles the deadline, so a later
//!   confirmation returns [`Settlement::AlreadySettled`] and must not
//!   resurrect the attempt.
//! - Confirmation observed after the window elapsed but before any tick ran:
//!   the confirmation itself reports [`Settlement::TimedOut`], so the caller
//!   records the one and only fault.
//!
//! Whatever the interleaving, a deadline settles exactly once.

use std::time::Duration;

use crate::env::Timepoint;

/// Lifecycle of a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineState {
    /// Waiting for confirmation.
    Pending,
    /// Confirmed inside the window.
    Confirmed,
    /// Window elapsed without confirmation.
    Expired,
    /// Abandoned by the owner (no fault).
    Cancelled,
}

/// Outcome of a confirmation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Confirmation arrived in time.
    Confirmed,
    /// Confirmation arrived, but the window had already elapsed. The caller
    /// treats this exactly like an expiry.
    TimedOut,
    /// The deadline was settled earlier; nothing to do.
    AlreadySettled,
}

/// A single pending confirmation with a timeout window.
#[derive(Debug, Clone)]
pub struct Deadline<I> {
    started_at: I,
    timeout: Duration,
    state: DeadlineState,
}

impl<I: Timepoint> Deadline<I> {
    /// Start a deadline at `now`.
    pub fn start(now: I, timeout: Duration) -> Self {
        Self { started_at: now, timeout, state: DeadlineState::Pending }
    }

    /// Instant at which the window closes.
    pub fn expires_at(&self) -> I {
        self.started_at + self.timeout
    }

    /// Current state.
    pub fn state(&self) -> DeadlineState {
        self.state
    }

    /// True until the deadline settles.
    pub fn is_pending(&self) -> bool {
        self.state == DeadlineState::Pending
    }

    /// Record a confirmation observed at `now`.
    pub fn confirm(&mut self, now: I) -> Settlement {
        if !self.is_pending() {
            return Settlement::AlreadySettled;
        }

        if now >= self.expires_at() {
            self.state = DeadlineState::Expired;
            return Settlement::TimedOut;
        }

        self.state = DeadlineState::Confirmed;
        Settlement::Confirmed
    }

    /// Fire the timer if the window has elapsed.
    ///
    /// Returns `true` exactly once, on the transition to
    /// [`DeadlineState::Expired`].
    pub fn expire(&mut self, now: I) -> bool {
        if self.is_pending() && now >= self.expires_at() {
            self.state = DeadlineState::Expired;
            return true;
        }
        false
    }

    /// Abandon the deadline without a fault.
    pub fn cancel(&mut self) {
        if self.is_pending() {
            self.state = DeadlineState::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use proptest::prelude::*;

    use super::*;

    const WINDOW: Duration = Duration::from_millis(3000);

    #[test]
    fn confirm_inside_window() {
        let t0 = Instant::now();
        let mut deadline = Deadline::start(t0, WINDOW);

        assert_eq!(deadline.confirm(t0 + Duration::from_millis(10)), Settlement::Confirmed);
        assert_eq!(deadline.state(), DeadlineState::Confirmed);

        // Timer firing after confirmation is a no-op.
        assert!(!deadline.expire(t0 + WINDOW * 2));
        assert_eq!(deadline.state(), DeadlineState::Confirmed);
    }

    #[test]
    fn expire_fires_once() {
        let t0 = Instant::now();
        let mut deadline = Deadline::start(t0, WINDOW);

        assert!(!deadline.expire(t0 + Duration::from_millis(2999)));
        assert!(deadline.expire(t0 + WINDOW));
        assert!(!deadline.expire(t0 + WINDOW * 2));
        assert_eq!(deadline.state(), DeadlineState::Expired);
    }

    #[test]
    fn late_confirmation_does_not_resurrect() {
        let t0 = Instant::now();
        let mut deadline = Deadline::start(t0, WINDOW);

        assert!(deadline.expire(t0 + WINDOW));
        assert_eq!(deadline.confirm(t0 + WINDOW), Settlement::AlreadySettled);
        assert_eq!(deadline.state(), DeadlineState::Expired);
    }

    #[test]
    fn confirmation_past_window_times_out() {
        let t0 = Instant::now();
        let mut deadline = Deadline::start(t0, WINDOW);

        assert_eq!(deadline.confirm(t0 + WINDOW + Duration::from_millis(1)), Settlement::TimedOut);
        assert!(!deadline.expire(t0 + WINDOW * 2));
    }

    #[test]
    fn cancel_settles_silently() {
        let t0 = Instant::now();
        let mut deadline = Deadline::start(t0, WINDOW);

        deadline.cancel();
        assert_eq!(deadline.state(), DeadlineState::Cancelled);
        assert!(!deadline.expire(t0 + WINDOW));
        assert_eq!(deadline.confirm(t0), Settlement::AlreadySettled);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Confirm(u16),
        Expire(u16),
        Cancel,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            any::<u16>().prop_map(Step::Confirm),
            any::<u16>().prop_map(Step::Expire),
            Just(Step::Cancel),
        ]
    }

    proptest! {
        /// However confirmations, timer firings and cancellations interleave,
        /// at most one of them reports a timeout, and a confirmed deadline
        /// never reports one.
        #[test]
        fn prop_settles_exactly_once(steps in prop::collection::vec(step_strategy(), 0..20)) {
            let t0 = Instant::now();
            let mut deadline = Deadline::start(t0, WINDOW);
            let mut timeouts = 0;
            let mut confirmations = 0;

            for step in steps {
                match step {
                    Step::Confirm(ms) => {
                        let at = t0 + Duration::from_millis(ms.into());
                        match deadline.confirm(at) {
                            Settlement::Confirmed => confirmations += 1,
                            Settlement::TimedOut => timeouts += 1,
                            Settlement::AlreadySettled => {},
                        }
                    },
                    Step::Expire(ms) => {
                        if deadline.expire(t0 + Duration::from_millis(ms.into())) {
                            timeouts += 1;
                        }
                    },
                    Step::Cancel => deadline.cancel(),
                }
            }

            prop_assert!(timeouts + confirmations <= 1);
            prop_assert_eq!(timeouts == 1, deadline.state() == DeadlineState::Expired);
        }
    }
}
