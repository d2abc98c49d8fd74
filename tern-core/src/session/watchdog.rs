//! Idle watchdog: one rearmable deadline and one pending wait.
//!
//! Arming only moves the deadline. Whether anything happens when it
//! passes is decided by the wait: [`Watchdog::launch`] installs the
//! action, the driver sleeps until [`Watchdog::deadline`], and
//! [`Watchdog::poll`] hands the action back once the deadline has really
//! passed. A wake-up that finds the deadline moved into the future keeps
//! the wait pending.

use std::time::Duration;

use tokio::time::Instant;

use super::Session;

/// One-shot handler run instead of the default escalation.
pub type TimerHandler = Box<dyn FnOnce(&mut Session) + Send>;

/// What a wait does when the deadline passes.
pub enum TimerAction {
    /// Probe the peer with a ping, then force close if it stays silent.
    Default,
    /// Application handler, run once.
    Custom(TimerHandler),
    /// Second stage of the default escalation.
    ForceClose,
}

impl std::fmt::Debug for TimerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Custom(_) => write!(f, "Custom"),
            Self::ForceClose => write!(f, "ForceClose"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Watchdog {
    /// `None` means infinitely far away.
    expiry: Option<Instant>,
    wait: Option<TimerAction>,
}

impl Watchdog {
    /// A watchdog with an infinite deadline and no wait.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the deadline to `now + window`. A pending wait is kept.
    pub fn arm(&mut self, window: Duration) {
        self.expiry = Some(Instant::now() + window);
    }

    pub fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    /// Install the pending wait, replacing any previous one.
    pub fn launch(&mut self, action: TimerAction) {
        self.wait = Some(action);
    }

    /// Drop the pending wait without firing it.
    pub fn cancel(&mut self) {
        self.wait = None;
    }

    pub fn is_waiting(&self) -> bool {
        self.wait.is_some()
    }

    /// Whether the idle window already expired and only the force close
    /// stage is left.
    pub fn is_escalated(&self) -> bool {
        matches!(self.wait, Some(TimerAction::ForceClose))
    }

    /// When the driver should next wake up, if ever.
    pub fn deadline(&self) -> Option<Instant> {
        self.wait.as_ref().and(self.expiry)
    }

    /// Take the pending action if the deadline has passed at `now`.
    ///
    /// Returns `None` for a stale wake-up; the wait stays pending.
    pub fn poll(&mut self, now: Instant) -> Option<TimerAction> {
        match self.expiry {
            Some(expiry) if expiry <= now => self.wait.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn starts_infinite() {
        let mut dog = Watchdog::new();
        dog.launch(TimerAction::Default);
        assert_eq!(dog.deadline(), None);
        assert!(dog.poll(Instant::now() + Duration::from_secs(3600)).is_none());
        assert!(dog.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fire_keeps_waiting() {
        let mut dog = Watchdog::new();
        dog.arm(Duration::from_secs(10));
        dog.launch(TimerAction::ForceClose);
        let first = dog.deadline().unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        dog.arm(Duration::from_secs(10));

        // Wake-up at the old deadline finds it moved.
        assert!(dog.poll(first).is_none());
        assert!(dog.is_waiting());
        assert!(dog.deadline().unwrap() > first);

        let fired = dog.poll(dog.deadline().unwrap());
        assert!(matches!(fired, Some(TimerAction::ForceClose)));
        assert!(!dog.is_waiting());
        assert_eq!(dog.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_replaces_pending_action() {
        let mut dog = Watchdog::new();
        dog.arm(Duration::from_secs(1));
        dog.launch(TimerAction::ForceClose);
        dog.launch(TimerAction::Default);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(dog.poll(Instant::now()), Some(TimerAction::Default)));
    }

    #[test]
    fn escalated_only_while_force_close_waits() {
        let mut dog = Watchdog::new();
        assert!(!dog.is_escalated());
        dog.launch(TimerAction::Default);
        assert!(!dog.is_escalated());
        dog.launch(TimerAction::ForceClose);
        assert!(dog.is_escalated());
        dog.launch(TimerAction::Custom(Box::new(|_: &mut Session| {})));
        assert!(!dog.is_escalated());
        dog.launch(TimerAction::ForceClose);
        dog.cancel();
        assert!(!dog.is_escalated());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_wait() {
        let mut dog = Watchdog::new();
        dog.arm(Duration::from_secs(1));
        dog.launch(TimerAction::Default);
        dog.cancel();
        assert_eq!(dog.deadline(), None);
        assert!(dog.expiry().is_some());
    }
}
