use core::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// Host hooks used while blocking.
///
/// The kernel host backs this with its monotonic clock and `schedule()`;
/// tests back it with `std::time::Instant` and `thread::yield_now`.
pub trait Sleeper: Sync {
    /// Monotonic time since an arbitrary epoch.
    fn now(&self) -> Duration;

    /// Give the CPU away for a moment.
    fn relax(&self);
}

/// A wait ran past its deadline.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TimedOut;

/// One-shot completion signal.
///
/// Any number of waiters may block on it; [`complete`](Self::complete) wakes
/// all of them and every later wait returns immediately.
#[derive(Debug, Default)]
pub struct Completion {
    done: AtomicBool,
}

impl Completion {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Signal completion. Writes made before this call are visible to waiters.
    #[inline]
    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Block until completed, or until `timeout` elapsed (`None` waits forever).
    ///
    /// # Errors
    /// [`TimedOut`] if the deadline passed first.
    pub fn wait(&self, sleeper: &dyn Sleeper, timeout: Option<Duration>) -> Result<(), TimedOut> {
        let deadline = timeout.map(|t| sleeper.now().saturating_add(t));
        loop {
            if self.is_complete() {
                return Ok(());
            }
            if let Some(deadline) = deadline
                && sleeper.now() >= deadline
            {
                return if self.is_complete() { Ok(()) } else { Err(TimedOut) };
            }
            sleeper.relax();
        }
    }
}
