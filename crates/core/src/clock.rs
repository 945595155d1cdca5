use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Time source for every polling loop; tests swap in [`ManualClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

/// Virtual clock: `sleep` advances time instantly.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { base: Instant::now(), offset: Mutex::new(Duration::ZERO) }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut o) = self.offset.lock() {
            *o = o.saturating_add(d);
        }
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|o| *o).unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// Cancellation token checked at every state transition and polling step:
/// an interrupt flag shared with the supervising thread plus an optional
/// wall-clock deadline.
#[derive(Clone)]
pub struct CancelToken {
    clock: Arc<dyn Clock>,
    interrupt: Arc<AtomicBool>,
    deadline: Option<(Instant, Duration)>,
}

impl CancelToken {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, interrupt: Arc::new(AtomicBool::new(false)), deadline: None }
    }

    /// Share an interrupt flag owned by someone else (e.g. a runner handle).
    pub fn with_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Arm a global deadline `timeout` from now.
    /// A timeout too large to represent never fires.
    pub fn arm(&mut self, timeout: Duration) {
        self.deadline = self.clock.now().checked_add(timeout).map(|at| (at, timeout));
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    pub fn check(&self) -> Result<()> {
        if self.interrupt.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        match self.deadline {
            Some((at, timeout)) if self.clock.now() > at => Err(Error::GlobalTimeout(timeout)),
            _ => Ok(()),
        }
    }

    /// Sleep `total` in `tick`-sized steps, checking the token between steps.
    pub fn sleep(&self, total: Duration, tick: Duration) -> Result<()> {
        let end = self.clock.now().checked_add(total).ok_or_else(|| {
            Error::InvalidInput(format!("sleep of {:?} is out of range", total))
        })?;
        loop {
            self.check()?;
            let now = self.clock.now();
            if now >= end {
                return Ok(());
            }
            let step = if tick.is_zero() { end - now } else { tick.min(end - now) };
            self.clock.sleep(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_fires_after_timeout() {
        let clock = Arc::new(ManualClock::new());
        let mut token = CancelToken::new(clock.clone());
        token.arm(Duration::from_secs(5));
        assert!(token.check().is_ok());
        clock.advance(Duration::from_secs(6));
        assert!(matches!(token.check(), Err(Error::GlobalTimeout(_))));
        token.disarm();
        assert!(token.check().is_ok());
    }

    #[test]
    fn interrupt_wins_over_sleep() {
        let clock = Arc::new(ManualClock::new());
        let token = CancelToken::new(clock.clone());
        token.interrupt();
        assert!(matches!(
            token.sleep(Duration::from_secs(1), Duration::from_millis(100)),
            Err(Error::Interrupted)
        ));
    }

    #[test]
    fn oversized_waits_do_not_panic() {
        let clock = Arc::new(ManualClock::new());
        let mut token = CancelToken::new(clock.clone());
        token.arm(Duration::MAX);
        assert!(token.check().is_ok());
        assert!(matches!(token.sleep(Duration::MAX, Duration::from_secs(1)), Err(Error::InvalidInput(_))));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn tick_sleep_consumes_exact_total() {
        let clock = Arc::new(ManualClock::new());
        let token = CancelToken::new(clock.clone());
        token.sleep(Duration::from_millis(250), Duration::from_millis(100)).unwrap();
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }
}
