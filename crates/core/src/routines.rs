//! Scripted loops for screens the chain driver handles poorly: dialogs that
//! need repeated taps, and getting back to a known screen.

use crate::error::Result;
use crate::executor::Executor;
use crate::logger;
use crate::platform::Device;
use crate::state::RunState;
use crate::stats::PersistentStats;

pub struct Routines<'a> {
    exec: &'a mut Executor,
    device: &'a mut dyn Device,
    state: &'a mut RunState,
    stats: Option<&'a mut PersistentStats>,
}

impl<'a> Routines<'a> {
    pub fn new(exec: &'a mut Executor, device: &'a mut dyn Device, state: &'a mut RunState) -> Self {
        Self { exec, device, state, stats: None }
    }

    pub fn with_stats(mut self, stats: &'a mut PersistentStats) -> Self {
        self.stats = Some(stats);
        self
    }

    fn pause(&self) -> Result<()> {
        let poll = self.exec.settings().poll_interval();
        self.exec.cancel_token().sleep(poll, poll)
    }

    /// Capture and return the frame plus whether `action` is viable on it.
    fn poll(&mut self, action: &str) -> Result<(crate::types::Frame, bool)> {
        let frame = self.exec.capture(&mut *self.device)?;
        let eval = self.exec.viability(action, &frame, self.state)?;
        logger::debug_p("routine", &format!("{} viability {:.0}", action, eval.score));
        Ok((frame, eval.passed()))
    }

    fn tally(&mut self, stat: Option<&str>) -> Result<()> {
        if let (Some(stats), Some(stat)) = (self.stats.as_deref_mut(), stat) {
            stats.increment(stat)?;
        }
        Ok(())
    }

    /// Wait for `action` to become viable, apply it for as long as it stays
    /// viable, and succeed once it no longer is (a dialog that closes when
    /// answered). Returns how many times it was applied.
    pub fn apply_until_invalid(&mut self, action: &str, success_stat: Option<&str>) -> Result<u32> {
        let mut applied = 0;
        loop {
            self.pause()?;
            let (frame, viable) = self.poll(action)?;
            if viable {
                self.exec.apply_action(&mut *self.device, action, &frame, self.state)?;
                applied += 1;
            } else if applied > 0 {
                self.tally(success_stat)?;
                return Ok(applied);
            }
        }
    }

    /// Like [`Routines::apply_until_invalid`], but done once `next` is viable
    /// after at least one application (for buttons that stay on screen).
    pub fn apply_until_next(&mut self, action: &str, next: &str, success_stat: Option<&str>) -> Result<u32> {
        let mut applied = 0;
        loop {
            self.pause()?;
            let (frame, viable) = self.poll(action)?;
            if viable {
                self.exec.apply_action(&mut *self.device, action, &frame, self.state)?;
                applied += 1;
            } else if applied > 0 && self.exec.viability(next, &frame, self.state)?.passed() {
                self.tally(success_stat)?;
                return Ok(applied);
            }
        }
    }

    /// Press back until `action` has been viable for `settle_polls`
    /// consecutive polls. Returns how many times back was pressed.
    pub fn back_until_viable(&mut self, action: &str, settle_polls: u32) -> Result<u32> {
        let mut backs = 0;
        let mut seen = 0;
        loop {
            let (_, viable) = self.poll(action)?;
            if viable {
                seen += 1;
                if seen >= settle_polls {
                    return Ok(backs);
                }
            } else {
                seen = 0;
                self.device.press_back()?;
                backs += 1;
            }
            self.pause()?;
        }
    }
}
