use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::executor::{Candidates, ChainState};
use crate::types::Frame;

/// Observer of a chain execution. Every method defaults to a no-op.
pub trait ExecutionHook: Send {
    /// Whether annotated frames should be rendered for this hook.
    fn wants_frames(&self) -> bool {
        false
    }

    fn starting_chain(&mut self, _start: &[String]) {}

    fn state_changed(&mut self, _state: &ChainState) {}

    fn searching_for_action(&mut self, _candidates: &Candidates) {}

    fn performing_action(&mut self, _action: &str, _annotated: Option<Arc<Frame>>) {}

    fn after_action(&mut self, _action: &str, _cooldown: f64) {}

    fn waiting_to_advance(&mut self, _action: &str, _waited: Duration, _retry_after: Duration, _retries: u32) {}

    fn action_search_failed(&mut self, _annotated: Option<Arc<Frame>>) {}

    fn check_condition_result(&mut self, _description: &str, _success: bool, _annotated: Option<Arc<Frame>>) {}

    fn chain_completed(&mut self, _start: &[String], _last: &str) {}

    fn chain_timed_out(&mut self, _start: &[String], _elapsed: Duration) {}
}

/// Hook that ignores everything.
pub struct NoHook;

impl ExecutionHook for NoHook {}

/// Hook callbacks as data, for a supervising thread.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    Starting { start: Vec<String> },
    State(ChainState),
    Searching(Candidates),
    Performing { action: String, frame: Option<Arc<Frame>> },
    AfterAction { action: String, cooldown: f64 },
    Waiting { action: String, waited: Duration, retry_after: Duration, retries: u32 },
    SearchFailed { frame: Option<Arc<Frame>> },
    CheckResult { description: String, success: bool, frame: Option<Arc<Frame>> },
    Completed { start: Vec<String>, last: String },
    TimedOut { start: Vec<String>, elapsed: Duration },
}

impl ExecutionHook for mpsc::Sender<ChainEvent> {
    fn wants_frames(&self) -> bool {
        true
    }

    fn starting_chain(&mut self, start: &[String]) {
        self.send(ChainEvent::Starting { start: start.to_vec() }).ok();
    }

    fn state_changed(&mut self, state: &ChainState) {
        self.send(ChainEvent::State(state.clone())).ok();
    }

    fn searching_for_action(&mut self, candidates: &Candidates) {
        self.send(ChainEvent::Searching(candidates.clone())).ok();
    }

    fn performing_action(&mut self, action: &str, annotated: Option<Arc<Frame>>) {
        self.send(ChainEvent::Performing { action: action.to_string(), frame: annotated }).ok();
    }

    fn after_action(&mut self, action: &str, cooldown: f64) {
        self.send(ChainEvent::AfterAction { action: action.to_string(), cooldown }).ok();
    }

    fn waiting_to_advance(&mut self, action: &str, waited: Duration, retry_after: Duration, retries: u32) {
        self.send(ChainEvent::Waiting { action: action.to_string(), waited, retry_after, retries }).ok();
    }

    fn action_search_failed(&mut self, annotated: Option<Arc<Frame>>) {
        self.send(ChainEvent::SearchFailed { frame: annotated }).ok();
    }

    fn check_condition_result(&mut self, description: &str, success: bool, annotated: Option<Arc<Frame>>) {
        self.send(ChainEvent::CheckResult { description: description.to_string(), success, frame: annotated }).ok();
    }

    fn chain_completed(&mut self, start: &[String], last: &str) {
        self.send(ChainEvent::Completed { start: start.to_vec(), last: last.to_string() }).ok();
    }

    fn chain_timed_out(&mut self, start: &[String], elapsed: Duration) {
        self.send(ChainEvent::TimedOut { start: start.to_vec(), elapsed }).ok();
    }
}
