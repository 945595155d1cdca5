//! The action-chain state machine.
//!
//! One chain runs strictly sequentially: capture, score every candidate,
//! apply the best one, wait for it to take effect, then move on to its
//! successors. The cancel token is checked at every transition and every
//! polling step.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{CancelToken, Clock, SystemClock};
use crate::condition::{Condition, Evaluation};
use crate::config::{Action, Config};
use crate::debug::annotate;
use crate::effect::Context;
use crate::error::{Error, Result};
use crate::hook::{ExecutionHook, NoHook};
use crate::logger;
use crate::platform::Device;
use crate::settings::{seconds, ConfirmPolicy, Settings};
use crate::state::RunState;
use crate::types::{Frame, Rect, Size};
use crate::vision::Vision;

/// Actions eligible in the current search.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidates {
    /// Every action in the config.
    All,
    /// Only these; an empty list means the chain has nowhere to go.
    Named(Vec<String>),
}

impl Candidates {
    /// Starting candidates: blank names are dropped, and no names means all.
    pub fn start(names: &[String]) -> Self {
        let names: Vec<String> = names.iter().filter(|n| !n.is_empty()).cloned().collect();
        if names.is_empty() {
            Candidates::All
        } else {
            Candidates::Named(names)
        }
    }
}

impl fmt::Display for Candidates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidates::All => write!(f, "<all actions>"),
            Candidates::Named(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainState {
    Searching(Candidates),
    Confirming(String),
    Applying(String),
    WaitingToAdvance(String),
    Completed(String),
    TimedOut,
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionScore {
    pub name: String,
    pub score: f64,
    pub rect: Rect,
}

/// Result of one `execute_best_action` tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Applied { action: String, next: Vec<String> },
    /// Nothing cleared the confidence floor; try again on the next capture.
    Idle,
    /// No candidates to score.
    Exhausted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainRequest {
    pub start: Vec<String>,
    pub exits: Vec<String>,
    pub min_action_delay: Duration,
    pub max_minutes: Option<f64>,
}

impl ChainRequest {
    pub fn starting_at<I, S>(start: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { start: start.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub fn until<I, S>(mut self, exits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exits = exits.into_iter().map(Into::into).collect();
        self
    }

    pub fn min_action_delay(mut self, delay: Duration) -> Self {
        self.min_action_delay = delay;
        self
    }

    pub fn max_minutes(mut self, minutes: f64) -> Self {
        self.max_minutes = (minutes > 0.0).then_some(minutes);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// An exit action was applied.
    Completed(String),
    /// `max_minutes` ran out.
    TimedOut { last: Option<String> },
    /// The last applied action had no successors.
    Exhausted { last: Option<String> },
}

pub struct Executor {
    config: Config,
    vision: Vision,
    settings: Settings,
    cancel: CancelToken,
    hook: Box<dyn ExecutionHook>,
    size_warned: bool,
}

impl Executor {
    pub fn new(config: Config, vision: Vision, settings: Settings) -> Self {
        Self {
            config,
            vision,
            settings,
            cancel: CancelToken::new(Arc::new(SystemClock)),
            hook: Box::new(NoHook),
            size_warned: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cancel = CancelToken::new(clock).with_flag(self.cancel.flag());
        self
    }

    /// Share an interrupt flag with a supervising thread.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = self.cancel.clone().with_flag(flag);
        self
    }

    pub fn with_hook(mut self, hook: impl ExecutionHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn set_hook(&mut self, hook: Box<dyn ExecutionHook>) {
        self.hook = hook;
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn arm_timeout(&mut self, timeout: Duration) {
        self.cancel.arm(timeout);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn vision(&self) -> &Vision {
        &self.vision
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn clock(&self) -> &dyn Clock {
        self.cancel.clock()
    }

    fn set_state(&mut self, state: ChainState) {
        logger::debug_p("executor", &format!("state {:?}", state));
        self.hook.state_changed(&state);
    }

    fn annotated(&self, scene: &Frame, boxes: &[(f64, Rect)]) -> Option<Arc<Frame>> {
        self.hook.wants_frames().then(|| Arc::new(annotate(scene, boxes)))
    }

    /// Capture a frame, warning once if it differs from the size the config
    /// was recorded at.
    pub fn capture(&mut self, device: &mut dyn Device) -> Result<Frame> {
        self.cancel.check()?;
        let frame = device.capture()?;
        if let Some(expected) = self.config.screenshot_size() {
            let actual = Size::of(&frame);
            if actual != expected && !self.size_warned {
                logger::warn_p(
                    "executor",
                    &format!("{} captured {} but {} was recorded at {}", device.name(), actual, self.config.name(), expected),
                );
                self.size_warned = true;
            }
        }
        Ok(frame)
    }

    /// Viability of every candidate, best first; equal scores keep
    /// candidate order.
    pub fn score_actions(&self, scene: &Frame, state: &mut RunState, candidates: &Candidates) -> Result<Vec<ActionScore>> {
        let names: Vec<&str> = match candidates {
            Candidates::All => self.config.actions().iter().map(|a| a.name.as_str()).collect(),
            Candidates::Named(names) => names.iter().map(String::as_str).filter(|n| !n.is_empty()).collect(),
        };
        let mut scores = Vec::with_capacity(names.len());
        for name in names {
            let action = self.config.get_action(name)?;
            let eval = action.viability(scene, state, &self.vision).map_err(|e| {
                logger::error_p("executor", &format!("scoring {} failed: {}", name, e));
                e
            })?;
            scores.push(ActionScore { name: name.to_string(), score: eval.score, rect: eval.rect });
        }
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scores)
    }

    /// Score the candidates on `scene` and run the best one if it clears
    /// the confidence floor.
    pub fn execute_best_action(
        &mut self,
        device: &mut dyn Device,
        scene: &Frame,
        state: &mut RunState,
        candidates: &Candidates,
        exits: &[String],
    ) -> Result<Step> {
        self.cancel.check()?;
        self.set_state(ChainState::Searching(candidates.clone()));
        self.hook.searching_for_action(candidates);

        let scores = self.score_actions(scene, state, candidates)?;
        let Some(best) = scores.first().cloned() else {
            logger::info_p("executor", &format!("no candidates in {}", candidates));
            return Ok(Step::Exhausted);
        };
        let boxes: Vec<(f64, Rect)> = scores.iter().map(|s| (s.score, s.rect)).collect();
        let floor = self.settings.confidence_floor;

        if best.score <= floor {
            logger::debug_p("executor", &format!("nothing viable; best {} at {:.0}", best.name, best.score));
            let frame = self.annotated(scene, &boxes);
            self.hook.action_search_failed(frame);
            return Ok(Step::Idle);
        }
        let action = self.config.get_action(&best.name)?.clone();

        let mut fresh = None;
        if self.config.confirm_all() {
            self.cancel.check()?;
            self.set_state(ChainState::Confirming(action.name.clone()));
            if self.settings.confirm_policy == ConfirmPolicy::FreshCapture {
                fresh = Some(self.capture(device)?);
            }
            let frame = fresh.as_ref().unwrap_or(scene);
            let confirm = action.viability(frame, state, &self.vision)?;
            if confirm.score < floor {
                logger::debug_p(
                    "executor",
                    &format!("confirm failed for {} (viability {:.0})", action.name, confirm.score),
                );
                let frame = self.annotated(scene, &boxes);
                self.hook.action_search_failed(frame);
                return Ok(Step::Idle);
            }
        }
        let target = fresh.as_ref().unwrap_or(scene);

        self.cancel.check()?;
        self.set_state(ChainState::Applying(action.name.clone()));
        logger::info_p("executor", &format!("running {} (viability {:.0})", action.name, best.score));
        let frame = self.annotated(target, &boxes);
        self.hook.performing_action(&action.name, frame);

        if let Err(e) = self.apply_and_wait(device, &action, target, state) {
            if !matches!(e, Error::Interrupted | Error::GlobalTimeout(_)) {
                logger::error_p(
                    "executor",
                    &format!("{} (viability {:.0}) failed: {}", action.name, best.score, e),
                );
            }
            return Err(e);
        }

        let next: Vec<String> = action.next_action_names.iter().filter(|n| !n.is_empty()).cloned().collect();
        if next.is_empty() && self.settings.strict_exit && !exits.is_empty() && !exits.contains(&action.name) {
            logger::error_p("executor", &format!("{} has no successors and {:?} was never reached", action.name, exits));
            return Err(Error::UnreachedExit { exits: exits.to_vec() });
        }
        Ok(Step::Applied { action: action.name, next })
    }

    /// Viability of the named action on `scene`.
    pub fn viability(&self, action: &str, scene: &Frame, state: &mut RunState) -> Result<Evaluation> {
        self.config.get_action(action)?.viability(scene, state, &self.vision)
    }

    /// Run the named action's effects once, without cooldown or waiting.
    pub fn apply_action(&mut self, device: &mut dyn Device, action: &str, scene: &Frame, state: &mut RunState) -> Result<()> {
        let action = self.config.get_action(action)?.clone();
        logger::info_p("executor", &format!("applying {}", action.name));
        self.apply(device, &action, scene, state)
    }

    fn apply(&mut self, device: &mut dyn Device, action: &Action, scene: &Frame, state: &mut RunState) -> Result<()> {
        let mut ctx = Context { device: &mut *device, state, vision: &self.vision };
        action.apply(scene, &mut ctx)
    }

    fn viable_successor(&self, action: &Action, frame: &Frame, state: &mut RunState) -> Result<Option<String>> {
        for name in action.next_action_names.iter().filter(|n| !n.is_empty()) {
            if self.config.get_action(name)?.viability(frame, state, &self.vision)?.passed() {
                return Ok(Some(name.clone()));
            }
        }
        Ok(None)
    }

    /// Apply `action`, sit out its cooldown, then (if it has an advance
    /// condition) poll until that condition or a successor holds. The
    /// effects are re-applied whenever the retry duration passes with the
    /// action itself still viable.
    pub fn apply_and_wait(
        &mut self,
        device: &mut dyn Device,
        action: &Action,
        scene: &Frame,
        state: &mut RunState,
    ) -> Result<()> {
        self.apply(device, action, scene, state)?;
        self.hook.after_action(&action.name, action.cooldown);
        if action.cooldown > 0.0 {
            logger::info_p("executor", &format!("{} cooling down for {:.2}s", action.name, action.cooldown));
            self.cancel.sleep(seconds(action.cooldown, "cooldown")?, self.settings.cooldown_tick())?;
        }

        let Some(advance) = &action.advance_if_condition else { return Ok(()) };
        self.set_state(ChainState::WaitingToAdvance(action.name.clone()));
        let retry = self.settings.retry_duration();
        let poll = self.settings.poll_interval();
        let start = self.clock().now();
        let mut last_retry = start;
        let mut retries = 0u32;

        loop {
            self.cancel.check()?;
            let frame = self.capture(device)?;
            let now = self.clock().now();
            self.hook.waiting_to_advance(&action.name, now - start, retry, retries);

            if advance.evaluate(&frame, state, &self.vision)?.passed() {
                logger::info_p("executor", &format!("{} advanced", action.name));
                return Ok(());
            }
            if let Some(next) = self.viable_successor(action, &frame, state)? {
                logger::info_p("executor", &format!("{} advanced: {} became viable", action.name, next));
                return Ok(());
            }

            if now - last_retry > retry {
                let frame = self.capture(device)?;
                let viability = action.viability(&frame, state, &self.vision)?;
                if viability.passed() {
                    retries += 1;
                    self.apply(device, action, &frame, state)?;
                    logger::debug_p(
                        "executor",
                        &format!("retried {} (#{}, viability {:.0})", action.name, retries, viability.score),
                    );
                    last_retry = self.clock().now();
                }
            }
            self.cancel.sleep(poll, poll)?;
        }
    }

    /// True when every condition reaches its threshold on `scene`.
    pub fn check_conditions(
        &mut self,
        conditions: &[Condition],
        description: &str,
        scene: &Frame,
        state: &mut RunState,
    ) -> Result<bool> {
        let mut success = true;
        let mut boxes = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let eval = condition.evaluate(scene, state, &self.vision)?;
            success &= eval.score >= condition.threshold();
            boxes.push((eval.score, eval.rect));
        }
        logger::debug_p("executor", &format!("check {}: {}", description, success));
        let frame = self.annotated(scene, &boxes);
        self.hook.check_condition_result(description, success, frame);
        Ok(success)
    }

    fn tick(
        &mut self,
        device: &mut dyn Device,
        state: &mut RunState,
        candidates: &Candidates,
        exits: &[String],
    ) -> Result<Step> {
        let scene = self.capture(device)?;
        self.execute_best_action(device, &scene, state, candidates, exits)
    }

    /// Drive a chain from `request.start` until an exit action runs, the
    /// candidates run out, or `max_minutes` passes. Transient device errors
    /// cost a backoff and a missed tick; everything else propagates.
    pub fn execute_chain(
        &mut self,
        device: &mut dyn Device,
        state: &mut RunState,
        request: &ChainRequest,
    ) -> Result<ChainOutcome> {
        let armed_here = match self.settings.timeout() {
            Some(timeout) if !self.cancel.is_armed() => {
                self.cancel.arm(timeout);
                true
            }
            _ => false,
        };
        let outcome = self.run_chain(device, state, request);
        if armed_here {
            self.cancel.disarm();
        }
        match &outcome {
            Err(Error::GlobalTimeout(_)) => self.set_state(ChainState::TimedOut),
            Err(e) => self.set_state(ChainState::Aborted(e.to_string())),
            Ok(_) => {}
        }
        outcome
    }

    fn run_chain(&mut self, device: &mut dyn Device, state: &mut RunState, request: &ChainRequest) -> Result<ChainOutcome> {
        self.hook.starting_chain(&request.start);
        let mut candidates = Candidates::start(&request.start);
        let mut last: Option<String> = None;
        let started = self.clock().now();

        loop {
            self.cancel.check()?;
            let tick_start = self.clock().now();
            logger::info_p(
                "executor",
                &format!(
                    "chain {:?} running {:.2} min; next {}",
                    request.start,
                    (tick_start - started).as_secs_f64() / 60.0,
                    candidates
                ),
            );

            match self.tick(device, state, &candidates, &request.exits) {
                Ok(Step::Applied { action, next }) => {
                    last = Some(action.clone());
                    if request.exits.contains(&action) {
                        logger::info_p("executor", &format!("chain {:?} completed -> {}", request.start, action));
                        self.set_state(ChainState::Completed(action.clone()));
                        self.hook.chain_completed(&request.start, &action);
                        return Ok(ChainOutcome::Completed(action));
                    }
                    if next.is_empty() {
                        return Ok(ChainOutcome::Exhausted { last });
                    }
                    candidates = Candidates::Named(next);
                }
                Ok(Step::Idle) => {}
                Ok(Step::Exhausted) => return Ok(ChainOutcome::Exhausted { last }),
                Err(e) if e.is_transient() => {
                    let backoff = self.settings.device_backoff();
                    logger::error_p("executor", &format!("{}; retrying in {:?}", e, backoff));
                    self.cancel.sleep(backoff, self.settings.cooldown_tick())?;
                }
                Err(e) => return Err(e),
            }

            let elapsed = self.clock().now() - started;
            if let Some(max) = request.max_minutes {
                if elapsed.as_secs_f64() > max * 60.0 {
                    logger::warn_p("executor", &format!("chain {:?} exceeded {} minutes", request.start, max));
                    self.set_state(ChainState::TimedOut);
                    self.hook.chain_timed_out(&request.start, elapsed);
                    return Ok(ChainOutcome::TimedOut { last });
                }
            }

            let spent = self.clock().now() - tick_start;
            if spent < request.min_action_delay {
                self.cancel.sleep(request.min_action_delay - spent, self.settings.cooldown_tick())?;
            }
        }
    }
}
