//! Background worker that runs chains on request.
//!
//! The supervising side talks to the worker through a command queue and
//! reads results back as [`RunEvent`]s. A chain in progress is stopped by
//! the shared interrupt flag, which the executor's cancel token checks at
//! every polling step; queued commands are only read between chains.
//!
//! Every start is numbered when it is queued. An interrupt covers every
//! start queued before it, including ones the worker has not picked up yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{DeviceError, Error};
use crate::executor::{ChainOutcome, ChainRequest, Executor};
use crate::logger;
use crate::platform::Device;
use crate::state::RunState;

/// Command from the supervisor to the worker.
pub enum Command {
    Start { request: ChainRequest, state: RunState },
    Interrupt,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug)]
pub enum RunEvent {
    Started { start: Vec<String> },
    Finished { outcome: ChainOutcome, state: RunState },
    Failed { error: String, interrupted: bool, state: RunState },
}

/// Opens a device for each chain; the device is dropped when the chain ends.
pub type DeviceFactory = Box<dyn FnMut() -> Result<Box<dyn Device>, DeviceError> + Send>;

/// Shared between the handle and the worker. The interrupt flag is only
/// written while this is locked.
#[derive(Debug)]
struct Control {
    state: RunnerState,
    /// Number of the last start queued.
    issued: u64,
    /// Starts numbered up to here are interrupted.
    interrupted_upto: u64,
    /// Number of the chain the worker is running, 0 when idle.
    current: u64,
}

type Shared = Arc<Mutex<Control>>;

fn lock(control: &Mutex<Control>) -> MutexGuard<'_, Control> {
    control.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RunnerHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<RunEvent>,
    control: Shared,
    interrupt: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RunnerHandle {
    /// Queue a chain. Returns false if the worker is gone.
    pub fn start(&self, request: ChainRequest, state: RunState) -> bool {
        let mut control = lock(&self.control);
        control.issued += 1;
        let id = control.issued;
        let sent = self.commands.send(Command::Start { request, state }).is_ok();
        if !sent {
            control.issued = id - 1;
        }
        sent
    }

    /// Stop the running chain and every chain queued so far.
    pub fn interrupt(&self) {
        let mut control = lock(&self.control);
        control.interrupted_upto = control.issued;
        if control.current != 0 {
            self.interrupt.store(true, Ordering::SeqCst);
            control.state = RunnerState::Stopping;
        }
        drop(control);
        self.commands.send(Command::Interrupt).ok();
    }

    pub fn state(&self) -> RunnerState {
        lock(&self.control).state
    }

    pub fn events(&self) -> &mpsc::Receiver<RunEvent> {
        &self.events
    }

    /// Interrupt the running and queued chains, stop the worker and wait
    /// for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else { return };
        self.interrupt();
        self.commands.send(Command::Quit).ok();
        if thread.join().is_err() {
            logger::error_p("runner", "worker panicked");
        }
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    executor: Executor,
    open_device: DeviceFactory,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<RunEvent>,
    control: Shared,
    interrupt: Arc<AtomicBool>,
    /// Number of the next start read off the queue.
    next: u64,
}

impl Worker {
    fn run(mut self) {
        while let Ok(cmd) = self.commands.recv() {
            match cmd {
                Command::Quit => {
                    logger::info_p("runner", "shutting down");
                    break;
                }
                Command::Interrupt => logger::debug_p("runner", "interrupt read between chains"),
                Command::Start { request, state } => self.run_chain(request, state),
            }
        }
        lock(&self.control).state = RunnerState::Stopped;
    }

    fn run_chain(&mut self, request: ChainRequest, mut state: RunState) {
        self.next += 1;
        {
            let mut control = lock(&self.control);
            let interrupted = control.interrupted_upto >= self.next;
            control.current = self.next;
            control.state = if interrupted { RunnerState::Stopping } else { RunnerState::Running };
            self.interrupt.store(interrupted, Ordering::SeqCst);
        }
        logger::info_p("runner", &format!("starting chain {:?}", request.start));
        self.events.send(RunEvent::Started { start: request.start.clone() }).ok();

        let result = match (self.open_device)() {
            Ok(mut device) => self.executor.execute_chain(device.as_mut(), &mut state, &request),
            Err(e) => Err(Error::from(e)),
        };

        {
            let mut control = lock(&self.control);
            control.current = 0;
            control.state = RunnerState::Stopped;
            self.interrupt.store(false, Ordering::SeqCst);
        }
        let event = match result {
            Ok(outcome) => {
                logger::info_p("runner", &format!("chain {:?} finished: {:?}", request.start, outcome));
                RunEvent::Finished { outcome, state }
            }
            Err(e) => {
                let interrupted = matches!(e, Error::Interrupted);
                if interrupted {
                    logger::info_p("runner", &format!("chain {:?} interrupted", request.start));
                } else {
                    logger::error_p("runner", &format!("chain {:?} failed: {}", request.start, e));
                }
                RunEvent::Failed { error: e.to_string(), interrupted, state }
            }
        };
        self.events.send(event).ok();
    }
}

/// Start the worker thread. The executor's cancel token is rewired to the
/// handle's interrupt flag.
pub fn spawn(executor: Executor, open_device: DeviceFactory) -> RunnerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    let interrupt = Arc::new(AtomicBool::new(false));
    let control = Arc::new(Mutex::new(Control {
        state: RunnerState::Stopped,
        issued: 0,
        interrupted_upto: 0,
        current: 0,
    }));

    let worker = Worker {
        executor: executor.with_interrupt(Arc::clone(&interrupt)),
        open_device,
        commands: cmd_rx,
        events: event_tx,
        control: Arc::clone(&control),
        interrupt: Arc::clone(&interrupt),
        next: 0,
    };
    let thread = thread::spawn(move || worker.run());

    RunnerHandle { commands: cmd_tx, events: event_rx, control, interrupt, thread: Some(thread) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use image::Rgb;

    use crate::clock::ManualClock;
    use crate::condition::{Condition, PatternCheck};
    use crate::config::{Action, Config, Document};
    use crate::detect::tests::noise;
    use crate::detect::Detector;
    use crate::effect::Effect;
    use crate::platform::StubDevice;
    use crate::settings::Settings;
    use crate::types::Frame;
    use crate::vision::{PatternStore, Vision};

    const WAIT: Duration = Duration::from_secs(20);

    fn button_screen() -> Frame {
        let mut frame = Frame::from_pixel(60, 40, Rgb([30, 30, 30]));
        image::imageops::replace(&mut frame, &noise(8, 8, 7), 20, 10);
        frame
    }

    /// One action that taps the button; `stuck` makes it wait forever for a
    /// pattern that never shows up.
    fn executor(stuck: bool) -> Executor {
        let mut tap = Action::new("tap")
            .when(Condition::Match(PatternCheck::new("button.png")))
            .then(Effect::ClickPattern { image_path: "button.png".into(), intended_region: None, tap_coords_in_image: None });
        if stuck {
            tap = tap.advance_if(Condition::Match(PatternCheck::new("never.png")));
        }
        let mut doc = Document::empty("runner");
        doc.actions = vec![tap];
        let config = Config::from_document(doc, Path::new(".")).unwrap();
        let vision = Vision::new(PatternStore::new("."), Detector::default());
        vision.store.insert("button.png", noise(8, 8, 7));
        vision.store.insert("never.png", noise(8, 8, 8));
        Executor::new(config, vision, Settings::default()).with_clock(Arc::new(ManualClock::new()))
    }

    fn stub_factory() -> DeviceFactory {
        Box::new(|| Ok::<_, DeviceError>(Box::new(StubDevice::new(vec![button_screen()])) as Box<dyn Device>))
    }

    #[test]
    fn runs_a_chain_to_its_exit() {
        let runner = spawn(executor(false), stub_factory());
        assert!(runner.start(ChainRequest::starting_at(["tap"]).until(["tap"]), RunState::new()));

        assert!(matches!(runner.events().recv_timeout(WAIT), Ok(RunEvent::Started { .. })));
        match runner.events().recv_timeout(WAIT) {
            Ok(RunEvent::Finished { outcome, .. }) => assert_eq!(outcome, ChainOutcome::Completed("tap".into())),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(runner.state(), RunnerState::Stopped);
        runner.shutdown();
    }

    #[test]
    fn interrupt_stops_a_stuck_chain() {
        let runner = spawn(executor(true), stub_factory());
        runner.start(ChainRequest::default(), RunState::new());
        assert!(matches!(runner.events().recv_timeout(WAIT), Ok(RunEvent::Started { .. })));

        runner.interrupt();
        match runner.events().recv_timeout(WAIT) {
            Ok(RunEvent::Failed { interrupted, .. }) => assert!(interrupted),
            other => panic!("unexpected {:?}", other),
        }

        // the runner takes new work after an interrupt
        runner.start(ChainRequest::default(), RunState::new());
        assert!(matches!(runner.events().recv_timeout(WAIT), Ok(RunEvent::Started { .. })));
        runner.interrupt();
        assert!(matches!(runner.events().recv_timeout(WAIT), Ok(RunEvent::Failed { interrupted: true, .. })));
    }

    #[test]
    fn interrupt_reaches_a_chain_not_yet_picked_up() {
        for _ in 0..20 {
            let runner = spawn(executor(true), stub_factory());
            assert!(runner.start(ChainRequest::default(), RunState::new()));
            runner.interrupt();
            assert!(matches!(runner.events().recv_timeout(WAIT), Ok(RunEvent::Started { .. })));
            assert!(matches!(
                runner.events().recv_timeout(WAIT),
                Ok(RunEvent::Failed { interrupted: true, .. })
            ));
            runner.shutdown();
        }
    }

    #[test]
    fn shutdown_does_not_wait_for_queued_chains() {
        let runner = spawn(executor(true), stub_factory());
        for _ in 0..3 {
            runner.start(ChainRequest::default(), RunState::new());
        }
        runner.shutdown();
    }

    #[test]
    fn interrupt_leaves_later_starts_alone() {
        let runner = spawn(executor(false), stub_factory());
        runner.interrupt();
        runner.start(ChainRequest::starting_at(["tap"]).until(["tap"]), RunState::new());
        assert!(matches!(runner.events().recv_timeout(WAIT), Ok(RunEvent::Started { .. })));
        assert!(matches!(runner.events().recv_timeout(WAIT), Ok(RunEvent::Finished { .. })));
    }

    #[test]
    fn device_failure_is_reported() {
        let factory: DeviceFactory = Box::new(|| Err(DeviceError::Disconnected("no device".into())));
        let runner = spawn(executor(false), factory);
        runner.start(ChainRequest::default(), RunState::new());
        assert!(matches!(runner.events().recv_timeout(WAIT), Ok(RunEvent::Started { .. })));
        match runner.events().recv_timeout(WAIT) {
            Ok(RunEvent::Failed { error, interrupted, .. }) => {
                assert!(!interrupted);
                assert!(error.contains("no device"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
