//! End-to-end scenarios over on-disk configs and synthetic screens.

use std::sync::mpsc;
use std::time::Duration;

use libtest_mimic::{Arguments, Failed, Trial};

use tapchain_core::condition::{Condition, PatternCheck};
use tapchain_core::config::{Action, Document};
use tapchain_core::effect::{Effect, NearestFilter};
use tapchain_core::error::{DeviceError, Error};
use tapchain_core::executor::{ChainOutcome, ChainRequest};
use tapchain_core::hook::ChainEvent;
use tapchain_core::platform::{Device, DeviceCommand, ReplayDevice, StubDevice};
use tapchain_core::routines::Routines;
use tapchain_core::runner::{self, RunEvent};
use tapchain_core::settings::Settings;
use tapchain_core::state::RunState;
use tapchain_core::stats::PersistentStats;
use tapchain_core::types::Frame;
use tapchain_test::{texture, Fixture, Screen};

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        Trial::test("chain_from_disk_reaches_exit", chain_from_disk_reaches_exit),
        Trial::test("replayed_screens_walk_the_chain", replayed_screens_walk_the_chain),
        Trial::test("nearest_candidate_and_row_filter", nearest_candidate_and_row_filter),
        Trial::test("viability_is_the_weakest_condition", viability_is_the_weakest_condition),
        Trial::test("settings_timeout_unwinds_a_stuck_chain", settings_timeout_unwinds_a_stuck_chain),
        Trial::test("runner_streams_chain_events", runner_streams_chain_events),
        Trial::test("dialog_routine_counts_successes", dialog_routine_counts_successes),
        Trial::test("document_save_is_stable", document_save_is_stable),
    ];
    libtest_mimic::run(&args, tests).exit();
}

fn ensure(ok: bool, msg: impl Into<String>) -> Result<(), Failed> {
    if ok {
        Ok(())
    } else {
        Err(msg.into().into())
    }
}

fn near(actual: (i32, i32), expected: (i32, i32)) -> bool {
    (actual.0 - expected.0).abs() <= 1 && (actual.1 - expected.1).abs() <= 1
}

const PATTERNS: [&str; 3] = ["open.png", "claim.png", "close.png"];

fn pattern(i: usize) -> Frame {
    texture(10, 10, i as u32 + 1)
}

/// 120x90 screen showing pattern `i` at its own slot.
fn screen(i: usize) -> Frame {
    Screen::new(120, 90).with(&pattern(i), 10 + 35 * i as i64, 40).build()
}

fn tap(path: &str) -> Effect {
    Effect::ClickPattern { image_path: path.into(), intended_region: None, tap_coords_in_image: None }
}

/// open -> claim -> close, each tapping its own pattern.
fn three_step_fixture() -> Result<Fixture, Failed> {
    let fixture = Fixture::new("daily")?;
    for (i, file) in PATTERNS.iter().enumerate() {
        fixture.pattern(file, &pattern(i))?;
    }
    let mut doc = Document::empty("daily");
    doc.actions = vec![
        Action::new("open").when(Condition::Match(PatternCheck::new("open.png"))).then(tap("open.png")).next("claim"),
        Action::new("claim").when(Condition::Match(PatternCheck::new("claim.png"))).then(tap("claim.png")).next("close"),
        Action::new("close").when(Condition::Match(PatternCheck::new("close.png"))).then(tap("close.png")),
    ];
    fixture.document(&doc)?;
    Ok(fixture)
}

fn chain_from_disk_reaches_exit() -> Result<(), Failed> {
    let fixture = three_step_fixture()?;
    let (mut exec, _) = fixture.executor(Settings::default())?;
    let mut device = StubDevice::reactive(|cmds| screen(cmds.len().min(2)));

    let request = ChainRequest::starting_at(["open"]).until(["close"]);
    let outcome = exec.execute_chain(&mut device, &mut RunState::new(), &request)?;
    ensure(outcome == ChainOutcome::Completed("close".into()), format!("outcome {:?}", outcome))?;

    let clicks = device.clicks();
    ensure(clicks.len() == 3, format!("clicks {:?}", clicks))?;
    for (i, click) in clicks.iter().enumerate() {
        let centre = (15 + 35 * i as i32, 45);
        ensure(near(*click, centre), format!("click {} at {:?}, expected near {:?}", i, click, centre))?;
    }
    Ok(())
}

fn replayed_screens_walk_the_chain() -> Result<(), Failed> {
    let fixture = three_step_fixture()?;
    let dir = fixture.screenshots(&[screen(0), screen(1), screen(2)])?;
    let (mut exec, _) = fixture.executor(Settings::default())?;
    let mut device = ReplayDevice::open(&dir)?;

    let request = ChainRequest::starting_at(["open"]).until(["close"]);
    let outcome = exec.execute_chain(&mut device, &mut RunState::new(), &request)?;
    ensure(outcome == ChainOutcome::Completed("close".into()), format!("outcome {:?}", outcome))
}

fn nearest_candidate_and_row_filter() -> Result<(), Failed> {
    let fixture = Fixture::new("shop")?;
    let (anchor, item) = (texture(12, 12, 10), texture(12, 12, 11));
    fixture.pattern("anchor.png", &anchor)?;
    fixture.pattern("select.png", &item)?;
    let nearest = |name: &str, validator| {
        Action::new(name)
            .when(Condition::Match(PatternCheck::new("anchor.png")))
            .then(Effect::ClickNearest { match_path: "anchor.png".into(), click_path: "select.png".into(), validator })
    };
    let mut doc = Document::empty("shop");
    doc.actions = vec![nearest("closest", None), nearest("same_row", Some(NearestFilter::SameRow))];
    fixture.document(&doc)?;

    let scene = Screen::new(216, 384)
        .centred(&anchor, 160, 200)
        .centred(&item, 110, 170)
        .centred(&item, 20, 202)
        .build();
    let (mut exec, _) = fixture.executor(Settings::default())?;
    for (action, expected) in [("closest", (110, 170)), ("same_row", (20, 202))] {
        let mut device = StubDevice::new(vec![]);
        exec.apply_action(&mut device, action, &scene, &mut RunState::new())?;
        let clicks = device.clicks();
        ensure(
            clicks.len() == 1 && near(clicks[0], expected),
            format!("{}: clicks {:?}, expected near {:?}", action, clicks, expected),
        )?;
    }
    Ok(())
}

fn viability_is_the_weakest_condition() -> Result<(), Failed> {
    let fixture = Fixture::new("weakest")?;
    for (i, file) in PATTERNS.iter().enumerate() {
        fixture.pattern(file, &pattern(i))?;
    }
    let strong = Condition::Match(PatternCheck::new("open.png"));
    let missing = Condition::Match(PatternCheck::new("claim.png"));
    let hidden = Condition::NotMatch(PatternCheck::new("close.png"));
    let mut doc = Document::empty("weakest");
    doc.actions = vec![
        Action::new("blocked").when(strong.clone()).when(missing.clone()),
        Action::new("clear").when(strong.clone()).when(hidden.clone()),
    ];
    fixture.document(&doc)?;
    let (exec, _) = fixture.executor(Settings::default())?;
    let scene = screen(0);
    let mut state = RunState::new();

    let eval_strong = strong.evaluate(&scene, &mut state, exec.vision())?;
    let eval_missing = missing.evaluate(&scene, &mut state, exec.vision())?;
    let eval_hidden = hidden.evaluate(&scene, &mut state, exec.vision())?;
    ensure(eval_strong.score > 80.0, format!("strong scored {}", eval_strong.score))?;
    ensure(eval_missing.score == 0.0, format!("missing scored {}", eval_missing.score))?;
    ensure(eval_hidden.score == 100.0, format!("hidden scored {}", eval_hidden.score))?;

    let blocked = exec.viability("blocked", &scene, &mut state)?;
    ensure(blocked == eval_missing, format!("blocked {:?}", blocked))?;
    let clear = exec.viability("clear", &scene, &mut state)?;
    ensure(clear.score == eval_strong.score && clear.rect == eval_strong.rect, format!("clear {:?}", clear))
}

fn settings_timeout_unwinds_a_stuck_chain() -> Result<(), Failed> {
    let fixture = three_step_fixture()?;
    let path = fixture.root().join("settings.json");
    std::fs::write(&path, r#"{ "timeout_secs": 30, "action_retry_secs": 10 }"#)?;
    let settings = Settings::load(&path);
    ensure(settings.timeout() == Some(Duration::from_secs(30)), "timeout not loaded")?;

    let mut doc = fixture.open()?.document().clone();
    doc.actions[0].advance_if_condition = Some(Condition::Match(PatternCheck::new("close.png")));
    fixture.document(&doc)?;
    let (mut exec, clock) = fixture.executor(settings)?;
    let mut device = StubDevice::new(vec![screen(0)]);

    let result = exec.execute_chain(&mut device, &mut RunState::new(), &ChainRequest::starting_at(["open"]));
    ensure(matches!(result, Err(Error::GlobalTimeout(_))), format!("result {:?}", result))?;
    ensure(clock.elapsed() > Duration::from_secs(30), format!("elapsed {:?}", clock.elapsed()))?;
    // initial tap plus one retry every 10.5s
    ensure(device.clicks().len() == 3, format!("clicks {:?}", device.clicks()))
}

fn runner_streams_chain_events() -> Result<(), Failed> {
    let fixture = three_step_fixture()?;
    let (tx, rx) = mpsc::channel();
    let (exec, _) = fixture.executor(Settings::default())?;
    let handle = runner::spawn(
        exec.with_hook(tx),
        Box::new(|| Ok::<_, DeviceError>(Box::new(StubDevice::reactive(|cmds| screen(cmds.len().min(2)))) as Box<dyn Device>)),
    );
    handle.start(ChainRequest::starting_at(["open"]).until(["close"]), RunState::new());

    let wait = Duration::from_secs(30);
    ensure(matches!(handle.events().recv_timeout(wait), Ok(RunEvent::Started { .. })), "no start event")?;
    match handle.events().recv_timeout(wait) {
        Ok(RunEvent::Finished { outcome: ChainOutcome::Completed(last), .. }) if last == "close" => {}
        other => return Err(format!("unexpected {:?}", other).into()),
    }
    handle.shutdown();

    let performed: Vec<String> = rx
        .try_iter()
        .filter_map(|e| match e {
            ChainEvent::Performing { action, .. } => Some(action),
            _ => None,
        })
        .collect();
    ensure(performed == ["open", "claim", "close"], format!("performed {:?}", performed))
}

fn dialog_routine_counts_successes() -> Result<(), Failed> {
    let fixture = three_step_fixture()?;
    let (mut exec, _) = fixture.executor(Settings::default())?;
    // the dialog closes on the second tap
    let mut device = StubDevice::reactive(|cmds| {
        let taps = cmds.iter().filter(|c| matches!(c, DeviceCommand::Click { .. })).count();
        if taps < 2 {
            screen(0)
        } else {
            screen(2)
        }
    });
    let stats_path = fixture.root().join("stats.json");
    let mut stats = PersistentStats::open(&stats_path);
    let mut state = RunState::new();

    let applied = Routines::new(&mut exec, &mut device, &mut state)
        .with_stats(&mut stats)
        .apply_until_invalid("open", Some("dialogs"))?;
    ensure(applied == 2, format!("applied {}", applied))?;
    ensure(PersistentStats::open(&stats_path).count("dialogs") == 1, "count not persisted")
}

fn document_save_is_stable() -> Result<(), Failed> {
    let fixture = three_step_fixture()?;
    let path = fixture.folder().join(tapchain_core::config::DOCUMENT_NAME);
    let legacy = std::fs::read_to_string(&path)?.replacen("\"screenshot_size\": null", "\"screenshot_size\": false", 1);
    std::fs::write(&path, legacy)?;

    let config = fixture.open()?;
    config.save()?;
    let first = std::fs::read_to_string(&path)?;
    fixture.open()?.save()?;
    let second = std::fs::read_to_string(&path)?;
    ensure(first == second, "save is not byte stable")?;
    ensure(first.contains("\"screenshot_size\": null"), "legacy screenshot_size not normalised")?;
    ensure(fixture.open()?.document() == config.document(), "document changed across reload")
}
