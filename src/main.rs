use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::json;

use tapchain_core::config::Config;
use tapchain_core::debug::DebugImages;
use tapchain_core::detect::Detector;
use tapchain_core::executor::{Candidates, ChainRequest, Executor};
use tapchain_core::logger;
use tapchain_core::platform::{create_device, AdbDevice, Backend, DeviceSettings};
use tapchain_core::runner::{self, RunEvent};
use tapchain_core::settings::Settings;
use tapchain_core::state::RunState;
use tapchain_core::vision::Vision;

#[derive(Parser, Debug)]
#[command(name = "tapchain", version, about = "Drive a screen through a graph of pattern-matched actions")]
struct Cli {
    /// Runtime settings file (defaults apply when missing)
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,
    /// Folder holding one sub-folder per config
    #[arg(long, default_value = "configs")]
    configs: PathBuf,
    /// Mirror log lines to stderr
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a chain against the configured device
    Run(RunArgs),
    /// Score every action against a screenshot and print the ranking
    Score(ScoreArgs),
    /// Load and validate a config, then list its actions
    Check { config: String },
    /// Print the effective settings as JSON
    Settings,
    /// List devices visible to adb
    Devices,
}

#[derive(Args, Debug)]
struct RunArgs {
    config: String,
    /// Starting action (repeatable; none means every action)
    #[arg(long = "start")]
    start: Vec<String>,
    /// Action that completes the chain (repeatable)
    #[arg(long = "exit")]
    exits: Vec<String>,
    /// Minimum seconds between chain steps
    #[arg(long, default_value_t = 0.0)]
    min_delay: f64,
    #[arg(long)]
    max_minutes: Option<f64>,
    /// Replay the PNG screenshots of this folder instead of the configured device
    #[arg(long, conflicts_with = "stub")]
    replay: Option<PathBuf>,
    /// Dry run on blank frames
    #[arg(long, action = ArgAction::SetTrue)]
    stub: bool,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    config: String,
    screenshot: PathBuf,
    /// Only score these actions
    #[arg(long = "action")]
    actions: Vec<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.settings);

    logger::init(&settings.debug.log_folder, settings.log_level, settings.debug.log_expire().ok());
    logger::set_echo(cli.verbose || settings.log_echo);

    match cli.command {
        Commands::Run(args) => command_run(&cli.configs, settings, args),
        Commands::Score(args) => command_score(&cli.configs, settings, args),
        Commands::Check { config } => command_check(&cli.configs, &config),
        Commands::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Devices => {
            for serial in AdbDevice::devices()? {
                println!("{serial}");
            }
            Ok(())
        }
    }
}

fn build_executor(configs: &Path, name: &str, settings: Settings) -> Result<Executor> {
    let config = Config::open(configs, name, false).with_context(|| format!("opening config {name}"))?;
    let mut vision = Vision::new(config.pattern_store(), Detector::default());
    if settings.debug.save_detect_images {
        let images = DebugImages::new(&settings.debug.folder, settings.debug.image_expire().ok());
        vision = vision.with_debug(images);
    }
    Ok(Executor::new(config, vision, settings))
}

fn command_run(configs: &Path, settings: Settings, args: RunArgs) -> Result<()> {
    let mut device = settings.device.clone();
    if args.stub {
        device = DeviceSettings { backend: Backend::Stub, ..device };
    } else if let Some(dir) = args.replay {
        device = DeviceSettings { backend: Backend::Replay { dir }, ..device };
    }

    let executor = build_executor(configs, &args.config, settings)?;
    let mut request = ChainRequest::starting_at(args.start)
        .until(args.exits)
        .min_action_delay(Duration::from_secs_f64(args.min_delay.max(0.0)));
    if let Some(minutes) = args.max_minutes {
        request = request.max_minutes(minutes);
    }

    let handle = runner::spawn(executor, Box::new(move || create_device(&device)));
    if !handle.start(request, RunState::new()) {
        bail!("runner stopped before the chain started");
    }
    loop {
        match handle.events().recv()? {
            RunEvent::Started { start } => logger::info(&format!("chain {:?} started", start)),
            RunEvent::Finished { outcome, .. } => {
                println!("{outcome:?}");
                break;
            }
            RunEvent::Failed { error, .. } => bail!("chain failed: {error}"),
        }
    }
    handle.shutdown();
    Ok(())
}

fn command_score(configs: &Path, settings: Settings, args: ScoreArgs) -> Result<()> {
    let executor = build_executor(configs, &args.config, settings)?;
    let scene = image::open(&args.screenshot)
        .with_context(|| format!("reading {}", args.screenshot.display()))?
        .to_rgb8();
    let scores = executor.score_actions(&scene, &mut RunState::new(), &Candidates::start(&args.actions))?;
    let floor = executor.settings().confidence_floor;
    let rows: Vec<_> = scores
        .iter()
        .map(|s| {
            json!({
                "action": s.name,
                "score": (s.score * 100.0).round() / 100.0,
                "rect": s.rect,
                "viable": s.score > floor,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn command_check(configs: &Path, name: &str) -> Result<()> {
    let config = Config::open(configs, name, false).with_context(|| format!("opening config {name}"))?;
    let store = config.pattern_store();
    let mut missing = 0;
    for action in config.actions() {
        let flag = if action.is_enabled { ' ' } else { '-' };
        println!("{flag} {} -> {:?}", action.name, action.next_action_names);
        for path in action.pattern_paths() {
            if !store.resolve(path).is_file() {
                println!("    missing pattern {path}");
                missing += 1;
            }
        }
    }
    if missing > 0 {
        bail!("{} is missing {missing} pattern image(s)", config.name());
    }
    Ok(())
}
