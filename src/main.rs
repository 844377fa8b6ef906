use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, mpsc},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use fieldrelay::{
    AppConfig, Athlete, CourseDefinition, LogActuator, MemoryStore, RelayController, RelayError,
    ingest::{self, TouchEvent},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SessionArgs {
    /// Course definition (JSON)
    #[arg(short, long)]
    course: PathBuf,

    /// Athletes in queue order (JSON array of {athlete_id, name})
    #[arg(short, long)]
    roster: PathBuf,

    #[arg(long, default_value = "session-1")]
    session_id: String,

    /// Write one JSON line per touch outcome
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dump the store (runs and segments) to this file when done
    #[arg(long)]
    store_snapshot: Option<PathBuf>,

    /// Override the maximum number of athletes on course
    #[arg(long)]
    capacity: Option<usize>,

    /// Override the default start checkpoint
    #[arg(long)]
    start_checkpoint: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded touch log against a course and roster
    Replay {
        #[command(flatten)]
        session: SessionArgs,

        #[arg(short, long)]
        touches: PathBuf,
    },
    /// Read touch events as JSON lines from stdin
    Listen {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Save the configuration to the local config file
    Config {
        #[arg(long)]
        capacity: Option<usize>,

        #[arg(long)]
        start_checkpoint: Option<String>,

        #[arg(long)]
        celebration_secs: Option<u64>,
    },
}

type Controller = RelayController<MemoryStore, LogActuator>;

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn load_roster(path: &Path) -> Result<Vec<Athlete>, RelayError> {
    let content = std::fs::read_to_string(path).map_err(|e| RelayError::InputFileError {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| RelayError::InputParseError {
        path: path.display().to_string(),
        source: e,
    })
}

fn load_config(
    capacity: Option<usize>,
    start_checkpoint: Option<&String>,
) -> Result<AppConfig, RelayError> {
    let mut config = AppConfig::from_local_file()?.unwrap_or_default();
    if let Some(capacity) = capacity {
        config.max_active_runs = capacity;
    }
    if let Some(start) = start_checkpoint {
        config.default_start_checkpoint = start.clone();
    }
    Ok(config)
}

fn save_store_snapshot(controller: &Controller, path: Option<&PathBuf>) -> Result<(), RelayError> {
    match path {
        Some(path) => controller.with_store(|store| store.save_to_file(path))?,
        None => Ok(()),
    }
}

fn start_controller(args: &SessionArgs, started_at_ms: u128) -> Result<Arc<Controller>, RelayError> {
    let config = load_config(args.capacity, args.start_checkpoint.as_ref())?;
    let course = CourseDefinition::from_file(&args.course)?;
    let roster = load_roster(&args.roster)?;

    let mut store = MemoryStore::new();
    store.add_course(&course, course.start_checkpoint_or(&config.default_start_checkpoint))?;
    store.create_session(&args.session_id, &course.course_id, &roster)?;

    let controller = Arc::new(RelayController::new(store, LogActuator, config));
    controller.start_session(&args.session_id, course, started_at_ms)?;
    Ok(controller)
}

fn run_session(
    args: &SessionArgs,
    controller: Arc<Controller>,
    touch_rx: mpsc::Receiver<TouchEvent>,
) -> Result<(), RelayError> {
    let writer = args.output.clone().map(|output_file| {
        let (outcome_tx, outcome_rx) = mpsc::channel::<ingest::OutcomeRecord>();
        let handle = thread::spawn(move || ingest::write_outcomes(&output_file, outcome_rx));
        (outcome_tx, handle)
    });

    let (outcome_tx, writer_handle) = match writer {
        Some((tx, handle)) => (Some(tx), Some(handle)),
        None => (None, None),
    };

    let stats = ingest::collect_touches(controller.as_ref(), touch_rx, outcome_tx)?;
    info!(
        "{} touches: {} attributed, {} dropped, {} session(s) completed",
        stats.received, stats.attributed, stats.dropped, stats.sessions_completed
    );

    if let Some(handle) = writer_handle {
        match handle.join() {
            Ok(result) => {
                result?;
            }
            Err(_) => error!("Outcome writer thread panicked"),
        }
    }

    let snapshot = controller.snapshot()?;
    if snapshot.is_active() {
        info!(
            "Session still active with {} athlete(s) on course",
            snapshot.active_runs.len()
        );
    }

    save_store_snapshot(&controller, args.store_snapshot.as_ref())
}

fn replay(args: &SessionArgs, touches: &Path) -> Result<(), RelayError> {
    let events = ingest::load_touches_jsonl(touches)?;
    let started_at_ms = events.first().map(|e| e.timestamp_ms).unwrap_or_else(now_ms);
    let controller = start_controller(args, started_at_ms)?;

    let (touch_tx, touch_rx) = mpsc::channel::<TouchEvent>();
    for event in events {
        touch_tx.send(event).map_err(|_| RelayError::InvalidTouchLog {
            path: format!("{:?}", touches),
        })?;
    }
    drop(touch_tx);

    run_session(args, controller, touch_rx)
}

fn listen(args: &SessionArgs) -> Result<(), RelayError> {
    let controller = start_controller(args, now_ms())?;

    // outcomes are flushed as they are written, the store snapshot is saved here
    let stop_controller = Arc::clone(&controller);
    let snapshot_path = args.store_snapshot.clone();
    ctrlc::set_handler(move || {
        println!("Exiting...");
        if let Err(e) = stop_controller.stop_session("Stopped by operator") {
            error!("Could not stop session: {}", e);
        }
        if let Err(e) = save_store_snapshot(&stop_controller, snapshot_path.as_ref()) {
            error!("Could not save store snapshot: {}", e);
        }
        std::process::exit(0);
    })
    .expect("Could not set Ctrl-C handler");

    let (touch_tx, touch_rx) = mpsc::channel::<TouchEvent>();
    thread::spawn(move || {
        if let Err(e) = ingest::read_touches(io::stdin().lock(), touch_tx) {
            error!("Error while reading touches: {}", e);
        }
    });

    run_session(args, controller, touch_rx)
}

fn save_config(
    capacity: Option<usize>,
    start_checkpoint: Option<&String>,
    celebration_secs: Option<u64>,
) -> Result<(), RelayError> {
    let mut config = load_config(capacity, start_checkpoint)?;
    if let Some(secs) = celebration_secs {
        config.celebration_secs = secs;
    }
    let path = config.save()?;
    info!("Configuration saved to {}", path.display());
    Ok(())
}

fn main() {
    colog::init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Replay { session, touches } => replay(session, touches),
        Commands::Listen { session } => listen(session),
        Commands::Config {
            capacity,
            start_checkpoint,
            celebration_secs,
        } => save_config(*capacity, start_checkpoint.as_ref(), *celebration_secs),
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
