use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use macro_runner::controller::{Commander, Controller, RunnerEvent};
use macro_runner::dom::BrowserSession;
use macro_runner::face::{self, AppState};
use macro_runner::page::Page;
use macro_runner::run_state::RunStateStore;
use macro_runner::storage::{JsonFileStorage, Storage};
use macro_runner::supervisor::{RunReport, Supervisor};
use macro_runner::{Config, Macro, Step};

#[derive(Parser)]
#[command(name = "macro-runner", version, about = "Replays recorded browser macros")]
struct Cli {
    /// Directory for the run checkpoint and sequence counters
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    /// Chrome remote debugging URL to attach to
    #[arg(long, global = true)]
    chrome_url: Option<String>,
    /// Launch Chrome headless when none is running
    #[arg(long, global = true)]
    headless: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a macro from a JSON file
    Run {
        file: PathBuf,
        #[arg(long)]
        repeat: Option<u32>,
    },
    /// Continue an interrupted run
    Resume,
    /// Forget any interrupted run
    Stop,
    /// Perform a single step from a JSON file and report the result
    TestStep { file: PathBuf },
    /// Serve the web UI
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load();
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    if let Some(url) = cli.chrome_url {
        config.chrome_url = url;
    }
    config.headless |= cli.headless;

    let files = JsonFileStorage::new(&config.state_dir);
    info!("[Runner] state dir {}", files.dir().display());
    let storage: Arc<dyn Storage> = Arc::new(files);

    if let Command::Stop = cli.command {
        RunStateStore::new(storage).try_clear().await?;
        info!("[Runner] interrupted run cleared");
        return Ok(());
    }

    let launch_config = config.clone();
    let session = tokio::task::spawn_blocking(move || BrowserSession::launch(&launch_config))
        .await
        .map_err(|e| anyhow::anyhow!("browser launch panicked: {e}"))??;
    let page: Arc<dyn Page> = Arc::new(session.page());
    let spawn_context = move || Controller::new(page.clone(), storage.clone()).spawn();

    match cli.command {
        Command::Run { file, repeat } => {
            let mut m: Macro = read_json(&file).await?;
            if let Some(repeat) = repeat {
                m.options.repeat = repeat;
            }
            let report = Supervisor::new(spawn_context).run(m, print_event).await?;
            print_report(&report);
        }
        Command::Resume => {
            let report = Supervisor::new(spawn_context).resume(print_event).await?;
            print_report(&report);
        }
        Command::TestStep { file } => {
            let step: Step = read_json(&file).await?;
            let (commander, _events): (Commander, _) = spawn_context();
            let report = commander.test_step(step).await?;
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::Serve { port } => {
            let state = AppState::start(spawn_context);
            face::serve(state, port.unwrap_or(config.port)).await?;
        }
        Command::Stop => {}
    }

    drop(session);
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_event(run: u32, event: &RunnerEvent) {
    println!("{}", serde_json::json!({ "run": run, "event": event }));
}

fn print_report(report: &RunReport) {
    info!(
        "[Runner] {} run(s) completed, {} resume(s), {} skipped error(s)",
        report.runs_completed,
        report.resumes,
        report.skipped_errors.len()
    );
}
