use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dye_plate_view::config::{ConfigLoader, ResolvedConfig, heatmap_interval};
use dye_plate_view::error::PlateError;
use dye_plate_view::heatmap::{HeatmapLoop, HeatmapOptions};
use dye_plate_view::output::{JsonRenderer, OutputMode};
use dye_plate_view::render::{CancelToken, Renderer};
use dye_plate_view::tui::{TerminalRenderer, TerminalSession};
use dye_plate_view::watcher::{ChangeWatcher, WatchOptions};

#[derive(Parser)]
#[command(name = "plate-view")]
#[command(about = "Live scatter plots and plate heatmaps of fluorescence dye readings")]
#[command(version, author)]
struct Cli {
    /// Directory holding the instrument CSV files
    #[arg(long, short = 'd', default_value = "data")]
    dir: PathBuf,

    /// JSON config file (defaults to ./plate-view.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print views as JSON lines instead of drawing them in the terminal
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Watch the directory and plot every dye per file, redrawn on each change")]
    Graph(GraphArgs),
    #[command(about = "Show five heatmaps for every file, repeated periodically")]
    Heatmap(HeatmapArgs),
}

#[derive(Args)]
struct GraphArgs {
    /// Interval (seconds) to check for directory changes
    #[arg(long, short = 'i')]
    interval: Option<u64>,
}

#[derive(Args)]
struct HeatmapArgs {
    /// Spawn a separate background process
    #[arg(long, short = 'd')]
    detached: bool,

    /// Render a single pass and exit
    #[arg(long)]
    once: bool,

    /// Minutes between passes
    #[arg(long, short = 'i')]
    interval: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<PlateError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PlateError) -> u8 {
    match error {
        PlateError::DirectoryMissing(_)
        | PlateError::WatchSetup(_)
        | PlateError::ConfigRead(_)
        | PlateError::ConfigParse(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Graph(args) => run_graph(&cli.dir, args, config, output_mode),
        Commands::Heatmap(args) if args.detached => {
            spawn_detached(&cli.dir, cli.config.as_deref(), &args)
        }
        Commands::Heatmap(args) => run_heatmap(&cli.dir, args, config, output_mode),
    }
}

fn run_graph(
    dir: &Path,
    args: GraphArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let options = WatchOptions {
        directory: dir.to_path_buf(),
        interval: args
            .interval
            .map(Duration::from_secs)
            .unwrap_or(config.watch_interval)
            .max(Duration::from_millis(100)),
        extension: config.extension,
    };

    match output_mode {
        OutputMode::Interactive => {
            let session = TerminalSession::enter()?;
            let interval = options.interval;
            let count = watch_until(options, Arc::new(TerminalRenderer::new()), || {
                session.quit_requested(interval)
            })?;
            drop(session);
            println!("Observer stopped. {count} files in view.");
            Ok(())
        }
        OutputMode::NonInteractive => {
            let stop = stdin_stop_token();
            let interval = options.interval;
            let count = watch_until(options, Arc::new(JsonRenderer::stdout()), || {
                Ok(stop.wait(interval))
            })?;
            eprintln!("Observer stopped. {count} files in view.");
            Ok(())
        }
    }
}

/// Runs the watcher until `stop_requested` reports true, then stops it and
/// returns the number of readings left in the collection.
fn watch_until<R, F>(
    options: WatchOptions,
    renderer: Arc<R>,
    mut stop_requested: F,
) -> Result<usize, PlateError>
where
    R: Renderer + 'static,
    F: FnMut() -> Result<bool, PlateError>,
{
    let watcher = ChangeWatcher::start(options, renderer)?;
    tracing::info!(
        files = watcher.initial_count(),
        "observer started, press q or Ctrl-C to stop"
    );

    let outcome = loop {
        match stop_requested() {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(err) => break Err(err),
        }
    };

    let state = watcher.stop()?;
    let (collection, mut trigger) = state.into_parts();
    trigger.shutdown();
    outcome.map(|_| collection.len())
}

fn run_heatmap(
    dir: &Path,
    args: HeatmapArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let interval = match args.interval {
        Some(minutes) => heatmap_interval(minutes)?,
        None => config.heatmap_interval,
    };
    let heatmaps = HeatmapLoop::new(HeatmapOptions {
        directory: dir.to_path_buf(),
        extension: config.extension,
        interval,
        channels: config.channels,
    })?;

    match output_mode {
        OutputMode::Interactive => {
            let session = TerminalSession::enter()?;
            let renderer = TerminalRenderer::new();
            let cancel = CancelToken::new();
            let result = if args.once {
                heatmaps.run_once(&renderer, &cancel).map(|_| ())
            } else {
                heatmaps.run_until(&renderer, &cancel, |timeout| {
                    session.quit_requested(timeout)
                })
            };
            drop(session);
            result?;
            println!("Heatmap loop stopped");
            Ok(())
        }
        OutputMode::NonInteractive => {
            eprintln!("Heatmap loop started. Type q and Enter to stop.");
            let renderer = JsonRenderer::stdout();
            let cancel = stdin_stop_token();
            if args.once {
                heatmaps.run_once(&renderer, &cancel)?;
            } else {
                heatmaps.run(&renderer, &cancel)?;
            }
            Ok(())
        }
    }
}

/// Re-launches this binary in the background with the heatmap loop in
/// non-interactive mode.
fn spawn_detached(dir: &Path, config: Option<&str>, args: &HeatmapArgs) -> miette::Result<()> {
    let exe = std::env::current_exe().into_diagnostic()?;
    let mut cmd = Command::new(exe);
    cmd.arg("--dir").arg(dir).arg("--non-interactive");
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    cmd.arg("heatmap");
    if args.once {
        cmd.arg("--once");
    }
    if let Some(minutes) = args.interval {
        cmd.arg("--interval").arg(minutes.to_string());
    }
    let child = cmd
        .stdin(Stdio::null())
        .spawn()
        .map_err(|err| PlateError::RenderDispatch(format!("heatmap process not started: {err}")))?;
    println!("Started heatmap background process with PID {}.", child.id());
    Ok(())
}

/// Token cancelled when a `q` line arrives on stdin. End of input leaves it
/// untouched so detached runs keep going.
fn stdin_stop_token() -> CancelToken {
    let token = CancelToken::new();
    let listener = token.clone();
    let spawned = thread::Builder::new()
        .name("stdin-stop".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    return;
                };
                if line.trim().eq_ignore_ascii_case("q") {
                    listener.cancel();
                    return;
                }
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "stdin listener not started");
    }
    token
}
