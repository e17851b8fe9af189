use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{AttendanceStore, Config, LabelMap};
use rollcall_hw::Camera;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

mod runner;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance tracker")]
struct Cli {
    /// TOML config file (ROLLCALL_* environment variables still apply on top)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrain the recognizer from the dataset directory
    Train,
    /// Run the live camera attendance loop
    Run,
    /// Record attendance for a person by hand
    Mark {
        /// Person name, as it appears in the label file
        name: String,
    },
    /// List V4L2 capture devices
    Devices,
    /// Show the trained label map
    Labels,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Train => {
            let mut detector = runner::load_detector(&config)?;
            runner::train(&config, &mut detector)?;
        }
        Commands::Run => {
            let summary = run_until_quit(config).await?;
            println!(
                "Stopped after {} frames: {} faces ({} known, {} unknown), {} newly marked",
                summary.frames, summary.faces, summary.known, summary.unknown, summary.newly_marked
            );
        }
        Commands::Mark { name } => {
            let store = AttendanceStore::new(&config.attendance_path);
            if store.record_if_new(&name)? {
                println!("{name} marked present today");
            } else {
                println!("{name} is already marked present today");
            }
        }
        Commands::Devices => {
            let devices = Camera::capture_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}\t{} ({}, {})", d.path.display(), d.card, d.driver, d.bus);
            }
        }
        Commands::Labels => {
            let labels = LabelMap::load(&config.labels_path)?;
            if labels.is_empty() {
                println!("No labels in {}", config.labels_path.display());
            }
            for (id, name) in labels.iter() {
                println!("{id}\t{name}");
            }
        }
    }

    Ok(())
}

/// Run the capture loop on its own thread until it ends, the operator types
/// `q`, or Ctrl-C arrives.
async fn run_until_quit(config: Config) -> Result<rollcall_core::LoopSummary> {
    let stop = Arc::new(AtomicBool::new(false));
    watch_stdin_for_quit(stop.clone());

    let (done_tx, mut done_rx) = oneshot::channel();
    let loop_stop = stop.clone();
    std::thread::Builder::new()
        .name("rollcall-capture".into())
        .spawn(move || {
            let _ = done_tx.send(runner::run(&config, &loop_stop));
        })
        .context("failed to spawn capture thread")?;

    tokio::select! {
        result = &mut done_rx => return result.context("capture thread exited")?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupt received, stopping capture loop");
            stop.store(true, Ordering::Relaxed);
        }
    }

    done_rx.await.context("capture thread exited")?
}

fn watch_stdin_for_quit(stop: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("rollcall-quit".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    tracing::info!("quit requested");
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "cannot watch stdin; use Ctrl-C to quit");
    }
}
