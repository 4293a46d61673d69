use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use noise_monitor::analysis::analyze_wav;
use noise_monitor::engine::{
    CaptureBackend, CpalCaptureBackend, NoiseStreamService, ScriptedCaptureBackend,
    ScriptedSignal, ServiceOptions, DEFAULT_STOP_DEBOUNCE,
};
use noise_monitor::storage::{summarize_history, JsonlSliceStore, SliceStore};
use noise_monitor::{AppConfig, NoiseSliceSummary};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "noise_cli", about = "Ambient noise monitor: live capture, offline analysis, history")]
struct Cli {
    /// JSON config file (defaults to ./noise_monitor.json, falling back to built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the slice history file from the config
    #[arg(long, global = true)]
    history: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score a WAV recording slice by slice, printing one JSON line per slice
    Analyze {
        #[arg(long)]
        input: PathBuf,
        /// Also append the slices to the history file
        #[arg(long, default_value_t = false)]
        persist: bool,
    },
    /// Monitor the default input device (or a simulated signal)
    Monitor {
        /// Stop after this many seconds; runs until Ctrl-C when omitted
        #[arg(long)]
        duration_sec: Option<u64>,
        /// Use a scripted noise signal of this RMS amplitude instead of the microphone
        #[arg(long)]
        simulate: Option<f32>,
        /// Print every snapshot, not only status changes and slices
        #[arg(long, default_value_t = false)]
        snapshots: bool,
    },
    /// Print the retained slice history and its summary
    History {
        /// Delete all retained slices instead
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    if let Some(path) = cli.history {
        config.storage.history_path = path;
    }

    match cli.command {
        Commands::Analyze { input, persist } => run_analyze(&config, &input, persist),
        Commands::Monitor {
            duration_sec,
            simulate,
            snapshots,
        } => {
            let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
            runtime.block_on(run_monitor(config, duration_sec, simulate, snapshots))
        }
        Commands::History { clear } => run_history(&config, clear),
    }
}

fn open_store(config: &AppConfig) -> Result<JsonlSliceStore> {
    JsonlSliceStore::open(&config.storage.history_path, config.storage.retention())
        .with_context(|| format!("opening history {:?}", config.storage.history_path))
}

fn print_slice(slice: &NoiseSliceSummary) -> Result<()> {
    println!("{}", serde_json::to_string(slice)?);
    Ok(())
}

fn run_analyze(config: &AppConfig, input: &Path, persist: bool) -> Result<ExitCode> {
    let slices = analyze_wav(input, &config.noise, config.capture.fft_size)
        .with_context(|| format!("analyzing {:?}", input))?;

    for slice in &slices {
        print_slice(slice)?;
    }

    if persist {
        let store = open_store(config)?;
        for slice in &slices {
            store.write_slice(slice).context("persisting slice")?;
        }
    }

    match summarize_history(&slices) {
        Some(summary) => {
            eprintln!(
                "{} slices, average score {:.1}, worst {} at {} ms, noisy {:.2} min",
                summary.slice_count,
                summary.average_score,
                summary.worst.score,
                summary.worst.start,
                summary.noisy_minutes
            );
            Ok(ExitCode::from(0))
        }
        None => {
            eprintln!("No slices produced (input shorter than one frame?)");
            Ok(ExitCode::from(2))
        }
    }
}

async fn run_monitor(
    config: AppConfig,
    duration_sec: Option<u64>,
    simulate: Option<f32>,
    snapshots: bool,
) -> Result<ExitCode> {
    let backend: Arc<dyn CaptureBackend> = match simulate {
        Some(amplitude) => {
            let backend = ScriptedCaptureBackend::new(amplitude).with_fft_size(config.capture.fft_size);
            backend.set_signal(ScriptedSignal::Noise { seed: 7 });
            Arc::new(backend)
        }
        None => Arc::new(CpalCaptureBackend::new(config.capture.fft_size)),
    };
    let store: Arc<dyn SliceStore> = Arc::new(open_store(&config)?);

    let service = NoiseStreamService::with_options(
        backend,
        store,
        config.noise.clone(),
        ServiceOptions {
            capture: config.capture.clone(),
            ..ServiceOptions::default()
        },
    );

    let mut slices = service.subscribe_slices();
    let mut subscription = service.subscribe();
    let deadline = tokio::time::sleep(
        duration_sec
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(u64::MAX / 4)),
    );
    tokio::pin!(deadline);

    let mut last_status = None;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                break;
            }
            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else { break };
                if snapshots {
                    println!("{}", serde_json::to_string(snapshot.as_ref())?);
                } else if last_status != Some(snapshot.status) {
                    eprintln!(
                        "status: {:?} (avg {:?} dB, limit {} dB)",
                        snapshot.status, snapshot.average_display_db, snapshot.max_level_db
                    );
                }
                last_status = Some(snapshot.status);
                if snapshot.status.needs_retry() {
                    eprintln!("Capture unavailable: {:?}", snapshot.status);
                    return Ok(ExitCode::from(3));
                }
            }
            slice = slices.recv() => {
                match slice {
                    Ok(slice) => print_slice(&slice)?,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[Monitor] Missed {} slices", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    // Unsubscribing triggers the debounced stop, which flushes the partial slice
    subscription.unsubscribe();
    tokio::time::sleep(DEFAULT_STOP_DEBOUNCE + Duration::from_millis(100)).await;
    while let Ok(slice) = slices.try_recv() {
        print_slice(&slice)?;
    }
    if service.is_capturing().await {
        log::warn!("[Monitor] Capture still open at exit");
    }

    let history = service.store().read_slices().context("reading history")?;
    if let Some(summary) = summarize_history(&history) {
        eprintln!(
            "history: {} slices, average score {:.1}, noisy {:.2} min",
            summary.slice_count, summary.average_score, summary.noisy_minutes
        );
    }
    Ok(ExitCode::from(0))
}

fn run_history(config: &AppConfig, clear: bool) -> Result<ExitCode> {
    let store = open_store(config)?;
    if clear {
        store.clear_slices().context("clearing history")?;
        eprintln!("History cleared: {:?}", store.path());
        return Ok(ExitCode::from(0));
    }

    let slices = store.read_slices().context("reading history")?;
    for slice in &slices {
        print_slice(slice)?;
    }
    match summarize_history(&slices) {
        Some(summary) => println!("{}", serde_json::to_string(&summary)?),
        None => eprintln!("History is empty"),
    }
    Ok(ExitCode::from(0))
}
