//! `re-worker` — the CLI entry point: parses configuration, sets up
//! logging and signal handling, then drives the scheduler poll loop
//! (spec §6 CLI surface; SPEC_FULL §B/D/F/G).
//!
//! Grounded on `examples/avrabe-graph-git-rs/bitzel/src/main.rs`'s
//! `tracing_subscriber::registry().with(EnvFilter).with(fmt::layer())`
//! bootstrap, stripped of the KAS/BitBake orchestration it existed to
//! drive and of `#[tokio::main]` (this worker is synchronous throughout).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use re_content_store::{Bound, DirectoryBlobCache, HttpBackend, LinkMode};
use re_tree_cache::TreeCache;
use re_worker::config::Config;
use re_worker::scheduler::{self, CurrentState, DesiredState, SchedulerClient};
use re_worker::{shutdown, Error};

/// `worker <config_path> [--log-file <path>]`.
#[derive(Parser)]
#[command(name = "re-worker")]
#[command(about = "Buildbarn-compatible remote execution worker")]
struct Cli {
    /// Path to the worker's TOML configuration file.
    config_path: PathBuf,

    /// Redirect log output to this file (append mode) instead of stderr.
    #[arg(long, value_name = "path")]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("re-worker: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), Error> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "re_worker=info,re_tree_cache=info,re_content_store=info".into());
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Error> {
    init_tracing(cli.log_file.as_deref())?;

    let config = Config::load(&cli.config_path)?;
    tracing::info!(config = %cli.config_path.display(), "loaded configuration");

    std::fs::create_dir_all(&config.build_root)?;

    let backend = HttpBackend::new(config.buildbarn.cas_address.clone())?;

    let blob_cache = re_content_store::BlobCache::new(
        config.filesystem.cache_root.clone(),
        config.filesystem.max_cache_size_bytes.0,
    );
    blob_cache.init()?;

    let tree_cache = TreeCache::new(
        config.build_directory_builder.cache_root.clone(),
        config.build_directory_builder.max_cache_size_bytes.0,
        LinkMode::Hardlink,
    );
    tree_cache.init()?;

    let dir_blob_cache = Mutex::new(DirectoryBlobCache::new(Bound::Bytes(
        config.filesystem.download_batch_size_bytes.0.max(1),
    )));

    let shutting_down = shutdown::install()?;

    // TODO: wire a gRPC SchedulerClient against
    // config.buildbarn.scheduler_address once that transport is in
    // scope; until then the worker idles and only exits on signal.
    let client = IdleSchedulerClient;
    scheduler::run(
        &client,
        &tree_cache,
        &backend,
        &dir_blob_cache,
        &blob_cache,
        Path::new(&config.build_root),
        &shutting_down,
    )
}

struct IdleSchedulerClient;

impl SchedulerClient for IdleSchedulerClient {
    fn poll(&self, _current_state: &CurrentState) -> Result<DesiredState, Error> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(DesiredState::Idle)
    }
}
