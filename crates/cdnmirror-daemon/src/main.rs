//! cdnmirror daemon - mirrors local directories to an object store
//!
//! This binary:
//! - Reads the rule file and the optional YAML settings
//! - Detaches from the terminal unless run in the foreground
//! - Logs every account in and watches every rule directory
//! - Turns filesystem changes into uploads, deletes and moves
//! - Stops on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Everything runs on one `current_thread` tokio runtime: the watch loop
//! owns the watch registry, the rename pairing and the worker manager, and
//! each destination's worker is a task of its own. A `CancellationToken`
//! triggered by the signal handler ends the watch loop; queued jobs are not
//! waited for.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cdnmirror_cloud::{
    auth::{fill_account_cache, IdentityClient},
    client::HttpTransport,
};
use cdnmirror_core::{
    config::{Config, DEFAULT_CONFIG_PATH},
    settings::DaemonSettings,
};
use cdnmirror_sync::{
    inotify::Inotify,
    pipeline::WatchLoop,
    registry::WatchRegistry,
    translator::JobTranslator,
    worker::{RetryPolicy, WorkerManager},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cdnmirrord", version, about = "Mirror local directories to cloud object storage")]
struct Args {
    /// Rule file naming the directories to mirror
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// YAML settings file (defaults apply when it does not exist)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Stay attached to the terminal
    #[arg(short, long)]
    foreground: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Do not compare the directories with the remote side at startup
    #[arg(long)]
    skip_initial_sync: bool,
}

// ============================================================================
// DaemonService
// ============================================================================

/// Startup phase and watch loop
struct DaemonService {
    config: Config,
    settings: DaemonSettings,
    initial_sync: bool,
}

impl DaemonService {
    fn new(config: Config, settings: DaemonSettings, skip_initial_sync: bool) -> Self {
        let initial_sync = settings.sync.initial_sync && !skip_initial_sync;
        Self {
            config,
            settings,
            initial_sync,
        }
    }

    /// Logs in, installs the watches and runs until `shutdown` fires
    ///
    /// Any failure before the watch loop starts is fatal.
    async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let timeout = self.settings.http_timeout();

        let identity = IdentityClient::new(&self.settings.auth.identity_url, timeout)
            .context("Failed to create identity client")?;
        let accounts = fill_account_cache(&self.config, &identity)
            .await
            .context("Account login failed")?;
        let accounts = Arc::new(accounts);
        info!(accounts = accounts.len(), "Accounts logged in");

        let transport = HttpTransport::new(timeout).context("Failed to create HTTPS client")?;
        let workers = WorkerManager::new(
            Arc::clone(&accounts),
            Arc::new(transport),
            RetryPolicy::from_settings(&self.settings.workers),
            self.settings.workers.queue_soft_cap,
        );

        let (backend, mut events) = Inotify::init().context("Failed to initialize inotify")?;
        let mut watch_loop = WatchLoop::new(
            WatchRegistry::new(Box::new(backend)),
            self.config.entries().to_vec(),
            JobTranslator::new(accounts),
            Box::new(workers),
            &self.settings,
        );

        watch_loop
            .seed()
            .context("Failed to watch the configured directories")?;
        info!(
            rules = self.config.entries().len(),
            watches = watch_loop.registry().len(),
            "Watches installed"
        );

        if self.initial_sync {
            watch_loop.reconcile_all();
        }

        watch_loop
            .run(&mut events, shutdown)
            .await
            .context("Watching stopped")?;
        Ok(())
    }
}

// ============================================================================
// Startup helpers
// ============================================================================

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid rule file {}", path.display()))?;
    Ok(config)
}

fn load_settings(path: &Path) -> Result<DaemonSettings> {
    let settings = DaemonSettings::load_or_default(path)
        .with_context(|| format!("Failed to read settings {}", path.display()))?;

    let errors = settings.validate();
    if !errors.is_empty() {
        let listed = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        bail!("Invalid settings {}: {listed}", path.display());
    }
    Ok(settings)
}

/// Level used when `RUST_LOG` is not set
fn log_level(verbose: u8, configured: &str) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Detaches from the controlling terminal
///
/// Must run before the runtime starts: `daemon(3)` forks and only the
/// calling thread survives in the child. Standard streams stay open so log
/// output keeps flowing to wherever stderr points.
fn daemonize() -> Result<()> {
    // SAFETY: no other threads exist yet.
    let rc = unsafe { libc::daemon(0, 1) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("Failed to detach");
    }
    Ok(())
}

/// Absolute form of a command-line path, so it survives `daemon(3)`
/// changing into `/`
fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    Ok(cwd.join(path))
}

// ============================================================================
// Signals
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let settings_path = match args.settings.clone() {
        Some(path) => absolute(path)?,
        None => DaemonSettings::default_path(),
    };
    let settings = load_settings(&settings_path)?;
    init_tracing(log_level(args.verbose, &settings.logging.level), args.log_json);

    let config_path = absolute(args.config.clone())?;
    let config = load_config(&config_path)?;
    info!(
        config = %config_path.display(),
        rules = config.entries().len(),
        accounts = config.usernames().len(),
        "Loaded rule file"
    );

    if !args.foreground {
        daemonize()?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let service = DaemonService::new(config, settings, args.skip_initial_sync);
    let result = runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_signal(shutdown.clone()));
        service.run(shutdown).await
    });

    match &result {
        Ok(()) => info!("cdnmirrord shut down"),
        Err(e) => {
            let message = format!("{e:#}");
            error!(error = %message, "cdnmirrord exiting with error");
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
