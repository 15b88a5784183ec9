//! tickd - Main Entry Point
//!
//! Long-lived scheduler process: tick loop + HTTP API + bundled UI.
//! Also carries one-off subcommands for running a single job and for
//! validating a schedule document.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tickd::config::AppConfig;
use tickd::database::RunStore;
use tickd::runner::{self, JobRunner};
use tickd::schedule::Schedule;
use tickd::scheduler::SystemClock;
use tickd::server::create_app;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "tickd")]
#[command(about = "tickd - cron-style job scheduler with run history and webhooks")]
#[command(version)]
struct Args {
    /// Path to the schedule document.
    #[arg(short, long, env = "TICKD_SCHEDULE", default_value = "schedule.yaml")]
    schedule: PathBuf,

    /// Path to the SQLite database file.
    #[arg(long, env = "TICKD_DB", default_value = "tickd.db")]
    db: PathBuf,

    /// Host to bind to.
    #[arg(long, env = "TICKD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "TICKD_PORT", default_value = "8081")]
    port: u16,

    /// Don't mirror child output to tickd's own stdout.
    #[arg(long, env = "TICKD_SUPPRESS_LOGS")]
    suppress_logs: bool,

    /// Log level.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and HTTP API (the default).
    Serve,
    /// Execute one job from the schedule and exit.
    Run {
        /// Name of the job to run.
        job: String,
    },
    /// Validate the schedule document and exit.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = AppConfig {
        schedule_path: args.schedule.clone(),
        db_path: args.db.clone(),
        host: args.host.clone(),
        port: args.port,
        suppress_logs: args.suppress_logs,
    };

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Run { job } => run_one(config, &job).await,
        Command::Validate => validate(&config),
    }
}

/// Run the scheduler and HTTP API until SIGINT/SIGTERM.
async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting tickd v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.bind_addr();
    let cancel = CancellationToken::new();
    let (app, scheduler) = create_app(config, cancel.clone()).await?;

    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    // The tick loop drains in-flight runs after cancellation.
    scheduler_handle.await?;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Execute one job synchronously and print the completed run as JSON.
async fn run_one(config: AppConfig, job_name: &str) -> anyhow::Result<()> {
    let schedule = Arc::new(Schedule::load(&config.schedule_path)?);
    let job = schedule
        .get(job_name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Cannot find job '{job_name}' in schedule"))?;

    let store = RunStore::open(&config.db_path).await?;
    let runner = Arc::new(
        JobRunner::new(
            store,
            schedule,
            Arc::new(SystemClock),
            CancellationToken::new(),
        )
        .with_suppressed_logs(config.suppress_logs),
    );

    let run = runner::trigger_job(&runner, &job, "manual").await;
    println!("{}", serde_json::to_string_pretty(&run)?);

    if !run.succeeded() {
        std::process::exit(run.status.unwrap_or(-1).clamp(1, 255));
    }
    Ok(())
}

/// Load and validate the schedule document.
fn validate(config: &AppConfig) -> anyhow::Result<()> {
    match Schedule::load(&config.schedule_path) {
        Ok(schedule) => {
            println!(
                "Schedule OK: {} job(s) in {}",
                schedule.jobs.len(),
                config.schedule_path.display()
            );
            for (name, job) in &schedule.jobs {
                let cron = job.spec.cron_str().unwrap_or("-");
                println!("  {name}: cron={cron} command={:?}", job.spec.command);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Schedule invalid: {e}");
            std::process::exit(1);
        }
    }
}

/// Initialize tracing/logging.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Graceful shutdown signal handler: cancels the root token, which kills
/// child processes, wakes retry back-offs, and stops the tick loop.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }

    cancel.cancel();
}
