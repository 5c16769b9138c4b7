use anyhow::{Context, Result};
use clap::Parser;
use compvisor::{
    component, CompvisorConfig, EventBus, Heartbeat, Manager, ManagerError, Status,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "compvisor")]
#[command(about = "Cooperative lifecycle manager for long-lived components")]
#[command(version)]
#[command(long_about = "Runs a set of components on a single worker thread, \
initializing, running and stopping them in registration order. A component whose \
run step fails is restarted once; a component that cannot be restarted is \
quarantined until the manager stops.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "compvisor.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the manager")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - register components but don't start the manager
    #[arg(long, help = "Perform dry run - register components but don't start the manager")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting compvisor v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match CompvisorConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let events = EventBus::new(config.events.capacity);
    let manager = Arc::new(Manager::with_event_bus(config.manager.clone(), events));

    if config.heartbeat.enabled {
        manager.add_component(component::shared(Heartbeat::new(&config.heartbeat)));
    }
    info!(
        components = manager.len(),
        capacity = manager.capacity(),
        "Components registered"
    );

    if args.dry_run {
        let report = manager
            .report_json()
            .context("Failed to serialize component report")?;
        println!("{}", report);
        info!("Dry run mode - components registered but manager not started");
        println!("✓ Dry run completed successfully - {} component(s) registered", manager.len());
        return Ok(());
    }

    let token = CancellationToken::new();
    let logger = tokio::spawn(log_events(manager.subscribe(), token.clone()));

    manager.start().context("Failed to start component manager")?;

    let reason = wait_for_shutdown_signal().await?;
    info!("Shutdown initiated: {}", reason);

    let exit_code = shutdown(Arc::clone(&manager), config.manager.shutdown_timeout()).await?;

    token.cancel();
    if let Err(e) = logger.await {
        warn!("Event logger task failed: {}", e);
    }

    info!("Compvisor exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

/// Stop the manager off the async runtime, since stopping joins a thread
async fn shutdown(manager: Arc<Manager>, timeout: std::time::Duration) -> Result<i32> {
    let stopper = Arc::clone(&manager);
    let result = tokio::task::spawn_blocking(move || stopper.stop_timeout(timeout))
        .await
        .context("Shutdown task failed")?;

    let exit_code = match result {
        Ok(()) => 0,
        Err(ManagerError::ShutdownTimeout { timeout }) => {
            error!("Components did not stop within {:?}", timeout);
            1
        }
        Err(e) => {
            error!("Shutdown failed: {}", e);
            1
        }
    };

    match manager.report_json() {
        Ok(report) => debug!("Final component report:\n{}", report),
        Err(e) => warn!("Failed to serialize component report: {}", e),
    }

    for report in manager.report() {
        if report.status == Status::Error {
            warn!(
                component = %report.tag,
                restarts = report.restarts,
                "Final status {}: {}",
                report.status,
                report.error.as_deref().unwrap_or("no error message")
            );
        } else {
            info!(
                component = %report.tag,
                restarts = report.restarts,
                "Final status {}",
                report.status
            );
        }
    }

    Ok(exit_code)
}

async fn wait_for_shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for SIGINT")?;
                info!("Received SIGINT signal (Ctrl+C)");
                Ok("SIGINT")
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
                Ok("SIGTERM")
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for SIGINT")?;
        info!("Received SIGINT signal (Ctrl+C)");
        Ok("SIGINT")
    }
}

/// Forward lifecycle events to the log until cancelled
async fn log_events(
    mut receiver: broadcast::Receiver<compvisor::EventEnvelope>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(envelope) => {
                    info!(
                        event = envelope.event.event_type(),
                        timestamp = %envelope.timestamp,
                        "{}",
                        envelope.event.description()
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event logger lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    debug!("Event logger stopped");
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("compvisor={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(true)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Compvisor Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Every key can be overridden with COMPVISOR_<SECTION>__<KEY>");
    println!();

    let text = CompvisorConfig::default()
        .to_toml()
        .context("Failed to serialize default configuration")?;
    print!("{}", text);
    Ok(())
}
