//! geogdo - geofence-driven garage door operator
//!
//! Watches tracker telemetry on an MQTT bus and operates garage door
//! controllers when a tracker crosses a configured geofence boundary.

use anyhow::Context;
use clap::Parser;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

use geogdo::infra::config::{self, Config};
use geogdo::infra::OpsContext;
use geogdo::io::control::{self, CONTROL_PORT};
use geogdo::io::router;
use geogdo::services::garage::Garage;
use geogdo::services::tracker;

/// Geofence-driven garage door operator
#[derive(Parser, Debug)]
#[command(name = "geogdo", about, disable_version_flag = true)]
struct Args {
    /// Path to YAML configuration file (falls back to the CONFIG_FILE
    /// environment variable)
    #[arg(short, long)]
    config: Option<String>,

    /// Log intended door actions without executing them
    #[arg(long)]
    testing: bool,

    /// Print version information and exit
    #[arg(short = 'v', long)]
    version: bool,

    /// Print a commented sample config to stdout and exit
    #[arg(long)]
    wizard: bool,
}

fn print_version() {
    let program = env::args()
        .next()
        .as_deref()
        .map(|arg| {
            Path::new(arg)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| arg.to_string())
        })
        .unwrap_or_else(|| "geogdo".to_string());
    println!(
        "{} {} {}/{}; commit hash {}",
        program,
        env!("CARGO_PKG_VERSION"),
        env::consts::OS,
        env::consts::ARCH,
        option_env!("GIT_HASH").unwrap_or("unknown"),
    );
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }
    if args.wizard {
        print!("{}", config::SAMPLE_CONFIG);
        return Ok(());
    }

    // DEBUG=true raises the default level; RUST_LOG still wins when set
    let default_level = if env_flag("DEBUG") { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = option_env!("GIT_HASH").unwrap_or("unknown"),
        "geogdo starting"
    );

    let config_path = args
        .config
        .or_else(|| env::var("CONFIG_FILE").ok())
        .context("config file must be given with -c/--config or the CONFIG_FILE environment variable")?;
    let config = Config::from_file(&config_path)?;
    info!(
        config_file = %config_path,
        garage_doors = config.garage_doors.len(),
        "config loaded successfully"
    );

    let testing = args.testing || env_flag("TESTING");
    if testing {
        warn!("TESTING is set, garage door actions will not be executed");
    }
    let ctx = OpsContext::new(testing, env_flag("GDO_SKIP_FLAP_DELAY"), config.global.cooldown);

    // assemble garages and start one update loop per tracker
    let global_mqtt = config.global.tracker_mqtt_settings.connection.clone();
    let mut garages = Vec::with_capacity(config.garage_doors.len());
    for (index, garage_config) in config.garage_doors.iter().enumerate() {
        let (garage, update_loops) =
            Garage::from_config(index, garage_config, &global_mqtt, testing).await?;
        for (garage_tracker, location_rx) in update_loops {
            let loop_garage = garage.clone();
            let loop_ctx = ctx.clone();
            tokio::spawn(async move {
                tracker::run_update_loop(loop_garage, garage_tracker, loop_ctx, location_rx).await;
            });
        }
        garages.push(garage);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // control plane for pause/resume
    let control_ctx = ctx.clone();
    let control_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = control::run_control_server(CONTROL_PORT, control_ctx, control_shutdown).await
        {
            tracing::error!(error = %e, "control server error");
        }
    });

    // translate the OS signal into the shutdown flag
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received interrupt signal, shutting down");
        let _ = shutdown_tx.send(true);
    });

    // the router runs in the foreground until shutdown
    router::run_router(&global_mqtt, garages.clone(), ctx, shutdown_rx).await?;

    for garage in &garages {
        garage.opener.shutdown().await;
    }
    info!("geogdo shutdown complete");
    Ok(())
}
