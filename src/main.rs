// =============================================================================
// hynous-data — Orchestrator
// =============================================================================
//
// Boot order mirrors the component graph in `app_state`: store, then
// engines, then collectors, then the hourly pruner and profile-refresh
// threads, then the read API. Shutdown runs the reverse of that, best
// effort, before releasing the instance lock.
// =============================================================================

mod api;
mod app_state;
mod collectors;
mod config;
mod engine;
mod error;
mod exchange;
mod market_data;
mod rate_limiter;
mod store;
mod util;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Config;
use crate::error::CoreError;
use crate::store::Store;

const CONFIG_PATH: &str = "config.toml";
const PIDFILE: &str = "storage/hynous-data.pid";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Hynous-Data starting ===");

    let lock = acquire_instance_lock(PIDFILE)?;

    let result = run(lock.path.clone()).await;

    release_instance_lock(&lock);
    result
}

async fn run(pid_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let store = Arc::new(Store::open(&config.db.path)?);
    store.init_schema()?;

    let state = Arc::new(AppState::new(config.clone(), store.clone()));

    if config.trade_stream.enabled {
        state.trade_stream.clone().start();
        info!("trade stream started");
    }
    if config.position_poller.enabled {
        state.position_poller.clone().start();
        info!("position poller started");
    }
    if config.hlp_tracker.enabled {
        state.hlp_tracker.clone().start();
        info!("hlp tracker started");
    }

    state.heatmap.clone().start();
    state.smart_money.clone().start_drainer();
    info!("signal engines started");

    spawn_pruner(state.clone());
    spawn_profile_refresh(state.clone());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "read API listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!(error = %e, "API server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    shutdown(&state, &pid_path);
    Ok(())
}

fn shutdown(state: &Arc<AppState>, pid_path: &Path) {
    info!("shutting down...");
    state.trade_stream.stop();
    state.store.close();
    remove_instance_lock(pid_path);
    info!("shutdown complete");
}

/// Every hour: prune old time-series rows, stale positions, and old
/// position-change events.
fn spawn_pruner(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            if let Err(e) = state.store.prune_old_data(state.config.db.prune_days) {
                warn!(error = %e, "pruner: time-series prune failed");
            }
            match state.store.prune_stale_tracking() {
                Ok((positions, changes)) if positions > 0 || changes > 0 => {
                    info!(positions, changes, "pruner: stale tracking rows removed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "pruner: stale tracking prune failed"),
            }
        }
    });
}

/// Waits 5 minutes before the first pass, then refreshes wallet profiles
/// every `profile_refresh_hours`, optionally promoting qualifying wallets
/// into the watchlist.
fn spawn_profile_refresh(state: Arc<AppState>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(300)).await;
        loop {
            match state.profiler.refresh_profiles().await {
                Ok(n) => {
                    if state.config.smart_money.auto_curate_enabled {
                        if let Err(e) = state.profiler.auto_curate() {
                            warn!(error = %e, "auto-curation failed");
                        }
                    }
                    info!(refreshed = n, "profile refresh cycle complete");
                }
                Err(e) => warn!(error = %e, "profile refresh cycle failed"),
            }
            let refresh_secs = state.config.smart_money.profile_refresh_hours as u64 * 3600;
            tokio::time::sleep(Duration::from_secs(refresh_secs.max(60))).await;
        }
    });
}

struct InstanceLock {
    path: PathBuf,
}

/// Write our PID to `pidfile_path`, aborting if a live process already
/// holds it. A stale file (process no longer running) is silently
/// overwritten.
fn acquire_instance_lock(pidfile_path: &str) -> Result<InstanceLock, CoreError> {
    let path = PathBuf::from(pidfile_path);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    if let Ok(contents) = std::fs::read_to_string(&path) {
        if let Ok(old_pid) = contents.trim().parse::<u32>() {
            if process_is_alive(old_pid) {
                error!(pid = old_pid, "another instance is running, aborting");
                return Err(CoreError::AlreadyRunning { pid: old_pid });
            }
        }
    }

    let pid = std::process::id();
    std::fs::write(&path, pid.to_string()).map_err(|source| CoreError::InstanceLock {
        path: path.display().to_string(),
        source,
    })?;

    Ok(InstanceLock { path })
}

fn release_instance_lock(lock: &InstanceLock) {
    remove_instance_lock(&lock.path);
}

fn remove_instance_lock(path: &Path) {
    if let Ok(contents) = std::fs::read_to_string(path) {
        if contents.trim() == std::process::id().to_string() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(target_os = "linux")]
fn process_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_is_alive(_pid: u32) -> bool {
    // Conservative: assume alive so a stale file never races a real
    // instance on platforms without /proc.
    true
}
