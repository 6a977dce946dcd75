use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nebo_agent::boot::{bot_id, data_dir, lock::InstanceLock, sentinels};
use nebo_agent::cli::{Cli, Command};
use nebo_agent::control::channel;
use nebo_agent::recovery;
use nebo_agent::state::{AgentState, AgentStateBuilder};
use nebo_domain::config::{Config, ConfigSeverity};
use nebo_protocol::events;
use nebo_sessions::MetaStore;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        None | Some(Command::Run) => {
            init_tracing();
            run_agent().await
        }
        Some(Command::Doctor) => {
            init_tracing();
            doctor().await
        }
        Some(Command::Version) => {
            println!("nebo-agent {}", env!("CARGO_PKG_VERSION"));
            0
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nebo_agent=debug")),
        )
        .init();
}

/// Print a fatal startup failure in red and return the exit code.
fn fatal(message: &str) -> i32 {
    eprintln!("\x1b[31mnebo-agent: {message}\x1b[0m");
    1
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Startup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_agent() -> i32 {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "nebo agent starting");

    // ── Data dir & single-instance lock ──────────────────────────
    let data_dir = match data_dir::resolve() {
        Ok(d) => d,
        Err(e) => return fatal(&e.to_string()),
    };
    let _lock = match InstanceLock::acquire(&data_dir) {
        Ok(l) => l,
        Err(e) => return fatal(&e.to_string()),
    };

    // ── Config ───────────────────────────────────────────────────
    let config = match load_config(&data_dir) {
        Ok(c) => c,
        Err(e) => return fatal(&e),
    };

    // ── Identity ─────────────────────────────────────────────────
    let meta = MetaStore::new(&data_dir);
    let bot_id = match bot_id::load_or_create(&data_dir, &meta) {
        Ok(id) => id,
        Err(e) => return fatal(&format!("bot identity: {e}")),
    };

    // ── State ────────────────────────────────────────────────────
    let state = match AgentStateBuilder::new(config, data_dir.clone()).build() {
        Ok(s) => s,
        Err(e) => return fatal(&format!("opening stores: {e}")),
    };
    state.comm.set_bot_id(&bot_id);

    // Lane transitions surface to the UI as lane_update events.
    wire_lane_events(&state);

    // ── Background work ──────────────────────────────────────────
    let recovered = recovery::scan(&state);
    if recovered > 0 {
        tracing::info!(recovered, "re-enqueued recovered tasks");
    }
    let cleanup = recovery::spawn_cleanup(state.clone());

    if sentinels::should_open_browser(&data_dir) {
        // Opening is the installer shell's job; we only record intent.
        tracing::info!("web UI auto-open window active");
        let _ = sentinels::touch_browser_opened(&data_dir);
    }

    // ── Signals & control channel ────────────────────────────────
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let result = channel::run_session(state.clone(), shutdown.clone()).await;
    cleanup.abort();

    match result {
        Ok(()) => {
            tracing::info!("clean shutdown");
            0
        }
        Err(e) if shutdown.is_cancelled() => {
            tracing::info!(error = %e, "shutdown during teardown");
            0
        }
        Err(e) => fatal(&e.to_string()),
    }
}

fn load_config(data_dir: &Path) -> Result<Config, String> {
    let path = data_dir.join("config.toml");
    let config: Config = if path.is_file() {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| format!("reading {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| format!("parsing {}: {e}", path.display()))?
    } else {
        Config::default()
    };

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        return Err("config validation failed".into());
    }
    Ok(config)
}

/// Forward every lane transition to the control channel (when attached).
fn wire_lane_events(state: &AgentState) {
    let sender_state = state.clone();
    state.lanes.subscribe(move |event| {
        let Some(sender) = sender_state.sender() else {
            return;
        };
        let payload = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(_) => return,
        };
        // Subscribers run synchronously inside the lane; hand the write
        // to the channel's writer task without blocking.
        tokio::spawn(async move {
            let _ = sender.event(events::LANE_UPDATE, payload).await;
        });
    });
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "no SIGTERM handler; ctrl-c only");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => tracing::info!("SIGINT received"),
                _ = term.recv() => tracing::info!("SIGTERM received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("ctrl-c received");
        }
        shutdown.cancel();
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Doctor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn doctor() -> i32 {
    let mut failed = false;

    let data_dir: Option<PathBuf> = match data_dir::resolve() {
        Ok(d) => {
            println!("data dir: {} (ok)", d.display());
            Some(d)
        }
        Err(e) => {
            println!("data dir: FAILED ({e})");
            failed = true;
            None
        }
    };

    if let Some(dir) = &data_dir {
        match InstanceLock::acquire(dir) {
            Ok(lock) => {
                println!("instance lock: free (ok)");
                drop(lock);
            }
            Err(e) => {
                println!("instance lock: {e}");
            }
        }

        match load_config(dir) {
            Ok(config) => {
                println!("config: ok");
                let url = format!("{}/health", config.server.url.trim_end_matches('/'));
                let client = reqwest::Client::new();
                match client
                    .get(&url)
                    .timeout(std::time::Duration::from_secs(3))
                    .send()
                    .await
                {
                    Ok(resp) if resp.status().is_success() => {
                        println!("server: reachable at {url} (ok)");
                    }
                    Ok(resp) => {
                        println!("server: {url} answered {}", resp.status());
                        failed = true;
                    }
                    Err(e) => {
                        println!("server: unreachable ({e})");
                        failed = true;
                    }
                }
            }
            Err(e) => {
                println!("config: FAILED ({e})");
                failed = true;
            }
        }

        println!(
            "setup complete: {}",
            if sentinels::is_setup_complete(dir) { "yes" } else { "no" }
        );
    }

    if failed {
        1
    } else {
        0
    }
}
