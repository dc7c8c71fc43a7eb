// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! fancurve-daemon: system service that owns the fan backend, restores
//! remembered curves, and accepts commands from clients over a Unix domain
//! socket.

use anyhow::Context;
use clap::Parser;
use fancurve::backend::{self, SystemRunner};
use fancurve::config::{self, Config};
use fancurve::controller::{ApplyOutcome, FanController, FanResult};
use fancurve::power::FanId;
use fancurve::profiles::{ProfileManager, SavedProfile};
use fancurve::protocol::{self, ApplyReport, Request, Response};
use fancurve::store::ActiveCurveStore;
use fancurve::telemetry::{HwmonTelemetry, TelemetrySource};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::time::{self, Duration};

/// Longest fan test a client may ask for.
const MAX_TEST_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "fancurve-daemon", about = "Laptop fan curve daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<String>,

    /// Write a default configuration file to --config and exit.
    #[arg(long)]
    init_config: bool,
}

// ---------------------------------------------------------------------------
// Shared daemon state
// ---------------------------------------------------------------------------

struct DaemonState {
    controller: FanController,
    telemetry: Arc<dyn TelemetrySource>,
}

type SharedState = Arc<DaemonState>;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.init_config {
        if cli.config.exists() {
            anyhow::bail!("{} already exists", cli.config.display());
        }
        config::save_config(&cli.config, &Config::default())?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    });

    if !nix::unistd::geteuid().is_root() {
        log::warn!("Not running as root; backend writes will likely be refused");
    }

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| cfg.daemon.socket_path.clone());

    // Pick the backend
    let telemetry: Arc<dyn TelemetrySource> = match HwmonTelemetry::discover(
        &cfg.backend.hwmon_root,
        cfg.telemetry.fan_sensors.clone(),
    ) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            log::error!("Failed to discover temp sensors: {e}");
            Arc::new(HwmonTelemetry::empty())
        }
    };
    let candidates =
        backend::system_candidates(&cfg.backend, Arc::new(SystemRunner), telemetry.clone());
    let selection = backend::select_backend(candidates, cfg.timeouts.query())
        .await
        .context("no fan control hardware found")?;

    let state_dir = &cfg.daemon.state_dir;
    let controller = FanController::new(
        selection,
        ActiveCurveStore::in_dir(state_dir),
        ProfileManager::in_dir(state_dir),
        cfg.timeouts,
    );

    // Re-apply what we remembered
    let restored = controller.restore_on_startup().await;
    log_results("Startup restore", &restored);

    let restore_on_exit = cfg.daemon.restore_on_exit;
    let poll_interval = cfg.daemon.poll_interval_ms;
    let state: SharedState = Arc::new(DaemonState {
        controller,
        telemetry,
    });

    // Clean up old socket file
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;

    // Make socket accessible to non-root users
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o666);
        std::fs::set_permissions(&socket_path, perms)?;
    }

    log::info!("Listening on {socket_path}");

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = shutdown.clone();

    // Signal handler
    let state_for_signal = state.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Received shutdown signal");
        if restore_on_exit {
            if let Err(e) = state_for_signal.controller.release_all().await {
                log::error!("Failed to release fans: {e}");
            }
        }
        shutdown_signal.notify_waiters();
    });

    // Profile watch and static duty refresh
    let state_for_poll = state.clone();
    let shutdown_for_poll = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_millis(poll_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let controller = &state_for_poll.controller;
                    if let Some(results) = controller.reconcile_profile().await {
                        log_results("Profile change restore", &results);
                    }
                    controller.refresh_static_outputs().await;
                }
                _ = shutdown_for_poll.notified() => {
                    break;
                }
            }
        }
    });

    // Accept client connections
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state_clone = state.clone();
                        tokio::spawn(handle_client(stream, state_clone));
                    }
                    Err(e) => {
                        log::error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = shutdown.notified() => {
                log::info!("Daemon shutting down");
                break;
            }
        }
    }

    // Cleanup socket
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

fn log_results(what: &str, results: &[FanResult]) {
    let confirmed = results
        .iter()
        .filter(|r| matches!(&r.outcome, Ok(o) if o.is_confirmed()))
        .count();
    log::info!("{what}: {confirmed}/{} curve(s) confirmed", results.len());
}

// ---------------------------------------------------------------------------
// Client connection handler
// ---------------------------------------------------------------------------

async fn handle_client(stream: UnixStream, state: SharedState) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let response = match protocol::decode::<Request>(&line) {
            Ok(req) => process_request(req, &state).await,
            Err(e) => Response::Error {
                message: format!("Invalid request: {e}"),
            },
        };

        let encoded = match protocol::encode(&response) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                continue;
            }
        };

        if writer.write_all(encoded.as_bytes()).await.is_err() {
            break; // Client disconnected
        }
    }
}

fn error(e: impl std::fmt::Display) -> Response {
    Response::Error {
        message: e.to_string(),
    }
}

fn applied(fan: FanId, outcome: fancurve::Result<ApplyOutcome>) -> Response {
    Response::Applied {
        results: vec![ApplyReport::from(FanResult { fan, outcome })],
    }
}

async fn process_request(req: Request, state: &SharedState) -> Response {
    let controller = &state.controller;

    match req {
        Request::GetStatus => match controller.status_all().await {
            Ok(fans) => Response::Status {
                backend: controller.backend_kind(),
                capabilities: controller.capabilities(),
                power_profile: controller.current_power_profile().await,
                fans,
                readings: state.telemetry.fan_readings(),
            },
            Err(e) => error(e),
        },

        Request::ListPresets => Response::Presets {
            names: controller
                .list_available_presets()
                .into_iter()
                .map(String::from)
                .collect(),
        },

        Request::ApplyCurve { fan, curve } => {
            let outcome = controller.apply_curve(&fan, &curve).await;
            applied(fan, outcome)
        }

        Request::ApplyPreset { fan, preset } => {
            let outcome = controller.apply_preset(&fan, &preset).await;
            applied(fan, outcome)
        }

        Request::TestFan { fan, duration_secs } => {
            let duration = Duration::from_secs(duration_secs.clamp(1, MAX_TEST_SECS));
            match controller.test_fan(&fan, duration).await {
                Ok(snapshot) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        time::sleep(snapshot.duration).await;
                        if let Err(e) = state.controller.restore_after_test(&snapshot).await {
                            log::error!("Failed to restore {} after test: {e}", snapshot.fan);
                        }
                    });
                    Response::Ok {
                        message: format!("Testing {fan} for {}s", duration.as_secs()),
                    }
                }
                Err(e) => error(e),
            }
        }

        Request::ListProfiles => match controller.list_profiles() {
            Ok(names) => Response::Profiles { names },
            Err(e) => error(e),
        },

        Request::GetProfile { name } => match controller.get_profile(&name) {
            Ok(profile) => Response::Profile { profile },
            Err(e) => error(e),
        },

        Request::SaveProfile {
            name,
            description,
            curves,
        } => {
            let profile = SavedProfile::new(name, description, curves);
            match controller.save_profile(&profile) {
                Ok(saved) => Response::Ok {
                    message: format!("Profile '{}' saved", saved.name),
                },
                Err(e) => error(e),
            }
        }

        Request::DeleteProfile { name } => match controller.delete_profile(&name) {
            Ok(()) => Response::Ok {
                message: format!("Deleted profile '{name}'"),
            },
            Err(e) => error(e),
        },

        Request::ApplyProfile { name } => match controller.apply_profile(&name).await {
            Ok(results) => Response::Applied {
                results: results.into_iter().map(ApplyReport::from).collect(),
            },
            Err(e) => error(e),
        },
    }
}
