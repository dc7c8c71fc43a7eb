// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! fancurvectl: command-line client for fancurve-daemon.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use fancurve::config;
use fancurve::curve::{self, FanCurve};
use fancurve::power::FanId;
use fancurve::protocol::{self, ApplyReport, Request, Response};
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "fancurvectl", about = "Control laptop fan curves")]
struct Cli {
    /// Path to the daemon socket.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the backend, power profile and every fan's curve.
    Status,

    /// List built-in curves.
    Presets,

    /// Apply a curve given as `temp:speed,...` or a preset name.
    Apply { fan: String, curve: String },

    /// Apply a built-in curve.
    Preset { fan: String, name: String },

    /// Run a fan at full speed for a few seconds.
    Test {
        fan: String,
        #[arg(short, long, default_value_t = 5)]
        duration: u64,
    },

    /// List saved profiles.
    Profiles,

    /// Print a saved profile.
    Show { name: String },

    /// Save a profile from `FAN=CURVE` pairs or from the active curves.
    Save {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// `FAN=temp:speed,...` or `FAN=<preset>`; repeatable.
        #[arg(short, long = "curve")]
        curves: Vec<String>,
        /// Start from the curves currently applied.
        #[arg(long)]
        from_active: bool,
    },

    /// Delete a saved profile (kept on disk as `.deleted`).
    Delete { name: String },

    /// Apply every curve of a saved profile.
    Use { name: String },
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Connection {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Connection {
    fn connect(path: &str) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        // a write plus read-back can take the full backend timeouts
        stream.set_read_timeout(Some(Duration::from_secs(30)))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader })
    }

    fn send_request(&mut self, req: &Request) -> io::Result<Response> {
        let encoded = protocol::encode(req).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Encode error: {e}"))
        })?;
        self.stream.write_all(encoded.as_bytes())?;
        self.stream.flush()?;

        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        protocol::decode(&line).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Decode error: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut conn = Connection::connect(&cli.socket).with_context(|| {
        format!(
            "could not connect to {}; is fancurve-daemon running?",
            cli.socket
        )
    })?;

    let request = match cli.command {
        Command::Status => Request::GetStatus,
        Command::Presets => Request::ListPresets,
        Command::Apply { fan, curve } => Request::ApplyCurve {
            fan: FanId::new(fan),
            curve: parse_curve(&curve)?,
        },
        Command::Preset { fan, name } => Request::ApplyPreset {
            fan: FanId::new(fan),
            preset: name,
        },
        Command::Test { fan, duration } => Request::TestFan {
            fan: FanId::new(fan),
            duration_secs: duration,
        },
        Command::Profiles => Request::ListProfiles,
        Command::Show { name } => Request::GetProfile { name },
        Command::Save {
            name,
            description,
            curves,
            from_active,
        } => {
            let mut by_fan = if from_active {
                active_curves(&mut conn)?
            } else {
                BTreeMap::new()
            };
            for arg in &curves {
                let (fan, curve) = parse_fan_curve(arg)?;
                by_fan.insert(fan, curve);
            }
            if by_fan.is_empty() {
                bail!("nothing to save; pass --curve FAN=CURVE or --from-active");
            }
            Request::SaveProfile {
                name,
                description,
                curves: by_fan,
            }
        }
        Command::Delete { name } => Request::DeleteProfile { name },
        Command::Use { name } => Request::ApplyProfile { name },
    };

    let response = conn.send_request(&request)?;
    print_response(response)
}

fn active_curves(conn: &mut Connection) -> anyhow::Result<BTreeMap<FanId, FanCurve>> {
    match conn.send_request(&Request::GetStatus)? {
        Response::Status { fans, .. } => Ok(fans
            .into_iter()
            .filter_map(|s| s.curve.map(|c| (s.fan, c)))
            .collect()),
        Response::Error { message } => bail!(message),
        other => bail!("unexpected response: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_response(response: Response) -> anyhow::Result<()> {
    match response {
        Response::Status {
            backend,
            capabilities,
            power_profile,
            fans,
            readings,
        } => {
            println!("Backend:       {backend}");
            println!(
                "Curves:        {}",
                if capabilities.supports_curves {
                    "native"
                } else {
                    "single output, refreshed from temperature"
                }
            );
            println!("Power profile: {power_profile}");
            println!();
            for status in fans {
                let mut line = format!("{:<6} {:<12}", status.fan.as_str(), status.state);
                if let Some(curve) = &status.curve {
                    line.push_str(&format_curve(curve));
                }
                if let Some(name) = &status.active_profile_name {
                    line.push_str(&format!("  [{name}]"));
                }
                if status.testing {
                    line.push_str("  (testing)");
                }
                println!("{line}");
            }
            for reading in readings {
                println!("{:<20} {} RPM", reading.fan_name, reading.rpm);
            }
        }
        Response::Presets { names } | Response::Profiles { names } => {
            for name in names {
                println!("{name}");
            }
        }
        Response::Applied { results } => {
            let failed = results.iter().any(|r| r.error.is_some());
            for report in &results {
                println!("{}", format_report(report));
            }
            if failed {
                bail!("some curves were not applied");
            }
        }
        Response::Profile { profile } => {
            println!("{}", profile.name);
            if !profile.description.is_empty() {
                println!("  {}", profile.description);
            }
            println!(
                "  created {}, modified {}",
                profile.created.format("%Y-%m-%d %H:%M"),
                profile.modified.format("%Y-%m-%d %H:%M")
            );
            for (fan, curve) in &profile.curves {
                println!("  {:<6} {}", fan.as_str(), format_curve(curve));
            }
        }
        Response::Ok { message } => println!("{message}"),
        Response::Error { message } => bail!(message),
    }
    Ok(())
}

fn format_curve(curve: &FanCurve) -> String {
    curve
        .to_pairs()
        .iter()
        .map(|(t, s)| format!("{t}:{s}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn format_report(report: &ApplyReport) -> String {
    match (&report.error, &report.warning) {
        (Some(e), _) => format!("{}: failed: {e}", report.fan),
        (None, Some(w)) => format!("{}: applied, unconfirmed: {w}", report.fan),
        (None, None) => format!("{}: applied and confirmed", report.fan),
    }
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

/// A preset name, or points as `30:20,60:50,90:100` (`30c:20%` also works).
fn parse_curve(text: &str) -> anyhow::Result<FanCurve> {
    if let Some(preset) = curve::preset(text) {
        return Ok(preset);
    }

    let mut pairs = Vec::new();
    for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (temp, speed) = token
            .split_once(':')
            .with_context(|| format!("expected temp:speed, got '{token}'"))?;
        let temp: u8 = temp
            .trim()
            .trim_end_matches(['c', 'C'])
            .parse()
            .with_context(|| format!("bad temperature in '{token}'"))?;
        let speed: u8 = speed
            .trim()
            .trim_end_matches('%')
            .parse()
            .with_context(|| format!("bad speed in '{token}'"))?;
        pairs.push((temp, speed));
    }
    Ok(FanCurve::from_pairs(&pairs)?)
}

fn parse_fan_curve(arg: &str) -> anyhow::Result<(FanId, FanCurve)> {
    let (fan, curve) = arg
        .split_once('=')
        .with_context(|| format!("expected FAN=CURVE, got '{arg}'"))?;
    Ok((FanId::new(fan.trim()), parse_curve(curve)?))
}
