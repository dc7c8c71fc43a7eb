// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Vendor daemon adapter for ASUS laptops, driven through `asusctl`.
//!
//! Each power profile owns its own pair of CPU/GPU curves. Curves go over
//! the wire as exactly eight `<temp>c:<speed>%` points joined by commas.
//! The output of `asusctl fan-curve` has changed between releases, so the
//! reader accepts both that form and the older whitespace-separated pairs.

use super::{BackendKind, Capabilities, CommandRunner, FanBackend};
use crate::curve::{self, CurvePoint, FanCurve, HARDWARE_TEMPERATURES};
use crate::error::{Error, Result};
use crate::power::{FanId, PowerProfile};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const KIND: BackendKind = BackendKind::Asusctl;

/// Default program name, resolved through `PATH`.
pub const DEFAULT_PROGRAM: &str = "asusctl";

pub struct AsusctlBackend {
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl AsusctlBackend {
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    fn invoke(&self, operation: &'static str, args: &[&str]) -> Result<String> {
        let out = self
            .runner
            .run(&self.program, args)
            .map_err(|e| Error::rejected(KIND, operation, format!("{}: {e}", self.program)))?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(Error::rejected(KIND, operation, out.failure_message()))
        }
    }

    fn write_curve(&self, profile: PowerProfile, fan: &FanId, curve: &FanCurve) -> Result<()> {
        if curve.len() != HARDWARE_TEMPERATURES.len() {
            return Err(Error::InvalidCurve(format!(
                "asusctl needs exactly {} points, got {}",
                HARDWARE_TEMPERATURES.len(),
                curve.len()
            )));
        }
        let data = to_wire(curve);
        let fan_arg = fan.as_str().to_ascii_lowercase();
        log::debug!("asusctl: {profile}/{fan} <- {data}");
        self.invoke(
            "set curve",
            &[
                "fan-curve",
                "--mod-profile",
                profile.name(),
                "--fan",
                &fan_arg,
                "--data",
                &data,
            ],
        )?;
        Ok(())
    }
}

impl FanBackend for AsusctlBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_curves: true,
            supports_profiles: true,
            required_points: Some(HARDWARE_TEMPERATURES.len()),
        }
    }

    fn detect(&self) -> bool {
        match self.runner.run(&self.program, &["--version"]) {
            Ok(out) => out.success,
            Err(e) => {
                log::debug!("asusctl not available: {e}");
                false
            }
        }
    }

    fn list_fans(&self) -> Result<Vec<FanId>> {
        Ok(vec![FanId::cpu(), FanId::gpu()])
    }

    fn current_profile(&self) -> Result<Option<PowerProfile>> {
        let out = self.invoke("read profile", &["profile", "-p"])?;
        Ok(parse_active_profile(&out))
    }

    fn get_curve(&self, profile: PowerProfile, fan: &FanId) -> Result<Option<FanCurve>> {
        let out = self.invoke(
            "read curves",
            &["fan-curve", "--mod-profile", profile.name()],
        )?;
        Ok(parse_fan_curves(&out)
            .into_iter()
            .find(|(label, _)| fan.matches(label))
            .map(|(_, curve)| curve))
    }

    fn set_curve(&self, profile: PowerProfile, fan: &FanId, curve: &FanCurve) -> Result<()> {
        self.write_curve(profile, fan, curve)
    }

    fn enable_curves(&self, profile: PowerProfile, enabled: bool) -> Result<()> {
        let flag = if enabled { "true" } else { "false" };
        self.invoke(
            "enable curves",
            &[
                "fan-curve",
                "--mod-profile",
                profile.name(),
                "--enable-fan-curves",
                flag,
            ],
        )?;
        log::info!(
            "asusctl: fan curves {} for {profile}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    fn curves_enabled(&self, _profile: PowerProfile) -> Result<Option<bool>> {
        let out = self.invoke("read enabled", &["fan-curve", "--get-enabled"])?;
        Ok(parse_enabled(&out))
    }

    fn test_fan(&self, profile: PowerProfile, fan: &FanId, duration: Duration) -> Result<()> {
        let max = curve::preset("max")
            .ok_or_else(|| Error::UnknownPreset("max".to_string()))?;
        log::info!(
            "asusctl: testing {fan} at full speed for {}s",
            duration.as_secs()
        );
        self.write_curve(profile, fan, &max)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Encode a curve as `30c:20%,40c:25%,...`.
pub fn to_wire(curve: &FanCurve) -> String {
    curve
        .points()
        .iter()
        .map(|p| format!("{}c:{}%", p.temperature, p.fan_speed))
        .collect::<Vec<_>>()
        .join(",")
}

/// Extract curve points from one line of output.
///
/// Understands `30c:20%` tokens and, failing those, plain `30 20` pairs.
/// Values are clamped into range the same way the vendor tool reports them.
pub fn parse_points(text: &str) -> Vec<CurvePoint> {
    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    if text.contains("c:") {
        return tokens
            .iter()
            .filter_map(|t| {
                let (temp, speed) = t.split_once("c:")?;
                let speed = speed.trim_end_matches('%');
                Some(CurvePoint::clamped(temp.parse().ok()?, speed.parse().ok()?))
            })
            .collect();
    }

    if !tokens.iter().all(|t| t.chars().all(|c| c.is_ascii_digit())) {
        return Vec::new();
    }
    let numbers: Vec<i64> = tokens.iter().filter_map(|t| t.parse().ok()).collect();
    if numbers.len() % 2 != 0 {
        return Vec::new();
    }
    numbers
        .chunks(2)
        .map(|pair| CurvePoint::clamped(pair[0], pair[1]))
        .collect()
}

/// Parse `asusctl fan-curve --mod-profile <P>` output into curves keyed by
/// fan label (`CPU`, `GPU`, `MID`).
///
/// A line naming a fan starts a new block; points may follow on the same
/// line or on the lines below it.
pub fn parse_fan_curves(output: &str) -> HashMap<String, FanCurve> {
    let mut curves = HashMap::new();
    let mut current: Option<String> = None;
    let mut points: Vec<CurvePoint> = Vec::new();

    let mut flush = |label: Option<String>, points: &mut Vec<CurvePoint>| {
        if let Some(label) = label {
            match FanCurve::new(std::mem::take(points)) {
                Ok(curve) => {
                    curves.insert(label, curve);
                }
                Err(e) => log::debug!("asusctl: ignoring unreadable {label} curve: {e}"),
            }
        }
        points.clear();
    };

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(label) = fan_label(line) {
            flush(current.take(), &mut points);
            current = Some(label.to_string());
            points.extend(parse_points(line));
        } else if current.is_some() {
            points.extend(parse_points(line));
        }
    }
    flush(current, &mut points);

    curves
}

fn fan_label(line: &str) -> Option<&'static str> {
    let lower = line.to_ascii_lowercase();
    ["cpu", "gpu", "mid"]
        .into_iter()
        .zip(["CPU", "GPU", "MID"])
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, label)| label)
}

/// Parse `--get-enabled` output such as `CPU: enabled: true`.
///
/// `Some(true)` only when every fan that reports a flag reports it on;
/// `None` when no flag could be read at all.
pub fn parse_enabled(output: &str) -> Option<bool> {
    let flags: Vec<bool> = output
        .lines()
        .filter_map(|line| {
            let lower = line.to_ascii_lowercase();
            let (_, rest) = lower.split_once("enabled:")?;
            let value = rest
                .split(|c: char| c == ',' || c.is_whitespace())
                .find(|t| !t.is_empty())?;
            match value {
                "true" | "yes" | "on" => Some(true),
                "false" | "no" | "off" => Some(false),
                _ => None,
            }
        })
        .collect();
    if flags.is_empty() {
        None
    } else {
        Some(flags.iter().all(|&on| on))
    }
}

/// Parse `asusctl profile -p` output.
pub fn parse_active_profile(output: &str) -> Option<PowerProfile> {
    let from_name = |name: &str| {
        let name = name.to_ascii_lowercase();
        [
            PowerProfile::Balanced,
            PowerProfile::Quiet,
            PowerProfile::Performance,
        ]
        .into_iter()
        .find(|p| name.contains(&p.name().to_ascii_lowercase()))
    };

    for line in output.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(idx) = lower.find("active profile is") {
            if let Some(profile) = from_name(&lower[idx + "active profile is".len()..]) {
                return Some(profile);
            }
        }
    }

    let lower = output.to_ascii_lowercase();
    [
        PowerProfile::Performance,
        PowerProfile::Quiet,
        PowerProfile::Balanced,
    ]
    .into_iter()
    .find(|p| lower.contains(&p.name().to_ascii_lowercase()))
}
