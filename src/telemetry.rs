// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Telemetry seam.
//!
//! The control core never samples sensors on its own; it asks a
//! [`TelemetrySource`] for the temperature that drives a fan and maps that
//! through a curve. [`HwmonTelemetry`] is the small hwmon-backed source the
//! daemon uses.

use crate::hwmon::{self, PwmChannel, TempSensor};
use crate::power::FanId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;

/// Tachometer reading for one fan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanReading {
    pub fan_name: String,
    pub rpm: u32,
}

pub trait TelemetrySource: Send + Sync {
    /// Temperature in degrees Celsius that drives `fan`, if known.
    fn temperature(&self, fan: &FanId) -> Option<f64>;

    /// Current fan speeds.
    fn fan_readings(&self) -> Vec<FanReading>;
}

/// Reads temperatures and tachometers from hwmon.
///
/// Fans listed in `fan_sensors` use that sensor; any other fan follows the
/// hottest sensor on the machine.
pub struct HwmonTelemetry {
    sensors: Vec<TempSensor>,
    channels: Vec<PwmChannel>,
    fan_sensors: HashMap<String, String>,
}

impl HwmonTelemetry {
    pub fn discover(root: &Path, fan_sensors: HashMap<String, String>) -> io::Result<Self> {
        let sensors = hwmon::discover_temp_sensors(root)?;
        let channels = hwmon::discover_pwm_channels(root).unwrap_or_default();
        log::info!(
            "Telemetry: {} temp sensor(s), {} tachometer channel(s)",
            sensors.len(),
            channels.iter().filter(|c| c.rpm_path.is_some()).count()
        );
        Ok(Self {
            sensors,
            channels,
            fan_sensors,
        })
    }

    /// A source without sensors. Every fan then falls back to the hottest
    /// point of its curve.
    pub fn empty() -> Self {
        Self {
            sensors: Vec::new(),
            channels: Vec::new(),
            fan_sensors: HashMap::new(),
        }
    }
}

impl TelemetrySource for HwmonTelemetry {
    fn temperature(&self, fan: &FanId) -> Option<f64> {
        let temps = hwmon::read_temp_map(&self.sensors);
        let mapped = self
            .fan_sensors
            .iter()
            .find(|(name, _)| fan.matches(name))
            .map(|(_, sensor)| sensor);

        match mapped {
            Some(sensor_id) => {
                let temp = temps.get(sensor_id).copied();
                if temp.is_none() {
                    log::warn!("Fan {fan}: sensor '{sensor_id}' has no reading");
                }
                temp
            }
            None => temps.into_values().fold(None, |hottest, t| match hottest {
                Some(h) if h >= t => Some(h),
                _ => Some(t),
            }),
        }
    }

    fn fan_readings(&self) -> Vec<FanReading> {
        self.channels
            .iter()
            .filter_map(|c| {
                hwmon::read_rpm(c).map(|rpm| FanReading {
                    fan_name: c.display_name().to_string(),
                    rpm,
                })
            })
            .collect()
    }
}
