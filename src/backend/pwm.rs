// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Generic hwmon PWM adapter.
//!
//! The kernel exposes a raw duty value per channel and nothing else, so a
//! curve degrades to one static duty write evaluated at the current
//! temperature. The controller re-applies it periodically.

use super::{BackendKind, Capabilities, FanBackend, current_speed};
use crate::curve::{FanCurve, MAX_SPEED_PCT};
use crate::error::{Error, Result};
use crate::hwmon::{self, PwmChannel};
use crate::power::{FanId, PowerProfile};
use crate::telemetry::TelemetrySource;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

const KIND: BackendKind = BackendKind::HwmonPwm;

pub struct HwmonPwmBackend {
    root: PathBuf,
    telemetry: Arc<dyn TelemetrySource>,
    channels: RwLock<Vec<PwmChannel>>,
    commanded: Mutex<HashMap<FanId, u32>>,
}

impl HwmonPwmBackend {
    pub fn new(root: impl Into<PathBuf>, telemetry: Arc<dyn TelemetrySource>) -> Self {
        Self {
            root: root.into(),
            telemetry,
            channels: RwLock::new(Vec::new()),
            commanded: Mutex::new(HashMap::new()),
        }
    }

    fn channel(&self, fan: &FanId) -> Result<PwmChannel> {
        let channels = self
            .channels
            .read()
            .map_err(|_| Error::rejected(KIND, "lookup", "channel list poisoned"))?;
        channels
            .iter()
            .find(|c| fan.matches(c.display_name()) || fan.matches(&c.id))
            .cloned()
            .ok_or_else(|| Error::UnknownFan(fan.clone()))
    }

    fn write_raw(&self, fan: &FanId, channel: &PwmChannel, raw: u32) -> Result<()> {
        hwmon::set_manual_pwm(channel, raw)
            .map_err(|e| Error::rejected(KIND, "write duty", format!("{}: {e}", channel.id)))?;
        if let Ok(mut commanded) = self.commanded.lock() {
            commanded.insert(fan.clone(), raw);
        }
        log::debug!("hwmon: {} <- {raw}/{}", channel.id, channel.pwm_max);
        Ok(())
    }
}

impl FanBackend for HwmonPwmBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_curves: false,
            supports_profiles: false,
            required_points: None,
        }
    }

    fn detect(&self) -> bool {
        let found = match hwmon::discover_pwm_channels(&self.root) {
            Ok(found) => found,
            Err(e) => {
                log::debug!("hwmon: cannot scan {}: {e}", self.root.display());
                return false;
            }
        };
        let present = !found.is_empty();
        if let Ok(mut channels) = self.channels.write() {
            *channels = found;
        }
        present
    }

    fn list_fans(&self) -> Result<Vec<FanId>> {
        let channels = self
            .channels
            .read()
            .map_err(|_| Error::rejected(KIND, "list fans", "channel list poisoned"))?;
        Ok(channels
            .iter()
            .map(|c| FanId::new(c.display_name()))
            .collect())
    }

    fn current_profile(&self) -> Result<Option<PowerProfile>> {
        Ok(None)
    }

    fn get_curve(&self, _profile: PowerProfile, fan: &FanId) -> Result<Option<FanCurve>> {
        let channel = self.channel(fan)?;
        Ok(hwmon::read_pwm(&channel)
            .map(|raw| FanCurve::flat(hwmon::raw_to_percent(raw, channel.pwm_max))))
    }

    fn set_curve(&self, _profile: PowerProfile, fan: &FanId, curve: &FanCurve) -> Result<()> {
        let channel = self.channel(fan)?;
        let speed = current_speed(self.telemetry.as_ref(), fan, curve);
        self.write_raw(fan, &channel, hwmon::percent_to_raw(speed, channel.pwm_max))
    }

    fn enable_curves(&self, _profile: PowerProfile, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn test_fan(&self, _profile: PowerProfile, fan: &FanId, duration: Duration) -> Result<()> {
        let channel = self.channel(fan)?;
        log::info!(
            "hwmon: testing {} at full duty for {}s",
            channel.id,
            duration.as_secs()
        );
        self.write_raw(
            fan,
            &channel,
            hwmon::percent_to_raw(MAX_SPEED_PCT, channel.pwm_max),
        )
    }

    fn expected_readback(&self, fan: &FanId, written: &FanCurve) -> FanCurve {
        let raw = self.commanded.lock().ok().and_then(|c| c.get(fan).copied());
        match (raw, self.channel(fan)) {
            (Some(raw), Ok(channel)) => {
                FanCurve::flat(hwmon::raw_to_percent(raw, channel.pwm_max))
            }
            _ => written.clone(),
        }
    }

    fn release(&self, fan: &FanId) -> Result<()> {
        let channel = self.channel(fan)?;
        hwmon::restore_automatic(&channel)
            .map_err(|e| Error::rejected(KIND, "release", format!("{}: {e}", channel.id)))?;
        if let Ok(mut commanded) = self.commanded.lock() {
            commanded.remove(fan);
        }
        log::info!("hwmon: {} back under firmware control", channel.id);
        Ok(())
    }
}
