// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Hardware backends.
//!
//! Every control mechanism sits behind [`FanBackend`]. Adapters declare what
//! they can do through [`Capabilities`] so the controller can pick a degraded
//! strategy (static duty, discrete levels) instead of failing on hardware
//! without native curves.
//!
//! Backend calls block on external processes or sysfs. Callers in async
//! code go through [`call_bounded`], which runs them on the blocking pool
//! under a timeout.

pub mod asusctl;
pub mod command;
pub mod dell;
pub mod pwm;
pub mod select;

use crate::curve::{FanCurve, MAX_TEMP_C};
use crate::error::{Error, Result};
use crate::power::{FanId, PowerProfile};
use crate::telemetry::TelemetrySource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use select::{BackendSelection, select_backend, system_candidates};

/// Which family of control mechanism an adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Vendor control daemon (`asusctl`).
    Asusctl,
    /// Legacy Dell SMM interface (`i8kctl`).
    DellSmm,
    /// Raw hwmon PWM files.
    HwmonPwm,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Asusctl => "asusctl",
            BackendKind::DellSmm => "dell-smm",
            BackendKind::HwmonPwm => "hwmon-pwm",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What an adapter supports natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Hardware stores and evaluates a whole curve.
    pub supports_curves: bool,
    /// Hardware keeps a separate curve set per power profile.
    pub supports_profiles: bool,
    /// Exact point count the hardware requires, if any.
    pub required_points: Option<usize>,
}

impl Capabilities {
    /// Degraded backends only hold a single output value, so the
    /// controller re-evaluates their curves as temperatures move.
    pub fn needs_periodic_refresh(&self) -> bool {
        !self.supports_curves
    }
}

/// The uniform capability surface every adapter implements.
pub trait FanBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Whether this mechanism is present on the host.
    fn detect(&self) -> bool;

    /// Fans this backend can drive.
    fn list_fans(&self) -> Result<Vec<FanId>>;

    /// The active power profile, or `None` if the backend has no profiles
    /// or cannot tell.
    fn current_profile(&self) -> Result<Option<PowerProfile>>;

    /// The curve the hardware currently reports for `fan`.
    fn get_curve(&self, profile: PowerProfile, fan: &FanId) -> Result<Option<FanCurve>>;

    fn set_curve(&self, profile: PowerProfile, fan: &FanId, curve: &FanCurve) -> Result<()>;

    fn enable_curves(&self, profile: PowerProfile, enabled: bool) -> Result<()>;

    /// Whether custom curves are switched on for `profile`, if queryable.
    fn curves_enabled(&self, _profile: PowerProfile) -> Result<Option<bool>> {
        Ok(None)
    }

    /// Drive `fan` at full speed under `profile`. The caller restores it
    /// after `duration`.
    fn test_fan(&self, profile: PowerProfile, fan: &FanId, duration: Duration) -> Result<()>;

    /// What [`get_curve`](Self::get_curve) should report after `written`
    /// was applied to `fan`.
    fn expected_readback(&self, _fan: &FanId, written: &FanCurve) -> FanCurve {
        written.clone()
    }

    /// Hand `fan` back to firmware control.
    fn release(&self, _fan: &FanId) -> Result<()> {
        Ok(())
    }
}

/// Evaluate `curve` at the temperature currently driving `fan`.
///
/// Without a reading the curve is evaluated at its hottest point so the
/// fan errs toward cooling.
pub(crate) fn current_speed(
    telemetry: &dyn TelemetrySource,
    fan: &FanId,
    curve: &FanCurve,
) -> u8 {
    let temp = match telemetry.temperature(fan) {
        Some(t) => t.round() as i32,
        None => {
            log::warn!("No temperature for {fan}, evaluating its curve at {MAX_TEMP_C}C");
            MAX_TEMP_C as i32
        }
    };
    curve.speed_at(temp)
}

/// Run a blocking backend call on the blocking pool, bounded by `timeout`.
///
/// An expired timeout yields [`Error::AdapterTimeout`]. The underlying call
/// is not cancelled and may still complete; only a later read-back can tell.
pub async fn call_bounded<T, F>(
    backend: &Arc<dyn FanBackend>,
    operation: &'static str,
    timeout: Duration,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn FanBackend) -> Result<T> + Send + 'static,
{
    let kind = backend.kind();
    let backend = Arc::clone(backend);
    let task = tokio::task::spawn_blocking(move || f(backend.as_ref()));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::rejected(
            kind,
            operation,
            format!("backend task failed: {e}"),
        )),
        Err(_) => {
            log::warn!("{kind}: {operation} timed out after {}s", timeout.as_secs());
            Err(Error::AdapterTimeout {
                backend: kind,
                operation,
                timeout,
            })
        }
    }
}
