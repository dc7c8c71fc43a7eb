// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Legacy Dell SMM adapter, driven through `i8kctl`.
//!
//! The SMM interface only knows three fan states per fan (off, low, high)
//! and has no curves or profiles. A curve is applied by evaluating it at the
//! fan's current temperature and picking the nearest state.

use super::{BackendKind, Capabilities, CommandRunner, FanBackend, current_speed};
use crate::curve::FanCurve;
use crate::error::{Error, Result};
use crate::power::{FanId, PowerProfile};
use crate::telemetry::TelemetrySource;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const KIND: BackendKind = BackendKind::DellSmm;

pub const DEFAULT_PROGRAM: &str = "i8kctl";
pub const DEFAULT_MODULES_PATH: &str = "/proc/modules";

/// Kernel modules that provide the SMM fan interface.
const SMM_MODULES: [&str; 2] = ["dell_smm_hwmon", "i8k"];

/// Discrete SMM fan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanLevel {
    Off,
    Low,
    High,
}

impl FanLevel {
    pub fn percent(self) -> u8 {
        match self {
            FanLevel::Off => 0,
            FanLevel::Low => 50,
            FanLevel::High => 100,
        }
    }

    /// The state whose speed is closest to `percent`. Ties go to the
    /// faster state.
    pub fn nearest(percent: u8) -> Self {
        [FanLevel::High, FanLevel::Low, FanLevel::Off]
            .into_iter()
            .min_by_key(|l| l.percent().abs_diff(percent))
            .unwrap_or(FanLevel::High)
    }

    fn code(self) -> u8 {
        match self {
            FanLevel::Off => 0,
            FanLevel::Low => 1,
            FanLevel::High => 2,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(FanLevel::Off),
            "1" => Some(FanLevel::Low),
            "2" => Some(FanLevel::High),
            _ => None,
        }
    }
}

pub struct DellSmmBackend {
    program: String,
    modules_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    telemetry: Arc<dyn TelemetrySource>,
    commanded: Mutex<HashMap<FanId, FanLevel>>,
}

impl DellSmmBackend {
    pub fn new(
        program: impl Into<String>,
        modules_path: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        telemetry: Arc<dyn TelemetrySource>,
    ) -> Self {
        Self {
            program: program.into(),
            modules_path: modules_path.into(),
            runner,
            telemetry,
            commanded: Mutex::new(HashMap::new()),
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

    fn read_levels(&self) -> Result<[Option<FanLevel>; 2]> {
        let out = self.invoke("read fan state", &["fan"])?;
        let mut codes = out.split_whitespace().map(FanLevel::from_code);
        Ok([codes.next().flatten(), codes.next().flatten()])
    }

    fn write_level(&self, fan: &FanId, level: FanLevel) -> Result<()> {
        let index = fan_index(fan)?;
        let code = level.code().to_string();
        let mut args = ["fan", "-", "-"];
        args[index + 1] = code.as_str();
        self.invoke("set fan state", &args)?;

        if let Ok(mut commanded) = self.commanded.lock() {
            commanded.insert(fan.clone(), level);
        }
        log::debug!("i8kctl: {fan} -> {level:?}");
        Ok(())
    }

    fn module_loaded(&self) -> bool {
        fs::read_to_string(&self.modules_path)
            .map(|modules| {
                modules.lines().any(|line| {
                    line.split_whitespace()
                        .next()
                        .is_some_and(|name| SMM_MODULES.contains(&name))
                })
            })
            .unwrap_or(false)
    }
}

/// CPU is the left fan (index 0), GPU the right one (index 1).
fn fan_index(fan: &FanId) -> Result<usize> {
    if fan.matches("CPU") || fan.matches("left") {
        Ok(0)
    } else if fan.matches("GPU") || fan.matches("right") {
        Ok(1)
    } else {
        Err(Error::UnknownFan(fan.clone()))
    }
}

impl FanBackend for DellSmmBackend {
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
        let tool = self
            .runner
            .run(&self.program, &["version"])
            .map(|out| out.success)
            .unwrap_or(false);
        tool || self.module_loaded()
    }

    fn list_fans(&self) -> Result<Vec<FanId>> {
        Ok(vec![FanId::cpu(), FanId::gpu()])
    }

    fn current_profile(&self) -> Result<Option<PowerProfile>> {
        Ok(None)
    }

    fn get_curve(&self, _profile: PowerProfile, fan: &FanId) -> Result<Option<FanCurve>> {
        let index = fan_index(fan)?;
        let levels = self.read_levels()?;
        Ok(levels[index].map(|level| FanCurve::flat(level.percent())))
    }

    fn set_curve(&self, _profile: PowerProfile, fan: &FanId, curve: &FanCurve) -> Result<()> {
        let speed = current_speed(self.telemetry.as_ref(), fan, curve);
        self.write_level(fan, FanLevel::nearest(speed))
    }

    fn enable_curves(&self, _profile: PowerProfile, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn test_fan(&self, _profile: PowerProfile, fan: &FanId, duration: Duration) -> Result<()> {
        log::info!("i8kctl: testing {fan} at high for {}s", duration.as_secs());
        self.write_level(fan, FanLevel::High)
    }

    fn expected_readback(&self, fan: &FanId, written: &FanCurve) -> FanCurve {
        self.commanded
            .lock()
            .ok()
            .and_then(|c| c.get(fan).copied())
            .map(|level| FanCurve::flat(level.percent()))
            .unwrap_or_else(|| written.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::command::fake::ScriptedRunner;
    use crate::telemetry::FanReading;
    use tempfile::TempDir;

    struct FixedTemp(Option<f64>);

    impl TelemetrySource for FixedTemp {
        fn temperature(&self, _fan: &FanId) -> Option<f64> {
            self.0
        }
        fn fan_readings(&self) -> Vec<FanReading> {
            Vec::new()
        }
    }

    fn backend(temp: Option<f64>) -> (DellSmmBackend, Arc<ScriptedRunner>, TempDir) {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let backend = DellSmmBackend::new(
            "i8kctl",
            dir.path().join("modules"),
            runner.clone(),
            Arc::new(FixedTemp(temp)),
        );
        (backend, runner, dir)
    }

    #[test]
    fn test_nearest_level() {
        assert_eq!(FanLevel::nearest(0), FanLevel::Off);
        assert_eq!(FanLevel::nearest(24), FanLevel::Off);
        assert_eq!(FanLevel::nearest(25), FanLevel::Low);
        assert_eq!(FanLevel::nearest(60), FanLevel::Low);
        assert_eq!(FanLevel::nearest(75), FanLevel::High);
        assert_eq!(FanLevel::nearest(100), FanLevel::High);
    }

    #[test]
    fn test_set_curve_picks_level_at_current_temperature() {
        let (backend, runner, _dir) = backend(Some(60.0));
        runner.ok("i8kctl fan", "");
        let curve = FanCurve::from_pairs(&[(30, 0), (90, 100)]).unwrap();

        // 50% at 60C -> low
        backend
            .set_curve(PowerProfile::Balanced, &FanId::gpu(), &curve)
            .unwrap();
        assert_eq!(runner.calls(), vec!["i8kctl fan - 1"]);
        assert_eq!(
            backend.expected_readback(&FanId::gpu(), &curve),
            FanCurve::flat(50)
        );
    }

    #[test]
    fn test_missing_temperature_runs_hot() {
        let (backend, runner, _dir) = backend(None);
        runner.ok("i8kctl fan", "");
        let curve = FanCurve::from_pairs(&[(30, 0), (90, 100)]).unwrap();
        backend
            .set_curve(PowerProfile::Balanced, &FanId::cpu(), &curve)
            .unwrap();
        assert_eq!(runner.calls(), vec!["i8kctl fan 2 -"]);
    }

    #[test]
    fn test_get_curve_reads_levels() {
        let (backend, runner, _dir) = backend(None);
        runner.ok("i8kctl fan", "1 2\n");
        assert_eq!(
            backend
                .get_curve(PowerProfile::Balanced, &FanId::cpu())
                .unwrap(),
            Some(FanCurve::flat(50))
        );
        assert_eq!(
            backend
                .get_curve(PowerProfile::Balanced, &FanId::gpu())
                .unwrap(),
            Some(FanCurve::flat(100))
        );
    }

    #[test]
    fn test_unknown_fan() {
        let (backend, _runner, _dir) = backend(None);
        assert!(matches!(
            backend.get_curve(PowerProfile::Balanced, &FanId::new("hwmon3/pwm1")),
            Err(Error::UnknownFan(_))
        ));
    }

    #[test]
    fn test_detect_via_kernel_module() {
        let (backend, runner, dir) = backend(None);
        runner.missing("i8kctl");
        assert!(!backend.detect());

        fs::write(
            dir.path().join("modules"),
            "snd_hda_intel 61440 3 - Live 0x0\ndell_smm_hwmon 28672 0 - Live 0x0\n",
        )
        .unwrap();
        assert!(backend.detect());
    }

    #[test]
    fn test_no_profiles_or_curves() {
        let (backend, _runner, _dir) = backend(None);
        let caps = backend.capabilities();
        assert!(!caps.supports_curves);
        assert!(!caps.supports_profiles);
        assert_eq!(backend.current_profile().unwrap(), None);
    }
}
