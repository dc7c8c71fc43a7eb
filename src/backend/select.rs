// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Startup backend selection.
//!
//! Candidates are probed in a fixed priority order and the first one that
//! detects wins. The resulting [`BackendSelection`] cannot be changed; using
//! different hardware means restarting the process.

use super::asusctl::AsusctlBackend;
use super::dell::DellSmmBackend;
use super::pwm::HwmonPwmBackend;
use super::{BackendKind, Capabilities, CommandRunner, FanBackend, call_bounded};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::telemetry::TelemetrySource;
use std::sync::Arc;
use std::time::Duration;

/// The backend this process committed to.
#[derive(Clone)]
pub struct BackendSelection {
    backend: Arc<dyn FanBackend>,
}

impl BackendSelection {
    /// Wrap an already chosen backend, e.g. a fake in tests.
    pub fn new(backend: Arc<dyn FanBackend>) -> Self {
        Self { backend }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn backend(&self) -> &Arc<dyn FanBackend> {
        &self.backend
    }
}

/// The real adapters in priority order: vendor daemon, legacy SMM, PWM.
pub fn system_candidates(
    config: &BackendConfig,
    runner: Arc<dyn CommandRunner>,
    telemetry: Arc<dyn TelemetrySource>,
) -> Vec<Arc<dyn FanBackend>> {
    let asusctl: Arc<dyn FanBackend> =
        Arc::new(AsusctlBackend::new(config.asusctl_path.clone(), runner.clone()));
    let dell: Arc<dyn FanBackend> = Arc::new(DellSmmBackend::new(
        config.i8kctl_path.clone(),
        config.modules_path.clone(),
        runner,
        telemetry.clone(),
    ));
    let pwm: Arc<dyn FanBackend> =
        Arc::new(HwmonPwmBackend::new(config.hwmon_root.clone(), telemetry));
    vec![asusctl, dell, pwm]
}

/// Probe `candidates` in order and commit to the first that detects.
pub async fn select_backend(
    candidates: Vec<Arc<dyn FanBackend>>,
    timeout: Duration,
) -> Result<BackendSelection> {
    for backend in candidates {
        let kind = backend.kind();
        match call_bounded(&backend, "detect", timeout, |b| Ok(b.detect())).await {
            Ok(true) => {
                log::info!("Using {kind} backend ({:?})", backend.capabilities());
                return Ok(BackendSelection::new(backend));
            }
            Ok(false) => log::debug!("{kind} backend not present"),
            Err(e) => log::warn!("Probing {kind} failed: {e}"),
        }
    }
    log::error!("No fan control backend detected");
    Err(Error::AdapterUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::FanCurve;
    use crate::power::{FanId, PowerProfile};

    struct Probe {
        kind: BackendKind,
        present: bool,
        delay: Duration,
    }

    impl FanBackend for Probe {
        fn kind(&self) -> BackendKind {
            self.kind
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                supports_curves: false,
                supports_profiles: false,
                required_points: None,
            }
        }
        fn detect(&self) -> bool {
            std::thread::sleep(self.delay);
            self.present
        }
        fn list_fans(&self) -> Result<Vec<FanId>> {
            Ok(Vec::new())
        }
        fn current_profile(&self) -> Result<Option<PowerProfile>> {
            Ok(None)
        }
        fn get_curve(&self, _: PowerProfile, _: &FanId) -> Result<Option<FanCurve>> {
            Ok(None)
        }
        fn set_curve(&self, _: PowerProfile, _: &FanId, _: &FanCurve) -> Result<()> {
            Ok(())
        }
        fn enable_curves(&self, _: PowerProfile, _: bool) -> Result<()> {
            Ok(())
        }
        fn test_fan(&self, _: PowerProfile, _: &FanId, _: Duration) -> Result<()> {
            Ok(())
        }
    }

    fn probe(kind: BackendKind, present: bool) -> Arc<dyn FanBackend> {
        Arc::new(Probe {
            kind,
            present,
            delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_first_detected_backend_wins() {
        let selection = select_backend(
            vec![
                probe(BackendKind::Asusctl, false),
                probe(BackendKind::DellSmm, true),
                probe(BackendKind::HwmonPwm, true),
            ],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(selection.kind(), BackendKind::DellSmm);
    }

    #[tokio::test]
    async fn test_hung_probe_is_skipped() {
        let hung: Arc<dyn FanBackend> = Arc::new(Probe {
            kind: BackendKind::Asusctl,
            present: true,
            delay: Duration::from_millis(500),
        });
        let selection = select_backend(
            vec![hung, probe(BackendKind::HwmonPwm, true)],
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert_eq!(selection.kind(), BackendKind::HwmonPwm);
    }

    #[tokio::test]
    async fn test_nothing_detected() {
        let result = select_backend(
            vec![probe(BackendKind::Asusctl, false)],
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(Error::AdapterUnavailable)));
    }
}
