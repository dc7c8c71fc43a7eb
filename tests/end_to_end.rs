// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

use fancurve::backend::{BackendKind, BackendSelection, Capabilities, FanBackend};
use fancurve::config::TimeoutConfig;
use fancurve::controller::{ApplyOutcome, FanController};
use fancurve::curve::FanCurve;
use fancurve::power::{FanId, PowerProfile};
use fancurve::profiles::{ProfileManager, SavedProfile};
use fancurve::store::ActiveCurveStore;
use fancurve::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Eight-point curve hardware that can be told to misreport its speeds.
#[derive(Default)]
struct Hardware {
    curves: Mutex<HashMap<(PowerProfile, FanId), FanCurve>>,
    readback_offset: Mutex<u8>,
}

impl FanBackend for Hardware {
    fn kind(&self) -> BackendKind {
        BackendKind::Asusctl
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_curves: true,
            supports_profiles: true,
            required_points: Some(8),
        }
    }

    fn detect(&self) -> bool {
        true
    }

    fn list_fans(&self) -> Result<Vec<FanId>> {
        Ok(vec![FanId::cpu(), FanId::gpu()])
    }

    fn current_profile(&self) -> Result<Option<PowerProfile>> {
        Ok(Some(PowerProfile::Performance))
    }

    fn get_curve(&self, profile: PowerProfile, fan: &FanId) -> Result<Option<FanCurve>> {
        let offset = *self.readback_offset.lock().unwrap();
        let Some(curve) = self.curves.lock().unwrap().get(&(profile, fan.clone())).cloned() else {
            return Ok(None);
        };
        let pairs: Vec<(u8, u8)> = curve
            .to_pairs()
            .into_iter()
            .map(|(t, s)| (t, s.saturating_sub(offset)))
            .collect();
        FanCurve::from_pairs(&pairs).map(Some)
    }

    fn set_curve(&self, profile: PowerProfile, fan: &FanId, curve: &FanCurve) -> Result<()> {
        if curve.len() != 8 {
            return Err(Error::InvalidCurve("hardware takes 8 points".into()));
        }
        self.curves
            .lock()
            .unwrap()
            .insert((profile, fan.clone()), curve.clone());
        Ok(())
    }

    fn enable_curves(&self, _profile: PowerProfile, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn test_fan(&self, profile: PowerProfile, fan: &FanId, _: Duration) -> Result<()> {
        self.set_curve(
            profile,
            fan,
            &FanCurve::flat(100).to_hardware_points(),
        )
    }
}

fn controller(hardware: Arc<Hardware>, state_dir: &Path) -> FanController {
    let backend: Arc<dyn FanBackend> = hardware;
    FanController::new(
        BackendSelection::new(backend),
        ActiveCurveStore::in_dir(state_dir),
        ProfileManager::in_dir(state_dir),
        TimeoutConfig::default(),
    )
}

fn gaming_cpu() -> FanCurve {
    FanCurve::from_pairs(&[(30, 40), (60, 70), (85, 100), (90, 100)]).unwrap()
}

#[test]
fn test_gaming_profile_round_trip() {
    let dir = TempDir::new().unwrap();
    let profiles = ProfileManager::in_dir(dir.path());
    profiles
        .save(&SavedProfile::new(
            "Gaming",
            "",
            BTreeMap::from([(FanId::cpu(), gaming_cpu())]),
        ))
        .unwrap();

    assert!(profiles.list().unwrap().contains(&"Gaming".to_string()));
    let cpu = profiles.get("Gaming").unwrap().curves[&FanId::cpu()].clone();
    // 70 + (100 - 70) * (70 - 60) / (85 - 60) = 82
    assert_eq!(cpu.speed_at(70), 82);
}

#[test]
fn test_expansion_keeps_original_speeds() {
    let curve = FanCurve::from_pairs(&[(30, 20), (90, 80)]).unwrap();
    let expanded = curve.to_hardware_points();
    assert_eq!(expanded.len(), 8);
    assert_eq!(expanded.speed_at(30), 20);
    assert_eq!(expanded.speed_at(90), 80);
}

#[tokio::test]
async fn test_profile_survives_restart() {
    let dir = TempDir::new().unwrap();
    let hardware = Arc::new(Hardware::default());
    let first = controller(hardware.clone(), dir.path());
    first
        .save_profile(&SavedProfile::new(
            "Gaming",
            "",
            BTreeMap::from([(FanId::cpu(), gaming_cpu())]),
        ))
        .unwrap();
    let results = first.apply_profile("Gaming").await.unwrap();
    assert!(results[0].outcome.as_ref().unwrap().is_confirmed());

    // hardware forgets everything, a new process restores it
    hardware.curves.lock().unwrap().clear();
    let second = controller(hardware.clone(), dir.path());
    let restored = second.restore_on_startup().await;
    assert_eq!(restored.len(), 1);
    assert!(restored[0].outcome.as_ref().unwrap().is_confirmed());
    assert_eq!(
        hardware
            .get_curve(PowerProfile::Performance, &FanId::cpu())
            .unwrap(),
        Some(gaming_cpu().to_hardware_points())
    );
}

#[tokio::test]
async fn test_bad_readback_never_persists() {
    let dir = TempDir::new().unwrap();
    let hardware = Arc::new(Hardware::default());
    *hardware.readback_offset.lock().unwrap() = 2;
    let controller = controller(hardware, dir.path());

    let outcome = controller
        .apply_curve(&FanId::gpu(), &gaming_cpu())
        .await
        .unwrap();
    assert!(matches!(outcome, ApplyOutcome::Unconfirmed { .. }));
    assert!(controller.store().load_all().is_empty());
    assert!(!controller.current_status(&FanId::gpu()).confirmed);
}
