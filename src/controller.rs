// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The fan control orchestrator.
//!
//! [`FanController`] is the one place that talks to the selected backend on
//! behalf of users. Every curve write goes through the same sequence:
//!
//! 1. expand the curve to the point count the hardware needs
//! 2. make sure custom curves are switched on for the power profile
//! 3. write it
//! 4. read it back and compare within ±1
//! 5. remember it, but only if the read-back confirmed it
//!
//! Writes for the same power profile and fan are serialised. The controller
//! never sleeps on wall-clock timers; fan tests hand back a snapshot that the
//! caller restores when it decides the test is over.

use crate::backend::{BackendKind, BackendSelection, Capabilities, FanBackend, call_bounded};
use crate::config::TimeoutConfig;
use crate::curve::{self, FanCurve, HARDWARE_TEMPERATURES, PRESET_NAMES};
use crate::error::{Error, Result};
use crate::power::{FanId, PowerProfile};
use crate::profiles::{ProfileManager, SavedProfile};
use crate::store::ActiveCurveStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Where a fan is in the write-verify cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanState {
    Unmanaged,
    Applying,
    Applied,
    Verifying,
    Confirmed,
    Unconfirmed,
}

impl fmt::Display for FanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FanState::Unmanaged => "unmanaged",
            FanState::Applying => "applying",
            FanState::Applied => "applied",
            FanState::Verifying => "verifying",
            FanState::Confirmed => "confirmed",
            FanState::Unconfirmed => "unconfirmed",
        };
        f.pad(s)
    }
}

/// Result of a write that the backend accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Confirmed,
    /// The read-back was missing or disagreed. Nothing was remembered.
    Unconfirmed { readback: Option<FanCurve> },
}

impl ApplyOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ApplyOutcome::Confirmed)
    }

    /// The non-fatal warning to show for an unconfirmed write.
    pub fn warning(&self, fan: &FanId) -> Option<Error> {
        match self {
            ApplyOutcome::Confirmed => None,
            ApplyOutcome::Unconfirmed { .. } => {
                Some(Error::VerificationMismatch { fan: fan.clone() })
            }
        }
    }
}

/// Per-fan result of a multi-fan operation.
#[derive(Debug)]
pub struct FanResult {
    pub fan: FanId,
    pub outcome: Result<ApplyOutcome>,
}

/// Snapshot of a fan's curve taken before a full-speed test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanTestSnapshot {
    pub fan: FanId,
    pub power_profile: PowerProfile,
    /// `None` means the fan was not under our control; it is released
    /// back to firmware after the test.
    pub previous: Option<FanCurve>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanStatus {
    pub fan: FanId,
    pub power_profile: PowerProfile,
    pub state: FanState,
    pub curve: Option<FanCurve>,
    pub confirmed: bool,
    /// Saved profile the curve came from, if it was applied as part of one.
    pub active_profile_name: Option<String>,
    pub testing: bool,
}

#[derive(Debug, Clone)]
struct FanRecord {
    state: FanState,
    power_profile: PowerProfile,
    curve: Option<FanCurve>,
    saved_profile: Option<String>,
}

/// Why a curve is being written.
#[derive(Debug, Clone)]
enum Origin {
    /// Direct user request: remembered, clears any saved profile name.
    User,
    /// Part of a saved profile: remembered, tagged with the profile name.
    Profile(String),
    /// Re-applying something already remembered: never written to the store.
    Restore,
}

type PairLock = Arc<tokio::sync::Mutex<()>>;

pub struct FanController {
    selection: BackendSelection,
    store: ActiveCurveStore,
    profiles: ProfileManager,
    timeouts: TimeoutConfig,
    pair_locks: Mutex<HashMap<(PowerProfile, FanId), PairLock>>,
    fans: Mutex<HashMap<FanId, FanRecord>>,
    testing: Mutex<HashSet<FanId>>,
    last_profile: Mutex<Option<PowerProfile>>,
}

impl FanController {
    pub fn new(
        selection: BackendSelection,
        store: ActiveCurveStore,
        profiles: ProfileManager,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            selection,
            store,
            profiles,
            timeouts,
            pair_locks: Mutex::new(HashMap::new()),
            fans: Mutex::new(HashMap::new()),
            testing: Mutex::new(HashSet::new()),
            last_profile: Mutex::new(None),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.selection.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.selection.capabilities()
    }

    pub fn store(&self) -> &ActiveCurveStore {
        &self.store
    }

    pub fn list_available_presets(&self) -> Vec<&'static str> {
        PRESET_NAMES.to_vec()
    }

    pub async fn fans(&self) -> Result<Vec<FanId>> {
        call_bounded(self.backend(), "list fans", self.timeouts.query(), |b| {
            b.list_fans()
        })
        .await
    }

    /// The power profile curves are currently keyed under.
    ///
    /// Backends without profiles always use [`PowerProfile::Balanced`]. If the
    /// backend cannot answer, the last known profile is assumed.
    pub async fn current_power_profile(&self) -> PowerProfile {
        if !self.capabilities().supports_profiles {
            return PowerProfile::Balanced;
        }
        let queried = call_bounded(self.backend(), "read profile", self.timeouts.query(), |b| {
            b.current_profile()
        })
        .await;
        let fallback = lock(&self.last_profile).unwrap_or(PowerProfile::Balanced);
        match queried {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                log::warn!("Backend did not report a power profile, assuming {fallback}");
                fallback
            }
            Err(e) => {
                log::warn!("Could not read power profile ({e}), assuming {fallback}");
                fallback
            }
        }
    }

    // -----------------------------------------------------------------------
    // Applying curves
    // -----------------------------------------------------------------------

    /// Apply `curve` to `fan` under the active power profile.
    ///
    /// An `Err` means the backend rejected or never answered the write; an
    /// `Ok(Unconfirmed)` means it accepted it but the read-back disagreed.
    /// Only `Ok(Confirmed)` updates the remembered curve.
    pub async fn apply_curve(&self, fan: &FanId, curve: &FanCurve) -> Result<ApplyOutcome> {
        let profile = self.current_power_profile().await;
        self.apply_to(profile, fan, curve, Origin::User).await
    }

    pub async fn apply_preset(&self, fan: &FanId, name: &str) -> Result<ApplyOutcome> {
        let curve = curve::preset(name).ok_or_else(|| Error::UnknownPreset(name.to_string()))?;
        self.apply_curve(fan, &curve).await
    }

    /// Apply every curve of a saved profile.
    pub async fn apply_profile(&self, name: &str) -> Result<Vec<FanResult>> {
        let saved = self.profiles.get(name)?;
        let profile = self.current_power_profile().await;
        let mut results = Vec::with_capacity(saved.curves.len());
        for (fan, curve) in &saved.curves {
            let outcome = self
                .apply_to(profile, fan, curve, Origin::Profile(saved.name.clone()))
                .await;
            results.push(FanResult {
                fan: fan.clone(),
                outcome,
            });
        }
        log::info!("Applied saved profile '{name}' to {profile}");
        Ok(results)
    }

    async fn apply_to(
        &self,
        profile: PowerProfile,
        fan: &FanId,
        curve: &FanCurve,
        origin: Origin,
    ) -> Result<ApplyOutcome> {
        let transmitted = self.transmit_form(curve)?;

        let pair = self.pair_lock(profile, fan);
        let _guard = pair.lock().await;

        let previous = lock(&self.fans).get(fan).cloned();
        let saved_profile = match &origin {
            Origin::User => None,
            Origin::Profile(name) => Some(name.clone()),
            Origin::Restore => previous.as_ref().and_then(|r| r.saved_profile.clone()),
        };
        let update = |state: FanState| {
            self.set_record(
                fan,
                FanRecord {
                    state,
                    power_profile: profile,
                    curve: Some(curve.clone()),
                    saved_profile: saved_profile.clone(),
                },
            );
        };

        update(FanState::Applying);
        self.ensure_enabled(profile).await;

        let write = {
            let fan = fan.clone();
            let transmitted = transmitted.clone();
            call_bounded(self.backend(), "set curve", self.timeouts.write(), move |b| {
                b.set_curve(profile, &fan, &transmitted)
            })
            .await
        };
        if let Err(e) = write {
            log::warn!("Applying {profile}/{fan} curve failed: {e}");
            match previous {
                Some(record) => self.set_record(fan, record),
                None => {
                    lock(&self.fans).remove(fan);
                }
            }
            return Err(e);
        }
        update(FanState::Applied);

        update(FanState::Verifying);
        let outcome = self.verify(profile, fan, &transmitted).await;

        match &outcome {
            ApplyOutcome::Confirmed => {
                update(FanState::Confirmed);
                if !matches!(origin, Origin::Restore) {
                    self.store.save(profile, fan, curve)?;
                }
                log::info!("{profile}/{fan} curve applied and confirmed");
            }
            ApplyOutcome::Unconfirmed { .. } => {
                update(FanState::Unconfirmed);
                log::warn!("{profile}/{fan} curve was written but could not be confirmed");
            }
        }
        Ok(outcome)
    }

    async fn verify(
        &self,
        profile: PowerProfile,
        fan: &FanId,
        transmitted: &FanCurve,
    ) -> ApplyOutcome {
        let expected = self.backend().expected_readback(fan, transmitted);
        let readback = {
            let fan = fan.clone();
            call_bounded(self.backend(), "read curve", self.timeouts.query(), move |b| {
                b.get_curve(profile, &fan)
            })
            .await
        };

        match readback {
            Ok(Some(actual)) if actual.approx_eq(&expected) => ApplyOutcome::Confirmed,
            Ok(Some(actual)) => {
                log::debug!(
                    "{fan}: expected {:?}, read back {:?}",
                    expected.to_pairs(),
                    actual.to_pairs()
                );
                ApplyOutcome::Unconfirmed {
                    readback: Some(actual),
                }
            }
            Ok(None) => {
                log::debug!("{fan}: backend reported no curve after write");
                ApplyOutcome::Unconfirmed { readback: None }
            }
            Err(e) => {
                log::warn!("Reading back {fan} failed: {e}");
                ApplyOutcome::Unconfirmed { readback: None }
            }
        }
    }

    /// The curve as the hardware must receive it. The caller's curve is
    /// never modified.
    fn transmit_form(&self, curve: &FanCurve) -> Result<FanCurve> {
        match self.capabilities().required_points {
            Some(n) if n == curve.len() => Ok(curve.clone()),
            Some(n) if n == HARDWARE_TEMPERATURES.len() => Ok(curve.to_hardware_points()),
            Some(n) => Err(Error::InvalidCurve(format!(
                "{} requires {n} points and cannot be resampled",
                self.backend_kind()
            ))),
            None => Ok(curve.clone()),
        }
    }

    /// Switch custom curves on for `profile` unless the hardware reports
    /// them on already. Asked on every write: firmware drops the flag on
    /// profile switches and resume.
    ///
    /// Failure is logged and the write proceeds; some firmware applies
    /// curves without the flag and the read-back decides either way.
    async fn ensure_enabled(&self, profile: PowerProfile) {
        if !self.capabilities().supports_curves {
            return;
        }

        let query = self.timeouts.query();
        let state = call_bounded(self.backend(), "read curve state", query, move |b| {
            b.curves_enabled(profile)
        })
        .await;
        if let Ok(Some(true)) = state {
            return;
        }

        match call_bounded(self.backend(), "enable curves", self.timeouts.enable(), move |b| {
            b.enable_curves(profile, true)
        })
        .await
        {
            Ok(()) => log::info!("Enabled custom fan curves for {profile}"),
            Err(e) => log::warn!("Could not enable fan curves for {profile}: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Restoration
    // -----------------------------------------------------------------------

    /// Re-apply the remembered curves of the active power profile.
    ///
    /// Nothing is written to the store, so a failed restore leaves the
    /// remembered curves as they were.
    pub async fn restore_on_startup(&self) -> Vec<FanResult> {
        let profile = self.current_power_profile().await;
        *lock(&self.last_profile) = Some(profile);
        self.restore_profile(profile).await
    }

    /// Re-run restoration if the power profile changed since last time.
    ///
    /// Returns `None` when nothing changed.
    pub async fn reconcile_profile(&self) -> Option<Vec<FanResult>> {
        if !self.capabilities().supports_profiles {
            return None;
        }
        let profile = self.current_power_profile().await;
        let previous = lock(&self.last_profile).replace(profile);
        if previous == Some(profile) {
            return None;
        }
        log::info!(
            "Power profile changed from {} to {profile}",
            previous.map_or("unknown".to_string(), |p| p.to_string())
        );
        Some(self.restore_profile(profile).await)
    }

    async fn restore_profile(&self, profile: PowerProfile) -> Vec<FanResult> {
        let curves = self.store.load(profile);
        if curves.is_empty() {
            log::info!("No remembered curves for {profile}");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(curves.len());
        for (fan, curve) in curves {
            let outcome = self.apply_to(profile, &fan, &curve, Origin::Restore).await;
            match &outcome {
                Ok(o) if o.is_confirmed() => {}
                Ok(_) => log::warn!("Restored {profile}/{fan} curve is unconfirmed"),
                Err(e) => log::error!("Restoring {profile}/{fan} curve failed: {e}"),
            }
            results.push(FanResult { fan, outcome });
        }
        log::info!("Restored {} remembered curve(s) for {profile}", results.len());
        results
    }

    /// Re-write the curve-derived output of backends that hold a single
    /// value, so it follows temperature. No-op for curve backends.
    pub async fn refresh_static_outputs(&self) {
        if !self.capabilities().needs_periodic_refresh() {
            return;
        }

        let testing = lock(&self.testing).clone();
        let managed: Vec<(FanId, PowerProfile, FanCurve)> = lock(&self.fans)
            .iter()
            .filter(|(fan, _)| !testing.contains(*fan))
            .filter_map(|(fan, record)| {
                let curve = record.curve.clone()?;
                matches!(record.state, FanState::Confirmed | FanState::Unconfirmed)
                    .then(|| (fan.clone(), record.power_profile, curve))
            })
            .collect();

        for (fan, profile, curve) in managed {
            let pair = self.pair_lock(profile, &fan);
            let _guard = pair.lock().await;
            let target = fan.clone();
            let result = call_bounded(self.backend(), "refresh", self.timeouts.write(), move |b| {
                b.set_curve(profile, &target, &curve)
            })
            .await;
            if let Err(e) = result {
                log::warn!("Refreshing {fan} failed: {e}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Fan tests
    // -----------------------------------------------------------------------

    /// Run `fan` at full speed. The caller must pass the returned snapshot to
    /// [`restore_after_test`](Self::restore_after_test) once `duration` is up.
    pub async fn test_fan(&self, fan: &FanId, duration: Duration) -> Result<FanTestSnapshot> {
        let profile = self.current_power_profile().await;
        let previous = self.snapshot_curve(profile, fan).await;

        let pair = self.pair_lock(profile, fan);
        let _guard = pair.lock().await;
        self.ensure_enabled(profile).await;
        let target = fan.clone();
        call_bounded(self.backend(), "test fan", self.timeouts.test(), move |b| {
            b.test_fan(profile, &target, duration)
        })
        .await?;

        lock(&self.testing).insert(fan.clone());
        log::info!("Testing {fan} at full speed for {}s", duration.as_secs());
        Ok(FanTestSnapshot {
            fan: fan.clone(),
            power_profile: profile,
            previous,
            duration,
        })
    }

    /// Put a tested fan back the way [`test_fan`](Self::test_fan) found it.
    pub async fn restore_after_test(
        &self,
        snapshot: &FanTestSnapshot,
    ) -> Result<Option<ApplyOutcome>> {
        lock(&self.testing).remove(&snapshot.fan);
        let fan = &snapshot.fan;

        match &snapshot.previous {
            Some(curve) => {
                let outcome = self
                    .apply_to(snapshot.power_profile, fan, curve, Origin::Restore)
                    .await?;
                log::info!("Test of {fan} finished, previous curve restored");
                Ok(Some(outcome))
            }
            None => {
                self.release_fan(snapshot.power_profile, fan).await?;
                log::info!("Test of {fan} finished, fan released");
                Ok(None)
            }
        }
    }

    async fn snapshot_curve(&self, profile: PowerProfile, fan: &FanId) -> Option<FanCurve> {
        let known = lock(&self.fans)
            .get(fan)
            .filter(|r| r.power_profile == profile)
            .and_then(|r| r.curve.clone());
        if known.is_some() || !self.capabilities().supports_curves {
            return known;
        }

        let target = fan.clone();
        match call_bounded(self.backend(), "read curve", self.timeouts.query(), move |b| {
            b.get_curve(profile, &target)
        })
        .await
        {
            Ok(curve) => curve,
            Err(e) => {
                log::warn!("Could not snapshot {fan} before test: {e}");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Release
    // -----------------------------------------------------------------------

    /// Hand every fan back to firmware control.
    pub async fn release_all(&self) -> Result<()> {
        let profile = lock(&self.last_profile).unwrap_or(PowerProfile::Balanced);
        for fan in self.fans().await? {
            if let Err(e) = self.release_fan(profile, &fan).await {
                log::error!("Failed to release {fan}: {e}");
            }
        }
        log::info!("Released all fans to firmware control");
        Ok(())
    }

    async fn release_fan(&self, profile: PowerProfile, fan: &FanId) -> Result<()> {
        let pair = self.pair_lock(profile, fan);
        let _guard = pair.lock().await;
        let target = fan.clone();
        call_bounded(self.backend(), "release", self.timeouts.write(), move |b| {
            b.release(&target)
        })
        .await?;
        lock(&self.fans).remove(fan);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn current_status(&self, fan: &FanId) -> FanStatus {
        let testing = lock(&self.testing).contains(fan);
        let fallback_profile = lock(&self.last_profile).unwrap_or(PowerProfile::Balanced);
        match lock(&self.fans).get(fan) {
            Some(record) => FanStatus {
                fan: fan.clone(),
                power_profile: record.power_profile,
                state: record.state,
                curve: record.curve.clone(),
                confirmed: record.state == FanState::Confirmed,
                active_profile_name: record.saved_profile.clone(),
                testing,
            },
            None => FanStatus {
                fan: fan.clone(),
                power_profile: fallback_profile,
                state: FanState::Unmanaged,
                curve: None,
                confirmed: false,
                active_profile_name: None,
                testing,
            },
        }
    }

    pub async fn status_all(&self) -> Result<Vec<FanStatus>> {
        Ok(self
            .fans()
            .await?
            .iter()
            .map(|fan| self.current_status(fan))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Saved profiles
    // -----------------------------------------------------------------------

    /// Save a profile, refusing to change a curve that is currently active.
    ///
    /// Overwriting is allowed when every active curve of the existing profile
    /// is kept as is (e.g. only the description changes).
    pub fn save_profile(&self, profile: &SavedProfile) -> Result<SavedProfile> {
        match self.profiles.get(&profile.name) {
            Ok(existing) => {
                for (fan, old) in &existing.curves {
                    let Some(record) = self.store.find_active(old).into_iter().next() else {
                        continue;
                    };
                    let unchanged = profile.curve(fan).is_some_and(|new| new.approx_eq(old));
                    if !unchanged {
                        return Err(Error::ProfileInUse {
                            name: profile.name.clone(),
                            power_profile: record.power_profile,
                            fan: record.fan,
                        });
                    }
                }
            }
            Err(Error::ProfileNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.profiles.save(profile)
    }

    pub fn list_profiles(&self) -> Result<Vec<String>> {
        self.profiles.list()
    }

    pub fn get_profile(&self, name: &str) -> Result<SavedProfile> {
        self.profiles.get(name)
    }

    pub fn delete_profile(&self, name: &str) -> Result<()> {
        self.profiles.delete(name)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn backend(&self) -> &Arc<dyn FanBackend> {
        self.selection.backend()
    }

    fn pair_lock(&self, profile: PowerProfile, fan: &FanId) -> PairLock {
        lock(&self.pair_locks)
            .entry((profile, fan.clone()))
            .or_default()
            .clone()
    }

    fn set_record(&self, fan: &FanId, record: FanRecord) {
        log::debug!("{fan}: {}", record.state);
        lock(&self.fans).insert(fan.clone(), record);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
