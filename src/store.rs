// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Remembered curves.
//!
//! Backends do not reliably keep applied curves across profile switches or
//! restarts, so the last confirmed curve per power profile and fan is kept
//! here and re-applied on startup. The whole store lives in one JSON file
//! that is rewritten through a temp file and a rename on every change.
//!
//! A file that cannot be parsed is moved aside and treated as empty: losing
//! remembered curves is recoverable, failing the control path is not.

use crate::curve::FanCurve;
use crate::error::{Error, Result};
use crate::power::{FanId, PowerProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File name inside the state directory.
pub const STORE_FILE: &str = "active_fan_curves.json";

/// What we last successfully told the hardware for one profile and fan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCurveRecord {
    pub power_profile: PowerProfile,
    pub fan: FanId,
    pub curve: FanCurve,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCurve {
    curve: FanCurve,
    last_modified: DateTime<Utc>,
}

type StoreData = BTreeMap<PowerProfile, BTreeMap<FanId, StoredCurve>>;

/// Curve sets keyed by fan.
pub type CurveSet = BTreeMap<FanId, FanCurve>;

pub struct ActiveCurveStore {
    path: PathBuf,
    // serialises read-modify-write cycles
    lock: Mutex<()>,
}

impl ActiveCurveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at [`STORE_FILE`] inside `state_dir`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remember `curve` as the active curve for `profile` / `fan`.
    pub fn save(&self, profile: PowerProfile, fan: &FanId, curve: &FanCurve) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut data = self.read_or_empty();
        data.entry(profile).or_default().insert(
            fan.clone(),
            StoredCurve {
                curve: curve.clone(),
                last_modified: Utc::now(),
            },
        );
        self.write(&data)?;
        log::debug!("Remembered {profile}/{fan} curve");
        Ok(())
    }

    /// Active curves for one profile.
    pub fn load(&self, profile: PowerProfile) -> CurveSet {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_or_empty()
            .remove(&profile)
            .map(strip_timestamps)
            .unwrap_or_default()
    }

    /// Active curves for every profile that has any.
    pub fn load_all(&self) -> BTreeMap<PowerProfile, CurveSet> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_or_empty()
            .into_iter()
            .filter(|(_, fans)| !fans.is_empty())
            .map(|(profile, fans)| (profile, strip_timestamps(fans)))
            .collect()
    }

    /// Every stored record, including timestamps.
    pub fn records(&self) -> Vec<ActiveCurveRecord> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_or_empty()
            .into_iter()
            .flat_map(|(power_profile, fans)| {
                fans.into_iter().map(move |(fan, stored)| ActiveCurveRecord {
                    power_profile,
                    fan,
                    curve: stored.curve,
                    last_modified: stored.last_modified,
                })
            })
            .collect()
    }

    /// Records whose curve matches `curve` within read-back tolerance.
    ///
    /// This is the one query other components use to ask whether a curve
    /// is currently in effect anywhere.
    pub fn find_active(&self, curve: &FanCurve) -> Vec<ActiveCurveRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.curve.approx_eq(curve))
            .collect()
    }

    /// Forget one profile's curves, or everything when `profile` is `None`.
    pub fn clear(&self, profile: Option<PowerProfile>) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match profile {
            Some(profile) => {
                let mut data = self.read_or_empty();
                if data.remove(&profile).is_some() {
                    self.write(&data)?;
                }
            }
            None => match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        log::info!(
            "Cleared remembered curves for {}",
            profile.map_or("all profiles".to_string(), |p| p.to_string())
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // File access
    // -----------------------------------------------------------------------

    fn read(&self) -> Result<StoreData> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreData::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(StoreData::new());
        }
        serde_json::from_str(&contents).map_err(|e| Error::StorageCorrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn read_or_empty(&self) -> StoreData {
        match self.read() {
            Ok(data) => data,
            Err(e @ Error::StorageCorrupt { .. }) => {
                log::warn!("{e}; starting with no remembered curves");
                let aside = self.path.with_extension("json.corrupt");
                if let Err(e) = fs::rename(&self.path, &aside) {
                    log::warn!("Could not move corrupt store aside: {e}");
                }
                StoreData::new()
            }
            Err(e) => {
                log::warn!("Could not read {}: {e}", self.path.display());
                StoreData::new()
            }
        }
    }

    fn write(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn strip_timestamps(fans: BTreeMap<FanId, StoredCurve>) -> CurveSet {
    fans.into_iter()
        .map(|(fan, stored)| (fan, stored.curve))
        .collect()
}
