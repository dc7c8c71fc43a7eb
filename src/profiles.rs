// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! User-authored profiles.
//!
//! A saved profile is a named bundle of per-fan curves. It has nothing to do
//! with the hardware power profiles and is never changed by applying it.
//! Each profile is one JSON file in the profiles directory:
//!
//! - overwriting keeps the previous content as `<file>.bak`
//! - deleting renames the file to `<file>.deleted`
//!
//! Writes go through a temp file and a rename.

use crate::curve::FanCurve;
use crate::error::{Error, Result};
use crate::power::FanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Subdirectory of the state directory holding profile files.
pub const PROFILES_DIR: &str = "profiles";

const EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub curves: BTreeMap<FanId, FanCurve>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl SavedProfile {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        curves: BTreeMap<FanId, FanCurve>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            curves,
            created: now,
            modified: now,
        }
    }

    pub fn curve(&self, fan: &FanId) -> Option<&FanCurve> {
        self.curves.get(fan)
    }
}

pub struct ProfileManager {
    dir: PathBuf,
}

impl ProfileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Manager for [`PROFILES_DIR`] inside `state_dir`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(PROFILES_DIR))
    }

    /// Create or overwrite a profile. Returns what was written.
    ///
    /// The creation time of an existing profile is kept.
    pub fn save(&self, profile: &SavedProfile) -> Result<SavedProfile> {
        if profile.name.trim().is_empty() {
            return Err(Error::InvalidProfile("name must not be empty".into()));
        }
        if profile.curves.is_empty() {
            return Err(Error::InvalidProfile(format!(
                "'{}' has no curves",
                profile.name
            )));
        }

        let path = self.path_for(&profile.name);
        let mut record = profile.clone();
        record.modified = Utc::now();

        if path.exists() {
            let existing = read_profile(&path)?;
            if existing.name != profile.name {
                return Err(Error::InvalidProfile(format!(
                    "'{}' collides with existing profile '{}'",
                    profile.name, existing.name
                )));
            }
            record.created = existing.created;
        }

        fs::create_dir_all(&self.dir)?;
        let temp_path = with_suffix(&path, "tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(serde_json::to_string_pretty(&record)?.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if path.exists() {
            fs::copy(&path, with_suffix(&path, "bak"))?;
        }
        fs::rename(&temp_path, &path)?;

        log::info!("Saved profile '{}' to {}", record.name, path.display());
        Ok(record)
    }

    pub fn get(&self, name: &str) -> Result<SavedProfile> {
        let path = self.path_for(name);
        match read_profile(&path) {
            Ok(profile) if profile.name == name => Ok(profile),
            Ok(_) => Err(Error::ProfileNotFound(name.to_string())),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::ProfileNotFound(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Names of every saved profile, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match read_profile(&path) {
                Ok(profile) => names.push(profile.name),
                Err(e) => log::warn!("Skipping unreadable profile {}: {e}", path.display()),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Soft-delete: the file is renamed to `<file>.deleted`.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.get(name)?;
        let path = self.path_for(name);
        fs::rename(&path, with_suffix(&path, "deleted"))?;
        log::info!("Deleted profile '{name}'");
        Ok(())
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", sanitize_name(name)))
    }
}

fn read_profile(path: &Path) -> Result<SavedProfile> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| Error::StorageCorrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// `name.json` -> `name.json.<suffix>`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}

/// Turn a profile name into a safe file stem.
fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else if ch.is_whitespace() {
            out.push('_');
        }
    }
    if out.is_empty() { "profile".into() } else { out }
}
