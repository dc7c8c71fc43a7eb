// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Power profiles and fan identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A backend-level operating mode. Each mode owns an independent curve set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerProfile {
    Balanced,
    Quiet,
    Performance,
}

impl PowerProfile {
    pub const ALL: [PowerProfile; 3] = [
        PowerProfile::Balanced,
        PowerProfile::Quiet,
        PowerProfile::Performance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PowerProfile::Balanced => "Balanced",
            PowerProfile::Quiet => "Quiet",
            PowerProfile::Performance => "Performance",
        }
    }
}

impl fmt::Display for PowerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PowerProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PowerProfile::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown power profile: {s}"))
    }
}

/// Logical fan name (`CPU`, `GPU`, or a label reported by the backend).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FanId(String);

impl FanId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn cpu() -> Self {
        Self::new("CPU")
    }

    pub fn gpu() -> Self {
        Self::new("GPU")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison, for vendor tools that change the case.
    pub fn matches(&self, label: &str) -> bool {
        self.0.eq_ignore_ascii_case(label.trim())
    }
}

impl fmt::Display for FanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FanId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parse_case_insensitive() {
        assert_eq!("quiet".parse::<PowerProfile>(), Ok(PowerProfile::Quiet));
        assert_eq!(" PERFORMANCE ".parse::<PowerProfile>(), Ok(PowerProfile::Performance));
        assert!("turbo".parse::<PowerProfile>().is_err());
    }

    #[test]
    fn test_fan_id_matches_ignores_case() {
        assert!(FanId::cpu().matches("cpu"));
        assert!(!FanId::cpu().matches("gpu"));
    }
}
