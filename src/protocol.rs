// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client-daemon protocol over Unix domain sockets.
//!
//! Messages are newline-delimited JSON. The client sends a [`Request`]
//! and the daemon replies with a [`Response`].

use crate::backend::{BackendKind, Capabilities};
use crate::controller::{FanResult, FanStatus};
use crate::curve::FanCurve;
use crate::power::{FanId, PowerProfile};
use crate::profiles::SavedProfile;
use crate::telemetry::FanReading;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Requests (client -> daemon)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Backend, power profile and per-fan state.
    #[serde(rename = "get_status")]
    GetStatus,

    #[serde(rename = "list_presets")]
    ListPresets,

    /// Apply a curve to one fan.
    #[serde(rename = "apply_curve")]
    ApplyCurve { fan: FanId, curve: FanCurve },

    #[serde(rename = "apply_preset")]
    ApplyPreset { fan: FanId, preset: String },

    /// Run a fan at full speed, then put it back.
    #[serde(rename = "test_fan")]
    TestFan { fan: FanId, duration_secs: u64 },

    #[serde(rename = "list_profiles")]
    ListProfiles,

    #[serde(rename = "get_profile")]
    GetProfile { name: String },

    #[serde(rename = "save_profile")]
    SaveProfile {
        name: String,
        #[serde(default)]
        description: String,
        curves: BTreeMap<FanId, FanCurve>,
    },

    #[serde(rename = "delete_profile")]
    DeleteProfile { name: String },

    /// Apply every curve of a saved profile.
    #[serde(rename = "apply_profile")]
    ApplyProfile { name: String },
}

// ---------------------------------------------------------------------------
// Responses (daemon -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "status")]
    Status {
        backend: BackendKind,
        capabilities: Capabilities,
        power_profile: PowerProfile,
        fans: Vec<FanStatus>,
        #[serde(default)]
        readings: Vec<FanReading>,
    },

    #[serde(rename = "presets")]
    Presets { names: Vec<String> },

    /// Per-fan outcome of one or more curve writes.
    #[serde(rename = "applied")]
    Applied { results: Vec<ApplyReport> },

    #[serde(rename = "profiles")]
    Profiles { names: Vec<String> },

    #[serde(rename = "profile")]
    Profile { profile: SavedProfile },

    /// Operation succeeded.
    #[serde(rename = "ok")]
    Ok { message: String },

    /// Operation failed.
    #[serde(rename = "error")]
    Error { message: String },
}

/// What happened to one fan's curve write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub fan: FanId,
    pub confirmed: bool,
    /// Set when the write went through but could not be verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Set when the write failed outright.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<FanResult> for ApplyReport {
    fn from(result: FanResult) -> Self {
        let FanResult { fan, outcome } = result;
        match outcome {
            Ok(outcome) => ApplyReport {
                warning: outcome.warning(&fan).map(|w| w.to_string()),
                confirmed: outcome.is_confirmed(),
                error: None,
                fan,
            },
            Err(e) => ApplyReport {
                fan,
                confirmed: false,
                warning: None,
                error: Some(e.to_string()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Encode a message as a newline-delimited JSON string.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, serde_json::Error> {
    let mut s = serde_json::to_string(msg)?;
    s.push('\n');
    Ok(s)
}

/// Decode a message from a JSON string (newline-trimmed).
pub fn decode<'a, T: Deserialize<'a>>(s: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(s.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ApplyOutcome;
    use crate::error::Error;

    #[test]
    fn test_request_wire_format() {
        let line = r#"{"type":"apply_curve","fan":"CPU","curve":[[90,80],[30,20]]}"#;
        match decode::<Request>(line).unwrap() {
            Request::ApplyCurve { fan, curve } => {
                assert_eq!(fan, FanId::cpu());
                assert_eq!(curve.to_pairs(), vec![(30, 20), (90, 80)]);
            }
            other => panic!("unexpected request: {other:?}"),
        }

        let encoded = encode(&Request::TestFan {
            fan: FanId::gpu(),
            duration_secs: 5,
        })
        .unwrap();
        assert!(encoded.ends_with('\n'));
        assert!(encoded.contains(r#""type":"test_fan""#));
    }

    #[test]
    fn test_invalid_curve_is_rejected_on_decode() {
        let line = r#"{"type":"apply_curve","fan":"CPU","curve":[[30,80],[90,20]]}"#;
        assert!(decode::<Request>(line).is_err());
    }

    #[test]
    fn test_apply_report_from_result() {
        let unconfirmed = ApplyReport::from(FanResult {
            fan: FanId::cpu(),
            outcome: Ok(ApplyOutcome::Unconfirmed { readback: None }),
        });
        assert!(!unconfirmed.confirmed);
        assert!(unconfirmed.warning.is_some());
        assert!(unconfirmed.error.is_none());

        let failed = ApplyReport::from(FanResult {
            fan: FanId::gpu(),
            outcome: Err(Error::UnknownFan(FanId::gpu())),
        });
        assert_eq!(failed.error.as_deref(), Some("Unknown fan: GPU"));

        let json = encode(&Response::Applied {
            results: vec![ApplyReport::from(FanResult {
                fan: FanId::cpu(),
                outcome: Ok(ApplyOutcome::Confirmed),
            })],
        })
        .unwrap();
        assert!(!json.contains("warning"));
    }
}
