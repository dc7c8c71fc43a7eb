// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error types shared by every layer of the library.

use crate::backend::BackendKind;
use crate::power::{FanId, PowerProfile};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Local validation failure. Never reaches a backend.
    #[error("Invalid curve: {0}")]
    InvalidCurve(String),

    #[error("No supported fan control backend detected")]
    AdapterUnavailable,

    #[error("{backend} did not finish {operation} within {}s", .timeout.as_secs())]
    AdapterTimeout {
        backend: BackendKind,
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{backend} rejected {operation}: {message}")]
    AdapterRejected {
        backend: BackendKind,
        operation: &'static str,
        message: String,
    },

    /// The write was accepted but reading it back disagreed beyond tolerance.
    #[error("Read-back of the {fan} curve does not match what was written")]
    VerificationMismatch { fan: FanId },

    #[error("Stored data at {} is corrupt: {message}", .path.display())]
    StorageCorrupt { path: PathBuf, message: String },

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Saved profile '{0}' not found")]
    ProfileNotFound(String),

    #[error(
        "Saved profile '{name}' holds the active {fan} curve for {power_profile}; save under a different name"
    )]
    ProfileInUse {
        name: String,
        power_profile: PowerProfile,
        fan: FanId,
    },

    #[error("Unknown fan: {0}")]
    UnknownFan(FanId),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn rejected(
        backend: BackendKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Error::AdapterRejected {
            backend,
            operation,
            message: message.into(),
        }
    }
}
