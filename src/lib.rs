// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve control for laptops.
//!
//! The library owns the curve model, the hardware backends (asusctl, Dell
//! SMM via `i8kctl`, generic hwmon PWM), the stores that remember applied
//! curves and user profiles, and the [`controller::FanController`] that ties
//! them together. The binaries wrap it in a socket daemon and a CLI client.

pub mod backend;
pub mod config;
pub mod controller;
pub mod curve;
pub mod error;
pub mod hwmon;
pub mod power;
pub mod profiles;
pub mod protocol;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
