// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! hwmon sysfs discovery and control.
//!
//! Scans an hwmon root (normally `/sys/class/hwmon/`) for PWM channels and
//! temperature sensors, and provides raw read/write access to them.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default location of the kernel's hwmon class directory.
pub const HWMON_ROOT: &str = "/sys/class/hwmon";

/// Raw PWM scale used when a channel does not report `pwmN_max`.
pub const DEFAULT_PWM_MAX: u32 = 255;

/// `pwmN_enable` value for manual control.
pub const PWM_MODE_MANUAL: u8 = 1;

/// `pwmN_enable` value for firmware control.
pub const PWM_MODE_AUTO: u8 = 2;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A discovered PWM channel plus its optional tachometer.
#[derive(Debug, Clone)]
pub struct PwmChannel {
    /// Unique identifier, e.g. "hwmon3/pwm1"
    pub id: String,
    /// Human-readable label from `fanN_label`, if present
    pub label: Option<String>,
    /// Absolute path to the `pwmN` file
    pub pwm_path: PathBuf,
    /// Absolute path to the `pwmN_enable` file
    pub pwm_enable_path: PathBuf,
    /// Absolute path to the `fanN_input` file (RPM), if present
    pub rpm_path: Option<PathBuf>,
    /// Highest raw duty value the device accepts
    pub pwm_max: u32,
    /// Name of the parent hwmon device
    pub hwmon_name: String,
}

impl PwmChannel {
    /// The name this channel is addressed by: its label, else its id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// A discovered temperature sensor.
#[derive(Debug, Clone)]
pub struct TempSensor {
    /// Unique identifier, e.g. "hwmon3/temp1"
    pub id: String,
    /// Human-readable label if available
    pub label: Option<String>,
    /// Absolute path to the `tempN_input` file (millidegrees C)
    pub input_path: PathBuf,
    /// Name of the parent hwmon device
    pub hwmon_name: String,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Scan `root` and return every PWM channel, sorted by id.
pub fn discover_pwm_channels(root: &Path) -> io::Result<Vec<PwmChannel>> {
    let mut channels = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let hwmon_dir = entry.path();
        let hwmon_name = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();
        let hwmon_basename = entry.file_name().to_string_lossy().to_string();

        // pwmN files are numbered from 1 without gaps
        for n in 1..=16 {
            let pwm_path = hwmon_dir.join(format!("pwm{n}"));
            if !pwm_path.exists() {
                break;
            }

            let pwm_max = read_trimmed(&hwmon_dir.join(format!("pwm{n}_max")))
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|&m| m > 0)
                .unwrap_or(DEFAULT_PWM_MAX);
            let rpm_path = Some(hwmon_dir.join(format!("fan{n}_input"))).filter(|p| p.exists());

            channels.push(PwmChannel {
                id: format!("{hwmon_basename}/pwm{n}"),
                label: read_trimmed(&hwmon_dir.join(format!("fan{n}_label"))),
                pwm_enable_path: hwmon_dir.join(format!("pwm{n}_enable")),
                pwm_path,
                rpm_path,
                pwm_max,
                hwmon_name: hwmon_name.clone(),
            });
        }
    }

    channels.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(channels)
}

/// Scan `root` and return all temperature sensors, sorted by id.
pub fn discover_temp_sensors(root: &Path) -> io::Result<Vec<TempSensor>> {
    let mut sensors = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let hwmon_dir = entry.path();
        let hwmon_name = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();
        let hwmon_basename = entry.file_name().to_string_lossy().to_string();

        for n in 1..=32 {
            let input_path = hwmon_dir.join(format!("temp{n}_input"));
            if !input_path.exists() {
                break;
            }

            sensors.push(TempSensor {
                id: format!("{hwmon_basename}/temp{n}"),
                label: read_trimmed(&hwmon_dir.join(format!("temp{n}_label"))),
                input_path,
                hwmon_name: hwmon_name.clone(),
            });
        }
    }

    sensors.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sensors)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Current raw duty value of a channel.
pub fn read_pwm(channel: &PwmChannel) -> Option<u32> {
    read_trimmed(&channel.pwm_path).and_then(|s| s.parse().ok())
}

/// Current tachometer reading in RPM.
pub fn read_rpm(channel: &PwmChannel) -> Option<u32> {
    channel
        .rpm_path
        .as_ref()
        .and_then(|p| read_trimmed(p).and_then(|s| s.parse().ok()))
}

/// Current temperature of a sensor in degrees Celsius.
pub fn read_temp(sensor: &TempSensor) -> Option<f64> {
    read_trimmed(&sensor.input_path)
        .and_then(|s| s.parse::<i64>().ok())
        .map(|millic| millic as f64 / 1000.0)
}

/// Build a map of sensor id -> current temp.
pub fn read_temp_map(sensors: &[TempSensor]) -> HashMap<String, f64> {
    sensors
        .iter()
        .filter_map(|s| read_temp(s).map(|t| (s.id.clone(), t)))
        .collect()
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Set PWM enable mode for a channel.
///   0 = fan off (full speed on some systems)
///   1 = manual PWM control
///   2 = automatic (BIOS/firmware)
pub fn set_pwm_enable(channel: &PwmChannel, mode: u8) -> io::Result<()> {
    fs::write(&channel.pwm_enable_path, format!("{mode}"))
}

/// Write a raw duty value. The channel must already be in manual mode.
pub fn set_pwm(channel: &PwmChannel, value: u32) -> io::Result<()> {
    fs::write(&channel.pwm_path, format!("{}", value.min(channel.pwm_max)))
}

/// Put a channel into manual mode and write a raw duty value.
pub fn set_manual_pwm(channel: &PwmChannel, value: u32) -> io::Result<()> {
    set_pwm_enable(channel, PWM_MODE_MANUAL)?;
    set_pwm(channel, value)
}

/// Hand a channel back to automatic (BIOS) control.
pub fn restore_automatic(channel: &PwmChannel) -> io::Result<()> {
    set_pwm_enable(channel, PWM_MODE_AUTO)
}

// ---------------------------------------------------------------------------
// Scale conversion
// ---------------------------------------------------------------------------

/// Convert a speed percentage to the channel's raw duty scale.
pub fn percent_to_raw(percent: u8, pwm_max: u32) -> u32 {
    ((percent.min(100) as f64 / 100.0) * pwm_max as f64).round() as u32
}

/// Convert a raw duty value back to a percentage.
pub fn raw_to_percent(raw: u32, pwm_max: u32) -> u8 {
    if pwm_max == 0 {
        return 0;
    }
    ((raw.min(pwm_max) as f64 / pwm_max as f64) * 100.0).round() as u8
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;

    /// Lay out a fake hwmon device under `root`.
    pub fn write_device(root: &Path, dir: &str, name: &str, files: &[(&str, &str)]) {
        let dev = root.join(dir);
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("name"), format!("{name}\n")).unwrap();
        for (file, contents) in files {
            fs::write(dev.join(file), format!("{contents}\n")).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_device;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_pwm_channels() {
        let root = TempDir::new().unwrap();
        write_device(
            root.path(),
            "hwmon3",
            "nct6775",
            &[
                ("pwm1", "128"),
                ("pwm1_enable", "2"),
                ("fan1_input", "1200"),
                ("fan1_label", "CPU Fan"),
                ("pwm2", "0"),
                ("pwm2_enable", "2"),
                ("pwm2_max", "100"),
            ],
        );

        let channels = discover_pwm_channels(root.path()).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "hwmon3/pwm1");
        assert_eq!(channels[0].display_name(), "CPU Fan");
        assert_eq!(channels[0].pwm_max, DEFAULT_PWM_MAX);
        assert_eq!(read_rpm(&channels[0]), Some(1200));
        assert_eq!(channels[1].display_name(), "hwmon3/pwm2");
        assert_eq!(channels[1].pwm_max, 100);
        assert!(channels[1].rpm_path.is_none());
    }

    #[test]
    fn test_discover_temp_sensors() {
        let root = TempDir::new().unwrap();
        write_device(
            root.path(),
            "hwmon0",
            "coretemp",
            &[("temp1_input", "54000"), ("temp1_label", "Package id 0")],
        );

        let sensors = discover_temp_sensors(root.path()).unwrap();
        assert_eq!(sensors.len(), 1);
        assert_eq!(read_temp(&sensors[0]), Some(54.0));
        assert_eq!(read_temp_map(&sensors).get("hwmon0/temp1"), Some(&54.0));
    }

    #[test]
    fn test_set_manual_pwm_writes_enable_and_duty() {
        let root = TempDir::new().unwrap();
        write_device(
            root.path(),
            "hwmon1",
            "it87",
            &[("pwm1", "0"), ("pwm1_enable", "2")],
        );
        let channel = discover_pwm_channels(root.path()).unwrap().remove(0);

        set_manual_pwm(&channel, 300).unwrap();
        assert_eq!(fs::read_to_string(&channel.pwm_enable_path).unwrap(), "1");
        // clamped to pwm_max
        assert_eq!(read_pwm(&channel), Some(255));

        restore_automatic(&channel).unwrap();
        assert_eq!(fs::read_to_string(&channel.pwm_enable_path).unwrap(), "2");
    }

    #[test]
    fn test_percent_conversion() {
        assert_eq!(percent_to_raw(50, 255), 128);
        assert_eq!(percent_to_raw(100, 255), 255);
        assert_eq!(raw_to_percent(128, 255), 50);
        assert_eq!(raw_to_percent(0, 0), 0);
        for pct in 0..=100 {
            let back = raw_to_percent(percent_to_raw(pct, 255), 255);
            assert!(back.abs_diff(pct) <= 1);
        }
    }
}
