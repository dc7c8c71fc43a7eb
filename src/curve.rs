// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and interpolation.
//!
//! A curve maps temperatures (30-90 C) to fan speed percentages (0-100).
//! Points are kept sorted by temperature, temperatures are unique, and the
//! speed never decreases as the temperature rises. Values between points
//! are linearly interpolated.
//!
//! On disk and on the wire a curve is a flat list of `[temperature, speed]`
//! pairs. Reading accepts any order; writing always emits sorted pairs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lowest temperature a curve point may use.
pub const MIN_TEMP_C: u8 = 30;

/// Highest temperature a curve point may use.
pub const MAX_TEMP_C: u8 = 90;

/// Highest fan speed in percent.
pub const MAX_SPEED_PCT: u8 = 100;

/// A curve needs at least this many points.
pub const MIN_POINTS: usize = 2;

/// Fixed temperatures used when a backend requires exactly eight points.
pub const HARDWARE_TEMPERATURES: [u8; 8] = [30, 40, 50, 60, 70, 80, 85, 90];

/// Per-axis tolerance when comparing a written curve with its read-back.
pub const MATCH_TOLERANCE: u8 = 1;

/// Names accepted by [`preset`].
pub const PRESET_NAMES: [&str; 8] = [
    "quiet",
    "silent",
    "balanced",
    "performance",
    "conservative",
    "max",
    "loudmouth",
    "shush",
];

/// A single point on a fan curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Temperature in degrees Celsius
    pub temperature: u8,
    /// Fan speed in percent
    pub fan_speed: u8,
}

impl CurvePoint {
    /// Create a point, rejecting values outside 30-90 C or 0-100 %.
    pub fn new(temperature: u8, fan_speed: u8) -> Result<Self> {
        if !(MIN_TEMP_C..=MAX_TEMP_C).contains(&temperature) {
            return Err(Error::InvalidCurve(format!(
                "temperature {temperature}C outside {MIN_TEMP_C}-{MAX_TEMP_C}C"
            )));
        }
        if fan_speed > MAX_SPEED_PCT {
            return Err(Error::InvalidCurve(format!(
                "fan speed {fan_speed}% above {MAX_SPEED_PCT}%"
            )));
        }
        Ok(Self {
            temperature,
            fan_speed,
        })
    }

    /// Build a point from raw hardware values, pulling them into range.
    pub fn clamped(temperature: i64, fan_speed: i64) -> Self {
        Self {
            temperature: temperature.clamp(MIN_TEMP_C as i64, MAX_TEMP_C as i64) as u8,
            fan_speed: fan_speed.clamp(0, MAX_SPEED_PCT as i64) as u8,
        }
    }
}

/// An ordered, validated temperature-to-speed curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(u8, u8)>", into = "Vec<(u8, u8)>")]
pub struct FanCurve {
    points: Vec<CurvePoint>,
}

impl FanCurve {
    /// Create a curve. Points are sorted by temperature, then validated.
    pub fn new(mut points: Vec<CurvePoint>) -> Result<Self> {
        points.sort_by_key(|p| p.temperature);
        validate(&points)?;
        Ok(Self { points })
    }

    /// Create a curve from `(temperature, speed)` pairs in any order.
    pub fn from_pairs(pairs: &[(u8, u8)]) -> Result<Self> {
        let points = pairs
            .iter()
            .map(|&(t, s)| CurvePoint::new(t, s))
            .collect::<Result<Vec<_>>>()?;
        Self::new(points)
    }

    /// A constant-speed curve spanning the full temperature range.
    pub fn flat(fan_speed: u8) -> Self {
        let fan_speed = fan_speed.min(MAX_SPEED_PCT);
        Self {
            points: vec![
                CurvePoint {
                    temperature: MIN_TEMP_C,
                    fan_speed,
                },
                CurvePoint {
                    temperature: MAX_TEMP_C,
                    fan_speed,
                },
            ],
        }
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_pairs(&self) -> Vec<(u8, u8)> {
        self.points
            .iter()
            .map(|p| (p.temperature, p.fan_speed))
            .collect()
    }

    /// Add a point, replacing any existing point at the same temperature.
    ///
    /// If the result would break an invariant the curve is left untouched.
    pub fn add_point(&mut self, temperature: u8, fan_speed: u8) -> Result<()> {
        let point = CurvePoint::new(temperature, fan_speed)?;
        let mut candidate: Vec<CurvePoint> = self
            .points
            .iter()
            .copied()
            .filter(|p| p.temperature != temperature)
            .collect();
        candidate.push(point);
        candidate.sort_by_key(|p| p.temperature);
        validate(&candidate)?;
        self.points = candidate;
        Ok(())
    }

    /// Remove the point at `temperature`, returning it.
    pub fn remove_point(&mut self, temperature: u8) -> Result<CurvePoint> {
        if self.points.len() <= MIN_POINTS {
            return Err(Error::InvalidCurve(format!(
                "a curve needs at least {MIN_POINTS} points"
            )));
        }
        let idx = self
            .points
            .iter()
            .position(|p| p.temperature == temperature)
            .ok_or_else(|| Error::InvalidCurve(format!("no point at {temperature}C")))?;
        Ok(self.points.remove(idx))
    }

    /// Interpolate the fan speed for a given temperature.
    ///
    /// - Below the lowest point: returns the lowest point's speed
    /// - Above the highest point: returns the highest point's speed
    /// - Between two points: `round(a + (b - a) * (t - t0) / (t1 - t0))`
    pub fn speed_at(&self, temperature: i32) -> u8 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0;
        };
        if temperature <= first.temperature as i32 {
            return first.fan_speed;
        }
        if temperature >= last.temperature as i32 {
            return last.fan_speed;
        }

        for window in self.points.windows(2) {
            let lo = &window[0];
            let hi = &window[1];
            let (t0, t1) = (lo.temperature as i32, hi.temperature as i32);

            if temperature >= t0 && temperature <= t1 {
                let (a, b) = (lo.fan_speed as f64, hi.fan_speed as f64);
                let frac = (temperature - t0) as f64 / (t1 - t0) as f64;
                return (a + (b - a) * frac)
                    .round()
                    .clamp(0.0, MAX_SPEED_PCT as f64) as u8;
            }
        }

        last.fan_speed
    }

    /// Compare with a read-back curve, allowing ±1 on each axis.
    pub fn approx_eq(&self, other: &FanCurve) -> bool {
        self.points.len() == other.points.len()
            && self.points.iter().zip(&other.points).all(|(a, b)| {
                a.temperature.abs_diff(b.temperature) <= MATCH_TOLERANCE
                    && a.fan_speed.abs_diff(b.fan_speed) <= MATCH_TOLERANCE
            })
    }

    /// Sample this curve at the given temperatures without modifying it.
    ///
    /// `temperatures` must be ascending, unique, and inside 30-90 C.
    pub fn resample(&self, temperatures: &[u8]) -> Result<FanCurve> {
        let points = temperatures
            .iter()
            .map(|&t| CurvePoint::new(t, self.speed_at(t as i32)))
            .collect::<Result<Vec<_>>>()?;
        FanCurve::new(points)
    }

    /// Sample at [`HARDWARE_TEMPERATURES`] for backends that need 8 points.
    pub fn to_hardware_points(&self) -> FanCurve {
        let points = HARDWARE_TEMPERATURES
            .iter()
            .map(|&t| CurvePoint {
                temperature: t,
                fan_speed: self.speed_at(t as i32),
            })
            .collect();
        FanCurve { points }
    }
}

impl TryFrom<Vec<(u8, u8)>> for FanCurve {
    type Error = Error;

    fn try_from(pairs: Vec<(u8, u8)>) -> Result<Self> {
        FanCurve::from_pairs(&pairs)
    }
}

impl From<FanCurve> for Vec<(u8, u8)> {
    fn from(curve: FanCurve) -> Self {
        curve.to_pairs()
    }
}

fn validate(points: &[CurvePoint]) -> Result<()> {
    if points.len() < MIN_POINTS {
        return Err(Error::InvalidCurve(format!(
            "a curve needs at least {MIN_POINTS} points"
        )));
    }
    for p in points {
        CurvePoint::new(p.temperature, p.fan_speed)?;
    }
    for (i, pair) in points.windows(2).enumerate() {
        if pair[1].temperature <= pair[0].temperature {
            return Err(Error::InvalidCurve(format!(
                "duplicate temperature {}C (point {})",
                pair[1].temperature,
                i + 1
            )));
        }
        if pair[1].fan_speed < pair[0].fan_speed {
            return Err(Error::InvalidCurve(format!(
                "fan speed drops from {}% to {}% between {}C and {}C",
                pair[0].fan_speed, pair[1].fan_speed, pair[0].temperature, pair[1].temperature
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

/// Look up a built-in curve by name (case-insensitive).
pub fn preset(name: &str) -> Option<FanCurve> {
    let speeds: [u8; 8] = match name.to_ascii_lowercase().as_str() {
        "quiet" => [20, 25, 30, 40, 50, 60, 70, 80],
        "silent" => [15, 20, 25, 35, 45, 55, 65, 75],
        "balanced" => [30, 35, 45, 55, 65, 75, 85, 95],
        "performance" => [40, 50, 60, 70, 80, 90, 100, 100],
        "max" | "loudmouth" => [100; 8],
        "shush" => [10, 15, 20, 30, 40, 50, 60, 70],
        // Full speed from 54C, the temperature equivalent of 60% load.
        "conservative" => {
            return FanCurve::from_pairs(&[
                (30, 30),
                (40, 40),
                (50, 60),
                (54, 100),
                (60, 100),
                (70, 100),
                (80, 100),
                (90, 100),
            ])
            .ok();
        }
        _ => return None,
    };
    let pairs: Vec<(u8, u8)> = HARDWARE_TEMPERATURES.into_iter().zip(speeds).collect();
    FanCurve::from_pairs(&pairs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn curve(pairs: &[(u8, u8)]) -> FanCurve {
        FanCurve::from_pairs(pairs).unwrap()
    }

    #[test]
    fn test_interpolation_below_range() {
        let c = curve(&[(40, 20), (80, 90)]);
        assert_eq!(c.speed_at(10), 20);
    }

    #[test]
    fn test_interpolation_above_range() {
        let c = curve(&[(40, 20), (80, 90)]);
        assert_eq!(c.speed_at(100), 90);
    }

    #[test]
    fn test_interpolation_exact_knots() {
        let c = curve(&[(30, 40), (60, 70), (85, 100), (90, 100)]);
        for p in c.points() {
            assert_eq!(c.speed_at(p.temperature as i32), p.fan_speed);
        }
    }

    #[test]
    fn test_interpolation_between_points() {
        let c = curve(&[(30, 40), (60, 70), (85, 100), (90, 100)]);
        // 70 + 30 * 10 / 25 = 82
        assert_eq!(c.speed_at(70), 82);
        assert_eq!(c.speed_at(45), 55);
    }

    #[test]
    fn test_interpolation_rounds_half_up() {
        let c = curve(&[(30, 0), (34, 2)]);
        // 0.5 rounds away from zero
        assert_eq!(c.speed_at(31), 1);
    }

    #[test]
    fn test_speed_never_decreases() {
        for name in PRESET_NAMES {
            let c = preset(name).unwrap();
            let mut last = 0;
            for t in 0..=120 {
                let s = c.speed_at(t);
                assert!(s >= last, "{name} drops at {t}C");
                last = s;
            }
        }
    }

    #[test]
    fn test_new_sorts_points() {
        let c = curve(&[(60, 60), (30, 30), (45, 40)]);
        assert_eq!(c.to_pairs(), vec![(30, 30), (45, 40), (60, 60)]);
    }

    #[test]
    fn test_validation_too_few_points() {
        assert!(matches!(
            FanCurve::from_pairs(&[(50, 50)]),
            Err(Error::InvalidCurve(_))
        ));
    }

    #[test]
    fn test_validation_duplicate_temperature() {
        assert!(FanCurve::from_pairs(&[(50, 50), (50, 60)]).is_err());
    }

    #[test]
    fn test_validation_out_of_range() {
        assert!(FanCurve::from_pairs(&[(20, 50), (60, 60)]).is_err());
        assert!(FanCurve::from_pairs(&[(30, 50), (60, 101)]).is_err());
    }

    #[test]
    fn test_add_point_rejects_decrease_and_keeps_curve() {
        let mut c = curve(&[(30, 30), (60, 60)]);
        let err = c.add_point(50, 20).unwrap_err();
        assert!(matches!(err, Error::InvalidCurve(_)));
        assert_eq!(c.to_pairs(), vec![(30, 30), (60, 60)]);
    }

    #[test]
    fn test_add_point_replaces_existing_temperature() {
        let mut c = curve(&[(30, 30), (50, 40), (60, 60)]);
        c.add_point(50, 45).unwrap();
        assert_eq!(c.to_pairs(), vec![(30, 30), (50, 45), (60, 60)]);
    }

    #[test]
    fn test_add_then_remove_restores_curve() {
        let original = curve(&[(30, 20), (50, 40), (80, 90)]);
        for (t, s) in [(40, 30), (60, 55), (85, 95), (90, 100)] {
            let mut c = original.clone();
            c.add_point(t, s).unwrap();
            c.remove_point(t).unwrap();
            assert!(c.approx_eq(&original));
        }
    }

    #[test]
    fn test_remove_from_two_point_curve_fails() {
        let mut c = curve(&[(30, 30), (60, 60)]);
        assert!(matches!(c.remove_point(30), Err(Error::InvalidCurve(_))));
        assert_eq!(c.to_pairs(), vec![(30, 30), (60, 60)]);
    }

    #[test]
    fn test_remove_missing_point_fails() {
        let mut c = curve(&[(30, 30), (45, 40), (60, 60)]);
        assert!(c.remove_point(50).is_err());
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_approx_eq_tolerance() {
        let a = curve(&[(30, 30), (60, 60)]);
        assert!(a.approx_eq(&curve(&[(31, 29), (60, 61)])));
        assert!(!a.approx_eq(&curve(&[(30, 30), (60, 62)])));
        assert!(!a.approx_eq(&curve(&[(30, 30), (45, 45), (60, 60)])));
    }

    #[test]
    fn test_hardware_expansion_preserves_endpoints() {
        let c = curve(&[(30, 20), (90, 80)]);
        let expanded = c.to_hardware_points();
        assert_eq!(expanded.len(), 8);
        assert_eq!(expanded.speed_at(30), 20);
        assert_eq!(expanded.speed_at(90), 80);
        // the authored curve is untouched
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_resample_custom_temperatures() {
        let c = curve(&[(30, 0), (90, 60)]);
        let r = c.resample(&[30, 60, 90]).unwrap();
        assert_eq!(r.to_pairs(), vec![(30, 0), (60, 30), (90, 60)]);
    }

    #[test]
    fn test_flat_curve() {
        let c = FanCurve::flat(100);
        assert_eq!(c.speed_at(30), 100);
        assert_eq!(c.speed_at(90), 100);
    }

    #[test]
    fn test_serialization_sorted_on_write() {
        let c = curve(&[(60, 60), (30, 30)]);
        assert_eq!(serde_json::to_string(&c).unwrap(), "[[30,30],[60,60]]");
    }

    #[test]
    fn test_deserialization_order_independent() {
        let c: FanCurve = serde_json::from_str("[[60,60],[30,30],[45,50]]").unwrap();
        assert_eq!(c.to_pairs(), vec![(30, 30), (45, 50), (60, 60)]);
    }

    #[test]
    fn test_deserialization_rejects_invalid_curve() {
        assert!(serde_json::from_str::<FanCurve>("[[30,60],[60,30]]").is_err());
    }

    #[test]
    fn test_presets_have_eight_points() {
        for name in PRESET_NAMES {
            let c = preset(name).unwrap_or_else(|| panic!("missing preset {name}"));
            assert_eq!(c.len(), 8, "{name}");
        }
        assert!(preset("Balanced").is_some());
        assert!(preset("turbo").is_none());
    }

    /// Any valid curve: 2-10 unique knots in range, speeds non-decreasing.
    fn any_curve() -> impl Strategy<Value = FanCurve> {
        prop::collection::btree_set(MIN_TEMP_C..=MAX_TEMP_C, MIN_POINTS..=10).prop_flat_map(
            |temps| {
                let len = temps.len();
                prop::collection::vec(0..=MAX_SPEED_PCT, len).prop_map(move |mut speeds| {
                    speeds.sort_unstable();
                    let pairs: Vec<(u8, u8)> = temps.iter().copied().zip(speeds).collect();
                    FanCurve::from_pairs(&pairs).unwrap()
                })
            },
        )
    }

    proptest! {
        #[test]
        fn test_any_curve_never_decreases(c in any_curve()) {
            let mut last = c.speed_at(0);
            for t in 1..=120 {
                let s = c.speed_at(t);
                prop_assert!(s >= last, "{:?} drops at {}C", c.to_pairs(), t);
                last = s;
            }
        }

        #[test]
        fn test_any_curve_hits_its_knots(c in any_curve()) {
            for p in c.points() {
                prop_assert_eq!(c.speed_at(p.temperature as i32), p.fan_speed);
            }
        }

        #[test]
        fn test_any_curve_add_then_remove(
            c in any_curve(),
            t in MIN_TEMP_C..=MAX_TEMP_C,
            s in 0..=MAX_SPEED_PCT
        ) {
            prop_assume!(c.points().iter().all(|p| p.temperature != t));
            let mut edited = c.clone();
            match edited.add_point(t, s) {
                Ok(()) => {
                    prop_assert_eq!(edited.len(), c.len() + 1);
                    let removed = edited.remove_point(t).unwrap();
                    prop_assert_eq!(removed, CurvePoint::new(t, s).unwrap());
                    prop_assert_eq!(&edited, &c);
                }
                Err(_) => {
                    prop_assert_eq!(&edited, &c);
                }
            }
        }

        #[test]
        fn test_any_curve_expands_to_hardware_points(c in any_curve()) {
            let expanded = c.to_hardware_points();
            prop_assert_eq!(expanded.len(), HARDWARE_TEMPERATURES.len());
            for t in HARDWARE_TEMPERATURES {
                prop_assert_eq!(expanded.speed_at(t as i32), c.speed_at(t as i32));
            }
        }
    }
}
