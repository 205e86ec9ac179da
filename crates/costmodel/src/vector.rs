//! Time-series vector model
//!
//! The point/series abstraction every higher layer builds on. Series scraped
//! by independent queries rarely share exact sample instants, so all
//! timestamps are snapped to a coarse 10-second grid before comparison,
//! which makes point-wise combination meaningful without interpolation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Width of the timestamp alignment grid, in seconds.
const GRID_SECONDS: f64 = 10.0;

/// One observation of a metric at one instant.
///
/// A zero timestamp marks a missing or unsampled point, not a real instant,
/// and is discarded by [`normalize`] and [`merge`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub timestamp: f64,
    pub value: f64,
}

impl Vector {
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Snap a timestamp to the nearest grid point.
pub fn snap(timestamp: f64) -> f64 {
    (timestamp / GRID_SECONDS).round() * GRID_SECONDS
}

/// Snap every timestamp in a series to the grid, dropping invalid
/// (zero-timestamp) points.
pub fn normalize(series: &mut Vec<Vector>) {
    series.retain(|v| v.timestamp != 0.0);
    for v in series.iter_mut() {
        v.timestamp = snap(v.timestamp);
    }
}

/// Merge two series into one, summing values that land on the same grid
/// point.
///
/// The result has one point per distinct normalized timestamp present in
/// either input, sorted ascending. If one input is empty the other is
/// returned normalized. Within a single input, a later point on the same
/// grid instant replaces an earlier one.
pub fn merge(a: &[Vector], b: &[Vector]) -> Vec<Vector> {
    if a.is_empty() {
        let mut out = b.to_vec();
        normalize(&mut out);
        return out;
    }
    if b.is_empty() {
        let mut out = a.to_vec();
        normalize(&mut out);
        return out;
    }

    // Snapped timestamps are exact multiples of 10, so integer keys give a
    // total order without comparing floats.
    let mut left: BTreeMap<i64, f64> = BTreeMap::new();
    for v in a {
        if v.timestamp == 0.0 {
            continue;
        }
        left.insert(snap(v.timestamp) as i64, v.value);
    }

    let mut right: BTreeMap<i64, f64> = BTreeMap::new();
    for v in b {
        if v.timestamp == 0.0 {
            continue;
        }
        right.insert(snap(v.timestamp) as i64, v.value);
    }

    for (ts, value) in right {
        *left.entry(ts).or_insert(0.0) += value;
    }

    left.into_iter()
        .map(|(ts, value)| Vector::new(ts as f64, value))
        .collect()
}

/// Scalar sum of a series' values.
pub fn total(series: &[Vector]) -> f64 {
    series.iter().map(|v| v.value).sum()
}
