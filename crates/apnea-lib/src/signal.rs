use crate::error::{DetectError, Result};
use log::warn;
use serde::{Deserialize, Serialize};

/// Slack applied to time comparisons so that float accumulation in sample
/// timestamps (e.g. `n * 0.1`) does not flip a boundary decision.
pub(crate) const TIME_EPSILON: f64 = 1e-9;

/// Baseline returned when a flow trace has no usable samples.
pub const FALLBACK_BASELINE_FLOW: f64 = 1.0;

/// One therapy session's worth of normalized signals.
///
/// Flow is in L/min and timestamps in seconds. All optional channels, when
/// present, share the length of `timestamps`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSignals {
    pub timestamps: Vec<f64>,
    pub flow: Vec<f64>,
    #[serde(default)]
    pub effort: Option<Vec<f64>>,
    #[serde(default)]
    pub spo2: Option<Vec<f64>>,
    #[serde(default)]
    pub flatness: Option<Vec<f64>>,
}

impl SessionSignals {
    pub fn new(timestamps: Vec<f64>, flow: Vec<f64>) -> Self {
        Self {
            timestamps,
            flow,
            ..Self::default()
        }
    }

    pub fn with_effort(mut self, effort: Vec<f64>) -> Self {
        self.effort = Some(effort);
        self
    }

    pub fn with_spo2(mut self, spo2: Vec<f64>) -> Self {
        self.spo2 = Some(spo2);
        self
    }

    pub fn with_flatness(mut self, flatness: Vec<f64>) -> Self {
        self.flatness = Some(flatness);
        self
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Recorded span in seconds, counting the final sample's interval.
    pub fn duration_seconds(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first + sample_interval(&self.timestamps),
            _ => 0.0,
        }
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration_seconds() / 3600.0
    }

    /// Check every channel against the timestamp axis.
    pub fn validate(&self) -> Result<()> {
        validate_timestamps(&self.timestamps)?;
        validate_length("flow", &self.timestamps, &self.flow)?;
        if let Some(effort) = &self.effort {
            validate_length("effort", &self.timestamps, effort)?;
        }
        if let Some(spo2) = &self.spo2 {
            validate_length("spo2", &self.timestamps, spo2)?;
        }
        if let Some(flatness) = &self.flatness {
            validate_length("flatness", &self.timestamps, flatness)?;
        }
        Ok(())
    }
}

/// A maximal run of samples satisfying some condition.
///
/// `end_index` is exclusive. `end_time` is the last sample's timestamp plus
/// one nominal sampling interval, so a hole in the timestamps right after the
/// run never stretches it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
}

pub fn validate_timestamps(timestamps: &[f64]) -> Result<()> {
    if let Some(index) = timestamps.iter().position(|t| !t.is_finite()) {
        return Err(DetectError::NonMonotonicTimestamps { index });
    }
    match timestamps.windows(2).position(|w| w[1] <= w[0]) {
        Some(pos) => Err(DetectError::NonMonotonicTimestamps { index: pos + 1 }),
        None => Ok(()),
    }
}

pub fn validate_length(signal: &'static str, timestamps: &[f64], values: &[f64]) -> Result<()> {
    if values.len() != timestamps.len() {
        return Err(DetectError::LengthMismatch {
            signal,
            expected: timestamps.len(),
            actual: values.len(),
        });
    }
    Ok(())
}

/// Median of absolute non-zero flow samples.
///
/// Zeros mark sensor dropout or apneic silence and are not representative of
/// normal breathing. Falls back to [`FALLBACK_BASELINE_FLOW`] when nothing is
/// left so callers can always divide by the result.
pub fn calculate_baseline_flow(flow_values: &[f64]) -> f64 {
    let magnitudes: Vec<f64> = flow_values
        .iter()
        .map(|v| v.abs())
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    match median(magnitudes) {
        Some(baseline) => baseline,
        None => {
            warn!(
                "no non-zero flow among {} samples, using fallback baseline {}",
                flow_values.len(),
                FALLBACK_BASELINE_FLOW
            );
            FALLBACK_BASELINE_FLOW
        }
    }
}

/// Per-sample fractional reduction of |flow| against `baseline`, in [0, 1].
///
/// A non-positive baseline yields all zeros.
pub fn calculate_flow_reduction(flow_values: &[f64], baseline: f64) -> Vec<f64> {
    if !(baseline.is_finite() && baseline > 0.0) {
        return vec![0.0; flow_values.len()];
    }
    flow_values
        .iter()
        .map(|v| {
            if v.is_finite() {
                ((baseline - v.abs()) / baseline).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Nominal sampling interval: the median spacing between timestamps.
pub fn sample_interval(timestamps: &[f64]) -> f64 {
    let diffs: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    median(diffs).unwrap_or(0.0)
}

/// Find maximal runs of `true` lasting at least `min_duration` seconds.
///
/// Runs that are too short are dropped, never joined to their neighbours.
/// Only the overlapping prefix of `timestamps` and `condition` is scanned.
pub fn find_continuous_regions(
    timestamps: &[f64],
    condition: &[bool],
    min_duration: f64,
) -> Vec<Region> {
    let n = timestamps.len().min(condition.len());
    let interval = sample_interval(&timestamps[..n]);
    let mut regions = Vec::new();
    let mut run_start: Option<usize> = None;

    for i in 0..=n {
        let active = i < n && condition[i];
        match (run_start, active) {
            (None, true) => run_start = Some(i),
            (Some(start), false) => {
                let end_time = timestamps[i - 1] + interval;
                let region = Region {
                    start_index: start,
                    end_index: i,
                    start_time: timestamps[start],
                    end_time,
                    duration: end_time - timestamps[start],
                };
                if region.duration + TIME_EPSILON >= min_duration {
                    regions.push(region);
                }
                run_start = None;
            }
            _ => {}
        }
    }
    regions
}

/// Coalesce time-ordered regions separated by at most `merge_gap` seconds.
pub fn merge_regions(regions: &[Region], merge_gap: f64) -> Vec<Region> {
    regions.iter().fold(Vec::new(), |mut merged: Vec<Region>, region| {
        match merged.last_mut() {
            Some(prev) if region.start_time - prev.end_time <= merge_gap + TIME_EPSILON => {
                prev.end_index = region.end_index;
                prev.end_time = region.end_time;
                prev.duration = prev.end_time - prev.start_time;
            }
            _ => merged.push(*region),
        }
        merged
    })
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some(0.5 * (values[mid - 1] + values[mid]))
    } else {
        Some(values[mid])
    }
}
