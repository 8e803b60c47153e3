use serde::{Deserialize, Serialize};

/// Summary of a detected region handed to a [`ConfidenceModel`].
///
/// `magnitude` is the quantity that qualified the region (mean flow reduction
/// for apneas/hypopneas, mean flatness for RERAs). `lower` is the detection
/// threshold and `upper` the largest meaningful magnitude for that class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStats {
    pub magnitude: f64,
    pub lower: f64,
    pub upper: f64,
    /// SpO2 drop in percentage points, when an oximetry channel was present.
    pub spo2_drop: Option<f64>,
    pub desaturated: bool,
}

impl RegionStats {
    pub fn new(magnitude: f64, lower: f64, upper: f64) -> Self {
        Self {
            magnitude,
            lower,
            upper,
            spo2_drop: None,
            desaturated: false,
        }
    }

    pub fn with_desaturation(mut self, spo2_drop: Option<f64>, desaturated: bool) -> Self {
        self.spo2_drop = spo2_drop;
        self.desaturated = desaturated;
        self
    }

    /// Position of `magnitude` within `[lower, upper]`, in [0, 1].
    pub fn normalized(&self) -> f64 {
        let span = self.upper - self.lower;
        if !(span > 0.0) {
            return 1.0;
        }
        ((self.magnitude - self.lower) / span).clamp(0.0, 1.0)
    }
}

/// Maps region statistics to a confidence score in (0, 1].
///
/// Implementations must be monotonically non-decreasing in `magnitude`.
pub trait ConfidenceModel {
    fn score(&self, stats: &RegionStats) -> f64;
}

/// Linear ramp from `floor` at the threshold to 1.0 at the upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfidence {
    pub floor: f64,
    /// Largest bonus for a hypopnea with a qualifying desaturation.
    pub desaturation_bonus: f64,
    /// SpO2 drop, in percentage points, that earns the whole bonus. Smaller
    /// drops earn a proportional share.
    pub full_bonus_drop: f64,
    /// Minimum score for a desaturated hypopnea.
    pub desaturation_floor: f64,
}

impl Default for LinearConfidence {
    fn default() -> Self {
        Self {
            floor: 0.5,
            desaturation_bonus: 0.2,
            full_bonus_drop: 8.0,
            desaturation_floor: 0.7,
        }
    }
}

impl ConfidenceModel for LinearConfidence {
    fn score(&self, stats: &RegionStats) -> f64 {
        let floor = self.floor.clamp(0.0, 1.0);
        let mut score = floor + (1.0 - floor) * stats.normalized();
        if stats.desaturated {
            let share = match stats.spo2_drop {
                Some(drop) if self.full_bonus_drop > 0.0 => {
                    (drop / self.full_bonus_drop).clamp(0.0, 1.0)
                }
                _ => 1.0,
            };
            score = (score + self.desaturation_bonus * share).max(self.desaturation_floor);
        }
        score.clamp(f64::MIN_POSITIVE, 1.0)
    }
}
