use crate::{
    detectors::{
        confidence::{ConfidenceModel, LinearConfidence, RegionStats},
        events::{ApneaEvent, ApneaType, HypopneaEvent, RERAEvent},
    },
    error::{DetectError, Result},
    metrics::indices::{create_event_timeline, EventTimeline},
    signal::{
        calculate_baseline_flow, calculate_flow_reduction, find_continuous_regions,
        merge_regions, validate_length, validate_timestamps, Region, SessionSignals,
        TIME_EPSILON,
    },
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Detection thresholds and timing for the respiratory event pipeline.
///
/// Reductions are fractions of baseline flow, flatness is in [0, 1], SpO2
/// values are percentage points and durations are seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Shortest run of qualifying samples that can become an event.
    pub min_event_duration: f64,
    /// Largest gap between two qualifying runs that still joins them.
    pub merge_gap: f64,
    pub apnea_threshold: f64,
    /// Lower edge of the hypopnea band; the upper edge is `apnea_threshold`.
    pub hypopnea_min_threshold: f64,
    pub rera_flatness_threshold: f64,
    pub desaturation_threshold: f64,
    /// Length of the pre-event window averaged for the SpO2 reference level.
    pub spo2_baseline_window: f64,
    /// Effort amplitude below this classifies an apnea as central.
    pub central_effort_max: f64,
    /// Effort amplitude at or above this classifies an apnea as obstructive.
    pub obstructive_effort_min: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_event_duration: 10.0,
            merge_gap: 2.0,
            apnea_threshold: 0.9,
            hypopnea_min_threshold: 0.3,
            rera_flatness_threshold: 0.7,
            desaturation_threshold: 3.0,
            spo2_baseline_window: 10.0,
            central_effort_max: 0.1,
            obstructive_effort_min: 0.5,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        non_negative("min_event_duration", self.min_event_duration)?;
        non_negative("merge_gap", self.merge_gap)?;
        non_negative("desaturation_threshold", self.desaturation_threshold)?;
        non_negative("spo2_baseline_window", self.spo2_baseline_window)?;
        non_negative("central_effort_max", self.central_effort_max)?;

        if !(self.apnea_threshold > 0.0 && self.apnea_threshold <= 1.0) {
            return Err(invalid("apnea_threshold", "must lie in (0, 1]"));
        }
        if !(self.hypopnea_min_threshold > 0.0
            && self.hypopnea_min_threshold < self.apnea_threshold)
        {
            return Err(invalid(
                "hypopnea_min_threshold",
                "must lie in (0, apnea_threshold)",
            ));
        }
        if !(0.0..=1.0).contains(&self.rera_flatness_threshold) {
            return Err(invalid("rera_flatness_threshold", "must lie in [0, 1]"));
        }
        if !(self.obstructive_effort_min.is_finite()
            && self.obstructive_effort_min >= self.central_effort_max)
        {
            return Err(invalid(
                "obstructive_effort_min",
                "must be finite and >= central_effort_max",
            ));
        }
        Ok(())
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be finite and >= 0, got {}", value)))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> DetectError {
    DetectError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

/// Turns flow, effort, SpO2 and flatness traces into scored respiratory events.
///
/// Holds only immutable configuration, so one detector can serve many
/// sessions, including from several threads at once.
#[derive(Debug, Clone)]
pub struct RespiratoryEventDetector<C = LinearConfidence> {
    config: DetectorConfig,
    confidence: C,
}

impl Default for RespiratoryEventDetector {
    fn default() -> Self {
        Self {
            config: DetectorConfig::default(),
            confidence: LinearConfidence::default(),
        }
    }
}

impl RespiratoryEventDetector {
    pub fn new(min_event_duration: f64, merge_gap: f64) -> Result<Self> {
        Self::with_config(DetectorConfig {
            min_event_duration,
            merge_gap,
            ..DetectorConfig::default()
        })
    }

    pub fn with_config(config: DetectorConfig) -> Result<Self> {
        Self::with_confidence_model(config, LinearConfidence::default())
    }
}

impl<C: ConfidenceModel> RespiratoryEventDetector<C> {
    pub fn with_confidence_model(config: DetectorConfig, confidence: C) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, confidence })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect apneas: runs where flow falls by at least `apnea_threshold`.
    ///
    /// With an effort channel each event is classified OA/CA/MA, otherwise UA.
    pub fn detect_apneas(
        &self,
        timestamps: &[f64],
        flow_values: &[f64],
        baseline_flow: f64,
        effort_signal: Option<&[f64]>,
    ) -> Result<Vec<ApneaEvent>> {
        validate_timestamps(timestamps)?;
        validate_length("flow", timestamps, flow_values)?;
        if let Some(effort) = effort_signal {
            validate_length("effort", timestamps, effort)?;
        }

        let threshold = self.config.apnea_threshold;
        let reduction = calculate_flow_reduction(flow_values, baseline_flow);
        let condition: Vec<bool> = reduction.iter().map(|&r| r >= threshold).collect();
        let regions = self.qualifying_regions("apnea", timestamps, &condition);

        let events = regions
            .iter()
            .map(|region| {
                let flow_reduction = conditional_mean(&reduction, &condition, region);
                let confidence = self
                    .confidence
                    .score(&RegionStats::new(flow_reduction, threshold, 1.0));
                let amplitude = effort_signal.and_then(|effort| {
                    effort_amplitude(&effort[region.start_index..region.end_index])
                });
                ApneaEvent {
                    start_time: region.start_time,
                    end_time: region.end_time,
                    duration: region.duration,
                    event_type: classify_apnea(amplitude, &self.config),
                    flow_reduction,
                    confidence,
                    baseline_flow,
                }
            })
            .collect();
        Ok(events)
    }

    /// Detect hypopneas: runs with reduction in `[hypopnea_min_threshold, apnea_threshold)`.
    pub fn detect_hypopneas(
        &self,
        timestamps: &[f64],
        flow_values: &[f64],
        baseline_flow: f64,
        spo2_signal: Option<&[f64]>,
    ) -> Result<Vec<HypopneaEvent>> {
        validate_timestamps(timestamps)?;
        validate_length("flow", timestamps, flow_values)?;
        if let Some(spo2) = spo2_signal {
            validate_length("spo2", timestamps, spo2)?;
        }

        let lower = self.config.hypopnea_min_threshold;
        let upper = self.config.apnea_threshold;
        let reduction = calculate_flow_reduction(flow_values, baseline_flow);
        let condition: Vec<bool> = reduction
            .iter()
            .map(|&r| r >= lower && r < upper)
            .collect();
        let regions = self.qualifying_regions("hypopnea", timestamps, &condition);

        let events = regions
            .iter()
            .map(|region| {
                let flow_reduction = conditional_mean(&reduction, &condition, region);
                let spo2_drop = spo2_signal.and_then(|spo2| {
                    spo2_desaturation(timestamps, spo2, region, self.config.spo2_baseline_window)
                });
                let has_desaturation =
                    spo2_drop.map_or(false, |drop| drop >= self.config.desaturation_threshold);
                let stats = RegionStats::new(flow_reduction, lower, upper)
                    .with_desaturation(spo2_drop, has_desaturation);
                HypopneaEvent {
                    start_time: region.start_time,
                    end_time: region.end_time,
                    duration: region.duration,
                    flow_reduction,
                    confidence: self.confidence.score(&stats),
                    baseline_flow,
                    has_desaturation,
                    spo2_drop,
                }
            })
            .collect();
        Ok(events)
    }

    /// Detect RERAs: flattened inspiratory flow without a qualifying flow reduction.
    pub fn detect_reras(
        &self,
        timestamps: &[f64],
        flow_values: &[f64],
        flatness_indices: &[f64],
        baseline_flow: f64,
    ) -> Result<Vec<RERAEvent>> {
        validate_timestamps(timestamps)?;
        validate_length("flow", timestamps, flow_values)?;
        validate_length("flatness", timestamps, flatness_indices)?;

        let threshold = self.config.rera_flatness_threshold;
        let reduction = calculate_flow_reduction(flow_values, baseline_flow);
        let condition: Vec<bool> = flatness_indices
            .iter()
            .zip(&reduction)
            .map(|(&flat, &r)| flat >= threshold && r < self.config.hypopnea_min_threshold)
            .collect();
        let regions = self.qualifying_regions("rera", timestamps, &condition);

        let events = regions
            .iter()
            .map(|region| {
                let flatness_index = conditional_mean(flatness_indices, &condition, region);
                let peak_flatness = flatness_indices[region.start_index..region.end_index]
                    .iter()
                    .zip(&condition[region.start_index..region.end_index])
                    .filter(|&(_, &c)| c)
                    .map(|(&f, _)| f)
                    .fold(flatness_index, f64::max);
                let confidence = self
                    .confidence
                    .score(&RegionStats::new(flatness_index, threshold, 1.0));
                RERAEvent {
                    start_time: region.start_time,
                    end_time: region.end_time,
                    duration: region.duration,
                    flatness_index,
                    peak_flatness,
                    confidence,
                }
            })
            .collect();
        Ok(events)
    }

    /// Aggregate detections into a timeline with AHI/RDI.
    pub fn create_event_timeline(
        &self,
        apneas: Vec<ApneaEvent>,
        hypopneas: Vec<HypopneaEvent>,
        reras: Vec<RERAEvent>,
        session_duration_hours: f64,
    ) -> EventTimeline {
        create_event_timeline(apneas, hypopneas, reras, session_duration_hours)
    }

    /// Run baseline estimation and every detector over one session.
    ///
    /// RERAs are only searched for when a flatness channel is present.
    pub fn analyze_session(&self, signals: &SessionSignals) -> Result<EventTimeline> {
        signals.validate()?;
        let baseline = calculate_baseline_flow(&signals.flow);
        let apneas = self.detect_apneas(
            &signals.timestamps,
            &signals.flow,
            baseline,
            signals.effort.as_deref(),
        )?;
        let hypopneas = self.detect_hypopneas(
            &signals.timestamps,
            &signals.flow,
            baseline,
            signals.spo2.as_deref(),
        )?;
        let reras = match signals.flatness.as_deref() {
            Some(flatness) => {
                self.detect_reras(&signals.timestamps, &signals.flow, flatness, baseline)?
            }
            None => Vec::new(),
        };
        debug!(
            "session of {} samples: baseline {:.2} L/min, {} apneas, {} hypopneas, {} reras",
            signals.len(),
            baseline,
            apneas.len(),
            hypopneas.len(),
            reras.len()
        );
        Ok(create_event_timeline(
            apneas,
            hypopneas,
            reras,
            signals.duration_hours(),
        ))
    }

    fn qualifying_regions(
        &self,
        kind: &str,
        timestamps: &[f64],
        condition: &[bool],
    ) -> Vec<Region> {
        let regions =
            find_continuous_regions(timestamps, condition, self.config.min_event_duration);
        let merged = merge_regions(&regions, self.config.merge_gap);
        debug!(
            "{}: {} regions >= {}s, {} after merging within {}s",
            kind,
            regions.len(),
            self.config.min_event_duration,
            merged.len(),
            self.config.merge_gap
        );
        merged
    }
}

/// Half the peak-to-peak excursion of an effort segment.
///
/// A sinusoid of amplitude A measures A. Returns `None` when the segment has
/// no finite samples.
pub fn effort_amplitude(segment: &[f64]) -> Option<f64> {
    let (min, max) = segment
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            None => Some((v, v)),
        })?;
    Some(0.5 * (max - min))
}

/// Map an effort amplitude onto the OA / MA / CA bands; no effort gives UA.
pub fn classify_apnea(effort_amplitude: Option<f64>, config: &DetectorConfig) -> ApneaType {
    match effort_amplitude {
        None => ApneaType::Unclassified,
        Some(amp) if amp >= config.obstructive_effort_min => ApneaType::Obstructive,
        Some(amp) if amp < config.central_effort_max => ApneaType::Central,
        Some(_) => ApneaType::Mixed,
    }
}

/// SpO2 fall inside `region` relative to the mean over the preceding window.
///
/// Values outside (0, 100] are oximeter dropout and ignored. With no valid
/// pre-event samples the first valid in-event sample is the reference.
pub(crate) fn spo2_desaturation(
    timestamps: &[f64],
    spo2: &[f64],
    region: &Region,
    window: f64,
) -> Option<f64> {
    let valid = |v: &f64| v.is_finite() && *v > 0.0 && *v <= 100.0;
    let window_start = region.start_time - window;

    let pre: Vec<f64> = timestamps[..region.start_index]
        .iter()
        .zip(&spo2[..region.start_index])
        .rev()
        .take_while(|(t, _)| **t + TIME_EPSILON >= window_start)
        .map(|(_, v)| *v)
        .filter(valid)
        .collect();
    let during: Vec<f64> = spo2[region.start_index..region.end_index]
        .iter()
        .copied()
        .filter(valid)
        .collect();

    let Some(&first) = during.first() else {
        warn!(
            "no valid SpO2 between {:.1}s and {:.1}s",
            region.start_time, region.end_time
        );
        return None;
    };
    let reference = if pre.is_empty() {
        first
    } else {
        pre.iter().sum::<f64>() / pre.len() as f64
    };
    let nadir = during.iter().copied().fold(f64::INFINITY, f64::min);
    Some((reference - nadir).max(0.0))
}

/// Mean of `values` over the samples of `region` where `condition` holds.
fn conditional_mean(values: &[f64], condition: &[bool], region: &Region) -> f64 {
    let (sum, count) = values[region.start_index..region.end_index]
        .iter()
        .zip(&condition[region.start_index..region.end_index])
        .filter(|&(_, &c)| c)
        .fold((0.0, 0usize), |(sum, count), (&v, _)| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
