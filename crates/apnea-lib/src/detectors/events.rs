use serde::{Deserialize, Serialize};
use std::fmt;

/// Apnea sub-classification by respiratory effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApneaType {
    #[serde(rename = "OA")]
    Obstructive,
    #[serde(rename = "CA")]
    Central,
    #[serde(rename = "MA")]
    Mixed,
    #[serde(rename = "UA")]
    Unclassified,
}

impl ApneaType {
    pub fn code(&self) -> &'static str {
        match self {
            ApneaType::Obstructive => "OA",
            ApneaType::Central => "CA",
            ApneaType::Mixed => "MA",
            ApneaType::Unclassified => "UA",
        }
    }
}

impl fmt::Display for ApneaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApneaEvent {
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub event_type: ApneaType,
    /// Mean fractional flow reduction over the event.
    pub flow_reduction: f64,
    pub confidence: f64,
    pub baseline_flow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypopneaEvent {
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub flow_reduction: f64,
    pub confidence: f64,
    pub baseline_flow: f64,
    pub has_desaturation: bool,
    /// Largest SpO2 fall (percentage points) against the pre-event level.
    #[serde(default)]
    pub spo2_drop: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RERAEvent {
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    /// Mean flatness over the flattened samples of the event.
    pub flatness_index: f64,
    pub peak_flatness: f64,
    pub confidence: f64,
}
