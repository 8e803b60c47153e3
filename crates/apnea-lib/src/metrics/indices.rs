use crate::detectors::events::{ApneaEvent, ApneaType, HypopneaEvent, RERAEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// All events from one session plus the rate indices derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTimeline {
    pub apneas: Vec<ApneaEvent>,
    pub hypopneas: Vec<HypopneaEvent>,
    pub reras: Vec<RERAEvent>,
    pub total_events: usize,
    /// Apneas + hypopneas per hour.
    pub ahi: f64,
    /// Apneas + hypopneas + RERAs per hour.
    pub rdi: f64,
    pub session_duration_hours: f64,
}

/// Per-class event rates (events per hour).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexBreakdown {
    pub oai: f64,
    pub cai: f64,
    pub mai: f64,
    pub uai: f64,
    pub hi: f64,
    pub rera_index: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AhiSeverity {
    Normal,
    Mild,
    Moderate,
    Severe,
}

impl AhiSeverity {
    /// AASM bands: <5 normal, 5-15 mild, 15-30 moderate, >=30 severe.
    pub fn from_ahi(ahi: f64) -> Self {
        if ahi < 5.0 {
            AhiSeverity::Normal
        } else if ahi < 15.0 {
            AhiSeverity::Mild
        } else if ahi < 30.0 {
            AhiSeverity::Moderate
        } else {
            AhiSeverity::Severe
        }
    }
}

impl fmt::Display for AhiSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AhiSeverity::Normal => "normal",
            AhiSeverity::Mild => "mild",
            AhiSeverity::Moderate => "moderate",
            AhiSeverity::Severe => "severe",
        };
        f.write_str(label)
    }
}

/// Flat, class-agnostic view of one event, shaped for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// `OA`, `CA`, `MA`, `UA`, `H` or `RERA`.
    pub event_type: String,
    pub start_time: f64,
    pub duration: f64,
    pub confidence: f64,
    pub spo2_drop: Option<f64>,
    pub peak_flow_limitation: Option<f64>,
}

pub const HYPOPNEA_CODE: &str = "H";
pub const RERA_CODE: &str = "RERA";

/// Build a timeline, sorting each class by start time.
///
/// A zero (or negative, or non-finite) session length yields zero indices.
pub fn create_event_timeline(
    mut apneas: Vec<ApneaEvent>,
    mut hypopneas: Vec<HypopneaEvent>,
    mut reras: Vec<RERAEvent>,
    session_duration_hours: f64,
) -> EventTimeline {
    apneas.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    hypopneas.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    reras.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    let total_events = apneas.len() + hypopneas.len() + reras.len();
    let ahi = per_hour(apneas.len() + hypopneas.len(), session_duration_hours);
    let rdi = per_hour(total_events, session_duration_hours);

    EventTimeline {
        apneas,
        hypopneas,
        reras,
        total_events,
        ahi,
        rdi,
        session_duration_hours,
    }
}

fn per_hour(count: usize, hours: f64) -> f64 {
    if hours.is_finite() && hours > 0.0 {
        count as f64 / hours
    } else {
        0.0
    }
}

impl EventTimeline {
    pub fn apnea_count(&self, kind: ApneaType) -> usize {
        self.apneas.iter().filter(|a| a.event_type == kind).count()
    }

    pub fn breakdown(&self) -> IndexBreakdown {
        let hours = self.session_duration_hours;
        IndexBreakdown {
            oai: per_hour(self.apnea_count(ApneaType::Obstructive), hours),
            cai: per_hour(self.apnea_count(ApneaType::Central), hours),
            mai: per_hour(self.apnea_count(ApneaType::Mixed), hours),
            uai: per_hour(self.apnea_count(ApneaType::Unclassified), hours),
            hi: per_hour(self.hypopneas.len(), hours),
            rera_index: per_hour(self.reras.len(), hours),
        }
    }

    pub fn severity(&self) -> AhiSeverity {
        AhiSeverity::from_ahi(self.ahi)
    }

    /// Every event as an [`EventRecord`], ordered by start time.
    pub fn records(&self) -> Vec<EventRecord> {
        let apneas = self.apneas.iter().map(|a| EventRecord {
            event_type: a.event_type.code().to_string(),
            start_time: a.start_time,
            duration: a.duration,
            confidence: a.confidence,
            spo2_drop: None,
            peak_flow_limitation: None,
        });
        let hypopneas = self.hypopneas.iter().map(|h| EventRecord {
            event_type: HYPOPNEA_CODE.to_string(),
            start_time: h.start_time,
            duration: h.duration,
            confidence: h.confidence,
            spo2_drop: h.spo2_drop,
            peak_flow_limitation: None,
        });
        let reras = self.reras.iter().map(|r| EventRecord {
            event_type: RERA_CODE.to_string(),
            start_time: r.start_time,
            duration: r.duration,
            confidence: r.confidence,
            spo2_drop: None,
            peak_flow_limitation: Some(r.peak_flatness),
        });
        let mut records: Vec<EventRecord> = apneas.chain(hypopneas).chain(reras).collect();
        records.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        records
    }
}
