use apnea_lib::{detectors::events::ApneaType, metrics::indices::EventTimeline};
use assert_cmd::cargo::cargo_bin_cmd;
use serde::Deserialize;
use serde_json::Value;
use std::{error::Error, io::Write};
use tempfile::NamedTempFile;

/// Two minutes at 10 Hz: an obstructive apnea at 10-25 s, a desaturating
/// hypopnea at 40-55 s and a flattened, unreduced stretch at 80-95 s.
fn session_csv() -> Result<NamedTempFile, Box<dyn Error>> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "timestamp,flow,effort,spo2,flatness")?;
    for i in 0..1200usize {
        let flow = match i {
            100..=249 => 1.0,
            400..=549 => 15.0,
            800..=949 => 28.0,
            _ => 30.0,
        };
        let effort = (i as f64 * 0.1).sin() * 0.8;
        let spo2 = if (420..520).contains(&i) { 91.0 } else { 95.0 };
        let flatness = if (800..950).contains(&i) { 0.9 } else { 0.1 };
        writeln!(
            file,
            "{:.1},{},{:.6},{},{}",
            i as f64 * 0.1,
            flow,
            effort,
            spo2,
            flatness
        )?;
    }
    file.flush()?;
    Ok(file)
}

fn path_arg(file: &NamedTempFile) -> String {
    file.path().to_string_lossy().to_string()
}

#[test]
fn detect_reports_timeline_and_indices() -> Result<(), Box<dyn Error>> {
    let csv = session_csv()?;
    let mut cmd = cargo_bin_cmd!("apnea");
    cmd.args(["detect", "--input", &path_arg(&csv)]);
    let output = cmd.assert().success().get_output().stdout.clone();

    let timeline: EventTimeline = serde_json::from_slice(&output)?;
    assert_eq!(timeline.apneas.len(), 1);
    assert_eq!(timeline.apneas[0].event_type, ApneaType::Obstructive);
    assert_eq!(timeline.hypopneas.len(), 1);
    assert!(timeline.hypopneas[0].has_desaturation);
    assert_eq!(timeline.reras.len(), 1);
    assert_eq!(timeline.total_events, 3);
    assert_close(timeline.ahi, 60.0, 1e-6);
    assert_close(timeline.rdi, 90.0, 1e-6);

    let value: Value = serde_json::from_slice(&output)?;
    assert_eq!(value["severity"], "severe");
    assert_close(value["breakdown"]["oai"].as_f64().unwrap_or_default(), 30.0, 1e-6);
    assert_close(value["breakdown"]["hi"].as_f64().unwrap_or_default(), 30.0, 1e-6);
    Ok(())
}

#[derive(Deserialize)]
struct RecordLine {
    event_type: String,
    spo2_drop: Option<f64>,
    peak_flow_limitation: Option<f64>,
}

#[test]
fn events_prints_one_record_per_line() -> Result<(), Box<dyn Error>> {
    let csv = session_csv()?;
    let mut cmd = cargo_bin_cmd!("apnea");
    cmd.args(["events", "--input", &path_arg(&csv)]);
    let output = cmd.assert().success().get_output().stdout.clone();

    let records: Vec<RecordLine> = String::from_utf8(output)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    let types: Vec<&str> = records.iter().map(|r| r.event_type.as_str()).collect();
    assert_eq!(types, vec!["OA", "H", "RERA"]);
    assert_close(records[1].spo2_drop.unwrap_or_default(), 4.0, 1e-9);
    assert_close(records[2].peak_flow_limitation.unwrap_or_default(), 0.9, 1e-9);
    Ok(())
}

#[test]
fn min_event_duration_override_suppresses_events() -> Result<(), Box<dyn Error>> {
    let csv = session_csv()?;
    let mut cmd = cargo_bin_cmd!("apnea");
    cmd.args([
        "detect",
        "--input",
        &path_arg(&csv),
        "--min-event-duration",
        "20",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let timeline: EventTimeline = serde_json::from_slice(&output)?;
    assert_eq!(timeline.total_events, 0);
    assert_eq!(timeline.ahi, 0.0);
    Ok(())
}

#[test]
fn toml_config_moves_apnea_threshold() -> Result<(), Box<dyn Error>> {
    let csv = session_csv()?;
    let mut config = NamedTempFile::new()?;
    writeln!(config, "apnea_threshold = 0.98")?;
    config.flush()?;

    let mut cmd = cargo_bin_cmd!("apnea");
    cmd.args([
        "detect",
        "--input",
        &path_arg(&csv),
        "--config",
        &path_arg(&config),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let timeline: EventTimeline = serde_json::from_slice(&output)?;
    assert!(timeline.apneas.is_empty());
    assert_eq!(timeline.hypopneas.len(), 2);
    Ok(())
}

#[test]
fn baseline_reports_median_flow() -> Result<(), Box<dyn Error>> {
    let csv = session_csv()?;
    let mut cmd = cargo_bin_cmd!("apnea");
    cmd.args(["baseline", "--input", &path_arg(&csv)]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let value: Value = serde_json::from_slice(&output)?;
    assert_eq!(value["samples"], 1200);
    assert_close(value["baseline_flow"].as_f64().unwrap_or_default(), 30.0, 1e-9);
    Ok(())
}

#[test]
fn non_monotonic_timestamps_fail() -> Result<(), Box<dyn Error>> {
    let mut csv = NamedTempFile::new()?;
    writeln!(csv, "timestamp,flow")?;
    writeln!(csv, "0.0,30.0")?;
    writeln!(csv, "0.1,30.0")?;
    writeln!(csv, "0.1,30.0")?;
    csv.flush()?;

    let mut cmd = cargo_bin_cmd!("apnea");
    cmd.args(["detect", "--input", &path_arg(&csv)]);
    let output = cmd.assert().failure().get_output().stderr.clone();
    assert!(String::from_utf8(output)?.contains("strictly increasing"));
    Ok(())
}

#[test]
fn negative_merge_gap_is_rejected() -> Result<(), Box<dyn Error>> {
    let csv = session_csv()?;
    let mut cmd = cargo_bin_cmd!("apnea");
    cmd.args(["detect", "--input", &path_arg(&csv), "--merge-gap=-1"]);
    let output = cmd.assert().failure().get_output().stderr.clone();
    assert!(String::from_utf8(output)?.contains("merge_gap"));
    Ok(())
}

fn assert_close(a: f64, b: f64, tol: f64) {
    let diff = (a - b).abs();
    assert!(
        diff <= tol,
        "diff {} exceeded tol {} ({} vs {})",
        diff,
        tol,
        a,
        b
    );
}
