use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::io::Read;
use std::path::Path;

use crate::signal::SessionSignals;

/// Load a session CSV with `timestamp` and `flow` columns plus optional
/// `effort`, `spo2` and `flatness` columns. Header matching ignores case.
pub fn read_session_csv(path: &Path) -> Result<SessionSignals> {
    let file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_session_csv(file).with_context(|| format!("parsing {}", path.display()))
}

/// Parse session CSV text from any reader (file, stdin, in-memory buffer).
pub fn parse_session_csv<R: Read>(input: R) -> Result<SessionSignals> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(input);
    let headers = reader.headers().context("reading header")?.clone();

    let timestamp_idx = locate(&headers, "timestamp").context("missing timestamp column")?;
    let flow_idx = locate(&headers, "flow").context("missing flow column")?;
    let effort_idx = locate(&headers, "effort");
    let spo2_idx = locate(&headers, "spo2");
    let flatness_idx = locate(&headers, "flatness");

    let mut signals = SessionSignals {
        effort: effort_idx.map(|_| Vec::new()),
        spo2: spo2_idx.map(|_| Vec::new()),
        flatness: flatness_idx.map(|_| Vec::new()),
        ..SessionSignals::default()
    };

    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading record {}", row + 1))?;
        let line = row + 2;
        signals
            .timestamps
            .push(parse_field(&record, timestamp_idx, "timestamp", line)?);
        signals.flow.push(parse_field(&record, flow_idx, "flow", line)?);
        if let (Some(idx), Some(values)) = (effort_idx, signals.effort.as_mut()) {
            values.push(parse_field(&record, idx, "effort", line)?);
        }
        if let (Some(idx), Some(values)) = (spo2_idx, signals.spo2.as_mut()) {
            values.push(parse_field(&record, idx, "spo2", line)?);
        }
        if let (Some(idx), Some(values)) = (flatness_idx, signals.flatness.as_mut()) {
            values.push(parse_field(&record, idx, "flatness", line)?);
        }
    }

    if signals.is_empty() {
        anyhow::bail!("no samples found");
    }
    Ok(signals)
}

fn locate(headers: &StringRecord, column: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(column))
}

/// Empty cells read as NaN so a dropped sample does not abort the session.
fn parse_field(record: &StringRecord, idx: usize, column: &str, line: usize) -> Result<f64> {
    let raw = record
        .get(idx)
        .ok_or_else(|| anyhow!("line {}: missing {} value", line, column))?;
    if raw.is_empty() {
        return Ok(f64::NAN);
    }
    raw.parse::<f64>()
        .with_context(|| format!("line {}: {} is not f64: {}", line, column, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_required_and_optional_columns() {
        let text = "Timestamp,Flow,SpO2\n0.0,30.0,95\n0.1,-28.5,94\n0.2,1.0,\n";
        let signals = parse_session_csv(text.as_bytes()).expect("parse session");
        assert_eq!(signals.timestamps, vec![0.0, 0.1, 0.2]);
        assert_eq!(signals.flow, vec![30.0, -28.5, 1.0]);
        assert!(signals.effort.is_none());
        assert!(signals.flatness.is_none());
        let spo2 = signals.spo2.expect("spo2 column");
        assert_eq!(&spo2[..2], &[95.0, 94.0]);
        assert!(spo2[2].is_nan());
    }

    #[test]
    fn rejects_missing_flow_column() {
        let err = parse_session_csv("timestamp,pressure\n0.0,8.0\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("flow"));
    }

    #[test]
    fn rejects_non_numeric_values() {
        let err = parse_session_csv("timestamp,flow\n0.0,abc\n".as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn rejects_empty_file() {
        assert!(parse_session_csv("timestamp,flow\n".as_bytes()).is_err());
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "timestamp,flow,effort,flatness").unwrap();
        writeln!(file, "0.0,30.0,0.2,0.1").unwrap();
        writeln!(file, "0.1,29.0,0.3,0.2").unwrap();
        let signals = read_session_csv(file.path()).expect("read session");
        assert_eq!(signals.len(), 2);
        assert_eq!(signals.effort, Some(vec![0.2, 0.3]));
        assert_eq!(signals.flatness, Some(vec![0.1, 0.2]));
        signals.validate().expect("consistent channels");
    }
}
