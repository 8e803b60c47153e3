use anyhow::{Context, Result};
use apnea_lib::{
    detectors::respiratory::{DetectorConfig, RespiratoryEventDetector},
    io::csv as csv_io,
    metrics::indices::{AhiSeverity, EventTimeline, IndexBreakdown},
    signal::{calculate_baseline_flow, SessionSignals},
};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::{
    io,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "apnea",
    version,
    about = "Respiratory event detection for CPAP therapy sessions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DetectArgs {
    /// Session CSV with timestamp,flow[,effort,spo2,flatness]; read from stdin when omitted
    #[arg(long)]
    input: Option<PathBuf>,
    /// TOML file with detector thresholds
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    min_event_duration: Option<f64>,
    #[arg(long)]
    merge_gap: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect apneas, hypopneas and RERAs and print the session timeline with AHI/RDI
    Detect {
        #[command(flatten)]
        args: DetectArgs,
    },
    /// Print one JSON event record per line, ordered by start time
    Events {
        #[command(flatten)]
        args: DetectArgs,
    },
    /// Print the median baseline flow of a session
    Baseline {
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct DetectSummary<'a> {
    #[serde(flatten)]
    timeline: &'a EventTimeline,
    breakdown: IndexBreakdown,
    severity: AhiSeverity,
}

#[derive(Serialize)]
struct BaselineSummary {
    samples: usize,
    baseline_flow: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Detect { args } => cmd_detect(&args)?,
        Commands::Events { args } => cmd_events(&args)?,
        Commands::Baseline { input } => cmd_baseline(input.as_deref())?,
    }
    Ok(())
}

fn read_signals(input: Option<&Path>) -> Result<SessionSignals> {
    match input {
        Some(path) => csv_io::read_session_csv(path),
        None => csv_io::parse_session_csv(io::stdin().lock()).context("parsing stdin"),
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectorConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
        }
        None => Ok(DetectorConfig::default()),
    }
}

fn build_detector(args: &DetectArgs) -> Result<RespiratoryEventDetector> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(min_event_duration) = args.min_event_duration {
        cfg.min_event_duration = min_event_duration;
    }
    if let Some(merge_gap) = args.merge_gap {
        cfg.merge_gap = merge_gap;
    }
    Ok(RespiratoryEventDetector::with_config(cfg)?)
}

fn analyze(args: &DetectArgs) -> Result<EventTimeline> {
    let detector = build_detector(args)?;
    let signals = read_signals(args.input.as_deref())?;
    let timeline = detector.analyze_session(&signals)?;
    info!(
        "{} events over {:.2} h (AHI {:.1}, RDI {:.1})",
        timeline.total_events, timeline.session_duration_hours, timeline.ahi, timeline.rdi
    );
    Ok(timeline)
}

fn cmd_detect(args: &DetectArgs) -> Result<()> {
    let timeline = analyze(args)?;
    let summary = DetectSummary {
        timeline: &timeline,
        breakdown: timeline.breakdown(),
        severity: timeline.severity(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_events(args: &DetectArgs) -> Result<()> {
    let timeline = analyze(args)?;
    for record in timeline.records() {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

fn cmd_baseline(input: Option<&Path>) -> Result<()> {
    let signals = read_signals(input)?;
    let summary = BaselineSummary {
        samples: signals.len(),
        baseline_flow: calculate_baseline_flow(&signals.flow),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
