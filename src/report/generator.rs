//! Run report assembly.
//!
//! Pairs every snapshot of a run with its trend report and renders the
//! result as JSON or as a short console summary.

use crate::analysis::{RunAggregation, TrendAnalyzer};
use crate::history::SnapshotStore;
use crate::models::{
    DimensionReport, MetricSnapshot, RunReport, SnapshotReport, TrackingState, TrendReport,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;

/// Compare every snapshot of a run against the archive.
///
/// Must run before the run's own snapshots are saved, or they would be
/// loaded back as history. Comparison only considers strictly earlier
/// snapshots, so a rerun at the same timestamp is still safe.
pub fn build_run_report<S: SnapshotStore + ?Sized>(
    run: &RunAggregation,
    analyzer: &TrendAnalyzer<'_>,
    store: &S,
    generated_at: DateTime<Utc>,
) -> RunReport {
    let report_for = |snapshot: &MetricSnapshot| SnapshotReport {
        snapshot: snapshot.clone(),
        trend: analyzer.compare_with_store(store, snapshot),
    };

    RunReport {
        generated_at,
        overall: report_for(&run.overall),
        dimensions: run
            .dimensions
            .iter()
            .map(|(dimension, groups)| DimensionReport {
                dimension: *dimension,
                snapshots: groups.iter().map(&report_for).collect(),
            })
            .collect(),
    }
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write a JSON report to a file.
pub fn write_json_report(report: &RunReport, path: &Path) -> Result<()> {
    let content = generate_json_report(report)?;

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write report to {}", path.display()))?;

    Ok(())
}

fn trend_note(trend: &TrendReport) -> String {
    match (&trend.state, &trend.trend) {
        (TrackingState::New, _) | (_, None) => "new".to_string(),
        (_, Some(t)) => format!(
            "{} {:+.1} over {:.1} days",
            t.direction.arrow(),
            t.delta,
            t.days_elapsed
        ),
    }
}

fn snapshot_line(report: &SnapshotReport) -> String {
    let s = &report.snapshot;
    let mut line = format!(
        "{} {:<24} {:>5.1}  {:<8}  {} entities  ({})",
        s.status.emoji(),
        s.dimension_value,
        s.overall_score,
        s.status.to_string(),
        s.total_entities,
        trend_note(&report.trend)
    );
    if s.low_confidence {
        line.push_str("  [low confidence]");
    }
    line
}

/// Plain-text summary for the terminal.
pub fn generate_summary(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "OKR run {}\n\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!("Overall:\n  {}\n", snapshot_line(&report.overall)));

    for dimension in &report.dimensions {
        output.push_str(&format!(
            "\nBy {} ({} groups):\n",
            dimension.dimension,
            dimension.snapshots.len()
        ));
        for snapshot in &dimension.snapshots {
            output.push_str(&format!("  {}\n", snapshot_line(snapshot)));
        }
    }

    let at_risk: Vec<_> = report.at_risk_burndowns().collect();
    if !at_risk.is_empty() {
        output.push_str("\nBurndowns at risk:\n");
        for (owner, b) in at_risk {
            let observed = b
                .burndown
                .observed_daily_rate
                .map(|v| format!("{:.2}/day", v))
                .unwrap_or_else(|| "n/a".to_string());
            output.push_str(&format!(
                "  {}={} {}: {:.1} left by {}, needs {:.2}/day, observed {}, done {}\n",
                owner.snapshot.dimension_type,
                owner.snapshot.dimension_value,
                b.kr_id,
                b.burndown.remaining_count,
                b.deadline,
                b.burndown.required_daily_rate,
                observed,
                b.burndown.projected_completion
            ));
        }
    }

    output
}
