use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::aggregate::{AggregateReport, GroupStats};

/// Write the full report as pretty JSON.
pub fn write_report_json(path: &Path, report: &AggregateReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize report")?;
    ensure_parent(path)?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    Ok(())
}

fn stats_row(out: &mut String, label: &str, s: &GroupStats) {
    let _ = writeln!(
        out,
        "| {} | {} | {} | {:.1}% | {:.3} | {:.3} | {:.3} |",
        label,
        s.count,
        s.scored,
        s.success_rate * 100.0,
        s.mean_score,
        s.min_score,
        s.max_score
    );
}

fn stats_table<'a>(
    out: &mut String,
    title: &str,
    rows: impl IntoIterator<Item = (String, &'a GroupStats)>,
) {
    let _ = writeln!(out, "## {title}\n");
    out.push_str("| name | count | scored | success | mean | min | max |\n");
    out.push_str("|---|---:|---:|---:|---:|---:|---:|\n");
    for (label, stats) in rows {
        stats_row(out, &label, stats);
    }
    out.push('\n');
}

/// Render a markdown summary for human review.
pub fn render_summary_md(report: &AggregateReport) -> String {
    let s = &report.summary;
    let mut out = String::new();
    out.push_str("# Workflow Validation Report\n\n");
    let _ = writeln!(
        out,
        "- run: `{}`\n- generated: {}\n- tuples: {}\n- scored: {}\n- failed: {}\n- success rate: {:.1}%\n- mean overall score: {:.3}\n",
        report.run_id,
        report.generated_at.to_rfc3339(),
        s.total,
        s.scored,
        s.failed,
        s.success_rate * 100.0,
        s.overall.mean_score
    );

    stats_table(
        &mut out,
        "By Agent",
        report.by_agent.iter().map(|(k, v)| (k.clone(), v)),
    );
    stats_table(
        &mut out,
        "By Strategy",
        report.by_strategy.iter().map(|(k, v)| (k.clone(), v)),
    );
    stats_table(
        &mut out,
        "By Agent and Strategy",
        report.by_cell.iter().flat_map(|(agent, strategies)| {
            strategies
                .iter()
                .map(move |(strategy, v)| (format!("{agent} / {strategy}"), v))
        }),
    );
    stats_table(
        &mut out,
        "By Task",
        report.by_task.iter().map(|(k, v)| (k.clone(), v)),
    );

    if !s.failures_by_kind.is_empty() {
        out.push_str("## Failures\n\n");
        for (kind, n) in &s.failures_by_kind {
            let _ = writeln!(out, "- {kind}: {n}");
        }
        out.push('\n');
        for r in report.failed_results() {
            let k = &r.candidate.key;
            let detail = r
                .candidate
                .parse_error
                .as_ref()
                .map(|e| e.detail.as_str())
                .unwrap_or("");
            let _ = writeln!(
                out,
                "- `{}` / `{}` / `{}` #{}: {} {}",
                k.agent_id,
                k.strategy_id,
                k.task_id,
                k.query_index,
                r.failure_kind.map(|f| f.as_str()).unwrap_or("unknown"),
                detail
            );
        }
    }
    out
}

/// Write the markdown summary.
pub fn write_summary_md(path: &Path, report: &AggregateReport) -> Result<()> {
    let md = render_summary_md(report);
    ensure_parent(path)?;
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
