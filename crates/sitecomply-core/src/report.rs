use std::fmt::Write;

use serde::Serialize;

use crate::fix::FixResult;
use crate::scan::{Finding, Severity};
use crate::score::{CategoryScore, ScanResult};

/// Format styles supported in default reporter implementations.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Produce a report string from a `ScanResult` using the desired format.
pub fn render_scan_report(result: &ScanResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_scan_human(result),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&JsonScanReport::from(result))?),
    }
}

/// Produce a report string from a `FixResult` using the desired format.
pub fn render_fix_result(result: &FixResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_fix_human(result),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
    }
}

fn render_scan_human(result: &ScanResult) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "Compliance Score: {:.1} (risk {:.1}, {:?})",
        result.score, result.risk.risk, result.risk.band
    )?;
    writeln!(out, "Scan: {} — {}", result.scan_id, result.url)?;
    writeln!(out)?;

    if result.findings.is_empty() {
        writeln!(out, "No findings detected.")?;
    } else {
        writeln!(out, "Findings:")?;
        for finding in &result.findings {
            writeln!(
                out,
                "  - [{severity}] {id} ({category}) @ {page}",
                severity = severity_label(finding.severity),
                id = finding.id,
                category = finding.category,
                page = finding.page_url,
            )?;
            writeln!(out, "    {}", finding.description)?;
            if let Some(evidence) = &finding.evidence {
                if !evidence.trim().is_empty() {
                    writeln!(out, "    \"{}\"", sanitize_excerpt(evidence))?;
                }
            }
        }
    }

    writeln!(out)?;
    writeln!(out, "Category Scores:")?;
    for category in &result.category_scores {
        writeln!(
            out,
            "  - {name:>15}: {score:>5.1} (weight {weight:.0}%, {critical} critical / {warning} warning)",
            name = category.category.to_string(),
            score = category.score,
            weight = category.weight,
            critical = category.critical,
            warning = category.warning,
        )?;
    }

    Ok(out)
}

fn render_fix_human(result: &FixResult) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "Fix {id}: {status:?} ({artifact}, source {source}, confidence {confidence:.2})",
        id = result.request_id,
        status = result.status,
        artifact = result.artifact,
        source = result.source,
        confidence = result.confidence,
    )?;
    writeln!(out)?;
    writeln!(out, "{}", result.content)?;
    if !result.validation.passed() {
        writeln!(out, "Validation: {}", result.validation)?;
    }
    Ok(out)
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "CRIT",
        Severity::Warning => "WARN",
        Severity::Info => "INFO",
    }
}

fn sanitize_excerpt(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            _ => c,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct JsonScanReport<'a> {
    scan_id: &'a str,
    url: &'a str,
    score: f32,
    risk: &'a crate::score::RiskEstimate,
    findings: &'a [Finding],
    category_scores: &'a [CategoryScore],
}

impl<'a> From<&'a ScanResult> for JsonScanReport<'a> {
    fn from(result: &'a ScanResult) -> Self {
        Self {
            scan_id: &result.scan_id,
            url: &result.url,
            score: result.score,
            risk: &result.risk,
            findings: &result.findings,
            category_scores: &result.category_scores,
        }
    }
}
