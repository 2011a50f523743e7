use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fix::{FixStatus, FixSource};
use crate::scan::Category;

/// Outcome of a single provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    Ok,
    Error,
    Timeout,
    ValidationRejected,
}

/// Append-only record of one provider attempt. Never mutated after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCallRecord {
    pub request_id: String,
    pub provider: String,
    pub latency_ms: u64,
    pub cost_estimate: f64,
    pub outcome: CallOutcome,
    pub at: DateTime<Utc>,
}

/// Append-only record of one completed fix request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcomeRecord {
    pub request_id: String,
    pub category: Category,
    pub source: Option<FixSource>,
    pub status: FixStatus,
    pub at: DateTime<Utc>,
}

/// Aggregate view over recorded provider calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub total_calls: usize,
    pub ok: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub rejected: usize,
    pub avg_latency_ms: f64,
    pub total_cost_estimate: f64,
}

/// Shared telemetry store. Constructed once at startup and passed by
/// `Arc`; recording is fire-and-forget relative to the caller's critical
/// path and never fails it.
#[derive(Debug, Default)]
pub struct Telemetry {
    calls: RwLock<Vec<ProviderCallRecord>>,
    fixes: RwLock<Vec<FixOutcomeRecord>>,
}

/// Rough cost model: flat per-token estimate until providers expose real
/// billing data.
pub fn estimate_cost(tokens: Option<u32>) -> f64 {
    tokens.map(|t| f64::from(t) * 2e-6).unwrap_or(0.0)
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_provider_call(&self, record: ProviderCallRecord) {
        if let Ok(mut calls) = self.calls.write() {
            calls.push(record);
        }
    }

    pub fn record_fix_outcome(&self, record: FixOutcomeRecord) {
        if let Ok(mut fixes) = self.fixes.write() {
            fixes.push(record);
        }
    }

    /// Snapshot of all provider calls for one fix request.
    pub fn provider_calls_for(&self, request_id: &str) -> Vec<ProviderCallRecord> {
        self.calls
            .read()
            .map(|calls| {
                calls
                    .iter()
                    .filter(|record| record.request_id == request_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn provider_calls(&self) -> Vec<ProviderCallRecord> {
        self.calls
            .read()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn fix_outcomes(&self) -> Vec<FixOutcomeRecord> {
        self.fixes
            .read()
            .map(|fixes| fixes.clone())
            .unwrap_or_default()
    }

    /// Share of non-failed fixes for a category (all categories when
    /// `None`) since the given instant (all time when `None`).
    pub fn fix_success_rate(
        &self,
        category: Option<Category>,
        since: Option<DateTime<Utc>>,
    ) -> Option<f64> {
        let fixes = self.fixes.read().ok()?;
        let relevant: Vec<&FixOutcomeRecord> = fixes
            .iter()
            .filter(|record| category.map_or(true, |c| record.category == c))
            .filter(|record| since.map_or(true, |s| record.at >= s))
            .collect();
        if relevant.is_empty() {
            return None;
        }
        let succeeded = relevant
            .iter()
            .filter(|record| record.status != FixStatus::Failed)
            .count();
        Some(succeeded as f64 / relevant.len() as f64)
    }

    pub fn summary(&self, since: Option<DateTime<Utc>>) -> TelemetrySummary {
        let calls = match self.calls.read() {
            Ok(calls) => calls,
            Err(_) => return TelemetrySummary::default(),
        };
        let relevant: Vec<&ProviderCallRecord> = calls
            .iter()
            .filter(|record| since.map_or(true, |s| record.at >= s))
            .collect();
        let total_calls = relevant.len();
        let mut summary = TelemetrySummary {
            total_calls,
            ..TelemetrySummary::default()
        };
        for record in &relevant {
            match record.outcome {
                CallOutcome::Ok => summary.ok += 1,
                CallOutcome::Error => summary.errors += 1,
                CallOutcome::Timeout => summary.timeouts += 1,
                CallOutcome::ValidationRejected => summary.rejected += 1,
            }
            summary.avg_latency_ms += record.latency_ms as f64;
            summary.total_cost_estimate += record.cost_estimate;
        }
        if total_calls > 0 {
            summary.avg_latency_ms /= total_calls as f64;
        }
        summary
    }
}
