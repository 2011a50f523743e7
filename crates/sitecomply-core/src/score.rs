use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scan::{Category, Finding, Severity};

/// Thresholds that map a numeric risk estimate into qualitative bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub medium: f32,
    pub high: f32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 25.0,
            high: 60.0,
        }
    }
}

/// Classification buckets for the aggregate risk estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn from_risk(risk: f32, thresholds: &RiskThresholds) -> Self {
        if risk >= thresholds.high {
            Self::High
        } else if risk >= thresholds.medium {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Relative weight of each compliance category in the risk estimate.
/// Weights must sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryWeights {
    pub privacy: f32,
    pub accessibility: f32,
    pub consent: f32,
    pub legal_notice: f32,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            privacy: 35.0,
            accessibility: 30.0,
            consent: 20.0,
            legal_notice: 15.0,
        }
    }
}

impl CategoryWeights {
    pub fn for_category(&self, category: Category) -> Option<f32> {
        match category {
            Category::PrivacyPolicy => Some(self.privacy),
            Category::Accessibility => Some(self.accessibility),
            Category::CookieConsent => Some(self.consent),
            Category::LegalNotice => Some(self.legal_notice),
            Category::Unreachable | Category::CheckFailed => None,
        }
    }

    fn total(&self) -> f32 {
        self.privacy + self.accessibility + self.consent + self.legal_notice
    }
}

/// Tunable configuration for the deterministic scoring formula. The exact
/// weights are configuration with documented defaults, not a normative
/// legal requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    pub critical_penalty: f32,
    pub warning_penalty: f32,
    pub weights: CategoryWeights,
    pub thresholds: RiskThresholds,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            critical_penalty: 20.0,
            warning_penalty: 5.0,
            weights: CategoryWeights::default(),
            thresholds: RiskThresholds::default(),
        }
    }
}

impl ScoreConfig {
    pub fn validate(&self) -> Result<(), ScoreConfigError> {
        if self.critical_penalty < 0.0 || self.warning_penalty < 0.0 {
            return Err(ScoreConfigError::NegativePenalty);
        }
        let total = self.weights.total();
        if (total - 100.0).abs() > 0.01 {
            return Err(ScoreConfigError::WeightsSum { total });
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone)]
pub enum ScoreConfigError {
    #[error("severity penalties must not be negative")]
    NegativePenalty,
    #[error("category weights must sum to 100 (got {total})")]
    WeightsSum { total: f32 },
}

/// Per-category contribution to the weighted risk estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: Category,
    /// 0–100 compliance sub-score for this category alone.
    pub score: f32,
    pub weight: f32,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

/// Weighted risk estimate over all categories; higher means riskier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEstimate {
    pub risk: f32,
    pub band: RiskBand,
}

/// Aggregated outcome of one scan. Computed once from the complete finding
/// set and read-only afterward; the score is always derivable purely from
/// the findings list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub url: String,
    pub findings: Vec<Finding>,
    /// 0–100 aggregate compliance score.
    pub score: f32,
    pub risk: RiskEstimate,
    pub category_scores: Vec<CategoryScore>,
}

/// Pure scoring function: same findings in, same result out. No I/O.
pub fn aggregate(
    scan_id: String,
    url: String,
    mut findings: Vec<Finding>,
    config: &ScoreConfig,
) -> ScanResult {
    findings.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.page_url.cmp(&b.page_url))
    });

    let score = overall_score(&findings, config);
    let category_scores = category_scores(&findings, config);

    let weighted_compliance: f32 = category_scores
        .iter()
        .map(|cs| cs.score * cs.weight / 100.0)
        .sum();
    let risk = (100.0 - weighted_compliance).clamp(0.0, 100.0);

    ScanResult {
        scan_id,
        url,
        findings,
        score,
        risk: RiskEstimate {
            risk,
            band: RiskBand::from_risk(risk, &config.thresholds),
        },
        category_scores,
    }
}

fn penalty(findings: &[Finding], config: &ScoreConfig) -> f32 {
    findings
        .iter()
        .map(|finding| match finding.severity {
            Severity::Critical => config.critical_penalty,
            Severity::Warning => config.warning_penalty,
            Severity::Info => 0.0,
        })
        .sum()
}

fn overall_score(findings: &[Finding], config: &ScoreConfig) -> f32 {
    (100.0 - penalty(findings, config)).max(0.0)
}

fn category_scores(findings: &[Finding], config: &ScoreConfig) -> Vec<CategoryScore> {
    let mut by_category: BTreeMap<&'static str, (Category, Vec<&Finding>)> = BTreeMap::new();
    for finding in findings {
        if config.weights.for_category(finding.category).is_some() {
            by_category
                .entry(category_key(finding.category))
                .or_insert_with(|| (finding.category, Vec::new()))
                .1
                .push(finding);
        }
    }

    let mut scores = Vec::new();
    for weighted in [
        Category::PrivacyPolicy,
        Category::Accessibility,
        Category::CookieConsent,
        Category::LegalNotice,
    ] {
        let weight = config
            .weights
            .for_category(weighted)
            .unwrap_or_default();
        let members = by_category
            .get(category_key(weighted))
            .map(|(_, list)| list.as_slice())
            .unwrap_or(&[]);
        let penalty: f32 = members
            .iter()
            .map(|finding| match finding.severity {
                Severity::Critical => config.critical_penalty,
                Severity::Warning => config.warning_penalty,
                Severity::Info => 0.0,
            })
            .sum();
        scores.push(CategoryScore {
            category: weighted,
            score: (100.0 - penalty).max(0.0),
            weight,
            critical: count(members, Severity::Critical),
            warning: count(members, Severity::Warning),
            info: count(members, Severity::Info),
        });
    }
    scores
}

fn category_key(category: Category) -> &'static str {
    match category {
        Category::LegalNotice => "legal-notice",
        Category::PrivacyPolicy => "privacy-policy",
        Category::CookieConsent => "cookie-consent",
        Category::Accessibility => "accessibility",
        Category::Unreachable => "unreachable",
        Category::CheckFailed => "check-failed",
    }
}

fn count(findings: &[&Finding], severity: Severity) -> usize {
    findings
        .iter()
        .filter(|finding| finding.severity == severity)
        .count()
}
