use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::fetch::RenderedDocument;

pub mod checks;
pub mod pipeline;

/// Compliance categories a finding can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    LegalNotice,
    PrivacyPolicy,
    CookieConsent,
    Accessibility,
    Unreachable,
    CheckFailed,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::LegalNotice => "legal-notice",
            Category::PrivacyPolicy => "privacy-policy",
            Category::CookieConsent => "cookie-consent",
            Category::Accessibility => "accessibility",
            Category::Unreachable => "unreachable",
            Category::CheckFailed => "check-failed",
        };
        f.write_str(label)
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legal-notice" | "legal_notice" | "imprint" => Ok(Category::LegalNotice),
            "privacy-policy" | "privacy_policy" | "privacy" => Ok(Category::PrivacyPolicy),
            "cookie-consent" | "cookie_consent" | "consent" => Ok(Category::CookieConsent),
            "accessibility" | "a11y" => Ok(Category::Accessibility),
            other => Err(format!("unknown category `{other}`")),
        }
    }
}

/// Severity levels ordered from most to least serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// A single detected compliance issue. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Stable identifier of the detection (e.g. `LEGAL_NOTICE_MISSING`).
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub page_url: String,
    /// CSS-selector-style locator of the offending element, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub description: String,
    /// Evidence snippet captured from the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl Finding {
    pub fn new(
        id: impl Into<String>,
        category: Category,
        severity: Severity,
        page_url: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            severity,
            page_url: page_url.into(),
            selector: None,
            description: description.into(),
            evidence: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(truncate_evidence(evidence.into()));
        self
    }

    /// Validate invariants before a finding enters a result set.
    pub fn validate(&self) -> Result<(), FindingValidationError> {
        if self.id.trim().is_empty() {
            return Err(FindingValidationError::EmptyId);
        }
        if self.page_url.trim().is_empty() {
            return Err(FindingValidationError::EmptyPageUrl {
                finding_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

const MAX_EVIDENCE_CHARS: usize = 240;

fn truncate_evidence(evidence: String) -> String {
    if evidence.chars().count() <= MAX_EVIDENCE_CHARS {
        return evidence;
    }
    evidence.chars().take(MAX_EVIDENCE_CHARS).collect::<String>() + "…"
}

/// Validation errors for findings emitted by checks.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingValidationError {
    #[error("finding id must not be blank")]
    EmptyId,
    #[error("finding `{finding_id}` must reference a page URL")]
    EmptyPageUrl { finding_id: String },
}

/// The checks a scan should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    LegalNotice,
    PrivacyPolicy,
    CookieConsent,
    Accessibility,
}

impl CheckKind {
    pub const ALL: [CheckKind; 4] = [
        CheckKind::LegalNotice,
        CheckKind::PrivacyPolicy,
        CheckKind::CookieConsent,
        CheckKind::Accessibility,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::LegalNotice => "legal-notice",
            CheckKind::PrivacyPolicy => "privacy-policy",
            CheckKind::CookieConsent => "cookie-consent",
            CheckKind::Accessibility => "accessibility",
        }
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legal-notice" | "legal_notice" => Ok(CheckKind::LegalNotice),
            "privacy-policy" | "privacy_policy" => Ok(CheckKind::PrivacyPolicy),
            "cookie-consent" | "cookie_consent" => Ok(CheckKind::CookieConsent),
            "accessibility" | "a11y" => Ok(CheckKind::Accessibility),
            other => Err(format!("unknown check `{other}`")),
        }
    }
}

/// Ordered, de-duplicated set of checks for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSet(Vec<CheckKind>);

impl CheckSet {
    pub fn all() -> Self {
        Self(CheckKind::ALL.to_vec())
    }

    pub fn of(kinds: impl IntoIterator<Item = CheckKind>) -> Self {
        let mut seen = Vec::new();
        for kind in kinds {
            if !seen.contains(&kind) {
                seen.push(kind);
            }
        }
        Self(seen)
    }

    pub fn contains(&self, kind: CheckKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn kinds(&self) -> &[CheckKind] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CheckSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for CheckSet {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let kinds = value
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(CheckKind::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if kinds.is_empty() {
            return Err("check set must name at least one check".into());
        }
        Ok(Self::of(kinds))
    }
}

/// A user-initiated scan. Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub url: String,
    #[serde(default)]
    pub checks: CheckSet,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_max_pages() -> usize {
    1
}

impl ScanRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            checks: CheckSet::all(),
            max_pages: 1,
        }
    }

    pub fn with_checks(mut self, checks: CheckSet) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

/// The minimal site description shared by checks and the fix pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteContext {
    pub site_name: String,
    pub host: String,
    pub locale: String,
}

impl SiteContext {
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_string();
        Some(Self {
            site_name: host.clone(),
            host,
            locale: "en".to_string(),
        })
    }

    /// Stable short hash used in cache keys so entries never leak raw
    /// site identifiers.
    pub fn context_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.site_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.host.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.locale.as_bytes());
        hex::encode(hasher.finalize())[..16].to_string()
    }
}

/// A single pluggable compliance check. Implementations must be pure over
/// the rendered document and must not perform I/O.
pub trait Check: Send + Sync {
    fn kind(&self) -> CheckKind;

    fn run(&self, doc: &RenderedDocument, ctx: &SiteContext) -> AnyResult<Vec<Finding>>;
}

/// Cooperative cancellation flag checked at every suspension point of a
/// running scan.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Errors that abort a scan entirely. Per-page and per-check failures are
/// converted into findings instead.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan was cancelled by the caller")]
    Cancelled,
    #[error("`{url}` is not a scannable URL: {message}")]
    InvalidUrl { url: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finding_validation_rejects_blank_id() {
        let finding = Finding::new(" ", Category::LegalNotice, Severity::Critical, "https://x/", "d");
        assert!(matches!(
            finding.validate(),
            Err(FindingValidationError::EmptyId)
        ));
    }

    #[test]
    fn evidence_is_truncated() {
        let long = "a".repeat(500);
        let finding = Finding::new(
            "X",
            Category::Accessibility,
            Severity::Info,
            "https://x/",
            "d",
        )
        .with_evidence(long);
        let evidence = finding.evidence.unwrap();
        assert!(evidence.chars().count() <= MAX_EVIDENCE_CHARS + 1);
        assert!(evidence.ends_with('…'));
    }

    #[test]
    fn check_set_parses_and_dedupes() {
        let set: CheckSet = "cookie-consent, accessibility,cookie-consent".parse().unwrap();
        assert_eq!(
            set.kinds(),
            &[CheckKind::CookieConsent, CheckKind::Accessibility]
        );
    }

    #[test]
    fn check_set_rejects_unknown_names() {
        let err = "cookie-consent,seo".parse::<CheckSet>().unwrap_err();
        assert!(err.contains("unknown check"));
    }

    #[test]
    fn site_context_hash_is_stable_and_short() {
        let ctx = SiteContext::from_url("https://shop.example.test/products").unwrap();
        assert_eq!(ctx.host, "shop.example.test");
        let hash = ctx.context_hash();
        assert_eq!(hash.len(), 16);
        assert_eq!(hash, ctx.context_hash());
    }

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }
}
