use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use scraper::Html;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use super::checks;
use super::{CancelToken, Category, Check, CheckKind, Finding, ScanError, ScanRequest, Severity, SiteContext};
use crate::fetch::{self, Fetch, FetchError, RenderPool};
use crate::score::{self, ScanResult, ScoreConfig};

/// Finding ids that describe the site as a whole; repeated occurrences on
/// further pages are dropped so multi-page scans do not multiply them.
const SITE_SCOPE_IDS: &[&str] = &[
    "LEGAL_NOTICE_MISSING",
    "PRIVACY_POLICY_MISSING",
    "COOKIE_BANNER_MISSING",
    "COOKIE_BANNER_ABSENT",
];

/// Drives one scan: fetch, rendering-strategy resolution, check execution
/// with isolate-and-continue semantics, and atomic scoring over the
/// complete finding set.
pub struct ScanPipeline {
    fetcher: Arc<dyn Fetch>,
    renderer: RenderPool,
    score: ScoreConfig,
}

impl ScanPipeline {
    pub fn new(fetcher: Arc<dyn Fetch>, renderer: RenderPool) -> Self {
        Self {
            fetcher,
            renderer,
            score: ScoreConfig::default(),
        }
    }

    pub fn with_score_config(mut self, score: ScoreConfig) -> Self {
        self.score = score;
        self
    }

    #[instrument(name = "scan", skip(self, request, cancel), fields(url = %request.url, max_pages = request.max_pages))]
    pub async fn run(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
    ) -> Result<ScanResult, ScanError> {
        let base = url::Url::parse(&request.url).map_err(|err| ScanError::InvalidUrl {
            url: request.url.clone(),
            message: err.to_string(),
        })?;
        let ctx = SiteContext::from_url(&request.url).ok_or_else(|| ScanError::InvalidUrl {
            url: request.url.clone(),
            message: "URL has no host".into(),
        })?;

        let checks = checks::build(&request.checks);
        let mut findings: Vec<Finding> = Vec::new();
        let mut queue: VecDeque<String> = VecDeque::from([request.url.clone()]);
        let mut scanned = 0usize;

        while let Some(page_url) = queue.pop_front() {
            if scanned >= request.max_pages {
                break;
            }
            ensure_active(cancel)?;

            let page = match self.fetcher.fetch(&page_url).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(url = %page_url, error = %err, "page unreachable, continuing scan");
                    findings.push(unreachable_finding(&page_url, &err));
                    scanned += 1;
                    continue;
                }
            };
            ensure_active(cancel)?;

            if scanned == 0 && request.max_pages > 1 {
                for link in discover_links(&page.html, &base, request.max_pages - 1) {
                    queue.push_back(link);
                }
            }

            let (document, render_error) = fetch::resolve_document(page, &self.renderer).await;
            ensure_active(cancel)?;
            debug!(url = %document.url, method = ?document.method, reason = %document.decision.reason, "document resolved");
            if let Some(err) = render_error {
                findings.push(
                    Finding::new(
                        "RENDER_UNAVAILABLE",
                        Category::Unreachable,
                        Severity::Info,
                        &document.url,
                        format!("Full render required but unavailable, scanned lightweight HTML ({err})"),
                    ),
                );
            }

            for check in &checks {
                match check.run(&document, &ctx) {
                    Ok(mut found) => {
                        for finding in &found {
                            if let Err(err) = finding.validate() {
                                warn!(check = check.kind().name(), error = %err, "dropping invalid finding");
                            }
                        }
                        found.retain(|finding| finding.validate().is_ok());
                        findings.append(&mut found);
                    }
                    Err(err) => {
                        warn!(check = check.kind().name(), url = %document.url, error = %err, "check failed, continuing");
                        findings.push(check_failed_finding(check.kind(), &document.url, &err));
                    }
                }
            }
            scanned += 1;
        }

        ensure_active(cancel)?;
        let findings = dedupe_site_scope(findings);
        let scan_id = scan_id(&request.url);
        debug!(%scan_id, findings = findings.len(), pages = scanned, "scan complete, scoring");
        Ok(score::aggregate(
            scan_id,
            request.url.clone(),
            findings,
            &self.score,
        ))
    }
}

fn ensure_active(cancel: &CancelToken) -> Result<(), ScanError> {
    if cancel.is_cancelled() {
        return Err(ScanError::Cancelled);
    }
    Ok(())
}

fn unreachable_finding(url: &str, error: &FetchError) -> Finding {
    Finding::new(
        "PAGE_UNREACHABLE",
        Category::Unreachable,
        Severity::Warning,
        url,
        "Page could not be fetched",
    )
    .with_evidence(error.to_string())
}

fn check_failed_finding(kind: CheckKind, url: &str, error: &anyhow::Error) -> Finding {
    Finding::new(
        "CHECK_FAILED",
        Category::CheckFailed,
        Severity::Info,
        url,
        format!("Check `{}` failed and was skipped", kind.name()),
    )
    .with_evidence(format!("{error:#}"))
}

/// Same-host links from the first page, fragment-stripped and
/// de-duplicated, capped to the remaining page budget.
fn discover_links(html: &str, base: &url::Url, cap: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchors = checks::selector("a[href]");
    let mut links = Vec::new();
    for anchor in document.select(&anchors) {
        if links.len() >= cap {
            break;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href.starts_with("mailto:") || href.starts_with("tel:") || href.starts_with('#') {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        if resolved.host_str() != base.host_str() {
            continue;
        }
        let resolved = resolved.to_string();
        if resolved == base.as_str() || links.contains(&resolved) {
            continue;
        }
        links.push(resolved);
    }
    links
}

fn dedupe_site_scope(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen: Vec<&'static str> = Vec::new();
    let mut result = Vec::with_capacity(findings.len());
    for finding in findings {
        if let Some(id) = SITE_SCOPE_IDS.iter().find(|id| **id == finding.id) {
            if seen.contains(id) {
                continue;
            }
            seen.push(id);
        }
        result.push(finding);
    }
    result
}

fn scan_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    hex::encode(hasher.finalize())[..12].to_string()
}
