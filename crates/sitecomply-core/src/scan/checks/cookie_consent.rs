use anyhow::Result as AnyResult;
use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use scraper::Html;
use serde::{Deserialize, Serialize};

use super::selector;
use crate::fetch::RenderedDocument;
use crate::scan::{Category, Check, CheckKind, Finding, Severity, SiteContext};

/// Markers left in the DOM by the common consent-management platforms.
const CMP_MARKERS: &[&str] = &[
    "cookiebot",
    "usercentrics",
    "onetrust",
    "borlabs-cookie",
    "klaro",
    "cookieconsent",
    "osano",
    "didomi",
    "complianz",
    "cookie-banner",
    "consent-banner",
    "cc-window",
];

static CMP_AUTOMATON: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(CMP_MARKERS)
        .expect("static CMP marker set must compile")
});

/// Consent categories cookie-setting scripts fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieCategory {
    Necessary,
    Functional,
    Analytics,
    Marketing,
}

/// Built-in host/marker table mapping known script sources to a consent
/// category; extendable through configuration upstream.
const SCRIPT_TABLE: &[(&str, CookieCategory)] = &[
    ("google-analytics.com", CookieCategory::Analytics),
    ("googletagmanager.com", CookieCategory::Analytics),
    ("gtag(", CookieCategory::Analytics),
    ("matomo", CookieCategory::Analytics),
    ("plausible.io", CookieCategory::Analytics),
    ("hotjar.com", CookieCategory::Analytics),
    ("fbevents.js", CookieCategory::Marketing),
    ("connect.facebook.net", CookieCategory::Marketing),
    ("doubleclick.net", CookieCategory::Marketing),
    ("googlesyndication.com", CookieCategory::Marketing),
    ("criteo.com", CookieCategory::Marketing),
    ("taboola.com", CookieCategory::Marketing),
    ("snap.licdn.com", CookieCategory::Marketing),
    ("youtube.com/embed", CookieCategory::Functional),
    ("maps.googleapis.com", CookieCategory::Functional),
    ("vimeo.com", CookieCategory::Functional),
];

/// Detects a consent banner/CMP and categorizes cookie-setting scripts.
/// Tracking scripts without a banner are a critical finding.
#[derive(Debug, Default)]
pub struct CookieConsentCheck;

impl Check for CookieConsentCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::CookieConsent
    }

    fn run(&self, doc: &RenderedDocument, _ctx: &SiteContext) -> AnyResult<Vec<Finding>> {
        let document = Html::parse_document(&doc.html);
        let mut findings = Vec::new();

        let banner_present = CMP_AUTOMATON.is_match(&doc.html);
        let categorized = categorize_scripts(&document);

        let tracking: Vec<&CategorizedScript> = categorized
            .iter()
            .filter(|script| {
                matches!(
                    script.category,
                    CookieCategory::Analytics | CookieCategory::Marketing
                )
            })
            .collect();

        if !banner_present && !tracking.is_empty() {
            findings.push(
                Finding::new(
                    "COOKIE_BANNER_MISSING",
                    Category::CookieConsent,
                    Severity::Critical,
                    &doc.url,
                    format!(
                        "{} tracking script(s) load without a detectable consent banner",
                        tracking.len()
                    ),
                )
                .with_selector("script")
                .with_evidence(
                    tracking
                        .iter()
                        .map(|script| script.source.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
            );
        } else if !banner_present && !categorized.is_empty() {
            findings.push(Finding::new(
                "COOKIE_BANNER_ABSENT",
                Category::CookieConsent,
                Severity::Warning,
                &doc.url,
                "Third-party scripts load and no consent banner was detected",
            ));
        }

        if banner_present && !categorized.is_empty() {
            let mut summary: Vec<String> = Vec::new();
            for category in [
                CookieCategory::Necessary,
                CookieCategory::Functional,
                CookieCategory::Analytics,
                CookieCategory::Marketing,
            ] {
                let count = categorized
                    .iter()
                    .filter(|script| script.category == category)
                    .count();
                if count > 0 {
                    summary.push(format!("{category:?}: {count}").to_lowercase());
                }
            }
            findings.push(
                Finding::new(
                    "COOKIE_SCRIPTS_CATEGORIZED",
                    Category::CookieConsent,
                    Severity::Info,
                    &doc.url,
                    format!("Consent banner present; script categories: {}", summary.join(", ")),
                ),
            );
        }

        let unknown = unknown_third_party_scripts(&document, &categorized);
        if !unknown.is_empty() {
            findings.push(
                Finding::new(
                    "COOKIE_SCRIPTS_UNCATEGORIZED",
                    Category::CookieConsent,
                    Severity::Info,
                    &doc.url,
                    format!(
                        "{} third-party script(s) could not be categorized and default to functional",
                        unknown.len()
                    ),
                )
                .with_evidence(unknown.join(", ")),
            );
        }

        Ok(findings)
    }
}

#[derive(Debug)]
struct CategorizedScript {
    source: String,
    category: CookieCategory,
}

fn categorize_scripts(document: &Html) -> Vec<CategorizedScript> {
    let scripts = selector("script");
    let mut categorized = Vec::new();
    for script in document.select(&scripts) {
        let src = script.value().attr("src").unwrap_or_default().to_string();
        let inline = script.inner_html();
        let haystack = format!("{} {}", src.to_lowercase(), inline.to_lowercase());
        for (marker, category) in SCRIPT_TABLE {
            if haystack.contains(marker) {
                let source = if src.is_empty() {
                    (*marker).to_string()
                } else {
                    src.clone()
                };
                categorized.push(CategorizedScript {
                    source,
                    category: *category,
                });
                break;
            }
        }
    }
    categorized
}

fn unknown_third_party_scripts(
    document: &Html,
    categorized: &[CategorizedScript],
) -> Vec<String> {
    let scripts = selector("script[src]");
    document
        .select(&scripts)
        .filter_map(|script| script.value().attr("src"))
        .filter(|src| src.starts_with("http"))
        .filter(|src| {
            !categorized
                .iter()
                .any(|known| known.source == *src)
                && !CMP_AUTOMATON.is_match(src)
        })
        .map(|src| src.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::checks::test_support::{ctx, doc};

    #[test]
    fn tracking_without_banner_is_critical() {
        let page = doc(
            "https://example.test/",
            r#"<html><body><script src="https://www.googletagmanager.com/gtag/js"></script></body></html>"#,
        );
        let findings = CookieConsentCheck.run(&page, &ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "COOKIE_BANNER_MISSING");
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(findings[0]
            .evidence
            .as_deref()
            .unwrap()
            .contains("googletagmanager"));
    }

    #[test]
    fn banner_with_tracking_categorizes_scripts() {
        let page = doc(
            "https://example.test/",
            r#"<html><body><div id="cookiebot"></div>
               <script src="https://www.google-analytics.com/analytics.js"></script>
               <script src="https://connect.facebook.net/en_US/fbevents.js"></script>
               </body></html>"#,
        );
        let findings = CookieConsentCheck.run(&page, &ctx()).unwrap();
        let info = findings
            .iter()
            .find(|f| f.id == "COOKIE_SCRIPTS_CATEGORIZED")
            .unwrap();
        assert!(info.description.contains("analytics: 1"));
        assert!(info.description.contains("marketing: 1"));
        assert!(!findings.iter().any(|f| f.id == "COOKIE_BANNER_MISSING"));
    }

    #[test]
    fn page_without_scripts_is_silent() {
        let page = doc(
            "https://example.test/",
            "<html><body><main><h1>Plain page</h1></main></body></html>",
        );
        assert!(CookieConsentCheck.run(&page, &ctx()).unwrap().is_empty());
    }

    #[test]
    fn unknown_scripts_default_to_functional_note() {
        let page = doc(
            "https://example.test/",
            r#"<html><body><div class="consent-banner"></div>
               <script src="https://cdn.widgets.example/widget.js"></script></body></html>"#,
        );
        let findings = CookieConsentCheck.run(&page, &ctx()).unwrap();
        let note = findings
            .iter()
            .find(|f| f.id == "COOKIE_SCRIPTS_UNCATEGORIZED")
            .unwrap();
        assert!(note.evidence.as_deref().unwrap().contains("cdn.widgets.example"));
    }

    #[test]
    fn functional_only_scripts_without_banner_warns() {
        let page = doc(
            "https://example.test/",
            r#"<html><body><iframe></iframe><script src="https://player.vimeo.com/api/player.js"></script></body></html>"#,
        );
        let findings = CookieConsentCheck.run(&page, &ctx()).unwrap();
        assert_eq!(findings[0].id, "COOKIE_BANNER_ABSENT");
        assert_eq!(findings[0].severity, Severity::Warning);
    }
}
