use scraper::{ElementRef, Html, Selector};

use super::{Check, CheckKind, CheckSet};

pub mod accessibility;
pub mod cookie_consent;
pub mod legal_notice;
pub mod privacy_policy;

pub use accessibility::AccessibilityCheck;
pub use cookie_consent::CookieConsentCheck;
pub use legal_notice::LegalNoticeCheck;
pub use privacy_policy::PrivacyPolicyCheck;

/// Instantiate the checks selected for a scan, in a stable order.
pub fn build(set: &CheckSet) -> Vec<Box<dyn Check>> {
    let mut checks: Vec<Box<dyn Check>> = Vec::new();
    for kind in set.kinds() {
        match kind {
            CheckKind::LegalNotice => checks.push(Box::new(LegalNoticeCheck::default())),
            CheckKind::PrivacyPolicy => checks.push(Box::new(PrivacyPolicyCheck::default())),
            CheckKind::CookieConsent => checks.push(Box::new(CookieConsentCheck::default())),
            CheckKind::Accessibility => checks.push(Box::new(AccessibilityCheck::default())),
        }
    }
    checks
}

pub(crate) fn selector(src: &str) -> Selector {
    Selector::parse(src).expect("static selector must parse")
}

/// Visible text of an element with whitespace collapsed.
pub(crate) fn collapsed_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|part| part.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-document text, lowercased, for keyword probes.
pub(crate) fn document_text(document: &Html) -> String {
    document
        .root_element()
        .text()
        .flat_map(|part| part.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// True when any anchor's href or link text matches one of the needles.
pub(crate) fn has_link_matching(document: &Html, needles: &[&str]) -> Option<String> {
    let anchors = selector("a[href]");
    for anchor in document.select(&anchors) {
        let href = anchor.value().attr("href").unwrap_or_default().to_lowercase();
        let text = collapsed_text(anchor).to_lowercase();
        for needle in needles {
            if href.contains(needle) || text.contains(needle) {
                return Some(anchor.value().attr("href").unwrap_or_default().to_string());
            }
        }
    }
    None
}

/// Short opening-tag snippet usable as finding evidence.
pub(crate) fn element_snippet(element: ElementRef<'_>) -> String {
    let html = element.html();
    match html.find('>') {
        Some(idx) => html[..=idx].to_string(),
        None => html,
    }
}
