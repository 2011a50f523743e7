use anyhow::Result as AnyResult;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

use super::{document_text, has_link_matching, selector};
use crate::fetch::RenderedDocument;
use crate::scan::{Category, Check, CheckKind, Finding, Severity, SiteContext};

/// Link or heading tokens that identify a legal notice page.
const NOTICE_TOKENS: &[&str] = &["impressum", "imprint", "legal-notice", "legal notice", "mentions-legales", "mentions légales"];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+|00)\d{1,3}[\s\-/.]?\d|(?:tel|phone|telefon)[.:]*\s*[+\d]").unwrap());
static POSTAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4,5}\b").unwrap());
static COMPANY_FORM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(gmbh|ug|ag|kg|ohg|gbr|e\.?\s?k\.?|ltd|llc|inc|s\.?a\.?r\.?l|b\.?v\.?)\b").unwrap()
});

/// Checks that a legal notice (imprint) is present and, when the scanned
/// page itself is the notice, that the mandatory contact fields appear.
#[derive(Debug, Default)]
pub struct LegalNoticeCheck;

impl Check for LegalNoticeCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::LegalNotice
    }

    fn run(&self, doc: &RenderedDocument, _ctx: &SiteContext) -> AnyResult<Vec<Finding>> {
        let document = Html::parse_document(&doc.html);
        let mut findings = Vec::new();

        let linked = has_link_matching(&document, NOTICE_TOKENS);
        let is_notice_page = page_is_notice(&document);

        if linked.is_none() && !is_notice_page {
            findings.push(
                Finding::new(
                    "LEGAL_NOTICE_MISSING",
                    Category::LegalNotice,
                    Severity::Critical,
                    &doc.url,
                    "No legal notice (imprint) link or section was found on the page",
                )
                .with_selector("a[href]"),
            );
            return Ok(findings);
        }

        if is_notice_page {
            let text = document_text(&document);
            let mut missing = Vec::new();
            if !COMPANY_FORM_RE.is_match(&text) {
                missing.push("provider name with legal form");
            }
            if !POSTAL_RE.is_match(&text) {
                missing.push("postal address");
            }
            if !EMAIL_RE.is_match(&text) {
                missing.push("contact email");
            }
            if !PHONE_RE.is_match(&text) {
                missing.push("phone number");
            }
            if !missing.is_empty() {
                findings.push(
                    Finding::new(
                        "LEGAL_NOTICE_INCOMPLETE",
                        Category::LegalNotice,
                        Severity::Warning,
                        &doc.url,
                        format!("Legal notice is missing: {}", missing.join(", ")),
                    )
                    .with_evidence(text.chars().take(160).collect::<String>()),
                );
            }
        }

        Ok(findings)
    }
}

fn page_is_notice(document: &Html) -> bool {
    let headings = selector("h1, h2, title");
    document.select(&headings).any(|heading| {
        let text = super::collapsed_text(heading).to_lowercase();
        NOTICE_TOKENS.iter().any(|token| text.contains(token))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::checks::test_support::{ctx, doc};

    #[test]
    fn missing_notice_is_critical() {
        let page = doc(
            "https://example.test/",
            "<html><body><main><h1>Shop</h1><a href=\"/products\">Products</a></main></body></html>",
        );
        let findings = LegalNoticeCheck.run(&page, &ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "LEGAL_NOTICE_MISSING");
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].page_url, "https://example.test/");
    }

    #[test]
    fn linked_notice_passes() {
        let page = doc(
            "https://example.test/",
            "<html><body><footer><a href=\"/impressum\">Impressum</a></footer></body></html>",
        );
        let findings = LegalNoticeCheck.run(&page, &ctx()).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn incomplete_notice_page_warns_with_missing_fields() {
        let page = doc(
            "https://example.test/impressum",
            "<html><body><h1>Impressum</h1><p>Example Shop GmbH, Musterstraße 1</p></body></html>",
        );
        let findings = LegalNoticeCheck.run(&page, &ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "LEGAL_NOTICE_INCOMPLETE");
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].description.contains("contact email"));
    }

    #[test]
    fn complete_notice_page_passes() {
        let page = doc(
            "https://example.test/impressum",
            "<html><body><h1>Imprint</h1><p>Example Shop GmbH</p>\
             <p>Musterstraße 1, 10115 Berlin</p>\
             <p>Tel: +49 30 1234567</p><p>mail@example.test</p></body></html>",
        );
        let findings = LegalNoticeCheck.run(&page, &ctx()).unwrap();
        assert!(findings.is_empty(), "{findings:?}");
    }
}
