use anyhow::Result as AnyResult;
use scraper::Html;

use super::{collapsed_text, document_text, has_link_matching, selector};
use crate::fetch::RenderedDocument;
use crate::scan::{Category, Check, CheckKind, Finding, Severity, SiteContext};

const POLICY_TOKENS: &[&str] = &[
    "privacy-policy",
    "privacy policy",
    "datenschutz",
    "privacy",
    "politique de confidentialité",
];

/// Sections a complete privacy policy must address, probed by keyword
/// groups (any keyword of a group satisfies the section).
const REQUIRED_SECTIONS: &[(&str, &[&str])] = &[
    ("controller identity", &["controller", "verantwortlich", "responsible for"]),
    ("processing purposes", &["purpose", "zweck", "we use your"]),
    ("data subject rights", &["right to access", "right of access", "auskunft", "erasure", "löschung", "your rights"]),
    ("retention period", &["retention", "speicherdauer", "how long"]),
    ("third-party disclosure", &["third part", "dritte", "share your"]),
];

/// Checks that a privacy policy is reachable and, on the policy page
/// itself, that the GDPR-mandated sections are addressed.
#[derive(Debug, Default)]
pub struct PrivacyPolicyCheck;

impl Check for PrivacyPolicyCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::PrivacyPolicy
    }

    fn run(&self, doc: &RenderedDocument, _ctx: &SiteContext) -> AnyResult<Vec<Finding>> {
        let document = Html::parse_document(&doc.html);
        let mut findings = Vec::new();

        let linked = has_link_matching(&document, POLICY_TOKENS);
        let is_policy_page = page_is_policy(&document);

        if linked.is_none() && !is_policy_page {
            findings.push(
                Finding::new(
                    "PRIVACY_POLICY_MISSING",
                    Category::PrivacyPolicy,
                    Severity::Critical,
                    &doc.url,
                    "No privacy policy link or section was found on the page",
                )
                .with_selector("a[href]"),
            );
            return Ok(findings);
        }

        if is_policy_page {
            let text = document_text(&document);
            let missing: Vec<&str> = REQUIRED_SECTIONS
                .iter()
                .filter(|(_, keywords)| !keywords.iter().any(|kw| text.contains(kw)))
                .map(|(section, _)| *section)
                .collect();
            if !missing.is_empty() {
                findings.push(
                    Finding::new(
                        "PRIVACY_POLICY_INCOMPLETE",
                        Category::PrivacyPolicy,
                        Severity::Warning,
                        &doc.url,
                        format!("Privacy policy does not address: {}", missing.join(", ")),
                    )
                    .with_evidence(text.chars().take(160).collect::<String>()),
                );
            }
        }

        Ok(findings)
    }
}

fn page_is_policy(document: &Html) -> bool {
    let headings = selector("h1, h2, title");
    document.select(&headings).any(|heading| {
        let text = collapsed_text(heading).to_lowercase();
        POLICY_TOKENS.iter().any(|token| text.contains(token))
    })
}
