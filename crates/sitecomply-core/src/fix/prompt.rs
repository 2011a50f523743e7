use std::fmt::Write;

use super::handlers::Handler;
use super::FixRequest;
use crate::cache::DocumentType;
use crate::provider::GenerationRequest;

const MAX_OUTPUT_TOKENS: u32 = 800;
const TEMPERATURE: f32 = 0.2;

/// Builds the structured generation request for a handler: target schema,
/// explicit constraints and the minimal site context the handler strictly
/// requires. Never embeds secrets or unrelated site data.
pub struct PromptBuilder<'a> {
    mandatory_keywords: &'a [String],
}

impl<'a> PromptBuilder<'a> {
    pub fn new(mandatory_keywords: &'a [String]) -> Self {
        Self { mandatory_keywords }
    }

    pub fn build(&self, handler: &Handler, request: &FixRequest) -> GenerationRequest {
        GenerationRequest {
            system: self.system_prompt(handler),
            prompt: self.user_prompt(handler, request),
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        }
    }

    fn system_prompt(&self, handler: &Handler) -> String {
        let role = match handler {
            Handler::LegalText { .. } => {
                "You are a website compliance assistant drafting legal boilerplate."
            }
            Handler::CookieConsent => {
                "You are a website compliance assistant configuring a consent widget."
            }
            Handler::Accessibility => {
                "You are a website compliance assistant fixing accessibility defects in markup."
            }
            Handler::GenericCode => {
                "You are a website compliance assistant writing small HTML snippets."
            }
            Handler::Guide => {
                "You are a website compliance assistant writing step-by-step remediation guides."
            }
        };
        format!(
            "{role} Respond with strict JSON matching exactly this shape: {schema}. \
             Do not wrap the JSON in markdown fences. Do not leave placeholder tokens \
             such as {{{{name}}}} or [INSERT ...] in any field.",
            schema = handler.schema_description()
        )
    }

    fn user_prompt(&self, handler: &Handler, request: &FixRequest) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Site: {}", request.site.site_name);
        let _ = writeln!(prompt, "Host: {}", request.site.host);
        let _ = writeln!(prompt, "Language: {}", request.locale);

        match handler {
            Handler::LegalText { document } => {
                let document_name = match document {
                    DocumentType::Imprint => "legal notice (imprint)",
                    DocumentType::PrivacyPolicy => "privacy policy",
                    DocumentType::CookiePolicy => "cookie policy",
                };
                let _ = writeln!(prompt, "Task: draft a complete {document_name} for this site.");
                if !self.mandatory_keywords.is_empty() {
                    let _ = writeln!(
                        prompt,
                        "The body must mention: {}.",
                        self.mandatory_keywords.join(", ")
                    );
                }
            }
            Handler::CookieConsent => {
                let _ = writeln!(
                    prompt,
                    "Task: produce a consent widget configuration. Always include the \
                     `necessary` category; add further categories only when justified by the finding."
                );
            }
            Handler::Accessibility => {
                let _ = writeln!(
                    prompt,
                    "Task: rewrite the offending markup so it satisfies the failed accessibility \
                     rule. Keep every semantic attribute (alt, role, aria-*) that the original has."
                );
            }
            Handler::GenericCode => {
                let _ = writeln!(
                    prompt,
                    "Task: write a minimal HTML snippet remediating the finding below."
                );
            }
            Handler::Guide => {
                let _ = writeln!(
                    prompt,
                    "Task: write a short remediation guide (3-6 concrete steps) for the finding below."
                );
            }
        }

        if let Some(finding) = &request.finding {
            let _ = writeln!(prompt, "Finding: {} — {}", finding.id, finding.description);
            if let Some(selector) = &finding.selector {
                let _ = writeln!(prompt, "Locator: {selector}");
            }
            if let Some(evidence) = &finding.evidence {
                let _ = writeln!(prompt, "Current markup: {evidence}");
            }
        } else {
            let _ = writeln!(prompt, "Finding category: {}", request.category);
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::ArtifactType;
    use crate::scan::{Category, Finding, Severity, SiteContext};

    fn site() -> SiteContext {
        SiteContext {
            site_name: "Example Shop".into(),
            host: "example.test".into(),
            locale: "de".into(),
        }
    }

    #[test]
    fn legal_prompt_names_schema_and_keywords() {
        let keywords = vec!["address".to_string(), "contact".to_string()];
        let builder = PromptBuilder::new(&keywords);
        let request = FixRequest::new(Category::LegalNotice, ArtifactType::LegalText, site())
            .with_locale("de");
        let handler = Handler::route(&request).unwrap();
        let generated = builder.build(&handler, &request);

        assert!(generated.system.contains(r#"{"title""#));
        assert!(generated.system.contains("strict JSON"));
        assert!(generated.prompt.contains("address, contact"));
        assert!(generated.prompt.contains("Language: de"));
    }

    #[test]
    fn prompt_carries_finding_details_but_only_site_basics() {
        let builder = PromptBuilder::new(&[]);
        let finding = Finding::new(
            "A11Y_IMG_ALT_MISSING",
            Category::Accessibility,
            Severity::Warning,
            "https://example.test/products",
            "Image without alt attribute",
        )
        .with_selector("img[src=\"/hero.png\"]")
        .with_evidence("<img src=\"/hero.png\">");
        let request = FixRequest::for_finding(finding, ArtifactType::Code, site());
        let handler = Handler::route(&request).unwrap();
        let generated = builder.build(&handler, &request);

        assert!(generated.prompt.contains("A11Y_IMG_ALT_MISSING"));
        assert!(generated.prompt.contains("<img src=\"/hero.png\">"));
        assert!(generated.prompt.contains("Site: Example Shop"));
        // Nothing beyond name/host/locale and the finding itself.
        assert!(!generated.prompt.to_lowercase().contains("api"));
    }

    #[test]
    fn category_substitutes_for_missing_finding() {
        let builder = PromptBuilder::new(&[]);
        let request = FixRequest::new(Category::CookieConsent, ArtifactType::Guide, site());
        let handler = Handler::route(&request).unwrap();
        let generated = builder.build(&handler, &request);
        assert!(generated.prompt.contains("Finding category: cookie-consent"));
    }
}
