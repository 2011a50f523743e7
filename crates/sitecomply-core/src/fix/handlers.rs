use serde::{Deserialize, Serialize};

use super::{ArtifactType, FixError, FixRequest};
use crate::cache::DocumentType;
use crate::scan::Category;

/// Closed set of remediation handlers. Routing is an exhaustive match, so
/// adding a category is a compile-time-checked extension rather than a
/// runtime lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "kebab-case")]
pub enum Handler {
    LegalText { document: DocumentType },
    CookieConsent,
    Accessibility,
    GenericCode,
    Guide,
}

impl Handler {
    /// Map a fix request's (category, artifact) pair onto a handler.
    pub fn route(request: &FixRequest) -> Result<Self, FixError> {
        let unsupported = || FixError::UnsupportedCategory {
            category: request.category,
            artifact: request.artifact,
        };
        match request.artifact {
            ArtifactType::LegalText => match request.category {
                Category::LegalNotice => Ok(Handler::LegalText {
                    document: DocumentType::Imprint,
                }),
                Category::PrivacyPolicy => Ok(Handler::LegalText {
                    document: DocumentType::PrivacyPolicy,
                }),
                Category::CookieConsent => Ok(Handler::LegalText {
                    document: DocumentType::CookiePolicy,
                }),
                _ => Err(unsupported()),
            },
            ArtifactType::WidgetConfig => match request.category {
                Category::CookieConsent => Ok(Handler::CookieConsent),
                _ => Err(unsupported()),
            },
            ArtifactType::Code => match request.category {
                Category::Accessibility => Ok(Handler::Accessibility),
                Category::LegalNotice | Category::PrivacyPolicy | Category::CookieConsent => {
                    Ok(Handler::GenericCode)
                }
                _ => Err(unsupported()),
            },
            ArtifactType::Guide => match request.category {
                Category::LegalNotice
                | Category::PrivacyPolicy
                | Category::CookieConsent
                | Category::Accessibility => Ok(Handler::Guide),
                _ => Err(unsupported()),
            },
        }
    }

    pub fn artifact(&self) -> ArtifactType {
        match self {
            Handler::LegalText { .. } => ArtifactType::LegalText,
            Handler::CookieConsent => ArtifactType::WidgetConfig,
            Handler::Accessibility | Handler::GenericCode => ArtifactType::Code,
            Handler::Guide => ArtifactType::Guide,
        }
    }

    /// Only legal text is backed by the authoritative cache.
    pub fn wants_cache(&self) -> Option<DocumentType> {
        match self {
            Handler::LegalText { document } => Some(*document),
            _ => None,
        }
    }

    /// White-labeling is mandatory for legal-text and cookie-consent
    /// artifacts regardless of source.
    pub fn requires_sanitizer(&self) -> bool {
        matches!(self, Handler::LegalText { .. } | Handler::CookieConsent)
    }

    /// JSON shape a provider response must parse into for this handler.
    pub fn schema_description(&self) -> &'static str {
        match self {
            Handler::LegalText { .. } => r#"{"title": "...", "body": "..."}"#,
            Handler::CookieConsent => {
                r#"{"position": "top|bottom", "categories": ["necessary", ...], "locale": "..."}"#
            }
            Handler::Accessibility | Handler::GenericCode => {
                r#"{"language": "html", "snippet": "..."}"#
            }
            Handler::Guide => r#"{"title": "...", "steps": ["...", ...]}"#,
        }
    }

    /// Deterministic non-AI fallback so a fix result is always producible.
    pub fn template(&self, request: &FixRequest) -> String {
        let site = &request.site;
        let name = if site.site_name.trim().is_empty() {
            site.host.clone()
        } else {
            site.site_name.clone()
        };
        match self {
            Handler::LegalText { document } => match document {
                DocumentType::Imprint => format!(
                    "Legal Notice\n\n\
                     Service provider: {name}.\n\
                     Responsible for the content of {host}: the service provider named above.\n\
                     Address: the registered business address of {name}, published on {host}.\n\
                     Contact: use the email address and phone number published on {host}.\n",
                    host = site.host
                ),
                DocumentType::PrivacyPolicy => format!(
                    "Privacy Policy\n\n\
                     The controller for {host} is {name}.\n\
                     We process personal data only to operate this website and to fulfil orders.\n\
                     You have the rights of access, rectification and erasure regarding your personal data.\n\
                     Data is retained no longer than legally required and is not shared with third parties without a legal basis.\n",
                    host = site.host
                ),
                DocumentType::CookiePolicy => format!(
                    "Cookie Policy\n\n\
                     {host} uses cookies. Strictly necessary cookies keep the site functional.\n\
                     All other cookies are set only after your consent and can be declined in the consent banner of {name}.\n",
                    host = site.host
                ),
            },
            Handler::CookieConsent => serde_json::to_string_pretty(&serde_json::json!({
                "position": "bottom",
                "categories": ["necessary", "functional", "analytics", "marketing"],
                "locale": request.locale,
                "blockUntilConsent": true,
                "siteName": name,
            }))
            .unwrap_or_default(),
            Handler::Accessibility => accessibility_template(request),
            Handler::GenericCode => {
                "<footer>\n  <nav aria-label=\"Legal\">\n    <a href=\"/imprint\">Legal Notice</a>\n    <a href=\"/privacy\">Privacy Policy</a>\n  </nav>\n</footer>\n"
                    .to_string()
            }
            Handler::Guide => {
                let topic = request.category.to_string();
                format!(
                    "# Remediation guide: {topic}\n\n\
                     1. Review the finding on the affected page and locate the element or section it names.\n\
                     2. Apply the change in your site templates, not in the rendered output.\n\
                     3. Redeploy and re-run the compliance scan for {host} to confirm the finding is gone.\n",
                    host = site.host
                )
            }
        }
    }
}

fn accessibility_template(request: &FixRequest) -> String {
    let finding_id = request
        .finding
        .as_ref()
        .map(|finding| finding.id.as_str())
        .unwrap_or_default();
    match finding_id {
        "A11Y_IMG_ALT_MISSING" => {
            "<img src=\"/images/product.jpg\" alt=\"Describe the image content here\">\n".to_string()
        }
        "A11Y_LANDMARK_MISSING" => {
            "<main role=\"main\">\n  <!-- move the primary page content inside this landmark -->\n</main>\n"
                .to_string()
        }
        "A11Y_CLICK_NOT_FOCUSABLE" | "A11Y_LINK_NOT_FOCUSABLE" => {
            "<button type=\"button\" aria-label=\"Action\">Action</button>\n".to_string()
        }
        _ => {
            "<main role=\"main\">\n  <h1>Page title</h1>\n  <img src=\"/images/hero.jpg\" alt=\"Describe the image\">\n</main>\n"
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{Finding, Severity, SiteContext};

    fn site() -> SiteContext {
        SiteContext {
            site_name: "Example Shop".into(),
            host: "example.test".into(),
            locale: "en".into(),
        }
    }

    #[test]
    fn routes_legal_text_by_category() {
        let request = FixRequest::new(Category::CookieConsent, ArtifactType::LegalText, site());
        assert_eq!(
            Handler::route(&request).unwrap(),
            Handler::LegalText {
                document: DocumentType::CookiePolicy
            }
        );
    }

    #[test]
    fn rejects_unsupported_combinations() {
        let request = FixRequest::new(Category::Accessibility, ArtifactType::WidgetConfig, site());
        assert!(matches!(
            Handler::route(&request),
            Err(FixError::UnsupportedCategory { .. })
        ));

        let request = FixRequest::new(Category::Unreachable, ArtifactType::Guide, site());
        assert!(Handler::route(&request).is_err());
    }

    #[test]
    fn only_legal_text_uses_cache() {
        let legal = Handler::LegalText {
            document: DocumentType::Imprint,
        };
        assert_eq!(legal.wants_cache(), Some(DocumentType::Imprint));
        assert_eq!(Handler::CookieConsent.wants_cache(), None);
        assert_eq!(Handler::Accessibility.wants_cache(), None);
    }

    #[test]
    fn sanitizer_applies_to_legal_and_consent_only() {
        assert!(Handler::LegalText {
            document: DocumentType::PrivacyPolicy
        }
        .requires_sanitizer());
        assert!(Handler::CookieConsent.requires_sanitizer());
        assert!(!Handler::Accessibility.requires_sanitizer());
        assert!(!Handler::Guide.requires_sanitizer());
    }

    #[test]
    fn imprint_template_names_the_site() {
        let request = FixRequest::new(Category::LegalNotice, ArtifactType::LegalText, site());
        let handler = Handler::route(&request).unwrap();
        let template = handler.template(&request);
        assert!(template.contains("Example Shop"));
        assert!(template.contains("example.test"));
        assert!(template.to_lowercase().contains("address"));
        assert!(template.to_lowercase().contains("contact"));
    }

    #[test]
    fn widget_template_is_valid_json_with_all_categories() {
        let request = FixRequest::new(Category::CookieConsent, ArtifactType::WidgetConfig, site());
        let template = Handler::CookieConsent.template(&request);
        let value: serde_json::Value = serde_json::from_str(&template).unwrap();
        assert_eq!(value["position"], "bottom");
        assert_eq!(value["categories"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn accessibility_template_follows_the_finding() {
        let finding = Finding::new(
            "A11Y_IMG_ALT_MISSING",
            Category::Accessibility,
            Severity::Warning,
            "https://example.test/",
            "img without alt",
        );
        let request = FixRequest::for_finding(finding, ArtifactType::Code, site());
        let handler = Handler::route(&request).unwrap();
        assert!(handler.template(&request).contains("alt="));
    }
}
