use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scan::{Category, Finding, SiteContext};

pub mod engine;
pub mod handlers;
pub mod prompt;
pub mod validate;

pub use engine::{FixEngine, FixEngineConfig};
pub use handlers::Handler;
pub use validate::{ValidationConfig, ValidationReport, Validator};

/// The kind of remediation artifact a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactType {
    Code,
    LegalText,
    WidgetConfig,
    Guide,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArtifactType::Code => "code",
            ArtifactType::LegalText => "legal-text",
            ArtifactType::WidgetConfig => "widget-config",
            ArtifactType::Guide => "guide",
        };
        f.write_str(label)
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(ArtifactType::Code),
            "legal-text" | "legal_text" => Ok(ArtifactType::LegalText),
            "widget-config" | "widget_config" => Ok(ArtifactType::WidgetConfig),
            "guide" => Ok(ArtifactType::Guide),
            other => Err(format!("unknown artifact type `{other}`")),
        }
    }
}

/// Outcome quality of a fix request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStatus {
    Ok,
    Degraded,
    Failed,
}

/// Which stage produced the final content. Required for auditability and
/// for the sanitizer to know whether branding-stripping applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FixSource {
    AuthoritativeCache,
    Provider { name: String },
    Template,
}

impl fmt::Display for FixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixSource::AuthoritativeCache => f.write_str("authoritative-cache"),
            FixSource::Provider { name } => write!(f, "provider:{name}"),
            FixSource::Template => f.write_str("template"),
        }
    }
}

/// A request to remediate a specific finding or a whole category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRequest {
    pub category: Category,
    pub artifact: ArtifactType,
    pub locale: String,
    pub site: SiteContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finding: Option<Finding>,
}

impl FixRequest {
    pub fn new(category: Category, artifact: ArtifactType, site: SiteContext) -> Self {
        Self {
            category,
            artifact,
            locale: site.locale.clone(),
            site,
            finding: None,
        }
    }

    pub fn for_finding(finding: Finding, artifact: ArtifactType, site: SiteContext) -> Self {
        Self {
            category: finding.category,
            artifact,
            locale: site.locale.clone(),
            site,
            finding: Some(finding),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

/// The remediation artifact handed back to the caller. Immutable once
/// returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixResult {
    pub request_id: String,
    pub status: FixStatus,
    pub artifact: ArtifactType,
    pub content: String,
    pub source: FixSource,
    pub validation: ValidationReport,
    pub confidence: f32,
}

/// User-visible fix failures. Everything else is recovered internally via
/// the fallback chain.
#[derive(Debug, Error)]
pub enum FixError {
    #[error("no handler supports category `{category}` with artifact `{artifact}`")]
    UnsupportedCategory {
        category: Category,
        artifact: ArtifactType,
    },
    #[error("all providers and the template fallback were exhausted or rejected; last validation: {last_failure}")]
    AllFallbacksExhausted {
        last_failure: String,
        report: ValidationReport,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_type_parses_aliases() {
        assert_eq!("legal_text".parse::<ArtifactType>().unwrap(), ArtifactType::LegalText);
        assert_eq!("widget-config".parse::<ArtifactType>().unwrap(), ArtifactType::WidgetConfig);
        assert!("pdf".parse::<ArtifactType>().is_err());
    }

    #[test]
    fn fix_source_serializes_with_kind_tag() {
        let source = FixSource::Provider {
            name: "openai".into(),
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["kind"], "provider");
        assert_eq!(json["name"], "openai");
        assert_eq!(source.to_string(), "provider:openai");
        assert_eq!(FixSource::Template.to_string(), "template");
    }

    #[test]
    fn request_for_finding_adopts_category() {
        let finding = Finding::new(
            "COOKIE_BANNER_MISSING",
            Category::CookieConsent,
            crate::scan::Severity::Critical,
            "https://example.test/",
            "missing banner",
        );
        let site = SiteContext {
            site_name: "Example".into(),
            host: "example.test".into(),
            locale: "de".into(),
        };
        let request = FixRequest::for_finding(finding, ArtifactType::WidgetConfig, site);
        assert_eq!(request.category, Category::CookieConsent);
        assert_eq!(request.locale, "de");
    }
}
