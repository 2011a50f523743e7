use std::fmt;

use anyhow::{Context, Result as AnyResult};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::handlers::Handler;
use crate::cache::DocumentType;

/// The three validation layers every candidate artifact passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLayer {
    Schema,
    Syntactic,
    Domain,
}

/// Outcome of one validation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub layer: ValidationLayer,
    pub rule: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-rule validation outcomes, attached to every fix result for
/// diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn first_failure(&self) -> Option<&ValidationCheck> {
        self.checks.iter().find(|check| !check.passed)
    }

    fn pass(&mut self, layer: ValidationLayer, rule: &str) {
        self.checks.push(ValidationCheck {
            layer,
            rule: rule.to_string(),
            passed: true,
            detail: None,
        });
    }

    fn fail(&mut self, layer: ValidationLayer, rule: &str, detail: impl Into<String>) {
        self.checks.push(ValidationCheck {
            layer,
            rule: rule.to_string(),
            passed: false,
            detail: Some(detail.into()),
        });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first_failure() {
            Some(check) => write!(
                f,
                "{:?}/{} failed: {}",
                check.layer,
                check.rule,
                check.detail.as_deref().unwrap_or("no detail")
            ),
            None => f.write_str("all validation rules passed"),
        }
    }
}

/// Keyword sets a legal document must contain, per document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandatoryKeywords {
    pub imprint: Vec<String>,
    pub privacy_policy: Vec<String>,
    pub cookie_policy: Vec<String>,
}

impl Default for MandatoryKeywords {
    fn default() -> Self {
        Self {
            imprint: vec!["address".into(), "contact".into()],
            privacy_policy: vec![
                "controller".into(),
                "personal data".into(),
                "rights".into(),
            ],
            cookie_policy: vec!["cookies".into(), "consent".into()],
        }
    }
}

impl MandatoryKeywords {
    pub fn for_document(&self, document: DocumentType) -> &[String] {
        match document {
            DocumentType::Imprint => &self.imprint,
            DocumentType::PrivacyPolicy => &self.privacy_policy,
            DocumentType::CookiePolicy => &self.cookie_policy,
        }
    }
}

/// Configurable rule inputs for the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Regexes matching unresolved placeholder tokens.
    pub placeholder_patterns: Vec<String>,
    pub mandatory_keywords: MandatoryKeywords,
    /// Semantic attributes an accessibility fix must never strip.
    pub required_semantic_attrs: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            placeholder_patterns: vec![
                r"\{\{[^}]*\}\}".into(),
                r"\[INSERT[^\]]*\]".into(),
                r"\[YOUR[^\]]*\]".into(),
                r"\bTODO\b".into(),
            ],
            mandatory_keywords: MandatoryKeywords::default(),
            required_semantic_attrs: vec!["alt".into(), "role".into(), "aria-".into()],
        }
    }
}

/// Validates candidate artifacts in three layers: schema, syntactic,
/// domain. Any failing rule advances the fallback chain.
pub struct Validator {
    config: ValidationConfig,
    placeholders: Vec<Regex>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LegalTextArtifact {
    title: String,
    body: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CodeArtifact {
    #[allow(dead_code)]
    language: String,
    snippet: String,
}

#[derive(Deserialize)]
struct WidgetConfigArtifact {
    position: String,
    categories: Vec<String>,
    #[allow(dead_code)]
    locale: String,
    #[serde(flatten)]
    #[allow(dead_code)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GuideArtifact {
    title: String,
    steps: Vec<String>,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> AnyResult<Self> {
        let placeholders = config
            .placeholder_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("invalid placeholder pattern `{pattern}`"))
            })
            .collect::<AnyResult<Vec<_>>>()?;
        Ok(Self {
            config,
            placeholders,
        })
    }

    pub fn with_defaults() -> Self {
        // Default patterns are static and always compile.
        Self::new(ValidationConfig::default()).expect("default validation config must build")
    }

    /// Validate a raw provider response: schema first, then the assembled
    /// content through the syntactic and domain layers. Returns the
    /// assembled content when the schema layer passed.
    pub fn validate_response(
        &self,
        handler: &Handler,
        raw: &str,
        evidence: Option<&str>,
    ) -> (ValidationReport, Option<String>) {
        let mut report = ValidationReport::default();
        let content = match self.check_schema(handler, raw, &mut report) {
            Some(content) => content,
            None => return (report, None),
        };
        self.check_syntactic(handler, &content, &mut report);
        self.check_domain(handler, &content, evidence, &mut report);
        (report, Some(content))
    }

    /// Validate already-assembled content (cache hits and templates),
    /// which skips the schema layer.
    pub fn validate_content(
        &self,
        handler: &Handler,
        content: &str,
        evidence: Option<&str>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.check_syntactic(handler, content, &mut report);
        self.check_domain(handler, content, evidence, &mut report);
        report
    }

    fn check_schema(
        &self,
        handler: &Handler,
        raw: &str,
        report: &mut ValidationReport,
    ) -> Option<String> {
        let rule = "response-structure";
        let assembled = match handler {
            Handler::LegalText { .. } => serde_json::from_str::<LegalTextArtifact>(raw)
                .map(|artifact| format!("{}\n\n{}", artifact.title, artifact.body))
                .map_err(|err| err.to_string()),
            Handler::CookieConsent => serde_json::from_str::<WidgetConfigArtifact>(raw)
                .map_err(|err| err.to_string())
                .and_then(|artifact| {
                    if artifact.position.is_empty() {
                        return Err("position must not be empty".to_string());
                    }
                    if artifact.categories.is_empty() {
                        return Err("categories must not be empty".to_string());
                    }
                    serde_json::to_string_pretty(
                        &serde_json::from_str::<serde_json::Value>(raw)
                            .unwrap_or(serde_json::Value::Null),
                    )
                    .map_err(|err| err.to_string())
                }),
            Handler::Accessibility | Handler::GenericCode => {
                serde_json::from_str::<CodeArtifact>(raw)
                    .map(|artifact| artifact.snippet)
                    .map_err(|err| err.to_string())
            }
            Handler::Guide => serde_json::from_str::<GuideArtifact>(raw)
                .map_err(|err| err.to_string())
                .and_then(|artifact| {
                    if artifact.steps.is_empty() {
                        return Err("guide must contain at least one step".to_string());
                    }
                    let steps = artifact
                        .steps
                        .iter()
                        .enumerate()
                        .map(|(idx, step)| format!("{}. {step}", idx + 1))
                        .collect::<Vec<_>>()
                        .join("\n");
                    Ok(format!("# {}\n\n{steps}\n", artifact.title))
                }),
        };
        match assembled {
            Ok(content) => {
                report.pass(ValidationLayer::Schema, rule);
                Some(content)
            }
            Err(detail) => {
                report.fail(ValidationLayer::Schema, rule, detail);
                None
            }
        }
    }

    fn check_syntactic(&self, handler: &Handler, content: &str, report: &mut ValidationReport) {
        for (pattern, regex) in self
            .config
            .placeholder_patterns
            .iter()
            .zip(&self.placeholders)
        {
            if let Some(found) = regex.find(content) {
                report.fail(
                    ValidationLayer::Syntactic,
                    "no-placeholder-tokens",
                    format!("unresolved placeholder `{}` matches `{pattern}`", found.as_str()),
                );
                return;
            }
        }
        report.pass(ValidationLayer::Syntactic, "no-placeholder-tokens");

        match handler {
            Handler::Accessibility | Handler::GenericCode => match well_formed_markup(content) {
                Ok(()) => report.pass(ValidationLayer::Syntactic, "well-formed-markup"),
                Err(detail) => {
                    report.fail(ValidationLayer::Syntactic, "well-formed-markup", detail)
                }
            },
            Handler::CookieConsent => {
                match serde_json::from_str::<serde_json::Value>(content) {
                    Ok(_) => report.pass(ValidationLayer::Syntactic, "well-formed-json"),
                    Err(err) => report.fail(
                        ValidationLayer::Syntactic,
                        "well-formed-json",
                        err.to_string(),
                    ),
                }
            }
            Handler::LegalText { .. } | Handler::Guide => {}
        }
    }

    fn check_domain(
        &self,
        handler: &Handler,
        content: &str,
        evidence: Option<&str>,
        report: &mut ValidationReport,
    ) {
        match handler {
            Handler::LegalText { document } => {
                let lowered = content.to_lowercase();
                let missing: Vec<&String> = self
                    .config
                    .mandatory_keywords
                    .for_document(*document)
                    .iter()
                    .filter(|keyword| !lowered.contains(&keyword.to_lowercase()))
                    .collect();
                if missing.is_empty() {
                    report.pass(ValidationLayer::Domain, "mandatory-keywords");
                } else {
                    report.fail(
                        ValidationLayer::Domain,
                        "mandatory-keywords",
                        format!(
                            "missing mandatory keyword(s): {}",
                            missing
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    );
                }
            }
            Handler::Accessibility => {
                let Some(evidence) = evidence else {
                    report.pass(ValidationLayer::Domain, "semantic-attrs-preserved");
                    return;
                };
                let stripped: Vec<&String> = self
                    .config
                    .required_semantic_attrs
                    .iter()
                    .filter(|attr| attr_present(evidence, attr) && !attr_present(content, attr))
                    .collect();
                if stripped.is_empty() {
                    report.pass(ValidationLayer::Domain, "semantic-attrs-preserved");
                } else {
                    report.fail(
                        ValidationLayer::Domain,
                        "semantic-attrs-preserved",
                        format!(
                            "fix removes required attribute(s): {}",
                            stripped
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    );
                }
            }
            Handler::CookieConsent => {
                let has_necessary = content.to_lowercase().contains("necessary");
                if has_necessary {
                    report.pass(ValidationLayer::Domain, "necessary-category-present");
                } else {
                    report.fail(
                        ValidationLayer::Domain,
                        "necessary-category-present",
                        "widget config must keep a `necessary` cookie category",
                    );
                }
            }
            Handler::GenericCode | Handler::Guide => {
                report.pass(ValidationLayer::Domain, "no-domain-rules");
            }
        }
    }
}

fn attr_present(html: &str, attr: &str) -> bool {
    if attr.ends_with('-') {
        html.contains(attr)
    } else {
        html.contains(&format!("{attr}=\"")) || html.contains(&format!("{attr}='"))
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

static TAG_RE: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(r"</?([a-zA-Z][a-zA-Z0-9-]*)(?s:[^<>]*)>").expect("static tag regex must compile")
});

/// Minimal well-formedness check for markup snippets: every opened
/// non-void tag must be closed in order.
fn well_formed_markup(content: &str) -> Result<(), String> {
    let mut stack: Vec<String> = Vec::new();
    for capture in TAG_RE.captures_iter(content) {
        let whole = &capture[0];
        let name = capture[1].to_lowercase();
        if whole.starts_with("</") {
            match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => {
                    return Err(format!("closing tag </{name}> does not match open <{open}>"))
                }
                None => return Err(format!("closing tag </{name}> has no matching open tag")),
            }
        } else if whole.ends_with("/>") || VOID_ELEMENTS.contains(&name.as_str()) {
            // self-closing or void, nothing to track
        } else {
            stack.push(name);
        }
    }
    if let Some(open) = stack.pop() {
        return Err(format!("tag <{open}> is never closed"));
    }
    Ok(())
}
