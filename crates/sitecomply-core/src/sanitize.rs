use aho_corasick::AhoCorasick;
use anyhow::{Context, Result as AnyResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Configuration for branding removal and re-branding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Third-party product/service names that must never reach the end
    /// user.
    pub forbidden_brands: Vec<String>,
    /// Link hosts (suffix match) allowed to survive sanitization.
    pub allowed_link_hosts: Vec<String>,
    /// The platform's own brand, substituted for stripped tokens.
    pub platform_name: String,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            forbidden_brands: vec![
                "eRecht24".into(),
                "Cookiebot".into(),
                "OneTrust".into(),
                "Usercentrics".into(),
                "TermsFeed".into(),
                "iubenda".into(),
                "CookieYes".into(),
            ],
            allowed_link_hosts: vec!["sitecomply.dev".into()],
            platform_name: "Sitecomply".into(),
        }
    }
}

static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>()\[\]]+"#).unwrap());

/// Strips third-party branding and external links from sourced or
/// generated text and inserts the platform's own branding marker.
/// Mandatory and unconditional for legal-text and cookie-consent
/// artifacts, whatever their source.
pub struct WhiteLabelSanitizer {
    config: SanitizerConfig,
    brands: Option<AhoCorasick>,
}

impl WhiteLabelSanitizer {
    pub fn new(config: SanitizerConfig) -> AnyResult<Self> {
        let brands = if config.forbidden_brands.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(&config.forbidden_brands)
                    .context("failed to build brand automaton from sanitizer config")?,
            )
        };
        Ok(Self { config, brands })
    }

    pub fn with_defaults() -> Self {
        // The default brand list is static and always compiles.
        Self::new(SanitizerConfig::default()).expect("default sanitizer config must build")
    }

    /// Apply the full sanitization pass: brand substitution, external-link
    /// removal, branding marker.
    pub fn apply(&self, content: &str) -> String {
        let mut result = self.strip_brands(content);
        result = self.strip_external_links(&result);
        self.ensure_marker(result)
    }

    /// True when any configured brand token survives in the content.
    pub fn contains_forbidden(&self, content: &str) -> bool {
        self.brands
            .as_ref()
            .map(|brands| brands.is_match(content))
            .unwrap_or(false)
    }

    fn strip_brands(&self, content: &str) -> String {
        match &self.brands {
            Some(brands) => {
                let replacements: Vec<&str> = self
                    .config
                    .forbidden_brands
                    .iter()
                    .map(|_| self.config.platform_name.as_str())
                    .collect();
                brands.replace_all(content, &replacements)
            }
            None => content.to_string(),
        }
    }

    fn strip_external_links(&self, content: &str) -> String {
        LINK_RE
            .replace_all(content, |caps: &regex::Captures<'_>| {
                let link = &caps[0];
                if self.link_allowed(link) {
                    link.to_string()
                } else {
                    String::new()
                }
            })
            .into_owned()
    }

    fn link_allowed(&self, link: &str) -> bool {
        let Ok(parsed) = url::Url::parse(link) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.config
            .allowed_link_hosts
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{allowed}")))
    }

    /// JSON content gets a `poweredBy` field so it stays machine-readable;
    /// prose gets a trailing marker line.
    fn ensure_marker(&self, content: String) -> String {
        if content.trim_start().starts_with('{') {
            if let Ok(serde_json::Value::Object(mut object)) =
                serde_json::from_str::<serde_json::Value>(&content)
            {
                object.insert(
                    "poweredBy".to_string(),
                    serde_json::Value::String(self.config.platform_name.clone()),
                );
                if let Ok(rendered) =
                    serde_json::to_string_pretty(&serde_json::Value::Object(object))
                {
                    return rendered;
                }
            }
        }
        let marker = format!("Provided by {}.", self.config.platform_name);
        if content.contains(&marker) {
            return content;
        }
        format!("{}\n\n{}", content.trim_end(), marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_forbidden_brands_case_insensitively() {
        let sanitizer = WhiteLabelSanitizer::with_defaults();
        let output = sanitizer.apply("Consent management by COOKIEBOT and erecht24.");
        assert!(!sanitizer.contains_forbidden(&output));
        assert!(output.contains("Sitecomply"));
    }

    #[test]
    fn strips_external_links_but_keeps_allowed_hosts() {
        let sanitizer = WhiteLabelSanitizer::with_defaults();
        let output = sanitizer.apply(
            "See https://thirdparty.example/terms and https://docs.sitecomply.dev/legal for details.",
        );
        assert!(!output.contains("thirdparty.example"));
        assert!(output.contains("https://docs.sitecomply.dev/legal"));
    }

    #[test]
    fn appends_branding_marker_exactly_once() {
        let sanitizer = WhiteLabelSanitizer::with_defaults();
        let once = sanitizer.apply("Some legal text.");
        assert!(once.ends_with("Provided by Sitecomply."));
        let twice = sanitizer.apply(&once);
        assert_eq!(twice.matches("Provided by Sitecomply.").count(), 1);
    }

    #[test]
    fn custom_platform_name_is_used() {
        let config = SanitizerConfig {
            platform_name: "Acme Legal".into(),
            ..SanitizerConfig::default()
        };
        let sanitizer = WhiteLabelSanitizer::new(config).unwrap();
        let output = sanitizer.apply("Generated with TermsFeed.");
        assert!(output.contains("Acme Legal"));
        assert!(output.ends_with("Provided by Acme Legal."));
    }

    #[test]
    fn json_content_gets_a_powered_by_field_instead_of_a_marker_line() {
        let sanitizer = WhiteLabelSanitizer::with_defaults();
        let output = sanitizer.apply(r#"{"position": "bottom", "categories": ["necessary"]}"#);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["poweredBy"], "Sitecomply");
        assert!(!output.contains("Provided by"));
    }

    #[test]
    fn empty_brand_list_only_handles_links_and_marker() {
        let config = SanitizerConfig {
            forbidden_brands: Vec::new(),
            ..SanitizerConfig::default()
        };
        let sanitizer = WhiteLabelSanitizer::new(config).unwrap();
        let output = sanitizer.apply("Plain text, no brands.");
        assert!(!sanitizer.contains_forbidden(&output));
        assert!(output.contains("Plain text"));
    }
}
