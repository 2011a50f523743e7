use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// Markers that client-side frameworks leave behind when the server response
/// is only a bootstrap shell.
const BAILOUT_MARKERS: &[&str] = &[
    "you need to enable javascript",
    "please enable javascript",
    "enable javascript to run this app",
    "javascript is required",
    "loading-placeholder",
    "skeleton-loader",
    "app-loading",
];

/// Application-root selectors checked for meaningful text content.
const ROOT_SELECTORS: &[&str] = &[
    "#root",
    "#app",
    "#__next",
    "[data-reactroot]",
    "[data-v-app]",
    "[ng-version]",
];

const MIN_ROOT_TEXT_CHARS: usize = 80;
const MIN_BODY_TEXT_CHARS: usize = 200;
const SCRIPT_HEAVY_COUNT: usize = 5;

static BAILOUT_AUTOMATON: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(BAILOUT_MARKERS)
        .expect("static bailout marker set must compile")
});

/// Outcome of the rendering-strategy heuristics, attached to the scanned
/// document for auditability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderDecision {
    pub needs_full_render: bool,
    pub reason: String,
}

impl RenderDecision {
    fn full(reason: impl Into<String>) -> Self {
        Self {
            needs_full_render: true,
            reason: reason.into(),
        }
    }

    fn lightweight(reason: impl Into<String>) -> Self {
        Self {
            needs_full_render: false,
            reason: reason.into(),
        }
    }
}

/// Decide from the lightweight fetch result alone whether a full
/// script-executing render is required. Heuristics are ordered; the first
/// match wins. An inconclusive document defaults to a full render.
pub fn decide(html: &str) -> RenderDecision {
    if html.trim().is_empty() {
        return RenderDecision::full("empty response body, heuristics inconclusive");
    }

    if let Some(mat) = BAILOUT_AUTOMATON.find(html) {
        return RenderDecision::full(format!(
            "hydration bailout marker `{}` present",
            BAILOUT_MARKERS[mat.pattern().as_usize()]
        ));
    }

    let document = Html::parse_document(html);

    for selector_src in ROOT_SELECTORS {
        let selector = Selector::parse(selector_src).expect("static selector must parse");
        if let Some(root) = document.select(&selector).next() {
            let text_len = collapsed_text_len(root.text());
            if text_len < MIN_ROOT_TEXT_CHARS {
                return RenderDecision::full(format!(
                    "application root `{selector_src}` holds {text_len} chars of text"
                ));
            }
        }
    }

    let script_count = count(&document, "script");
    let semantic_count = count(&document, "main, article, nav, h1, h2, h3");
    let body_text_len = body_text_len(&document);

    if script_count >= SCRIPT_HEAVY_COUNT
        && semantic_count == 0
        && body_text_len < MIN_BODY_TEXT_CHARS
    {
        return RenderDecision::full(format!(
            "{script_count} script tags against {body_text_len} chars of text and no semantic structure"
        ));
    }

    RenderDecision::lightweight("server response carries meaningful content")
}

fn count(document: &Html, selector_src: &str) -> usize {
    let selector = Selector::parse(selector_src).expect("static selector must parse");
    document.select(&selector).count()
}

fn body_text_len(document: &Html) -> usize {
    let selector = Selector::parse("body").expect("static selector must parse");
    document
        .select(&selector)
        .next()
        .map(|body| collapsed_text_len(body.text()))
        .unwrap_or(0)
}

fn collapsed_text_len<'a>(parts: impl Iterator<Item = &'a str>) -> usize {
    parts
        .flat_map(|part| part.split_whitespace())
        .map(|word| word.chars().count() + 1)
        .sum::<usize>()
        .saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bailout_marker_forces_full_render() {
        let html = r#"<html><body><noscript>You need to enable JavaScript to run this app.</noscript><div id="root"></div></body></html>"#;
        let decision = decide(html);
        assert!(decision.needs_full_render);
        assert!(decision.reason.contains("bailout"));
    }

    #[test]
    fn empty_app_root_forces_full_render() {
        let html = r#"<html><body><div id="app"><span>Hi</span></div></body></html>"#;
        let decision = decide(html);
        assert!(decision.needs_full_render);
        assert!(decision.reason.contains("#app"));
    }

    #[test]
    fn script_heavy_shell_forces_full_render() {
        let scripts = "<script src=\"/a.js\"></script>".repeat(6);
        let html = format!("<html><body><div>ok</div>{scripts}</body></html>");
        let decision = decide(&html);
        assert!(decision.needs_full_render);
        assert!(decision.reason.contains("script tags"));
    }

    #[test]
    fn semantic_content_stays_lightweight() {
        let body: String = "word ".repeat(120);
        let html = format!(
            "<html><body><main><h1>Welcome</h1><article><p>{body}</p></article></main><nav><a href=\"/contact\">Contact</a></nav></body></html>"
        );
        let decision = decide(&html);
        assert!(!decision.needs_full_render, "reason: {}", decision.reason);
    }

    #[test]
    fn populated_app_root_stays_lightweight() {
        let text = "meaningful server rendered words ".repeat(10);
        let html = format!(
            "<html><body><div id=\"root\"><main><h1>Store</h1><p>{text}</p></main></div></body></html>"
        );
        let decision = decide(&html);
        assert!(!decision.needs_full_render, "reason: {}", decision.reason);
    }

    #[test]
    fn empty_document_defaults_to_full_render() {
        let decision = decide("   ");
        assert!(decision.needs_full_render);
        assert!(decision.reason.contains("inconclusive"));
    }
}
