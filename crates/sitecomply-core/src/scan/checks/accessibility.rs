use anyhow::Result as AnyResult;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};

use super::{element_snippet, selector};
use crate::fetch::RenderedDocument;
use crate::scan::{Category, Check, CheckKind, Finding, Severity, SiteContext};

const MAX_ELEMENT_FINDINGS: usize = 5;
const MIN_CONTRAST_RATIO: f32 = 4.5;

/// Audits alt text, heading hierarchy, landmarks, keyboard focusability and
/// color contrast resolvable from inline styles and same-document
/// `<style>` blocks.
#[derive(Debug, Default)]
pub struct AccessibilityCheck;

impl Check for AccessibilityCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Accessibility
    }

    fn run(&self, doc: &RenderedDocument, _ctx: &SiteContext) -> AnyResult<Vec<Finding>> {
        let document = Html::parse_document(&doc.html);
        let mut findings = Vec::new();

        audit_alt_text(&document, &doc.url, &mut findings);
        audit_headings(&document, &doc.url, &mut findings);
        audit_landmarks(&document, &doc.url, &mut findings);
        audit_focusability(&document, &doc.url, &mut findings);
        audit_contrast(&document, &doc.url, &mut findings);

        Ok(findings)
    }
}

fn audit_alt_text(document: &Html, url: &str, findings: &mut Vec<Finding>) {
    let images = selector("img");
    let missing: Vec<ElementRef<'_>> = document
        .select(&images)
        .filter(|img| img.value().attr("alt").is_none())
        .collect();
    if missing.is_empty() {
        return;
    }
    for img in missing.iter().take(MAX_ELEMENT_FINDINGS) {
        let src = img.value().attr("src").unwrap_or("unknown");
        findings.push(
            Finding::new(
                "A11Y_IMG_ALT_MISSING",
                Category::Accessibility,
                Severity::Warning,
                url,
                format!(
                    "Image without alt attribute ({} of {} on this page)",
                    findings
                        .iter()
                        .filter(|f| f.id == "A11Y_IMG_ALT_MISSING")
                        .count()
                        + 1,
                    missing.len()
                ),
            )
            .with_selector(format!("img[src=\"{src}\"]"))
            .with_evidence(element_snippet(*img)),
        );
    }
}

fn audit_headings(document: &Html, url: &str, findings: &mut Vec<Finding>) {
    let headings = selector("h1, h2, h3, h4, h5, h6");
    let levels: Vec<u8> = document
        .select(&headings)
        .map(|heading| heading.value().name().as_bytes()[1] - b'0')
        .collect();

    let h1_count = levels.iter().filter(|level| **level == 1).count();
    if h1_count == 0 {
        findings.push(Finding::new(
            "A11Y_H1_MISSING",
            Category::Accessibility,
            Severity::Warning,
            url,
            "Page has no h1 heading",
        ));
    } else if h1_count > 1 {
        findings.push(Finding::new(
            "A11Y_MULTIPLE_H1",
            Category::Accessibility,
            Severity::Info,
            url,
            format!("Page has {h1_count} h1 headings"),
        ));
    }

    for window in levels.windows(2) {
        if window[1] > window[0] + 1 {
            findings.push(Finding::new(
                "A11Y_HEADING_SKIP",
                Category::Accessibility,
                Severity::Warning,
                url,
                format!(
                    "Heading hierarchy skips from h{} to h{}",
                    window[0], window[1]
                ),
            ));
            break;
        }
    }
}

fn audit_landmarks(document: &Html, url: &str, findings: &mut Vec<Finding>) {
    let main = selector("main, [role=\"main\"]");
    if document.select(&main).next().is_none() {
        findings.push(
            Finding::new(
                "A11Y_LANDMARK_MISSING",
                Category::Accessibility,
                Severity::Warning,
                url,
                "Page has no main landmark (main element or role=\"main\")",
            )
            .with_selector("main"),
        );
    }
}

fn audit_focusability(document: &Html, url: &str, findings: &mut Vec<Finding>) {
    let anchors = selector("a");
    let mut dead_links = 0usize;
    for anchor in document.select(&anchors) {
        if anchor.value().attr("href").is_none() && anchor.value().attr("onclick").is_some() {
            dead_links += 1;
        }
    }
    if dead_links > 0 {
        findings.push(Finding::new(
            "A11Y_LINK_NOT_FOCUSABLE",
            Category::Accessibility,
            Severity::Warning,
            url,
            format!("{dead_links} clickable anchor(s) without href are unreachable by keyboard"),
        ));
    }

    let clickable = selector("div[onclick], span[onclick]");
    let mut fake_buttons = 0usize;
    for element in document.select(&clickable) {
        let focusable = element.value().attr("tabindex").is_some();
        let has_role = element.value().attr("role").is_some();
        if !focusable || !has_role {
            fake_buttons += 1;
        }
    }
    if fake_buttons > 0 {
        findings.push(Finding::new(
            "A11Y_CLICK_NOT_FOCUSABLE",
            Category::Accessibility,
            Severity::Warning,
            url,
            format!(
                "{fake_buttons} element(s) with click handlers lack tabindex/role for keyboard use"
            ),
        ));
    }

    let tabindexed = selector("[tabindex]");
    for element in document.select(&tabindexed) {
        if let Some(value) = element.value().attr("tabindex") {
            if value.parse::<i32>().map(|v| v > 0).unwrap_or(false) {
                findings.push(
                    Finding::new(
                        "A11Y_POSITIVE_TABINDEX",
                        Category::Accessibility,
                        Severity::Info,
                        url,
                        format!("Positive tabindex ({value}) overrides natural focus order"),
                    )
                    .with_evidence(element_snippet(element)),
                );
                break;
            }
        }
    }
}

fn audit_contrast(document: &Html, url: &str, findings: &mut Vec<Finding>) {
    let rules = StyleRules::from_document(document);
    let texty = selector("p, span, a, h1, h2, h3, h4, h5, h6, li, button, label");
    let mut reported = 0usize;
    for element in document.select(&texty) {
        if reported >= MAX_ELEMENT_FINDINGS {
            break;
        }
        if !has_direct_text(element) {
            continue;
        }
        let Some(fg) = rules.resolve(element, "color") else {
            continue;
        };
        let Some(bg) = rules.resolve(element, "background-color") else {
            continue;
        };
        let ratio = contrast_ratio(fg, bg);
        if ratio < MIN_CONTRAST_RATIO {
            findings.push(
                Finding::new(
                    "A11Y_CONTRAST_LOW",
                    Category::Accessibility,
                    Severity::Warning,
                    url,
                    format!(
                        "Text contrast ratio {ratio:.2}:1 is below the {MIN_CONTRAST_RATIO}:1 minimum"
                    ),
                )
                .with_evidence(element_snippet(element)),
            );
            reported += 1;
        }
    }
}

fn has_direct_text(element: ElementRef<'_>) -> bool {
    element
        .children()
        .filter_map(scraper::ElementRef::wrap)
        .count()
        == 0
        && !super::collapsed_text(element).is_empty()
}

/// Simple style resolution: inline `style=` attributes win, then `#id`,
/// `.class` and tag rules from same-document `<style>` blocks. External
/// stylesheets are out of reach of a static scan and are skipped.
struct StyleRules {
    rules: Vec<(SelectorKind, String, String, Rgb)>,
}

#[derive(Clone, Copy)]
enum SelectorKind {
    Id,
    Class,
    Tag,
}

static RULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)([^{}]+)\{([^}]*)\}").unwrap());
static DECL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(color|background-color|background)\s*:\s*([^;]+)").unwrap());

impl StyleRules {
    fn from_document(document: &Html) -> Self {
        let styles = selector("style");
        let mut rules = Vec::new();
        for style in document.select(&styles) {
            let css = style.inner_html();
            for rule in RULE_RE.captures_iter(&css) {
                let selectors = rule[1].trim().to_string();
                let body = rule[2].to_string();
                for sel in selectors.split(',') {
                    let sel = sel.trim();
                    let kind = match sel.chars().next() {
                        Some('#') => SelectorKind::Id,
                        Some('.') => SelectorKind::Class,
                        Some(c) if c.is_ascii_alphabetic() => SelectorKind::Tag,
                        _ => continue,
                    };
                    if sel.contains(' ') || sel.contains(':') || sel.contains('>') {
                        continue;
                    }
                    for decl in DECL_RE.captures_iter(&body) {
                        let property = if decl[1].eq_ignore_ascii_case("color") {
                            "color"
                        } else {
                            "background-color"
                        };
                        if let Some(rgb) = parse_color(decl[2].trim()) {
                            rules.push((
                                kind,
                                sel.trim_start_matches(['#', '.']).to_string(),
                                property.to_string(),
                                rgb,
                            ));
                        }
                    }
                }
            }
        }
        Self { rules }
    }

    fn resolve(&self, element: ElementRef<'_>, property: &str) -> Option<Rgb> {
        if let Some(style) = element.value().attr("style") {
            for decl in DECL_RE.captures_iter(style) {
                let name = if decl[1].eq_ignore_ascii_case("color") {
                    "color"
                } else {
                    "background-color"
                };
                if name == property {
                    if let Some(rgb) = parse_color(decl[2].trim()) {
                        return Some(rgb);
                    }
                }
            }
        }

        let id = element.value().attr("id");
        let classes: Vec<&str> = element
            .value()
            .attr("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default();
        let tag = element.value().name();

        let mut tag_hit = None;
        let mut class_hit = None;
        let mut id_hit = None;
        for (kind, name, prop, rgb) in &self.rules {
            if prop != property {
                continue;
            }
            match kind {
                SelectorKind::Id => {
                    if id == Some(name.as_str()) {
                        id_hit = Some(*rgb);
                    }
                }
                SelectorKind::Class => {
                    if classes.contains(&name.as_str()) {
                        class_hit = Some(*rgb);
                    }
                }
                SelectorKind::Tag => {
                    if tag == name {
                        tag_hit = Some(*rgb);
                    }
                }
            }
        }
        id_hit.or(class_hit).or(tag_hit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rgb(u8, u8, u8);

fn parse_color(value: &str) -> Option<Rgb> {
    let value = value.trim().to_lowercase();
    if let Some(hex) = value.strip_prefix('#') {
        return match hex.len() {
            3 => {
                let bytes: Vec<u8> = hex
                    .chars()
                    .map(|c| c.to_digit(16).map(|d| (d * 17) as u8))
                    .collect::<Option<_>>()?;
                Some(Rgb(bytes[0], bytes[1], bytes[2]))
            }
            6 => {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                Some(Rgb(r, g, b))
            }
            _ => None,
        };
    }
    if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
    {
        let args = args.trim_end_matches(')');
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        if parts.len() >= 3 {
            let r = parts[0].parse::<u8>().ok()?;
            let g = parts[1].parse::<u8>().ok()?;
            let b = parts[2].parse::<u8>().ok()?;
            return Some(Rgb(r, g, b));
        }
        return None;
    }
    match value.as_str() {
        "black" => Some(Rgb(0, 0, 0)),
        "white" => Some(Rgb(255, 255, 255)),
        "red" => Some(Rgb(255, 0, 0)),
        "green" => Some(Rgb(0, 128, 0)),
        "blue" => Some(Rgb(0, 0, 255)),
        "gray" | "grey" => Some(Rgb(128, 128, 128)),
        "silver" => Some(Rgb(192, 192, 192)),
        "yellow" => Some(Rgb(255, 255, 0)),
        "orange" => Some(Rgb(255, 165, 0)),
        "purple" => Some(Rgb(128, 0, 128)),
        _ => None,
    }
}

fn relative_luminance(color: Rgb) -> f32 {
    fn channel(value: u8) -> f32 {
        let c = value as f32 / 255.0;
        if c <= 0.039_28 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }
    0.2126 * channel(color.0) + 0.7152 * channel(color.1) + 0.0722 * channel(color.2)
}

fn contrast_ratio(a: Rgb, b: Rgb) -> f32 {
    let la = relative_luminance(a);
    let lb = relative_luminance(b);
    let (lighter, darker) = if la >= lb { (la, lb) } else { (lb, la) };
    (lighter + 0.05) / (darker + 0.05)
}
