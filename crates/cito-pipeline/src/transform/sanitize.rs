//! HTML cleanup: main-container extraction, fragment sanitizing, and
//! markdown conversion.

use std::sync::LazyLock;

use async_trait::async_trait;
use cito_types::{CaseDocument, CitoError, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use super::{StageOutput, Transformer};
use crate::stage::{Capability, StageSpec};
use crate::store::FieldChange;

/// Elements removed with their whole subtree.
const DROPPED: &[&str] = &["script", "style", "noscript", "iframe", "object", "embed"];

const VOID: &[&str] = &[
    "area", "base", "col", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

static TRAILING_BLANKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").expect("trailing blanks regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank lines regex"));
static INNER_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("inner spaces regex"));

// ---------------------------------------------------------------------------
// Container extraction
// ---------------------------------------------------------------------------

/// Inner HTML of the first element matching `selector`, trimmed.
pub fn clean_html(html: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .next()
        .map(|el| el.inner_html().trim().to_string())
}

// ---------------------------------------------------------------------------
// Fragment sanitizing
// ---------------------------------------------------------------------------

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

fn write_children(el: ElementRef<'_>, out: &mut String) {
    for node in el.children() {
        match node.value() {
            Node::Text(text) => escape_text(text, out),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(node) {
                    write_element(child, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if DROPPED.contains(&name) {
        return;
    }
    if name == "br" {
        out.push('\n');
        return;
    }
    out.push('<');
    out.push_str(name);
    for (attr, value) in el.value().attrs() {
        let lower = attr.to_ascii_lowercase();
        if lower.starts_with("on") || lower == "style" {
            continue;
        }
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');
    if VOID.contains(&name) {
        return;
    }
    write_children(el, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Drop scripts, embeds, inline styles and event handlers; `<br>` becomes a
/// newline. Structure useful for markdown (headings, links, lists) is kept.
pub fn sanitize_fragment(fragment: &str) -> String {
    if fragment.trim().is_empty() {
        return String::new();
    }
    let parsed = Html::parse_fragment(fragment);
    let mut out = String::with_capacity(fragment.len());
    write_children(parsed.root_element(), &mut out);
    let out = TRAILING_BLANKS.replace_all(&out, "\n");
    BLANK_LINES.replace_all(&out, "\n\n").trim().to_string()
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

/// Strip trailing blanks, collapse runs of blank lines and inner spaces.
pub fn normalize_markdown(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    let text = text.replace('\r', "\n");
    let text = TRAILING_BLANKS.replace_all(&text, "\n");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    let lines: Vec<String> = text
        .split('\n')
        .map(|line| INNER_SPACES.replace_all(line, " ").trim_end().to_string())
        .collect();
    BLANK_LINES
        .replace_all(lines.join("\n").trim(), "\n\n")
        .trim()
        .to_string()
}

/// Convert sanitized HTML. Newlines are turned back into `<br>` first, so
/// line-oriented sections (parties) keep one entry per line.
pub fn html_to_markdown(html: &str) -> Result<String> {
    if html.trim().is_empty() {
        return Ok(String::new());
    }
    let converted = htmd::convert(&html.replace('\n', "<br>")).map_err(|e| CitoError::TransformError {
        stage: "caseSections".into(),
        message: format!("markdown conversion failed: {e}"),
    })?;
    Ok(normalize_markdown(&converted))
}

// ---------------------------------------------------------------------------
// SanitizeTransformer
// ---------------------------------------------------------------------------

pub struct SanitizeTransformer {
    selector: Selector,
    selector_text: String,
}

impl SanitizeTransformer {
    pub fn new(selector: &str) -> Result<Self> {
        let parsed = Selector::parse(selector)
            .map_err(|e| CitoError::Config(format!("invalid clean selector '{selector}': {e}")))?;
        Ok(Self {
            selector: parsed,
            selector_text: selector.to_string(),
        })
    }
}

#[async_trait]
impl Transformer for SanitizeTransformer {
    fn capability(&self) -> Capability {
        Capability::Sanitize
    }

    async fn transform(
        &self,
        _spec: &StageSpec,
        _doc: &CaseDocument,
        html: &str,
    ) -> Result<StageOutput> {
        let clean = clean_html(html, &self.selector).ok_or_else(|| {
            CitoError::SchemaError(format!("container '{}' not found", self.selector_text))
        })?;
        if clean.is_empty() {
            return Err(CitoError::SchemaError(format!(
                "container '{}' is empty",
                self.selector_text
            )));
        }
        let chars = clean.chars().count();
        Ok(StageOutput::fields(vec![FieldChange::HtmlClean(clean)], None).with_output_chars(chars))
    }
}
