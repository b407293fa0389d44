//! Free-text doctrine citations in ABNT style:
//! `SURNAME, Name. Title. Edition. Place: Publisher, Year, p. Pages.`
//!
//! A citation starts at a `SURNAME, Name` pattern, but only when the text
//! before it ended a citation (a year, a page or a bare number). Titles and
//! author lists contain commas, so splitting on them is never safe.

use std::sync::LazyLock;

use cito_types::DoctrineReference;
use regex::Regex;

use super::{checked_year, reference};
use crate::normalize::{collapse_whitespace, find_year, non_blank};

static AUTHOR_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\p{Lu}{2,}(?:[ '-]\p{Lu}{2,})*,\s+\p{Lu}").expect("author start regex")
});
static TERMINAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\d{4}|p\.\s*\d+(?:\s*[-–]\s*\d+)?|\d+)\s*\.?\s*$").expect("terminal regex")
});
static EDITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+)\s*[ªa]?\s*\.?\s*ed\.?").expect("edition regex"));
static PLACE_PUBLISHER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<place>\p{Lu}[\p{L} ]*?)\s*:\s*(?P<publisher>[^,.;:]+)").expect("publisher regex")
});
static INITIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\p{Lu}\.").expect("initial regex"));
static PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bp\.\s*(\d+(?:\s*[-–]\s*\d+)?)").expect("page regex"));

/// Split a blob into one span per citation.
fn segment(text: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = Vec::new();
    for m in AUTHOR_START.find_iter(text) {
        match starts.last() {
            None => starts.push(m.start()),
            Some(&prev) if TERMINAL.is_match(&text[prev..m.start()]) => starts.push(m.start()),
            Some(_) => {}
        }
    }
    starts
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            text[s..end].trim()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// End of the author block: the first `.` followed by whitespace whose next
/// token is not another initial (`SILVA, J. A. Title` ends after `A`).
fn author_end(span: &str) -> Option<usize> {
    span.char_indices()
        .filter(|(_, c)| *c == '.')
        .find(|(i, _)| {
            let after = &span[i + 1..];
            if !after.is_empty() && !after.starts_with(char::is_whitespace) {
                return false;
            }
            !INITIAL.is_match(after.trim_start())
        })
        .map(|(i, _)| i)
}

fn parse_span(span: &str) -> Option<DoctrineReference> {
    let raw = collapse_whitespace(span);
    let end = author_end(&raw)?;
    let authors = &raw[..end];
    let author = authors.split(';').next().and_then(non_blank)?;
    let rest = raw[end + 1..].trim();

    let cut = [
        EDITION.find(rest).map(|m| m.start()),
        PLACE_PUBLISHER.find(rest).map(|m| m.start()),
        rest.find(". "),
    ]
    .into_iter()
    .flatten()
    .min()
    .unwrap_or(rest.len());
    let title = rest[..cut].trim().trim_end_matches(['.', ',']).trim().to_string();
    let tail = &rest[cut..];

    let edition = EDITION
        .captures(tail)
        .and_then(|c| c.get(1))
        .map(|m| format!("{}. ed.", m.as_str()));
    let (place, publisher) = match PLACE_PUBLISHER.captures(tail) {
        Some(c) => (
            c.name("place").and_then(|m| non_blank(m.as_str())),
            c.name("publisher").and_then(|m| non_blank(m.as_str())),
        ),
        None => (None, None),
    };
    let page = PAGE
        .captures(tail)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<String>());

    Some(DoctrineReference {
        edition,
        publication_place: place,
        publisher,
        year: checked_year(find_year(tail)),
        page,
        ..reference(author, title, raw.clone())
    })
}

pub fn parse_text(text: &str) -> Vec<DoctrineReference> {
    let refs: Vec<DoctrineReference> = segment(text).into_iter().filter_map(parse_span).collect();
    tracing::debug!(refs = refs.len(), "parsed doctrine text");
    refs
}
