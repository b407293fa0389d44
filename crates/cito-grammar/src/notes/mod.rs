//! Notes grammar: the "Observação" block listing precedents, foreign law and
//! "see also" references, grouped by header and descriptor blocks.

pub mod protocol;
pub mod text;

use std::sync::LazyLock;

use cito_types::{CitoError, ItemType, NoteItem, NoteReference, NoteType, Result};
use regex::Regex;
use serde_json::Value;

use crate::normalize::{collapse_whitespace, fold_accents, non_blank};

pub use protocol::parse_lines;
pub use text::parse_text;

/// Containers that turn any item into a treaty or recommendation.
const STANDARDS_WORDS: &[&str] = &["ONU", "UN", "CNJ", "CNMP", "CARTA", "RECOMENDACAO", "PLANO"];
const STANDARDS_PHRASES: &[&str] = &["NACOES UNIDAS", "CONSELHO NACIONAL"];

static TRAILING_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]+)\)\s*[.;,]?\s*$").expect("trailing paren regex"));

/// True when the reference names a standards body (UN, national councils)
/// or one of its instruments.
pub fn is_standards_body(raw: &str) -> bool {
    let folded = fold_accents(raw).to_uppercase();
    let words: Vec<&str> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if STANDARDS_WORDS.iter().any(|t| words.contains(t)) {
        return true;
    }
    let spaced = words.join(" ");
    STANDARDS_PHRASES.iter().any(|p| spaced.contains(p))
}

/// True for an acronym naming a standards body rather than a case class.
pub fn is_standards_acronym(token: &str) -> bool {
    STANDARDS_WORDS.contains(&token.to_uppercase().as_str())
}

/// Country named in a trailing parenthetical: `Lawrence v. Texas (EUA).`
pub fn trailing_country(raw: &str) -> Option<String> {
    TRAILING_PAREN
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| non_blank(m.as_str()))
}

/// An item that carries no case fields.
pub fn plain_item(item_type: ItemType, raw_ref: &str) -> NoteItem {
    NoteItem {
        item_type,
        case_class: None,
        case_number: None,
        suffix: None,
        org_tag: None,
        country: None,
        raw_ref: collapse_whitespace(raw_ref),
    }
}

/// Apply the rules every item obeys regardless of how it was read:
/// standards bodies override the type, foreign headers carry a country.
pub fn finish_item(mut item: NoteItem, note_type: NoteType) -> NoteItem {
    let has_case = item.item_type == ItemType::Decision
        && item
            .case_class
            .as_deref()
            .is_some_and(|class| !is_standards_acronym(class));
    if !has_case && is_standards_body(&item.raw_ref) {
        item.item_type = ItemType::TreatyOrRecommendation;
    }
    if note_type.is_foreign() && item.country.is_none() {
        item.country = trailing_country(&item.raw_ref);
    }
    item
}

// ---------------------------------------------------------------------------
// JSON form
// ---------------------------------------------------------------------------

fn opt_str(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).and_then(non_blank)
}

/// Convert a validated `caseData.notesReferences` array.
pub fn from_json(notes: &[Value]) -> Result<Vec<NoteReference>> {
    let mut out = Vec::with_capacity(notes.len());
    for (i, note) in notes.iter().enumerate() {
        if !note.is_object() {
            return Err(CitoError::SchemaError(format!(
                "notesReferences[{i}] is not an object"
            )));
        }
        let note_type = note
            .get("noteType")
            .and_then(Value::as_str)
            .map(NoteType::from_name)
            .unwrap_or(NoteType::Outros);
        let raw_line = opt_str(note, "rawLine").unwrap_or_default();
        let descriptors = note
            .get("descriptors")
            .and_then(Value::as_array)
            .map(|d| d.iter().filter_map(Value::as_str).filter_map(non_blank).collect())
            .unwrap_or_default();
        let items = note
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CitoError::SchemaError(format!("notesReferences[{i}].items is not a list"))
            })?
            .iter()
            .map(|item| {
                let item_type = item
                    .get("itemType")
                    .and_then(Value::as_str)
                    .and_then(ItemType::from_name)
                    .unwrap_or_else(|| note_type.default_item_type());
                let parsed = NoteItem {
                    item_type,
                    case_class: opt_str(item, "caseClass"),
                    case_number: opt_str(item, "caseNumber").map(|n| n.replace('.', "")),
                    suffix: opt_str(item, "suffix"),
                    org_tag: opt_str(item, "orgTag"),
                    country: opt_str(item, "country"),
                    raw_ref: opt_str(item, "rawRef").unwrap_or_default(),
                };
                finish_item(parsed, note_type)
            })
            .collect();
        out.push(NoteReference {
            note_type,
            descriptors,
            raw_line,
            items,
        });
    }
    Ok(out)
}
