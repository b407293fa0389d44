//! Legislation grammar: norms (constitution, statutes, decrees, ...) and the
//! devices (article / inciso / paragraph / letter) cited within them.
//!
//! Two surface forms share one builder:
//! - [`protocol`]: the `N|` / `R|` line protocol returned by the LLM
//! - [`text`]: STF index text (`LEG-FED LEI-009605 ANO-1998 ART-00022`) and
//!   prose citations (`Lei 8.112/1990, art. 5º, III`)

pub mod protocol;
pub mod text;

use std::collections::{HashMap, HashSet};

use cito_types::{CitoError, Jurisdiction, LegislationNorm, NormReference, NormType, Result};
use serde_json::Value;

use crate::normalize::{non_blank, normalize_norm_identifier, parse_inciso, parse_number};

pub use protocol::parse_lines;
pub use text::parse_text;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Qualifiers of a single device before caput inference is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub inciso: Option<u32>,
    pub paragraph: Option<u32>,
    pub paragraph_single: bool,
    pub letter: Option<String>,
}

impl Device {
    pub fn is_empty(&self) -> bool {
        self.inciso.is_none()
            && self.paragraph.is_none()
            && !self.paragraph_single
            && self.letter.is_none()
    }

    /// Build the persisted reference. A numeric paragraph excludes the
    /// single-paragraph flag; a bare article is always caput.
    pub fn into_reference(self, article: u32, caput_marker: bool) -> NormReference {
        let paragraph_single = self.paragraph_single && self.paragraph.is_none();
        let mut reference = NormReference {
            article_number: Some(article),
            is_caput: caput_marker,
            inciso_number: self.inciso,
            paragraph_number: self.paragraph,
            is_paragraph_single: paragraph_single,
            letter_code: self.letter.map(|l| l.to_lowercase()),
        };
        if reference.is_bare() {
            reference.is_caput = true;
        }
        reference
    }
}

// ---------------------------------------------------------------------------
// NormBuilder: ordered, deduplicating accumulator
// ---------------------------------------------------------------------------

/// Collects norms in first-seen order. Norms are deduplicated by identifier
/// and devices by their full tuple.
#[derive(Debug, Default)]
pub struct NormBuilder {
    norms: Vec<LegislationNorm>,
    index: HashMap<String, usize>,
    seen: Vec<HashSet<NormReference>>,
}

impl NormBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a norm (or return the existing one with that identifier).
    /// Later sightings only fill fields that were still unknown.
    pub fn norm(
        &mut self,
        identifier: String,
        jurisdiction: Jurisdiction,
        norm_type: NormType,
        year: Option<u32>,
        description: &str,
    ) -> usize {
        if let Some(&idx) = self.index.get(&identifier) {
            let norm = &mut self.norms[idx];
            if norm.jurisdiction_level == Jurisdiction::Unknown {
                norm.jurisdiction_level = jurisdiction;
            }
            if norm.norm_year.is_none() {
                norm.norm_year = year;
            }
            if norm.norm_description.is_empty() {
                norm.norm_description = description.trim().to_string();
            }
            return idx;
        }
        let idx = self.norms.len();
        self.norms.push(LegislationNorm {
            norm_identifier: identifier.clone(),
            jurisdiction_level: jurisdiction,
            norm_type,
            norm_year: year.filter(|y| *y != 0),
            norm_description: description.trim().to_string(),
            norm_references: Vec::new(),
        });
        self.seen.push(HashSet::new());
        self.index.insert(identifier, idx);
        idx
    }

    pub fn reference(&mut self, norm: usize, reference: NormReference) {
        if let (Some(target), Some(seen)) = (self.norms.get_mut(norm), self.seen.get_mut(norm)) {
            if seen.insert(reference.clone()) {
                target.norm_references.push(reference);
            }
        }
    }

    pub fn set_jurisdiction(&mut self, norm: usize, jurisdiction: Jurisdiction) {
        if let Some(target) = self.norms.get_mut(norm) {
            target.jurisdiction_level = jurisdiction;
        }
    }

    pub fn len(&self) -> usize {
        self.norms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.norms.is_empty()
    }

    pub fn finish(self) -> Vec<LegislationNorm> {
        self.norms
    }
}

// ---------------------------------------------------------------------------
// JSON form
// ---------------------------------------------------------------------------

fn json_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn json_inciso(value: &Value) -> Option<u32> {
    match value {
        Value::String(s) => parse_inciso(s),
        other => json_u32(other),
    }
}

/// Null or absent is `None`; any other value must convert.
fn json_field(
    obj: &Value,
    key: &str,
    convert: fn(&Value) -> Option<u32>,
    at: &dyn Fn(&str) -> String,
) -> Result<Option<u32>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => convert(value)
            .map(Some)
            .ok_or_else(|| CitoError::SchemaError(format!("{} is not a number: {value}", at(key)))),
    }
}

fn json_str(value: &Value) -> Option<String> {
    value.as_str().and_then(non_blank)
}

/// Convert a validated `caseLegislationReferences` array into norms, with the
/// same normalization and deduplication as the line grammars.
pub fn from_json(items: &[Value]) -> Result<Vec<LegislationNorm>> {
    let mut builder = NormBuilder::new();
    for (i, item) in items.iter().enumerate() {
        let obj = item.as_object().ok_or_else(|| {
            CitoError::SchemaError(format!("caseLegislationReferences[{i}] is not an object"))
        })?;
        let identifier = obj
            .get("normIdentifier")
            .and_then(json_str)
            .map(|s| normalize_norm_identifier(&s))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CitoError::SchemaError(format!(
                    "caseLegislationReferences[{i}].normIdentifier is missing"
                ))
            })?;
        let norm_type = obj
            .get("normType")
            .and_then(Value::as_str)
            .map(NormType::from_token)
            .unwrap_or(NormType::Outra);
        let jurisdiction = obj
            .get("jurisdictionLevel")
            .and_then(Value::as_str)
            .map(Jurisdiction::from_token)
            .unwrap_or_default();
        let year = obj.get("normYear").and_then(json_u32).filter(|y| *y != 0);
        let description = obj
            .get("normDescription")
            .and_then(Value::as_str)
            .unwrap_or("");
        let idx = builder.norm(identifier, jurisdiction, norm_type, year, description);

        let refs = obj
            .get("normReferences")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for (j, r) in refs.iter().enumerate() {
            let at = |key: &str| format!("caseLegislationReferences[{i}].normReferences[{j}].{key}");
            let Some(article) = json_field(r, "articleNumber", json_u32, &at)? else {
                continue;
            };
            let device = Device {
                inciso: json_field(r, "incisoNumber", json_inciso, &at)?,
                paragraph: json_field(r, "paragraphNumber", json_u32, &at)?,
                paragraph_single: r
                    .get("isParagraphSingle")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                letter: r.get("letterCode").and_then(json_str),
            };
            let caput = r.get("isCaput").and_then(Value::as_bool).unwrap_or(false);
            builder.reference(idx, device.into_reference(article, caput));
        }
    }
    Ok(builder.finish())
}
