//! Doctrine grammar: bibliographic citations of legal scholarship.

pub mod protocol;
pub mod text;
pub mod work;

use cito_types::{CitoError, DoctrineReference, Result};
use serde_json::Value;

use crate::normalize::{non_blank, parse_number};

pub use protocol::parse_lines;
pub use text::parse_text;
pub use work::{normalize_title, work_key, WorkAlias, WorkCatalog, WorkIdentity};

/// Plausible publication years.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1000..=2100;

pub(crate) fn checked_year(year: Option<i32>) -> Option<i32> {
    year.filter(|y| YEAR_RANGE.contains(y))
}

/// A record with only the mandatory fields set.
pub(crate) fn reference(author: String, title: String, raw: String) -> DoctrineReference {
    DoctrineReference {
        author,
        publication_title: title,
        edition: None,
        publication_place: None,
        publisher: None,
        year: None,
        page: None,
        raw_citation: raw,
        publication_title_norm: None,
        work_key: None,
        work_match_type: None,
    }
}

const REQUIRED_KEYS: &[&str] = &[
    "author",
    "publicationTitle",
    "edition",
    "publicationPlace",
    "publisher",
    "year",
    "page",
    "rawCitation",
];

fn opt_str(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => non_blank(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert a `caseData.caseDoctrineReferences` array. Every record must
/// carry all keys, a non-blank author, title and raw citation, and a year
/// that is null or within [`YEAR_RANGE`].
pub fn from_json(items: &[Value]) -> Result<Vec<DoctrineReference>> {
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let obj = item.as_object().ok_or_else(|| {
            CitoError::SchemaError(format!("caseDoctrineReferences[{i}] is not an object"))
        })?;
        if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !obj.contains_key(**k)) {
            return Err(CitoError::SchemaError(format!(
                "caseDoctrineReferences[{i}] is missing '{missing}'"
            )));
        }
        let required = |key: &str| {
            opt_str(item, key).ok_or_else(|| {
                CitoError::SchemaError(format!("caseDoctrineReferences[{i}].{key} is blank"))
            })
        };
        let author = required("author")?;
        let title = required("publicationTitle")?;
        let raw = required("rawCitation")?;
        let year = match &obj["year"] {
            Value::Null => None,
            Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
            Value::String(s) => parse_number(s).and_then(|y| i32::try_from(y).ok()),
            _ => None,
        };
        if let Some(y) = year {
            if !YEAR_RANGE.contains(&y) {
                return Err(CitoError::SchemaError(format!(
                    "caseDoctrineReferences[{i}].year {y} out of range"
                )));
            }
        }
        out.push(DoctrineReference {
            edition: opt_str(item, "edition"),
            publication_place: opt_str(item, "publicationPlace"),
            publisher: opt_str(item, "publisher"),
            year,
            page: opt_str(item, "page"),
            ..reference(author, title, raw)
        });
    }
    Ok(out)
}
