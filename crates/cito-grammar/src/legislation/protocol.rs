//! `N|` / `R|` line protocol.
//!
//! ```text
//! N|normId|jurisdiction|type|year|description
//! R|article|caput(1/0)|inciso|paragraph|parUnico(1/0)|letter
//! ```
//!
//! `R` lines attach to the most recent `N`. Blank lines and code fences are
//! ignored; any other line is a parse error carrying its 1-based number.

use cito_types::{CitoError, Jurisdiction, LegislationNorm, NormType, Result};

use super::{Device, NormBuilder};
use crate::normalize::{non_blank, normalize_norm_identifier, parse_inciso, parse_number};
use crate::{field, is_skippable};

const NORM_FIELDS: usize = 6;
const REFERENCE_FIELDS: usize = 7;

fn malformed(line: usize, message: String) -> CitoError {
    CitoError::ParseError { line, message }
}

/// Split a record and check its arity. Trailing empty fields beyond the
/// expected count are tolerated.
fn record<'a>(line: &'a str, expected: usize, line_no: usize) -> Result<Vec<&'a str>> {
    let parts: Vec<&str> = line.split('|').map(str::trim).collect();
    let extra_filled = parts.iter().skip(expected).any(|p| !p.is_empty());
    if parts.len() < expected || extra_filled {
        return Err(malformed(
            line_no,
            format!("expected {expected} fields, found {}", parts.len()),
        ));
    }
    Ok(parts)
}

/// Blank means absent; anything else must parse.
fn optional(
    raw: &str,
    name: &str,
    line_no: usize,
    parse: impl Fn(&str) -> Option<u32>,
) -> Result<Option<u32>> {
    if raw.is_empty() {
        return Ok(None);
    }
    parse(raw)
        .map(Some)
        .ok_or_else(|| malformed(line_no, format!("invalid {name} '{raw}'")))
}

fn flag(raw: &str, name: &str, line_no: usize) -> Result<bool> {
    match raw {
        "" | "0" => Ok(false),
        "1" => Ok(true),
        other => Err(malformed(line_no, format!("invalid {name} flag '{other}'"))),
    }
}

fn paragraph(raw: &str) -> Option<u32> {
    parse_number(raw.trim_start_matches('§').trim())
}

/// Parse a complete protocol response.
pub fn parse_lines(text: &str) -> Result<Vec<LegislationNorm>> {
    let mut builder = NormBuilder::new();
    let mut current: Option<usize> = None;

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if is_skippable(line) {
            continue;
        }
        let tag = line.split('|').next().unwrap_or("").trim().to_ascii_uppercase();
        match tag.as_str() {
            "N" => {
                let parts = record(line, NORM_FIELDS, line_no)?;
                let identifier = normalize_norm_identifier(field(&parts, 1));
                if identifier.is_empty() {
                    return Err(malformed(line_no, "norm line without identifier".into()));
                }
                let year = optional(field(&parts, 4), "year", line_no, parse_number)?
                    .filter(|y| *y != 0);
                current = Some(builder.norm(
                    identifier,
                    Jurisdiction::from_token(field(&parts, 2)),
                    NormType::from_token(field(&parts, 3)),
                    year,
                    field(&parts, 5),
                ));
            }
            "R" => {
                let parts = record(line, REFERENCE_FIELDS, line_no)?;
                let norm = current.ok_or_else(|| {
                    malformed(line_no, "reference line before any norm line".into())
                })?;
                let article = parse_number(field(&parts, 1)).ok_or_else(|| {
                    malformed(line_no, format!("non-numeric article '{}'", field(&parts, 1)))
                })?;
                let caput = flag(field(&parts, 2), "caput", line_no)?;
                let device = Device {
                    inciso: optional(field(&parts, 3), "inciso", line_no, parse_inciso)?,
                    paragraph: optional(field(&parts, 4), "paragraph", line_no, paragraph)?,
                    paragraph_single: flag(field(&parts, 5), "paragraph single", line_no)?,
                    letter: non_blank(field(&parts, 6)),
                };
                builder.reference(norm, device.into_reference(article, caput));
            }
            other => return Err(malformed(line_no, format!("unknown tag '{other}'"))),
        }
    }

    tracing::debug!(norms = builder.len(), "parsed legislation protocol");
    Ok(builder.finish())
}
