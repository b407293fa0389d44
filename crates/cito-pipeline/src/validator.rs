//! Schema validation of transformer output.
//!
//! A response either parses completely against the declared shape or the
//! stage fails; nothing is partially accepted. A line-protocol response must
//! carry at least one protocol line, though that line may produce no
//! citations (a metadata-only chunk, say). JSON goes through a small repair
//! pass first, because completions routinely arrive fenced or with trailing
//! commas.

use cito_grammar::{doctrine, legislation, notes};
use cito_types::{
    CitoError, DecisionDetails, DoctrineReference, LegislationNorm, NoteReference, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared shape of a transformer response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Pipe-delimited line protocol.
    Lines,
    /// JSON document.
    Json,
    /// Section text read by the lenient free-text grammar.
    Text,
}

/// Best-effort cleanup of a JSON completion.
pub fn repair_json(raw: &str) -> String {
    let unfenced: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let mut text = unfenced.trim();
    if text.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("json")) {
        text = text[4..].trim_start();
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            text = &text[start..=end];
        }
    }
    strip_trailing_commas(text)
}

/// Drop commas that directly precede `}` or `]`, leaving string contents
/// untouched.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            continue;
        }
        match ch {
            '"' => in_string = true,
            ',' => {
                let rest = text[i + 1..].trim_start();
                if rest.starts_with(['}', ']']) {
                    continue;
                }
            }
            _ => {}
        }
        out.push(ch);
    }
    out
}

/// Repair and parse a JSON completion.
pub fn parse_json(raw: &str) -> Result<Value> {
    let repaired = repair_json(raw);
    if repaired.trim().is_empty() {
        return Err(CitoError::SchemaError("empty JSON response".into()));
    }
    serde_json::from_str(&repaired)
        .map_err(|e| CitoError::SchemaError(format!("invalid JSON: {e}")))
}

fn list_at<'a>(value: &'a Value, paths: &[&[&str]], name: &str) -> Result<&'a [Value]> {
    for path in paths {
        let found = path.iter().try_fold(value, |node, key| node.get(*key));
        if let Some(node) = found {
            return node
                .as_array()
                .map(Vec::as_slice)
                .ok_or_else(|| CitoError::SchemaError(format!("{name} is not a list")));
        }
    }
    Err(CitoError::SchemaError(format!("{name} is missing")))
}

/// Reject a completion that holds nothing but blank lines and fences.
fn require_lines(text: &str, protocol: &str) -> Result<()> {
    let has_line = text
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with("```"));
    if !has_line {
        return Err(CitoError::SchemaError(format!(
            "{protocol} response is blank"
        )));
    }
    Ok(())
}

pub fn legislation(format: ResponseFormat, text: &str) -> Result<Vec<LegislationNorm>> {
    match format {
        ResponseFormat::Lines => {
            require_lines(text, "legislation")?;
            legislation::parse_lines(text)
        }
        ResponseFormat::Json => {
            let value = parse_json(text)?;
            let items = list_at(
                &value,
                &[
                    &["caseLegislationReferences"],
                    &["caseData", "caseLegislationReferences"],
                ],
                "caseLegislationReferences",
            )?;
            legislation::from_json(items)
        }
        ResponseFormat::Text => Ok(legislation::parse_text(text)),
    }
}

pub fn notes(format: ResponseFormat, text: &str) -> Result<Vec<NoteReference>> {
    match format {
        ResponseFormat::Lines => {
            require_lines(text, "CITO-REF/1")?;
            notes::parse_lines(text)
        }
        ResponseFormat::Json => {
            let value = parse_json(text)?;
            let items = list_at(
                &value,
                &[&["caseData", "notesReferences"]],
                "caseData.notesReferences",
            )?;
            notes::from_json(items)
        }
        ResponseFormat::Text => Ok(notes::parse_text(text)),
    }
}

pub fn doctrine(format: ResponseFormat, text: &str) -> Result<Vec<DoctrineReference>> {
    match format {
        ResponseFormat::Lines => {
            require_lines(text, "CITO-DOCTRINE/1")?;
            doctrine::parse_lines(text)
        }
        ResponseFormat::Json => {
            let value = parse_json(text)?;
            let items = list_at(
                &value,
                &[&["caseData", "caseDoctrineReferences"]],
                "caseData.caseDoctrineReferences",
            )?;
            doctrine::from_json(items)
        }
        ResponseFormat::Text => Ok(doctrine::parse_text(text)),
    }
}

/// Decision details arrive as JSON, optionally wrapped in
/// `caseData.decisionDetails`.
pub fn decision_details(text: &str) -> Result<DecisionDetails> {
    let value = parse_json(text)?;
    let inner = value
        .pointer("/caseData/decisionDetails")
        .or_else(|| value.get("decisionDetails"))
        .unwrap_or(&value);
    if !inner.is_object() {
        return Err(CitoError::SchemaError(
            "decisionDetails is not an object".into(),
        ));
    }
    serde_json::from_value(inner.clone())
        .map_err(|e| CitoError::SchemaError(format!("decisionDetails: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // 1. Repair strips fences, prefix word, and trailing commas
    #[test]
    fn repair_handles_common_noise() {
        let raw = "```json\n{\"a\": [1, 2,], \"b\": {\"c\": 1,},}\n```";
        let value: Value = serde_json::from_str(&repair_json(raw)).unwrap();
        assert_eq!(value["a"], serde_json::json!([1, 2]));

        let prefixed = "json {\"x\": true}";
        assert_eq!(repair_json(prefixed), "{\"x\": true}");

        let chatter = "Segue o resultado: {\"x\": 1} Espero ter ajudado.";
        assert_eq!(repair_json(chatter), "{\"x\": 1}");
    }

    // 1b. Commas inside string values survive the repair
    #[test]
    fn repair_leaves_strings_alone() {
        let raw = r#"{"rawCitation": "ADI 4277, ] e ADPF 132, }", "q": "a \", ]", "n": [1,],}"#;
        let value: Value = serde_json::from_str(&repair_json(raw)).unwrap();
        assert_eq!(value["rawCitation"], "ADI 4277, ] e ADPF 132, }");
        assert_eq!(value["q"], "a \", ]");
        assert_eq!(value["n"], serde_json::json!([1]));
    }

    // 2. A blank line-protocol answer is rejected; one without citations is not
    #[test]
    fn lines_need_a_protocol_line() {
        let err = legislation(ResponseFormat::Lines, "\n```\n```\n").unwrap_err();
        assert!(matches!(err, CitoError::SchemaError(_)));
        let tail = notes(ResponseFormat::Lines, "M|236|2011-05-05|ABC").unwrap();
        assert!(tail.is_empty());
        let norm_only = legislation(ResponseFormat::Lines, "N|CF-1988|federal|CF|1988|").unwrap();
        assert!(norm_only[0].norm_references.is_empty());
        let ok = legislation(
            ResponseFormat::Lines,
            "N|LEI-9605-1998|federal|LEI|1998|Lei de crimes ambientais\nR|32|1||||",
        )
        .unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].norm_references[0].article_number, Some(32));
    }

    // 3. Malformed protocol lines fail with the line number
    #[test]
    fn malformed_line_reports_line() {
        let err = doctrine(ResponseFormat::Lines, "C|A|B\nX|oops").unwrap_err();
        assert!(matches!(err, CitoError::ParseError { line: 2, .. }), "{err:?}");
    }

    // 4. Legislation JSON accepted at root or under caseData
    #[test]
    fn legislation_json_locations() {
        let root = r#"{"caseLegislationReferences": [{"normIdentifier": "CF-1988", "normType": "CF"}]}"#;
        assert_eq!(legislation(ResponseFormat::Json, root).unwrap().len(), 1);
        let nested = r#"{"caseData": {"caseLegislationReferences": []}}"#;
        assert!(legislation(ResponseFormat::Json, nested).unwrap().is_empty());
        let missing = r#"{"caseData": {}}"#;
        assert!(matches!(
            legislation(ResponseFormat::Json, missing),
            Err(CitoError::SchemaError(_))
        ));
        let not_list = r#"{"caseLegislationReferences": {}}"#;
        assert!(legislation(ResponseFormat::Json, not_list).is_err());
    }

    // 5. Doctrine JSON enforces required keys and year range
    #[test]
    fn doctrine_json_checks() {
        let base = r#"{"caseData": {"caseDoctrineReferences": [{
            "author": "ALEXY, Robert", "publicationTitle": "Teoria dos direitos fundamentais",
            "edition": "2. ed.", "publicationPlace": "São Paulo", "publisher": "Malheiros",
            "year": YEAR, "page": "582", "rawCitation": "ALEXY, Robert. Teoria..."}]}}"#;
        assert_eq!(
            doctrine(ResponseFormat::Json, &base.replace("YEAR", "2015"))
                .unwrap()[0]
                .year,
            Some(2015)
        );
        assert!(doctrine(ResponseFormat::Json, &base.replace("YEAR", "null")).is_ok());
        assert!(matches!(
            doctrine(ResponseFormat::Json, &base.replace("YEAR", "3015")),
            Err(CitoError::SchemaError(_))
        ));
        let no_page = base.replace("\"page\": \"582\",", "");
        assert!(doctrine(ResponseFormat::Json, &no_page.replace("YEAR", "2015")).is_err());
    }

    // 6. Notes JSON requires caseData.notesReferences
    #[test]
    fn notes_json_location() {
        let ok = r#"{"caseData": {"notesReferences": [{"noteType": "veja", "rawLine": "x", "items": []}]}}"#;
        assert_eq!(notes(ResponseFormat::Json, ok).unwrap().len(), 1);
        assert!(notes(ResponseFormat::Json, r#"{"notesReferences": []}"#).is_err());
    }

    // 7. Decision details unwrap and type check
    #[test]
    fn decision_details_unwrap() {
        let wrapped = r#"```json
        {"caseData": {"decisionDetails": {
            "decisionResult": {"finalDecision": "procedente"},
            "ministerVotes": [{"ministerName": "Min. Ayres Britto", "voteType": "relator"},],
        }}}
        ```"#;
        let details = decision_details(wrapped).unwrap();
        assert_eq!(details.minister_votes.len(), 1);

        let bare = r#"{"ministerVotes": []}"#;
        assert!(decision_details(bare).unwrap().minister_votes.is_empty());

        assert!(decision_details("[1, 2]").is_err());
        assert!(decision_details(r#"{"ministerVotes": "all"}"#).is_err());
        assert!(decision_details("sem resposta").is_err());
    }

    // 8. Text format is lenient
    #[test]
    fn text_format_never_fails() {
        assert!(notes(ResponseFormat::Text, "nada aqui").is_ok());
    }
}
