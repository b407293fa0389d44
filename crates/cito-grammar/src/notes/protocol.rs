//! CITO-REF/1 line protocol.
//!
//! ```text
//! H|AC                      header (AC, MO, LE, DE, VJ; anything else: outros)
//! D|TEMA A, TEMA B          descriptor block
//! L|ADI 4277 (TP), ...      note line
//! I|S|ADI|4277||TP|ADI 4277 (TP)
//! M|236 p.                  metadata, closes the block
//! ```
//!
//! Item kind `S` is a decision with case fields; `T`, `J` and `L` name a
//! treaty, journal or legislation item; anything else takes the header's
//! default and drops the case fields.

use cito_types::{CitoError, ItemType, NoteItem, NoteReference, NoteType, Result};

use super::finish_item;
use crate::normalize::non_blank;
use crate::{field, is_skippable};

fn item_kind(code: &str, header: NoteType) -> ItemType {
    match code.trim().to_ascii_uppercase().as_str() {
        "S" => ItemType::Decision,
        "T" => ItemType::TreatyOrRecommendation,
        "J" => ItemType::LegalJournal,
        "L" => ItemType::Legislation,
        _ => header.default_item_type(),
    }
}

pub fn parse_lines(text: &str) -> Result<Vec<NoteReference>> {
    let mut notes: Vec<NoteReference> = Vec::new();
    let mut header: Option<NoteType> = None;
    let mut descriptors: Vec<String> = Vec::new();
    let mut open = false;

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if is_skippable(line) {
            continue;
        }
        let (tag, body) = match line.split_once('|') {
            Some((tag, body)) => (tag.trim().to_ascii_uppercase(), body),
            None => {
                return Err(CitoError::ParseError {
                    line: line_no,
                    message: "line without a tag".into(),
                })
            }
        };
        match tag.as_str() {
            "H" => {
                header = Some(NoteType::from_code(body));
                descriptors.clear();
                open = false;
            }
            "D" => {
                descriptors = body.split(',').filter_map(non_blank).collect();
                open = false;
            }
            "L" => {
                notes.push(NoteReference {
                    note_type: header.unwrap_or(NoteType::Outros),
                    descriptors: descriptors.clone(),
                    raw_line: body.trim().to_string(),
                    items: Vec::new(),
                });
                open = true;
            }
            "I" => {
                let note = match notes.last_mut() {
                    Some(note) if open => note,
                    _ => {
                        return Err(CitoError::ParseError {
                            line: line_no,
                            message: "item line outside a note line".into(),
                        })
                    }
                };
                let parts: Vec<&str> = body.splitn(6, '|').collect();
                let item_type = item_kind(field(&parts, 0), note.note_type);
                let is_case = field(&parts, 0).trim().eq_ignore_ascii_case("S");
                let case_field = |idx: usize| is_case.then(|| non_blank(field(&parts, idx))).flatten();
                let item = NoteItem {
                    item_type,
                    case_class: case_field(1),
                    case_number: case_field(2).map(|n| n.replace('.', "")),
                    suffix: case_field(3),
                    org_tag: case_field(4),
                    country: None,
                    raw_ref: field(&parts, 5).trim().to_string(),
                };
                note.items.push(finish_item(item, note.note_type));
            }
            "M" => {
                header = None;
                descriptors.clear();
                open = false;
            }
            other => {
                return Err(CitoError::ParseError {
                    line: line_no,
                    message: format!("unknown tag '{other}'"),
                })
            }
        }
    }

    tracing::debug!(notes = notes.len(), "parsed notes protocol");
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1. Headers, descriptors and items
    #[test]
    fn parses_blocks() {
        let text = "\
H|AC
D|UNIÃO HOMOAFETIVA, ENTIDADE FAMILIAR
L|ADI 4277 (TP), ADPF 132 (TP).
I|S|ADI|4277||TP|ADI 4277 (TP)
I|S|ADPF|132||TP|ADPF 132 (TP)
H|VJ
L|RTJ 63/299
I|N|||||RTJ 63/299
M|Número de páginas: 236";
        let notes = parse_lines(text).unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].note_type, NoteType::StfAcordao);
        assert_eq!(
            notes[0].descriptors,
            vec!["UNIÃO HOMOAFETIVA".to_string(), "ENTIDADE FAMILIAR".to_string()]
        );
        assert_eq!(notes[0].items.len(), 2);
        assert_eq!(notes[0].items[1].case_class.as_deref(), Some("ADPF"));
        assert_eq!(notes[0].items[1].org_tag.as_deref(), Some("TP"));

        assert_eq!(notes[1].note_type, NoteType::Veja);
        assert!(notes[1].descriptors.is_empty());
        let journal = &notes[1].items[0];
        assert_eq!(journal.item_type, ItemType::LegalJournal);
        assert_eq!(journal.case_class, None);
    }

    // 2. Non-decision items drop case fields even when present
    #[test]
    fn non_decision_items_drop_case_fields() {
        let text = "H|LE\nL|Código Civil francês (França)\nI|X|CC|1240|||Código Civil francês, art. 1240 (França)";
        let notes = parse_lines(text).unwrap();
        let item = &notes[0].items[0];
        assert_eq!(item.item_type, ItemType::Legislation);
        assert_eq!(item.case_class, None);
        assert_eq!(item.case_number, None);
        assert_eq!(item.country.as_deref(), Some("França"));
    }

    // 3. Standards bodies override the header default
    #[test]
    fn standards_body_override() {
        let text = "H|DE\nL|Recomendação 62 do CNJ\nI|N|||||Recomendação 62 do CNJ";
        let notes = parse_lines(text).unwrap();
        assert_eq!(notes[0].items[0].item_type, ItemType::TreatyOrRecommendation);

        // Also when the model files the council acronym as a case class.
        let text = "H|AC\nL|Resolução CNJ 175/2013.\nI|S|CNJ|175|||Resolução CNJ 175/2013";
        let notes = parse_lines(text).unwrap();
        assert_eq!(notes[0].items[0].item_type, ItemType::TreatyOrRecommendation);
    }

    // 4. Structural errors
    #[test]
    fn rejects_orphan_items_and_unknown_tags() {
        assert!(matches!(
            parse_lines("H|AC\nI|S|ADI|1|||ADI 1"),
            Err(CitoError::ParseError { line: 2, .. })
        ));
        assert!(matches!(
            parse_lines("X|foo"),
            Err(CitoError::ParseError { line: 1, .. })
        ));
        assert!(parse_lines("Segue a lista de notas").is_err());
    }
}
