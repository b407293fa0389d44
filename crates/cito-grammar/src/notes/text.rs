//! Free-text notes as printed in the STF "Observação" block.
//!
//! ```text
//! - Acórdão(s) citado(s):
//! (UNIÃO HOMOAFETIVA, ENTIDADE FAMILIAR)
//! ADI 4277 (TP), ADPF 132 (TP).
//! - Legislação estrangeira citada:
//! Constituição da República Portuguesa, art. 36 (Portugal).
//! Número de páginas: 236.
//! ```

use std::sync::LazyLock;

use cito_types::{ItemType, NoteItem, NoteReference, NoteType};
use regex::Regex;

use super::{finish_item, is_standards_acronym, plain_item};
use crate::normalize::{collapse_whitespace, fold_accents, non_blank};

static CASE_CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \b(?P<class>Rcl|Pet|Inq|Ext|RvC|AP|[A-Z]{2,6})
        \s+(?:n[º°]\s*)?(?P<number>\d[\d.]*\d|\d)
        (?P<suffix>(?:[\s-]+(?:AgR|AGR|MC|EDv|ED|QO|RG|EI|Ref|REF))*)
        (?:\s*\((?P<org>TP|Pleno|[12][ªa]\s?T)\))?
        ",
    )
    .expect("case citation regex")
});

static JOURNAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:RTJ|RDA|RT|RF|RDP|RSTJ)\s+\d+/\d+(?:-\d+)?").expect("journal regex")
});

static SUFFIX_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]+").expect("suffix token regex"));

fn header_of(folded: &str) -> Option<NoteType> {
    const HEADERS: &[(&str, NoteType)] = &[
        ("acordao", NoteType::StfAcordao),
        ("acordaos", NoteType::StfAcordao),
        ("decisao monocratica", NoteType::StfMonocratica),
        ("decisoes monocraticas", NoteType::StfMonocratica),
        ("legislacao estrangeira", NoteType::LegislacaoEstrangeira),
        ("decisao estrangeira", NoteType::DecisaoEstrangeira),
        ("decisoes estrangeiras", NoteType::DecisaoEstrangeira),
        ("decisoes de outros tribunais", NoteType::OutrosTribunais),
        ("outros tribunais", NoteType::OutrosTribunais),
        ("veja", NoteType::Veja),
        ("cf.", NoteType::Veja),
    ];
    HEADERS
        .iter()
        .find(|(prefix, _)| folded.starts_with(prefix))
        .map(|(_, t)| *t)
}

fn is_metadata(folded: &str) -> bool {
    ["numero de paginas", "analise", "revisao", "inclusao", "alteracao"]
        .iter()
        .any(|p| folded.starts_with(p))
}

/// Content that follows a header on the same line.
fn header_remainder(line: &str, note_type: NoteType) -> Option<&str> {
    if let Some((_, rest)) = line.split_once(':') {
        return non_blank(rest).map(|_| rest.trim());
    }
    if note_type == NoteType::Veja {
        let rest = line
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())
            .unwrap_or("");
        return (!rest.is_empty()).then_some(rest);
    }
    None
}

fn descriptor_block(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim_end_matches(['.', ';']).trim();
    let inner = trimmed.strip_prefix('(')?.strip_suffix(')')?;
    if inner.contains(['(', ')']) {
        return None;
    }
    Some(inner.split(',').filter_map(non_blank).collect())
}

fn case_items(line: &str) -> Vec<(usize, NoteItem)> {
    let journals: Vec<(usize, usize)> = JOURNAL
        .find_iter(line)
        .map(|m| (m.start(), m.end()))
        .collect();
    let in_journal = |pos: usize| journals.iter().any(|(s, e)| (*s..*e).contains(&pos));

    let mut items: Vec<(usize, NoteItem)> = CASE_CITATION
        .captures_iter(line)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let class = caps.name("class")?;
            // `Recomendação CNJ 123/2022` is an instrument, not a case.
            if in_journal(whole.start()) || is_standards_acronym(class.as_str()) {
                return None;
            }
            let suffix = caps.name("suffix").map(|m| {
                SUFFIX_TOKEN
                    .find_iter(m.as_str())
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join("-")
            });
            Some((
                whole.start(),
                NoteItem {
                    item_type: ItemType::Decision,
                    case_class: Some(class.as_str().to_string()),
                    case_number: caps.name("number").map(|m| m.as_str().replace('.', "")),
                    suffix: suffix.and_then(|s| non_blank(&s)),
                    org_tag: caps.name("org").map(|m| m.as_str().replace(' ', "")),
                    country: None,
                    raw_ref: collapse_whitespace(whole.as_str()),
                },
            ))
        })
        .collect();
    items.extend(
        journals
            .iter()
            .map(|(s, e)| (*s, plain_item(ItemType::LegalJournal, &line[*s..*e]))),
    );
    items.sort_by_key(|(start, _)| *start);
    items
}

/// Split one citation line into items according to the active header.
fn segment(line: &str, note_type: NoteType) -> Vec<NoteItem> {
    let body = line.trim().trim_end_matches('.').trim();
    let items = match note_type {
        NoteType::LegislacaoEstrangeira | NoteType::DecisaoEstrangeira => body
            .split(';')
            .filter_map(non_blank)
            .map(|seg| plain_item(note_type.default_item_type(), &seg))
            .collect(),
        _ => {
            let found: Vec<NoteItem> = case_items(body).into_iter().map(|(_, i)| i).collect();
            if found.is_empty() {
                vec![plain_item(note_type.default_item_type(), body)]
            } else {
                found
            }
        }
    };
    items.into_iter().map(|i| finish_item(i, note_type)).collect()
}

/// Parse a notes block. Lines before any header are filed under `outros`.
pub fn parse_text(text: &str) -> Vec<NoteReference> {
    let mut notes = Vec::new();
    let mut header: Option<NoteType> = None;
    let mut descriptors: Vec<String> = Vec::new();

    for raw in text.lines() {
        let line = raw
            .trim()
            .trim_start_matches(['-', '•', '*'])
            .trim();
        if line.is_empty() {
            continue;
        }
        let folded = fold_accents(line).to_lowercase();

        if is_metadata(&folded) {
            header = None;
            descriptors.clear();
            continue;
        }
        let content = if let Some(found) = header_of(&folded) {
            header = Some(found);
            descriptors.clear();
            match header_remainder(line, found) {
                Some(rest) => rest,
                None => continue,
            }
        } else {
            line
        };
        if let Some(block) = descriptor_block(content) {
            descriptors = block;
            continue;
        }

        let note_type = header.unwrap_or(NoteType::Outros);
        let items = segment(content, note_type);
        notes.push(NoteReference {
            note_type,
            descriptors: descriptors.clone(),
            raw_line: content.to_string(),
            items,
        });
    }

    tracing::debug!(notes = notes.len(), "parsed notes text");
    notes
}
