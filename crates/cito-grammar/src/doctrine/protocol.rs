//! CITO-DOCTRINE/1 line protocol:
//! `C|author|title|edition|place|publisher|year|page|rawCitation`.
//!
//! The raw citation is the last field and may itself contain `|`.

use cito_types::{CitoError, DoctrineReference, Result};

use super::{checked_year, reference};
use crate::normalize::{non_blank, parse_number};
use crate::{field, is_skippable};

pub fn parse_lines(text: &str) -> Result<Vec<DoctrineReference>> {
    let mut refs = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if is_skippable(line) {
            continue;
        }
        let Some(body) = line
            .strip_prefix("C|")
            .or_else(|| line.strip_prefix("c|"))
        else {
            return Err(CitoError::ParseError {
                line: i + 1,
                message: "expected a 'C|' citation line".into(),
            });
        };
        let parts: Vec<&str> = body.splitn(8, '|').collect();
        let author = non_blank(field(&parts, 0));
        let title = non_blank(field(&parts, 1));
        let raw_citation = field(&parts, 7).trim().to_string();
        if raw_citation.is_empty() && author.is_none() && title.is_none() {
            continue;
        }
        let year = parse_number(field(&parts, 5)).and_then(|y| i32::try_from(y).ok());
        refs.push(DoctrineReference {
            edition: non_blank(field(&parts, 2)),
            publication_place: non_blank(field(&parts, 3)),
            publisher: non_blank(field(&parts, 4)),
            year: checked_year(year),
            page: non_blank(field(&parts, 6)),
            ..reference(
                author.unwrap_or_default(),
                title.unwrap_or_default(),
                raw_citation,
            )
        });
    }
    tracing::debug!(refs = refs.len(), "parsed doctrine protocol");
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1. Full record
    #[test]
    fn parses_record() {
        let text = "C|ALEXY, Robert|Teoria dos direitos fundamentais|2. ed.|São Paulo|Malheiros|2015|582|ALEXY, Robert. Teoria dos direitos fundamentais. 2. ed. São Paulo: Malheiros, 2015, p. 582.";
        let refs = parse_lines(text).unwrap();
        assert_eq!(refs.len(), 1);
        let r = &refs[0];
        assert_eq!(r.author, "ALEXY, Robert");
        assert_eq!(r.edition.as_deref(), Some("2. ed."));
        assert_eq!(r.year, Some(2015));
        assert_eq!(r.page.as_deref(), Some("582"));
        assert!(r.raw_citation.ends_with("p. 582."));
    }

    // 2. Empty optional fields are null; implausible years dropped
    #[test]
    fn optional_fields_are_null() {
        let refs = parse_lines("C|SILVA, José Afonso|Curso de direito constitucional positivo||||9999||SILVA").unwrap();
        let r = &refs[0];
        assert_eq!(r.edition, None);
        assert_eq!(r.publication_place, None);
        assert_eq!(r.year, None);
        assert_eq!(r.page, None);
    }

    // 3. Lines without content are skipped; a pipe in the raw text survives
    #[test]
    fn skips_empty_and_keeps_raw_pipes() {
        let text = "C||||||||\nC|X, Y|T||||||raw | with pipe";
        let refs = parse_lines(text).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].raw_citation, "raw | with pipe");
    }

    // 4. Prose answers are rejected
    #[test]
    fn rejects_non_protocol_lines() {
        assert!(matches!(
            parse_lines("C|A|B||||||r\nNenhuma outra citação."),
            Err(CitoError::ParseError { line: 2, .. })
        ));
    }
}
