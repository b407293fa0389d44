//! Turn raw stage text into stored fields: validate every output with the
//! stage's grammar and merge chunked results.

use cito_grammar::normalize::normalize_minister_name;
use cito_grammar::{NormBuilder, WorkCatalog};
use cito_types::{CitoError, LegislationNorm, Result, Stage};

use crate::store::FieldChange;
use crate::validator::{self, ResponseFormat};

/// Parse `outputs` (one per call) into the stage's field change and count.
pub fn interpret(
    stage: Stage,
    format: ResponseFormat,
    outputs: &[String],
    catalog: &WorkCatalog,
) -> Result<(Vec<FieldChange>, usize)> {
    match stage {
        Stage::Legislation => {
            let mut parts = Vec::with_capacity(outputs.len());
            for text in outputs {
                parts.push(validator::legislation(format, text)?);
            }
            let norms = merge_norms(parts);
            let count = norms.len();
            Ok((vec![FieldChange::Legislation(norms)], count))
        }
        Stage::Notes => {
            let mut notes = Vec::new();
            for text in outputs {
                notes.extend(validator::notes(format, text)?);
            }
            let count = notes.len();
            Ok((vec![FieldChange::Notes(notes)], count))
        }
        Stage::Doctrine => {
            let mut refs = Vec::new();
            for text in outputs {
                for r in validator::doctrine(format, text)? {
                    if !refs.contains(&r) {
                        refs.push(r);
                    }
                }
            }
            catalog.annotate(&mut refs);
            let count = refs.len();
            Ok((vec![FieldChange::Doctrine(refs)], count))
        }
        Stage::DecisionDetails => {
            let text = outputs.first().ok_or_else(|| {
                CitoError::SchemaError("decision details response is empty".into())
            })?;
            let mut details = validator::decision_details(text)?;
            for vote in &mut details.minister_votes {
                vote.minister_name = vote
                    .minister_name
                    .as_deref()
                    .and_then(normalize_minister_name);
            }
            let count = details.minister_votes.len();
            Ok((vec![FieldChange::DecisionDetails(Some(details))], count))
        }
        Stage::Scrape | Stage::HtmlClean | Stage::Sections | Stage::PartiesKeywords => {
            Err(CitoError::TransformError {
                stage: stage.key().to_string(),
                message: "stage does not produce text output".into(),
            })
        }
    }
}

/// Norms from several chunks, deduplicated by identifier, first seen first.
fn merge_norms(parts: Vec<Vec<LegislationNorm>>) -> Vec<LegislationNorm> {
    let mut builder = NormBuilder::new();
    for norm in parts.into_iter().flatten() {
        let idx = builder.norm(
            norm.norm_identifier,
            norm.jurisdiction_level,
            norm.norm_type,
            norm.norm_year,
            &norm.norm_description,
        );
        for reference in norm.norm_references {
            builder.reference(idx, reference);
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cito_grammar::WorkAlias;

    fn outputs(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    // 1. Chunked legislation merges by identifier
    #[test]
    fn legislation_chunks_merge() {
        let (changes, count) = interpret(
            Stage::Legislation,
            ResponseFormat::Lines,
            &outputs(&[
                "N|CF-1988|federal|CF|1988|Constituição Federal\nR|5|1||||",
                "N|CF-1988|federal|CF|1988|\nR|5|1||||\nR|226|0||3||",
            ]),
            &WorkCatalog::default(),
        )
        .unwrap();
        assert_eq!(count, 1);
        match &changes[0] {
            FieldChange::Legislation(norms) => {
                assert_eq!(norms[0].norm_description, "Constituição Federal");
                assert_eq!(norms[0].norm_references.len(), 2);
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }

    // 2. A bad chunk fails the whole stage
    #[test]
    fn invalid_chunk_fails() {
        let err = interpret(
            Stage::Notes,
            ResponseFormat::Lines,
            &outputs(&["H|AC\nL|ADI 4277", "X|???"]),
            &WorkCatalog::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CitoError::ParseError { .. }));
    }

    // 2b. A chunk that only closes the block carries no citations but is valid
    #[test]
    fn metadata_only_chunk_is_accepted() {
        let (changes, count) = interpret(
            Stage::Notes,
            ResponseFormat::Lines,
            &outputs(&[
                "H|AC\nL|ADI 4277 (TP).\nI|S|ADI|4277||TP|ADI 4277 (TP)",
                "M|236|2011-05-05|ABC",
            ]),
            &WorkCatalog::default(),
        )
        .unwrap();
        assert_eq!(count, 1);
        match &changes[0] {
            FieldChange::Notes(notes) => assert_eq!(notes[0].items.len(), 1),
            other => panic!("unexpected change: {other:?}"),
        }
    }

    // 3. Doctrine gets work identity
    #[test]
    fn doctrine_is_annotated() {
        let catalog = WorkCatalog::new(&[WorkAlias {
            canonical: "Teoria dos direitos fundamentais".into(),
            variants: vec!["Theorie der Grundrechte".into()],
        }]);
        let (changes, count) = interpret(
            Stage::Doctrine,
            ResponseFormat::Lines,
            &outputs(&["C|ALEXY, Robert|Theorie der Grundrechte||||1986||ALEXY"]),
            &catalog,
        )
        .unwrap();
        assert_eq!(count, 1);
        match &changes[0] {
            FieldChange::Doctrine(refs) => {
                assert_eq!(
                    refs[0].work_match_type,
                    Some(cito_types::WorkMatchType::Alias)
                );
                assert!(refs[0].work_key.is_some());
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }

    // 4. Decision details normalise minister names
    #[test]
    fn decision_details_names() {
        let json = r#"{"caseData":{"decisionDetails":{
            "decisionResult":{"finalDecision":"procedente"},
            "ministerVotes":[{"ministerName":"MIN. AYRES   BRITTO","voteType":"relator"},{"voteType":"vogal"}]
        }}}"#;
        let (changes, count) = interpret(
            Stage::DecisionDetails,
            ResponseFormat::Json,
            &outputs(&[json]),
            &WorkCatalog::default(),
        )
        .unwrap();
        assert_eq!(count, 2);
        match &changes[0] {
            FieldChange::DecisionDetails(Some(details)) => {
                assert_eq!(
                    details.minister_votes[0].minister_name.as_deref(),
                    Some("Ayres Britto")
                );
                assert_eq!(details.minister_votes[1].minister_name, None);
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[test]
    fn fetch_stage_has_no_text_form() {
        assert!(matches!(
            interpret(Stage::Scrape, ResponseFormat::Text, &[], &WorkCatalog::default()),
            Err(CitoError::TransformError { .. })
        ));
    }
}
