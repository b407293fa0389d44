//! Deterministic parsers for the parties and keywords sections, and the
//! grammar-engine transformer.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use cito_grammar::normalize::collapse_whitespace;
use cito_types::{CaseDocument, Party, Result, Section, Stage};
use regex::Regex;

use super::{StageOutput, Transformer};
use crate::stage::{Capability, StageSpec};
use crate::store::FieldChange;
use crate::validator::ResponseFormat;

static PARTY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<ptype>[^:]{1,120})\s*:\s*(?P<pname>.+?)\s*$").expect("party line regex")
});
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*•]+\s*").expect("bullet regex"));
static BULLETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-*•]+[ \t]*").expect("bullets regex"));

/// `TYPE : NAME` lines, bullets stripped, deduplicated case-insensitively.
pub fn parse_parties(markdown: &str) -> Vec<Party> {
    let mut seen = HashSet::new();
    let mut parties = Vec::new();
    for raw in markdown.lines() {
        let line = BULLET.replace(raw.trim(), "");
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(caps) = PARTY_LINE.captures(&line) else {
            continue;
        };
        let party_type = collapse_whitespace(&caps["ptype"]);
        let name = collapse_whitespace(&caps["pname"]);
        if party_type.is_empty() || name.is_empty() {
            continue;
        }
        if seen.insert((party_type.to_lowercase(), name.to_lowercase())) {
            parties.push(Party { party_type, name });
        }
    }
    parties
}

/// Comma or semicolon separated terms, first spelling wins on duplicates.
pub fn parse_keywords(markdown: &str) -> Vec<String> {
    let blob = BULLETS.replace_all(markdown, "");
    let mut seen = HashSet::new();
    blob.split([',', ';'])
        .map(collapse_whitespace)
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .collect()
}

/// Local engine. Parties and keywords become fields; the citation stages get
/// their section text back, to be parsed by the citation grammars.
pub struct GrammarTransformer;

#[async_trait]
impl Transformer for GrammarTransformer {
    fn capability(&self) -> Capability {
        Capability::Grammar
    }

    async fn transform(
        &self,
        spec: &StageSpec,
        doc: &CaseDocument,
        input: &str,
    ) -> Result<StageOutput> {
        if spec.stage != Stage::PartiesKeywords {
            return Ok(StageOutput::text(vec![input.to_string()], ResponseFormat::Text));
        }
        let parties = parse_parties(doc.content.section(Section::Parties).unwrap_or_default());
        let keywords = parse_keywords(doc.content.section(Section::Keywords).unwrap_or_default());
        let count = parties.len() + keywords.len();
        tracing::debug!(parties = parties.len(), keywords = keywords.len(), "Parties and keywords parsed");
        Ok(StageOutput::fields(
            vec![FieldChange::PartiesKeywords { parties, keywords }],
            Some(count),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::transform::Produced;
    use cito_types::Identity;

    // 1. Party lines with bullets, headings and duplicates
    #[test]
    fn parses_party_lines() {
        let md = "# Partes\n- REQTE.(S) : PROCURADOR-GERAL   DA REPÚBLICA\n\
                  * INTDO.(A/S) : PRESIDENTE DA REPÚBLICA\nsem separador\n\
                  reqte.(s) : procurador-geral da república\n";
        let parties = parse_parties(md);
        assert_eq!(parties.len(), 2);
        assert_eq!(parties[0].party_type, "REQTE.(S)");
        assert_eq!(parties[0].name, "PROCURADOR-GERAL DA REPÚBLICA");
        assert_eq!(parties[1].party_type, "INTDO.(A/S)");
        assert!(parse_parties("  \n").is_empty());
    }

    // 2. Keywords split, trimmed and deduplicated
    #[test]
    fn parses_keywords() {
        let md = "- UNIÃO HOMOAFETIVA, ENTIDADE FAMILIAR;\n- união homoafetiva,  , DIREITO   À IGUALDADE";
        assert_eq!(
            parse_keywords(md),
            vec!["UNIÃO HOMOAFETIVA", "ENTIDADE FAMILIAR", "DIREITO À IGUALDADE"]
        );
        assert!(parse_keywords("").is_empty());
    }

    // 3. Transformer reads both sections from the document
    #[tokio::test]
    async fn transformer_reads_sections() {
        let spec =
            StageSpec::from_config(Stage::PartiesKeywords, &PipelineConfig::default()).unwrap();
        let mut doc = CaseDocument::discovered(Identity::new("1"));
        doc.content
            .markdown
            .insert(Section::Parties, "REQTE.(S) : X".into());
        doc.content.markdown.insert(Section::Keywords, "A, B".into());
        let out = GrammarTransformer.transform(&spec, &doc, "ignored").await.unwrap();
        match out.produced {
            Produced::Fields { changes, count } => {
                assert_eq!(count, Some(3));
                assert!(matches!(
                    &changes[0],
                    FieldChange::PartiesKeywords { parties, keywords }
                        if parties.len() == 1 && keywords == &["A", "B"]
                ));
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    // 4. Citation stages pass their input through as text
    #[tokio::test]
    async fn citation_stage_passes_text() {
        let mut config = PipelineConfig::default();
        config.stages.get_mut(&Stage::Notes).unwrap().engine = crate::config::Engine::Grammar;
        let spec = StageSpec::from_config(Stage::Notes, &config).unwrap();
        let doc = CaseDocument::discovered(Identity::new("1"));
        let out = GrammarTransformer.transform(&spec, &doc, "N|1|x").await.unwrap();
        assert_eq!(
            out.produced,
            Produced::Text {
                outputs: vec!["N|1|x".into()],
                format: ResponseFormat::Text
            }
        );
    }
}
