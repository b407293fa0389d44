//! Section segmentation of the clean decision HTML.
//!
//! The portal renders every section as `div.jud-text > h4 + div`. The header
//! block is the first one whose heading is a case designation (`ADI 4277`).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use cito_grammar::normalize::{collapse_whitespace, fold_accents};
use cito_types::{CaseDocument, CitoError, Result, Section, SectionsMeta};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::sanitize::{html_to_markdown, sanitize_fragment};
use super::{StageOutput, Transformer};
use crate::stage::{Capability, StageSpec};
use crate::store::FieldChange;

static BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.jud-text").expect("jud-text selector"));
static HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h4").expect("h4 selector"));
static CASE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2,6}\s+\d").expect("case heading regex"));

/// Accent-folded, lowercase heading titles.
const TITLES: &[(&str, Section)] = &[
    ("publicacao", Section::Publication),
    ("partes", Section::Parties),
    ("ementa", Section::Summary),
    ("decisao", Section::Decision),
    ("indexacao", Section::Keywords),
    ("legislacao", Section::Legislation),
    ("observacao", Section::Notes),
    ("doutrina", Section::Doctrine),
];

fn section_for(title: &str) -> Option<Section> {
    let key = fold_accents(&collapse_whitespace(title)).to_lowercase();
    TITLES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, section)| *section)
}

fn heading_text(heading: ElementRef<'_>) -> String {
    collapse_whitespace(&heading.text().collect::<Vec<_>>().join(" "))
}

/// First `div` sibling after the heading.
fn content_after(heading: ElementRef<'_>) -> Option<ElementRef<'_>> {
    heading
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "div")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitSections {
    pub raw: BTreeMap<Section, String>,
    pub markdown: BTreeMap<Section, String>,
    pub meta: SectionsMeta,
}

/// Split clean HTML into sanitized raw sections and their markdown.
pub fn split_sections(html: &str) -> Result<SplitSections> {
    let document = Html::parse_fragment(html);
    let mut fragments: BTreeMap<Section, String> = BTreeMap::new();
    let mut header: Option<String> = None;

    for block in document.select(&BLOCK) {
        let Some(heading) = block.select(&HEADING).next() else {
            continue;
        };
        let title = heading_text(heading);
        if title.is_empty() {
            continue;
        }
        if let Some(section) = section_for(&title) {
            let fragment = content_after(heading)
                .map(|div| div.inner_html().trim().to_string())
                .unwrap_or_default();
            fragments.insert(section, fragment);
        } else if header.is_none() && CASE_HEADING.is_match(&title) {
            header = Some(block.inner_html().trim().to_string());
        }
    }

    if fragments.is_empty() {
        return Err(CitoError::SchemaError(
            "no div.jud-text sections found".into(),
        ));
    }
    if let Some(h) = header {
        fragments.insert(Section::Header, h);
    }

    let mut out = SplitSections::default();
    for (section, fragment) in fragments {
        let raw = sanitize_fragment(&fragment);
        let markdown = html_to_markdown(&raw)?;
        out.meta.sizes.insert(section, markdown.chars().count());
        out.raw.insert(section, raw);
        out.markdown.insert(section, markdown);
    }
    for section in Section::ALL {
        if out.raw.contains_key(&section) {
            out.meta.found.push(section);
        } else {
            out.meta.missing.push(section);
        }
    }
    Ok(out)
}

pub struct SectionsTransformer;

#[async_trait]
impl Transformer for SectionsTransformer {
    fn capability(&self) -> Capability {
        Capability::Segment
    }

    async fn transform(
        &self,
        _spec: &StageSpec,
        _doc: &CaseDocument,
        html: &str,
    ) -> Result<StageOutput> {
        let split = split_sections(html)?;
        let count = split.meta.found.len();
        let chars = split.meta.sizes.values().sum();
        tracing::debug!(
            found = ?split.meta.found.iter().map(Section::slug).collect::<Vec<_>>(),
            missing = ?split.meta.missing.iter().map(Section::slug).collect::<Vec<_>>(),
            "Sections split"
        );
        Ok(StageOutput::fields(
            vec![FieldChange::Sections {
                raw: split.raw,
                markdown: split.markdown,
                meta: split.meta,
            }],
            Some(count),
        )
        .with_output_chars(chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = r#"
        <div class="jud-text"><h4>ADI 4277</h4><div>Órgão julgador: Tribunal Pleno</div></div>
        <div class="jud-text"><h4>Publicação</h4><div>DJe-198 DIVULG 13-10-2011</div></div>
        <div class="jud-text"><h4>Partes</h4><div>REQTE.(S) : PROCURADOR-GERAL DA REPÚBLICA<br>INTDO.(A/S) : PRESIDENTE DA REPÚBLICA</div></div>
        <div class="jud-text"><h4>  Legislação </h4><div><p>LEG-FED CF ANO-1988</p><script>x()</script></div></div>
        <div class="jud-text"><h4>Doutrina</h4><div></div></div>
    "#;

    // 1. Sections found by folded heading, header by case designation
    #[test]
    fn splits_known_sections() {
        let split = split_sections(CLEAN).unwrap();
        assert_eq!(
            split.meta.found,
            vec![
                Section::Header,
                Section::Publication,
                Section::Parties,
                Section::Legislation,
                Section::Doctrine
            ]
        );
        assert!(split.meta.missing.contains(&Section::Notes));
        assert!(split.markdown[&Section::Header].contains("ADI 4277"));
        assert!(split.markdown[&Section::Parties].contains("INTDO.(A/S)"));
        assert!(split.markdown[&Section::Legislation].contains("LEG-FED CF ANO-1988"));
        assert!(!split.raw[&Section::Legislation].contains("script"));
        assert_eq!(split.markdown[&Section::Doctrine], "");
        assert_eq!(split.meta.sizes[&Section::Doctrine], 0);
    }

    // 2. Line breaks survive into markdown
    #[test]
    fn parties_keep_lines() {
        let split = split_sections(CLEAN).unwrap();
        let parties = &split.markdown[&Section::Parties];
        assert_eq!(parties.lines().filter(|l| !l.trim().is_empty()).count(), 2);
    }

    // 3. Pages without jud-text blocks fail validation
    #[test]
    fn no_sections_is_error() {
        assert!(matches!(
            split_sections("<div><h4>ADI 1</h4></div>"),
            Err(CitoError::SchemaError(_))
        ));
    }

    #[test]
    fn heading_matching() {
        assert_eq!(section_for("OBSERVAÇÃO"), Some(Section::Notes));
        assert_eq!(section_for("Indexação"), Some(Section::Keywords));
        assert_eq!(section_for("Ementa e Acórdão"), None);
    }
}
