//! Conformance tests for the citation grammars.
//!
//! Each test feeds a realistic STF block (or LLM protocol answer) through the
//! public entry points and checks the normalised records.

use cito_grammar::doctrine::{self, WorkAlias, WorkCatalog};
use cito_grammar::normalize::{normalize_norm_identifier, parse_inciso, parse_number};
use cito_grammar::{legislation, notes};
use cito_types::{ItemType, Jurisdiction, NormType, NoteType, WorkMatchType};

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

#[test]
fn roman_incisos_convert_to_integers() {
    assert_eq!(parse_inciso("IV"), Some(4));
    assert_eq!(parse_inciso("I"), Some(1));
    assert_eq!(parse_inciso("XII"), Some(12));
}

#[test]
fn leading_zeros_are_stripped() {
    assert_eq!(parse_number("00022"), Some(22));
    let norms = legislation::parse_text("LEG-FED LEI-009605 ANO-1998\nART-00022");
    assert_eq!(norms[0].norm_identifier, "LEI-9605-1998");
    assert_eq!(norms[0].norm_references[0].article_number, Some(22));
    assert_eq!(normalize_norm_identifier("LEI-009605-1998"), "LEI-9605-1998");
}

// ---------------------------------------------------------------------------
// Legislation
// ---------------------------------------------------------------------------

#[test]
fn bare_article_is_caput() {
    let norms = legislation::parse_text("CF/88, art. 5");
    let r = &norms[0].norm_references[0];
    assert_eq!(r.article_number, Some(5));
    assert!(r.is_caput);
    assert_eq!(r.inciso_number, None);
}

#[test]
fn qualified_article_is_not_caput() {
    let norms = legislation::parse_text("CF/88, art. 5, III");
    let r = &norms[0].norm_references[0];
    assert!(!r.is_caput);
    assert_eq!(r.inciso_number, Some(3));
}

#[test]
fn single_paragraph_excludes_numeric_paragraph() {
    let protocol = "N|LEI-8112-1990|federal|LEI|1990|\nR|1||||1|\nR|2|||3|1|";
    for norm in legislation::parse_lines(protocol).unwrap() {
        for r in norm.norm_references {
            if r.is_paragraph_single {
                assert_eq!(r.paragraph_number, None);
            }
            if r.paragraph_number.is_some() {
                assert!(!r.is_paragraph_single);
            }
        }
    }

    let text = legislation::parse_text("LEG-FED LEI-008112 ANO-1990\nART-00001 PAR-ÚNICO\nART-00002 PAR-00003");
    let refs = &text[0].norm_references;
    assert!(refs[0].is_paragraph_single && refs[0].paragraph_number.is_none());
    assert!(!refs[1].is_paragraph_single && refs[1].paragraph_number == Some(3));
}

#[test]
fn protocol_and_index_text_agree() {
    let from_protocol = legislation::parse_lines(
        "N|CF-1988|federal|CF|1988|\nR|5|0|XXXV|||\nR|37|0||6||",
    )
    .unwrap();
    let from_text =
        legislation::parse_text("LEG-FED CF ANO-1988\nART-00005 INC-00035\nART-00037 PAR-00006");
    assert_eq!(from_protocol[0].norm_identifier, from_text[0].norm_identifier);
    assert_eq!(from_protocol[0].norm_references, from_text[0].norm_references);
    assert_eq!(from_text[0].jurisdiction_level, Jurisdiction::Federal);
    assert_eq!(from_text[0].norm_type, NormType::Cf);
}

#[test]
fn jurisdiction_is_never_guessed() {
    let norms = legislation::parse_text("Lei 8.112/1990, art. 1º");
    assert_eq!(norms[0].jurisdiction_level, Jurisdiction::Unknown);
    let norms = legislation::parse_text("Lei estadual 1.234/2001 (SP), art. 2º");
    assert_eq!(norms[0].jurisdiction_level, Jurisdiction::State);
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

#[test]
fn comma_joined_citations_become_two_items() {
    let parsed = notes::parse_text("Acórdão(s) citado(s):\nADI 4277 (TP), ADPF 132 (TP).");
    let items = &parsed[0].items;
    assert_eq!(items.len(), 2);
    assert_eq!(
        (items[0].case_class.as_deref(), items[0].case_number.as_deref(), items[0].org_tag.as_deref()),
        (Some("ADI"), Some("4277"), Some("TP"))
    );
    assert_eq!(
        (items[1].case_class.as_deref(), items[1].case_number.as_deref(), items[1].org_tag.as_deref()),
        (Some("ADPF"), Some("132"), Some("TP"))
    );
}

#[test]
fn descriptors_stop_at_next_header() {
    let text = "\
Acórdão(s) citado(s):
(TEMA A)
ADI 1234 (TP).
ADI 5678 (TP).
Decisão monocrática citada:
RE 111.
(TEMA B)
RE 222.";
    let parsed = notes::parse_text(text);
    assert_eq!(parsed.len(), 4);
    assert_eq!(parsed[0].descriptors, vec!["TEMA A".to_string()]);
    assert_eq!(parsed[1].descriptors, vec!["TEMA A".to_string()]);
    assert!(parsed[2].descriptors.is_empty());
    assert_eq!(parsed[2].note_type, NoteType::StfMonocratica);
    assert_eq!(parsed[3].descriptors, vec!["TEMA B".to_string()]);
}

#[test]
fn protocol_descriptor_scope_matches_text() {
    let protocol = "H|AC\nD|TEMA A\nL|ADI 1234 (TP).\nI|S|ADI|1234||TP|ADI 1234 (TP)\nH|MO\nL|RE 111.\nI|S|RE|111|||RE 111";
    let parsed = notes::parse_lines(protocol).unwrap();
    assert_eq!(parsed[0].descriptors, vec!["TEMA A".to_string()]);
    assert!(parsed[1].descriptors.is_empty());
}

#[test]
fn standards_bodies_override_header_type() {
    let parsed = notes::parse_text("Decisões estrangeiras citadas:\nRecomendação 62/2020 do CNJ.");
    assert_eq!(parsed[0].items[0].item_type, ItemType::TreatyOrRecommendation);
}

// ---------------------------------------------------------------------------
// Doctrine
// ---------------------------------------------------------------------------

#[test]
fn doctrine_boundary_keeps_internal_commas() {
    let text = "ALEXY, Robert. Teoria dos direitos fundamentais. São Paulo: Malheiros, 2015, p. 582. CANOTILHO, José Joaquim Gomes. Direito constitucional e teoria da constituição. Coimbra: Almedina, 1993, p. 139.";
    let refs = doctrine::parse_text(text);
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].author, "ALEXY, Robert");
    assert_eq!(refs[1].author, "CANOTILHO, José Joaquim Gomes");
    assert_eq!(refs[1].year, Some(1993));
}

#[test]
fn work_keys_are_shared_across_variants() {
    let catalog = WorkCatalog::new(&[WorkAlias {
        canonical: "Teoria dos Direitos Fundamentais".into(),
        variants: vec!["Teoría de los derechos fundamentales".into()],
    }]);
    let mut refs = doctrine::parse_lines(
        "C|ALEXY, Robert|Teoria dos direitos fundamentais: revista e atualizada||||2015|582|a\n\
         C|ALEXY, Robert|Teoría de los derechos fundamentales||||1993||b",
    )
    .unwrap();
    catalog.annotate(&mut refs);
    assert_eq!(refs[0].work_key, refs[1].work_key);
    assert_eq!(refs[1].work_match_type, Some(WorkMatchType::Alias));
    assert_eq!(
        refs[0].publication_title_norm.as_deref(),
        Some("teoria dos direitos fundamentais")
    );
}
