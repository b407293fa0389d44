//! Citation records produced by the grammars and persisted under `derivedData`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Legislation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NormType {
    Cf,
    Ec,
    Lc,
    Lei,
    Decreto,
    Resolucao,
    Portaria,
    Outra,
}

impl NormType {
    /// Map a norm-type token to its type. Unknown tokens become `Outra`.
    pub fn from_token(token: &str) -> Self {
        let upper = token.trim().to_uppercase();
        match upper.as_str() {
            "CF" => NormType::Cf,
            "EC" | "EMC" => NormType::Ec,
            "LC" | "LCP" => NormType::Lc,
            "LEI" => NormType::Lei,
            "DECRETO" | "DEC" => NormType::Decreto,
            "RESOLUCAO" | "RESOLUÇÃO" | "RES" => NormType::Resolucao,
            "PORTARIA" | "PRT" => NormType::Portaria,
            _ => NormType::Outra,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NormType::Cf => "CF",
            NormType::Ec => "EC",
            NormType::Lc => "LC",
            NormType::Lei => "LEI",
            NormType::Decreto => "DECRETO",
            NormType::Resolucao => "RESOLUCAO",
            NormType::Portaria => "PORTARIA",
            NormType::Outra => "OUTRA",
        }
    }
}

impl fmt::Display for NormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jurisdiction {
    Federal,
    State,
    Municipal,
    #[default]
    Unknown,
}

impl Jurisdiction {
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "federal" => Jurisdiction::Federal,
            "state" => Jurisdiction::State,
            "municipal" => Jurisdiction::Municipal,
            _ => Jurisdiction::Unknown,
        }
    }
}

/// One device (article / inciso / paragraph / letter) cited within a norm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormReference {
    pub article_number: Option<u32>,
    pub is_caput: bool,
    pub inciso_number: Option<u32>,
    pub paragraph_number: Option<u32>,
    pub is_paragraph_single: bool,
    pub letter_code: Option<String>,
}

impl NormReference {
    /// A bare article citation: caput implied.
    pub fn article(article_number: u32) -> Self {
        Self {
            article_number: Some(article_number),
            is_caput: true,
            inciso_number: None,
            paragraph_number: None,
            is_paragraph_single: false,
            letter_code: None,
        }
    }

    /// True when no inciso, paragraph, or letter qualifies the article.
    pub fn is_bare(&self) -> bool {
        self.inciso_number.is_none()
            && self.paragraph_number.is_none()
            && !self.is_paragraph_single
            && self.letter_code.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegislationNorm {
    pub norm_identifier: String,
    pub jurisdiction_level: Jurisdiction,
    pub norm_type: NormType,
    pub norm_year: Option<u32>,
    pub norm_description: String,
    pub norm_references: Vec<NormReference>,
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    StfAcordao,
    StfMonocratica,
    LegislacaoEstrangeira,
    DecisaoEstrangeira,
    OutrosTribunais,
    Veja,
    Outros,
}

impl NoteType {
    /// Header code of the CITO-REF/1 line protocol.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "AC" => NoteType::StfAcordao,
            "MO" => NoteType::StfMonocratica,
            "LE" => NoteType::LegislacaoEstrangeira,
            "DE" => NoteType::DecisaoEstrangeira,
            "VJ" => NoteType::Veja,
            _ => NoteType::Outros,
        }
    }

    /// Parse the persisted snake_case name. Unknown names become `Outros`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "stf_acordao" => NoteType::StfAcordao,
            "stf_monocratica" => NoteType::StfMonocratica,
            "legislacao_estrangeira" => NoteType::LegislacaoEstrangeira,
            "decisao_estrangeira" => NoteType::DecisaoEstrangeira,
            "outros_tribunais" => NoteType::OutrosTribunais,
            "veja" => NoteType::Veja,
            _ => NoteType::Outros,
        }
    }

    pub fn is_foreign(&self) -> bool {
        matches!(
            self,
            NoteType::LegislacaoEstrangeira | NoteType::DecisaoEstrangeira
        )
    }

    /// Item type implied by the active header.
    pub fn default_item_type(&self) -> ItemType {
        match self {
            NoteType::LegislacaoEstrangeira => ItemType::Legislation,
            NoteType::Veja => ItemType::LegalJournal,
            _ => ItemType::Decision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Decision,
    Legislation,
    TreatyOrRecommendation,
    LegalJournal,
}

impl ItemType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "decision" => Some(ItemType::Decision),
            "legislation" => Some(ItemType::Legislation),
            "treaty_or_recommendation" => Some(ItemType::TreatyOrRecommendation),
            "legal_journal" => Some(ItemType::LegalJournal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteItem {
    pub item_type: ItemType,
    pub case_class: Option<String>,
    pub case_number: Option<String>,
    pub suffix: Option<String>,
    pub org_tag: Option<String>,
    pub country: Option<String>,
    pub raw_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteReference {
    pub note_type: NoteType,
    #[serde(default)]
    pub descriptors: Vec<String>,
    pub raw_line: String,
    pub items: Vec<NoteItem>,
}

// ---------------------------------------------------------------------------
// Doctrine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkMatchType {
    Alias,
    Normalized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctrineReference {
    pub author: String,
    pub publication_title: String,
    pub edition: Option<String>,
    pub publication_place: Option<String>,
    pub publisher: Option<String>,
    pub year: Option<i32>,
    pub page: Option<String>,
    pub raw_citation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_title_norm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_match_type: Option<WorkMatchType>,
}

// ---------------------------------------------------------------------------
// Parties / decision details
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    #[serde(rename = "type")]
    pub party_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinisterVote {
    #[serde(default)]
    pub minister_name: Option<String>,
    #[serde(default)]
    pub vote_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    #[serde(default)]
    pub final_decision: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Decision outcome and votes. Fields beyond the ones the dashboard reads are
/// kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_result: Option<DecisionResult>,
    #[serde(default)]
    pub minister_votes: Vec<MinisterVote>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
