//! Work identity for doctrine citations: a normalised title, a stable key and
//! an optional alias table that folds known variants into one canonical work.

use std::collections::HashMap;
use std::sync::LazyLock;

use cito_types::{DoctrineReference, WorkMatchType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::normalize::collapse_whitespace;

const DESCRIPTIVE_PREFIXES: &[&str] = &[
    "promulgada", "rev", "revista", "atual", "atualizada", "comentada", "anotada", "com",
    "coord", "coordenado", "coordenada", "org", "organizado", "organizada", "ed", "edição",
    "edicao", "volume", "vol", "tomo",
];

static DATE_LONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}\s+de\s+\w+\s+de\s+\d{4}\b").expect("long date regex"));
static DATE_SHORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2}/\d{2}/\d{4}\b").expect("short date regex"));
static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:rev\.?|revista|atual(?:izada)?|comentada|anotada|coord\.?|coordenador(?:es|a)?|org\.?|organizado(?:ra)?|vol\.?|volume|tomo|ed\.?|edi[cç][aã]o|\d+a)\b",
    )
    .expect("noise regex")
});

/// Normalise a publication title for matching: lowercase, no quotes or
/// brackets, no trailing punctuation, descriptive subtitles and edition noise
/// removed, hyphens as spaces.
pub fn normalize_title(raw: &str) -> String {
    let s: String = collapse_whitespace(raw)
        .chars()
        .map(|c| if c == '–' || c == '—' { '-' } else { c })
        .filter(|c| !matches!(c, '"' | '\'' | '[' | ']' | '(' | ')'))
        .collect();
    let s = s.trim().trim_end_matches(['.', ';', ':']).to_string();
    if s.is_empty() {
        return s;
    }
    let mut lower = s.to_lowercase();

    if let Some((before, after)) = lower.split_once(':') {
        let after = after.trim();
        let descriptive = DESCRIPTIVE_PREFIXES.iter().any(|p| after.starts_with(p))
            || DATE_LONG.is_match(after)
            || DATE_SHORT.is_match(after);
        if descriptive {
            lower = before.trim().to_string();
        }
    }

    let lower = DATE_LONG.replace_all(&lower, "").into_owned();
    let mut lower = DATE_SHORT.replace_all(&lower, "").into_owned();

    let cleaned = collapse_whitespace(&NOISE.replace_all(&lower, " "));
    if cleaned.chars().count() >= 8 {
        lower = cleaned;
    }
    collapse_whitespace(&lower.replace('-', " "))
}

/// Stable identifier of a normalised title.
pub fn work_key(norm_title: &str) -> String {
    let digest = Sha256::digest(format!("work:{norm_title}").as_bytes());
    hex::encode(digest)
}

/// One canonical work and the title variants that refer to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkAlias {
    pub canonical: String,
    #[serde(default)]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkIdentity {
    pub norm_title: String,
    pub key: String,
    pub match_type: WorkMatchType,
}

/// Lookup table from normalised variant to canonical title.
#[derive(Debug, Clone, Default)]
pub struct WorkCatalog {
    aliases: HashMap<String, String>,
}

impl WorkCatalog {
    pub fn new(works: &[WorkAlias]) -> Self {
        let mut aliases = HashMap::new();
        for work in works {
            let canonical = work.canonical.trim();
            if canonical.is_empty() {
                continue;
            }
            for variant in std::iter::once(canonical).chain(work.variants.iter().map(String::as_str)) {
                let norm = normalize_title(variant);
                if !norm.is_empty() {
                    aliases.insert(norm, canonical.to_string());
                }
            }
        }
        Self { aliases }
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Resolve a raw title. Empty titles have no identity.
    pub fn identify(&self, raw_title: &str) -> Option<WorkIdentity> {
        let norm = normalize_title(raw_title);
        if norm.is_empty() {
            return None;
        }
        if let Some(canonical) = self.aliases.get(&norm) {
            let canonical_norm = normalize_title(canonical);
            return Some(WorkIdentity {
                key: work_key(&canonical_norm),
                norm_title: canonical_norm,
                match_type: WorkMatchType::Alias,
            });
        }
        Some(WorkIdentity {
            key: work_key(&norm),
            norm_title: norm,
            match_type: WorkMatchType::Normalized,
        })
    }

    /// Fill the work fields of every reference.
    pub fn annotate(&self, refs: &mut [DoctrineReference]) {
        for r in refs.iter_mut() {
            match self.identify(&r.publication_title) {
                Some(id) => {
                    r.publication_title_norm = Some(id.norm_title);
                    r.work_key = Some(id.key);
                    r.work_match_type = Some(id.match_type);
                }
                None => {
                    r.publication_title_norm = None;
                    r.work_key = None;
                    r.work_match_type = None;
                }
            }
        }
    }
}
