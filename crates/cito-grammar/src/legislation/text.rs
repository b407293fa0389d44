//! Free-text legislation citations.
//!
//! Two dialects are recognised. When the text carries STF index markers
//! (`LEG-FED LEI-009605 ANO-1998`, `ART-00022 PAR-ÚNICO`) only those tokens
//! are read and token-free lines become norm descriptions. Otherwise the text
//! is read as prose (`art. 5º, III, da CF/88`, `Lei 8.112/1990, art. 1º`).

use std::sync::LazyLock;

use cito_types::{Jurisdiction, LegislationNorm, NormReference, NormType};
use regex::{Captures, Regex};

use super::{Device, NormBuilder};
use crate::normalize::{
    collapse_whitespace, compose_norm_identifier, expand_year, parse_inciso, parse_number,
    roman_to_int,
};

static INDEX_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        LEG-(?P<leg>FED|EST|MUN|DIS|INT)\s+(?P<ltype>[A-Z]+)(?:-(?P<lnum>[\d.]+))?(?:\s+ANO-(?P<lyear>\d{4}))?
        | ART-(?P<art>\d+)
        | INC-(?P<inc>\d+|[IVXLCDM]+)\b
        | PAR-(?:(?P<par>\d+)|(?P<single>ÚNICO|UNICO))
        | LET-(?P<let>[A-Za-z])\b
        | (?P<caput>"CAPUT")
        | UF-(?P<uf>[A-Z]{2})\b
        "#,
    )
    .expect("index token regex")
});

static PROSE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        (?P<norm>
            (?:,\s*)?
            \b(?P<ntype>
                (?i:constitui[çc][ãa]o\s+federal) | CF
              | (?i:emenda\s+constitucional) | EC
              | (?i:lei\s+complementar) | LC
              | (?i:decreto-lei) | (?i:decreto) | (?i:lei)
              | (?i:resolu[çc][ãa]o) | (?i:portaria)
            )\b
            (?:\s+(?P<njur>(?i:federal|estadual|municipal|distrital)))?
            (?:\s*(?:n[º°o]\.?\s*)?(?P<nnum>\d[\d.]*\d|\d))?
            (?:
                \s*/\s*(?P<nyear>\d{4}|\d{2})\b
              | ,?\s+de\s+(?:\d{1,2}[º°]?\s+de\s+\p{L}+\s+de\s+)?(?P<nyear_long>\d{4})\b
            )?
            (?:\s*\((?P<nuf>[A-Z]{2})\))?
        )
        | (?P<arts>(?i:\barts?\.|\bartigos?\b))\s*(?P<artlist>\d+\s*[º°]?(?:\s*(?:,|e)\s*\d+\s*[º°]?)*)
        | (?i:\binc(?:iso)?s?\.?)\s*(?P<inc>[IVXLCDM]+|\d+)\b
        | (?:,\s*|\be\s+)(?P<roman>[IVXLCDM]+)\b
        | (?P<single>(?i:par[áa]grafo\s+[úu]nico)|§\s*(?i:[úu]nico))
        | §+\s*(?P<par>\d+)\s*[º°o]?
        | (?i:\bal[íi]neas?)\s*["“]?(?P<let>[a-z])\b
        | (?P<caput>(?i:\bcaput\b))
        | (?P<boundary>;|\n)
        "#,
    )
    .expect("prose token regex")
});

static CAPUT_OF_NEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*,?\s*d[oa]s?\s+art").expect("caput lookahead regex"));

const STATES: &[&str] = &[
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB",
    "PR", "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

fn is_state(uf: &str) -> bool {
    STATES.contains(&uf)
}

/// Parse free text in either dialect.
pub fn parse_text(text: &str) -> Vec<LegislationNorm> {
    let norms = if text.contains("LEG-") {
        parse_index(text)
    } else {
        parse_prose(text)
    };
    tracing::debug!(norms = norms.len(), "parsed legislation text");
    norms
}

// ---------------------------------------------------------------------------
// Article cursor
// ---------------------------------------------------------------------------

/// Tracks the article being qualified and the devices cited within it.
#[derive(Debug, Default)]
struct Cursor {
    article: Option<u32>,
    caput: bool,
    device: Device,
    devices: Vec<Device>,
}

impl Cursor {
    fn start(&mut self, article: u32, caput: bool) -> Vec<NormReference> {
        let done = self.finish();
        self.article = Some(article);
        self.caput = caput;
        done
    }

    fn finish(&mut self) -> Vec<NormReference> {
        let Some(article) = self.article.take() else {
            *self = Cursor::default();
            return Vec::new();
        };
        let mut devices = std::mem::take(&mut self.devices);
        let device = std::mem::take(&mut self.device);
        if !device.is_empty() || devices.is_empty() {
            devices.push(device);
        }
        let caput = std::mem::take(&mut self.caput);
        devices
            .into_iter()
            .map(|d| d.into_reference(article, caput))
            .collect()
    }

    fn active(&self) -> bool {
        self.article.is_some()
    }

    fn inciso(&mut self, n: u32) {
        if self.device.inciso.is_none() {
            self.device.inciso = Some(n);
            return;
        }
        let next = Device {
            inciso: Some(n),
            paragraph: self.device.paragraph,
            paragraph_single: self.device.paragraph_single,
            letter: None,
        };
        self.devices.push(std::mem::replace(&mut self.device, next));
    }

    fn paragraph(&mut self, n: Option<u32>) {
        if !self.device.is_empty() {
            self.devices.push(std::mem::take(&mut self.device));
        }
        match n {
            Some(n) => self.device.paragraph = Some(n),
            None => self.device.paragraph_single = true,
        }
    }

    fn letter(&mut self, code: &str) {
        if self.device.letter.is_some() {
            let mut next = self.device.clone();
            next.letter = Some(code.to_string());
            self.devices.push(std::mem::replace(&mut self.device, next));
        } else {
            self.device.letter = Some(code.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// STF index dialect
// ---------------------------------------------------------------------------

fn index_jurisdiction(code: &str) -> Jurisdiction {
    match code {
        "FED" => Jurisdiction::Federal,
        "EST" | "DIS" => Jurisdiction::State,
        "MUN" => Jurisdiction::Municipal,
        _ => Jurisdiction::Unknown,
    }
}

fn parse_index(text: &str) -> Vec<LegislationNorm> {
    let mut builder = NormBuilder::new();
    let mut norm: Option<usize> = None;
    let mut cursor = Cursor::default();
    let mut descriptions: Vec<(usize, String)> = Vec::new();

    for line in text.lines() {
        let mut residue = String::new();
        let mut last = 0;

        for caps in INDEX_TOKEN.captures_iter(line) {
            let Some(whole) = caps.get(0) else { continue };
            residue.push_str(&line[last..whole.start()]);
            residue.push(' ');
            last = whole.end();

            if let Some(leg) = caps.name("leg") {
                if let Some(n) = norm {
                    commit(&mut builder, n, cursor.finish());
                }
                let prefix = caps.name("ltype").map_or("", |m| m.as_str());
                let year = caps.name("lyear").and_then(|m| parse_number(m.as_str()));
                let identifier =
                    compose_norm_identifier(prefix, caps.name("lnum").map(|m| m.as_str()), year);
                norm = Some(builder.norm(
                    identifier,
                    index_jurisdiction(leg.as_str()),
                    NormType::from_token(prefix),
                    year,
                    "",
                ));
                residue.clear();
            } else if let Some(n) = norm {
                index_device(&mut builder, n, &mut cursor, &caps);
            }
        }
        residue.push_str(&line[last..]);

        if let Some(n) = norm {
            let description = collapse_whitespace(&residue);
            if !description.is_empty() {
                descriptions.push((n, description));
            }
        }
    }
    if let Some(n) = norm {
        commit(&mut builder, n, cursor.finish());
    }

    let mut norms = builder.finish();
    for (idx, description) in descriptions {
        if let Some(target) = norms.get_mut(idx) {
            if target.norm_description.is_empty() {
                target.norm_description = description;
            }
        }
    }
    norms
}

fn index_device(builder: &mut NormBuilder, norm: usize, cursor: &mut Cursor, caps: &Captures) {
    if let Some(m) = caps.name("art") {
        if let Some(n) = parse_number(m.as_str()) {
            let done = cursor.start(n, false);
            commit(builder, norm, done);
        }
    } else if let Some(m) = caps.name("inc") {
        if let (true, Some(n)) = (cursor.active(), parse_inciso(m.as_str())) {
            cursor.inciso(n);
        }
    } else if let Some(m) = caps.name("par") {
        if cursor.active() {
            cursor.paragraph(parse_number(m.as_str()));
        }
    } else if caps.name("single").is_some() {
        if cursor.active() {
            cursor.paragraph(None);
        }
    } else if let Some(m) = caps.name("let") {
        if cursor.active() {
            cursor.letter(m.as_str());
        }
    } else if caps.name("caput").is_some() {
        if cursor.active() {
            cursor.caput = true;
        }
    } else if let Some(m) = caps.name("uf") {
        if is_state(m.as_str()) {
            builder.set_jurisdiction(norm, Jurisdiction::State);
        }
    }
}

fn commit(builder: &mut NormBuilder, norm: usize, refs: Vec<NormReference>) {
    for r in refs {
        builder.reference(norm, r);
    }
}

// ---------------------------------------------------------------------------
// Prose dialect
// ---------------------------------------------------------------------------

fn prose_norm_type(raw: &str) -> (NormType, &'static str) {
    let folded = crate::normalize::fold_accents(&collapse_whitespace(raw)).to_lowercase();
    match folded.as_str() {
        "cf" | "constituicao federal" => (NormType::Cf, "CF"),
        "ec" | "emenda constitucional" => (NormType::Ec, "EC"),
        "lc" | "lei complementar" => (NormType::Lc, "LC"),
        "decreto-lei" => (NormType::Outra, "DEL"),
        "decreto" => (NormType::Decreto, "DECRETO"),
        "resolucao" => (NormType::Resolucao, "RESOLUCAO"),
        "portaria" => (NormType::Portaria, "PORTARIA"),
        _ => (NormType::Lei, "LEI"),
    }
}

fn prose_jurisdiction(word: Option<&str>, uf: Option<&str>) -> Jurisdiction {
    match word.map(str::to_lowercase).as_deref() {
        Some("federal") => return Jurisdiction::Federal,
        Some("estadual") | Some("distrital") => return Jurisdiction::State,
        Some("municipal") => return Jurisdiction::Municipal,
        _ => {}
    }
    match uf {
        Some(uf) if is_state(uf) => Jurisdiction::State,
        _ => Jurisdiction::Unknown,
    }
}

/// A connector (`da`, `do`, ...) between a device and a norm means the
/// device belongs to the norm that follows.
fn is_connector(gap: &str) -> bool {
    let word = gap
        .trim_matches(|c: char| c.is_whitespace() || c == ',')
        .to_lowercase();
    matches!(
        word.as_str(),
        "da" | "do" | "das" | "dos" | "desta" | "deste" | "na" | "no"
    )
}

struct ProseState {
    builder: NormBuilder,
    norm: Option<usize>,
    cursor: Cursor,
    pending: Vec<NormReference>,
    caput_next: bool,
}

impl ProseState {
    fn flush_pending(&mut self) {
        self.pending.extend(self.cursor.finish());
        if let Some(n) = self.norm {
            let refs = std::mem::take(&mut self.pending);
            commit(&mut self.builder, n, refs);
        }
    }
}

fn starts_numbered(rest: &str) -> bool {
    rest.trim_start()
        .starts_with(|c: char| c.is_ascii_digit() || c == '/')
}

fn parse_prose(text: &str) -> Vec<LegislationNorm> {
    let mut st = ProseState {
        builder: NormBuilder::new(),
        norm: None,
        cursor: Cursor::default(),
        pending: Vec::new(),
        caput_next: false,
    };
    let mut last = 0;
    let mut pos = 0;

    while let Some(caps) = PROSE_TOKEN.captures_at(text, pos) {
        let Some(whole) = caps.get(0) else { break };
        let gap = &text[last..whole.start()];
        let gap_start = last;
        last = whole.end();
        pos = whole.end();

        if caps.name("norm").is_some() {
            if text[whole.end()..].starts_with('-') {
                continue;
            }
            let (norm_type, prefix) = prose_norm_type(caps.name("ntype").map_or("", |m| m.as_str()));
            let number = caps.name("nnum").map(|m| m.as_str());
            let year = caps
                .name("nyear")
                .or_else(|| caps.name("nyear_long"))
                .and_then(|m| parse_number(m.as_str()))
                .map(expand_year);
            if number.is_none() && year.is_none() && norm_type != NormType::Cf {
                continue;
            }
            let jurisdiction = prose_jurisdiction(
                caps.name("njur").map(|m| m.as_str()),
                caps.name("nuf").map(|m| m.as_str()),
            );
            let identifier = compose_norm_identifier(prefix, number, year);
            let leading_comma = whole.as_str().starts_with(',');

            st.pending.extend(st.cursor.finish());
            let belongs_to_next = st.norm.is_none() || (!leading_comma && is_connector(gap));
            if !belongs_to_next {
                if let Some(n) = st.norm {
                    let refs = std::mem::take(&mut st.pending);
                    commit(&mut st.builder, n, refs);
                }
            }
            let idx = st.builder.norm(identifier, jurisdiction, norm_type, year, "");
            st.norm = Some(idx);
            let refs = std::mem::take(&mut st.pending);
            commit(&mut st.builder, idx, refs);
        } else if let Some(list) = caps.name("artlist") {
            for n in list
                .as_str()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty() && *s != "e")
                .filter_map(parse_number)
            {
                let caput = std::mem::take(&mut st.caput_next);
                let done = st.cursor.start(n, caput);
                st.pending.extend(done);
            }
        } else if let Some(m) = caps.name("inc") {
            if let (true, Some(n)) = (st.cursor.active(), parse_inciso(m.as_str())) {
                st.cursor.inciso(n);
            }
        } else if let Some(m) = caps.name("roman") {
            // `e LC 101/2000`: letters that happen to be roman numerals but
            // carry a number are a norm; scan again from them.
            if starts_numbered(&text[m.end()..]) {
                pos = m.start();
                last = gap_start;
                continue;
            }
            if let (true, Some(n)) = (st.cursor.active(), roman_to_int(m.as_str())) {
                st.cursor.inciso(n);
            }
        } else if caps.name("single").is_some() {
            if st.cursor.active() {
                st.cursor.paragraph(None);
            }
        } else if let Some(m) = caps.name("par") {
            if st.cursor.active() {
                st.cursor.paragraph(parse_number(m.as_str()));
            }
        } else if let Some(m) = caps.name("let") {
            if st.cursor.active() {
                st.cursor.letter(m.as_str());
            }
        } else if caps.name("caput").is_some() {
            if CAPUT_OF_NEXT.is_match(&text[whole.end()..]) {
                st.caput_next = true;
            } else if st.cursor.active() {
                st.cursor.caput = true;
            }
        } else if caps.name("boundary").is_some() {
            st.flush_pending();
        }
    }
    st.flush_pending();
    st.builder.finish()
}
