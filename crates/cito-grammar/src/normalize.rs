//! Normalization rules shared by every grammar.

/// Convert a roman numeral (`IV`, `xii`) to an integer. Returns `None` for
/// anything that is not made only of roman digits.
pub fn roman_to_int(raw: &str) -> Option<u32> {
    let s = raw.trim().to_ascii_uppercase();
    if s.is_empty() {
        return None;
    }
    let value = |ch: char| match ch {
        'I' => Some(1),
        'V' => Some(5),
        'X' => Some(10),
        'L' => Some(50),
        'C' => Some(100),
        'D' => Some(500),
        'M' => Some(1000),
        _ => None,
    };
    let mut total: u32 = 0;
    let mut prev: u32 = 0;
    for ch in s.chars().rev() {
        let v = value(ch)?;
        if v < prev {
            total = total.checked_sub(v)?;
        } else {
            total += v;
            prev = v;
        }
    }
    (total > 0).then_some(total)
}

/// Parse a numeric identifier, ignoring leading zeros, thousands dots and
/// ordinal marks (`00022` → 22, `8.112` → 8112, `5º` → 5).
pub fn parse_number(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Parse an inciso that may be written as an integer or a roman numeral.
pub fn parse_inciso(raw: &str) -> Option<u32> {
    parse_number(raw).or_else(|| roman_to_int(raw))
}

/// Drop leading zeros from a digit string, keeping a single `0`.
pub fn strip_leading_zeros(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('0');
    if trimmed.is_empty() && !raw.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Expand a two-digit year (`88` → 1988, `05` → 2005).
pub fn expand_year(year: u32) -> u32 {
    match year {
        0..=29 => 2000 + year,
        30..=99 => 1900 + year,
        _ => year,
    }
}

/// Render a norm identifier as `TYPE-NUMBER-YEAR` (or `TYPE-YEAR`), with
/// separators unified to hyphens and the number stripped of dots and
/// leading zeros.
pub fn normalize_norm_identifier(raw: &str) -> String {
    let s: String = raw
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| match c {
            '/' | '_' | '–' | '—' => '-',
            c if c.is_whitespace() => '-',
            other => other,
        })
        .collect();
    if s.is_empty() {
        return s;
    }
    let parts: Vec<&str> = s.split('-').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [typ, num, year, ..] => {
            let num = strip_leading_zeros(&num.replace('.', ""));
            format!("{typ}-{num}-{year}")
        }
        [typ, year] => format!("{typ}-{year}"),
        _ => parts.join("-"),
    }
}

/// Build an identifier from its components.
pub fn compose_norm_identifier(prefix: &str, number: Option<&str>, year: Option<u32>) -> String {
    let mut parts = vec![prefix.trim().to_uppercase()];
    if let Some(num) = number {
        let cleaned = strip_leading_zeros(&num.replace('.', ""));
        if !cleaned.is_empty() {
            parts.push(cleaned);
        }
    }
    if let Some(y) = year {
        parts.push(y.to_string());
    }
    parts.join("-")
}

/// Map accented Latin letters to their ASCII base letter.
pub fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Empty or whitespace-only values become `None`.
pub fn non_blank(raw: &str) -> Option<String> {
    let t = raw.trim();
    (!t.is_empty()).then(|| t.to_string())
}

/// First four-digit year (1000..=2099) in the text.
pub fn find_year(raw: &str) -> Option<i32> {
    let bytes: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i + 4 <= bytes.len() {
        let window = &bytes[i..i + 4];
        let bounded_left = i == 0 || !bytes[i - 1].is_ascii_digit();
        let bounded_right = i + 4 == bytes.len() || !bytes[i + 4].is_ascii_digit();
        if bounded_left && bounded_right && window.iter().all(|c| c.is_ascii_digit()) {
            let s: String = window.iter().collect();
            if let Ok(year) = s.parse::<i32>() {
                if (1000..=2099).contains(&year) {
                    return Some(year);
                }
            }
        }
        i += 1;
    }
    None
}

/// Minister names: drop the `Min.` title, collapse spaces, title-case words.
pub fn normalize_minister_name(raw: &str) -> Option<String> {
    let collapsed = collapse_whitespace(raw);
    let mut rest = collapsed.as_str();
    for prefix in ["Min.", "MIN.", "min.", "Min ", "MIN ", "Ministro ", "Ministra "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped.trim_start();
            break;
        }
    }
    let titled: Vec<String> = rest
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    let name = titled.join(" ");
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roman_numerals() {
        assert_eq!(roman_to_int("IV"), Some(4));
        assert_eq!(roman_to_int("I"), Some(1));
        assert_eq!(roman_to_int("XII"), Some(12));
        assert_eq!(roman_to_int("xliv"), Some(44));
        assert_eq!(roman_to_int("IIX5"), None);
        assert_eq!(roman_to_int(""), None);
    }

    #[test]
    fn numbers_strip_leading_zeros() {
        assert_eq!(parse_number("00022"), Some(22));
        assert_eq!(parse_number("8.112"), Some(8112));
        assert_eq!(parse_number("5º"), Some(5));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(strip_leading_zeros("009605"), "9605");
        assert_eq!(strip_leading_zeros("000"), "0");
    }

    #[test]
    fn inciso_accepts_int_or_roman() {
        assert_eq!(parse_inciso("3"), Some(3));
        assert_eq!(parse_inciso("III"), Some(3));
        assert_eq!(parse_inciso("00035"), Some(35));
    }

    #[test]
    fn norm_identifiers() {
        assert_eq!(normalize_norm_identifier("lei 8.112/1990"), "LEI-8112-1990");
        assert_eq!(normalize_norm_identifier("LEI-009605-1998"), "LEI-9605-1998");
        assert_eq!(normalize_norm_identifier("CF/1988"), "CF-1988");
        assert_eq!(normalize_norm_identifier("EC_45_2004"), "EC-45-2004");
        assert_eq!(
            compose_norm_identifier("lei", Some("009605"), Some(1998)),
            "LEI-9605-1998"
        );
        assert_eq!(compose_norm_identifier("CF", None, Some(1988)), "CF-1988");
    }

    #[test]
    fn years() {
        assert_eq!(expand_year(88), 1988);
        assert_eq!(expand_year(5), 2005);
        assert_eq!(expand_year(1990), 1990);
        assert_eq!(find_year("São Paulo: Malheiros, 2015, p. 582"), Some(2015));
        assert_eq!(find_year("p. 12345"), None);
    }

    #[test]
    fn accents_and_names() {
        assert_eq!(fold_accents("Decisão Monocrática"), "Decisao Monocratica");
        assert_eq!(
            normalize_minister_name("Min.  AYRES   BRITTO").as_deref(),
            Some("Ayres Britto")
        );
        assert_eq!(normalize_minister_name("   "), None);
    }
}
