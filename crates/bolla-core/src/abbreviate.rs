//! Deterministic address abbreviation
//!
//! Compresses an address string to a fixed character budget by applying a
//! fixed dictionary of Italian street-type and honorific abbreviations, then
//! ordinal/article contractions, then whitespace-boundary truncation. Pure
//! function of (text, budget, dictionary): same input, same output, every
//! run. That determinism keeps duplicate detection and support tickets
//! reproducible.
//!
//! Abbreviation never touches postal codes or provinces; callers apply it
//! to street, locality, and notes fields only.

use regex::Regex;
use std::sync::OnceLock;

/// Fixed substitution dictionary. Applied longest-pattern-first so compound
/// forms ("Strada Statale") win over their prefixes ("Strada").
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("Via", "V."),
    ("Viale", "V.le"),
    ("Piazza", "P.zza"),
    ("Piazzale", "P.le"),
    ("Corso", "C.so"),
    ("Largo", "L.go"),
    ("Vicolo", "Vic."),
    ("Strada", "Str."),
    ("Contrada", "C.da"),
    ("Località", "Loc."),
    ("Frazione", "Fraz."),
    ("Traversa", "Trav."),
    ("Galleria", "Gall."),
    ("Lungomare", "L.mare"),
    ("Lungotevere", "L.tevere"),
    ("Lungarno", "L.arno"),
    ("Circonvallazione", "Circ."),
    ("Passaggio", "Pass."),
    ("Salita", "Sal."),
    ("Discesa", "Disc."),
    ("Borgo", "B.go"),
    ("Rione", "R.ne"),
    ("Quartiere", "Q.re"),
    ("Centro Commerciale", "C.C."),
    ("Parco Commerciale", "P.C."),
    ("Zona Industriale", "Z.I."),
    ("Area Industriale", "A.I."),
    ("Strada Statale", "S.S."),
    ("Strada Provinciale", "S.P."),
    ("Strada Regionale", "S.R."),
    ("Strada Comunale", "S.C."),
    ("Nazionale", "Naz."),
    ("Provinciale", "Prov."),
    ("Regionale", "Reg."),
    ("Comunale", "Com."),
    ("Generale", "Gen."),
    ("Maggiore", "Magg."),
    ("Colonnello", "Col."),
    ("Capitano", "Cap."),
    ("Tenente", "Ten."),
    ("Cavaliere", "Cav."),
    ("Commendatore", "Comm."),
    ("Professore", "Prof."),
    ("Dottore", "Dott."),
    ("Ingegnere", "Ing."),
    ("Avvocato", "Avv."),
    ("Senatore", "Sen."),
    ("Onorevole", "On."),
    ("Monsignore", "Mons."),
    ("Santo", "S."),
    ("Santa", "S."),
    ("San", "S."),
    ("Santi", "SS."),
    ("Beato", "B."),
    ("Beata", "B."),
];

/// Ordinal-number contractions used when the main dictionary is not enough.
const ORDINALS: &[(&str, &str)] = &[
    ("Primo", "1°"),
    ("Prima", "1ª"),
    ("Secondo", "2°"),
    ("Seconda", "2ª"),
    ("Terzo", "3°"),
    ("Terza", "3ª"),
    ("Quarto", "4°"),
    ("Quarta", "4ª"),
    ("Quinto", "5°"),
    ("Quinta", "5ª"),
];

/// Articles dropped as a last resort before truncation.
const ARTICLES: &[&str] = &["del", "della", "dei", "delle", "degli", "dello"];

/// Truncation prefers a whitespace boundary this close to the budget.
const BOUNDARY_WINDOW: usize = 5;

fn compiled_abbreviations() -> &'static Vec<(Regex, &'static str)> {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        let mut entries: Vec<_> = ABBREVIATIONS.to_vec();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        entries
            .into_iter()
            .map(|(pat, abbrev)| (word_regex(pat), abbrev))
            .collect()
    })
}

fn compiled_ordinals() -> &'static Vec<(Regex, &'static str)> {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        ORDINALS
            .iter()
            .map(|&(pat, abbrev)| (word_regex(pat), abbrev))
            .collect()
    })
}

fn compiled_articles() -> &'static Vec<Regex> {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        ARTICLES
            .iter()
            .map(|a| {
                Regex::new(&format!(r"(?i) {}\s+", regex::escape(a)))
                    .unwrap_or_else(|e| panic!("bad article pattern '{}': {}", a, e))
            })
            .collect()
    })
}

fn word_regex(pattern: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(pattern)))
        .unwrap_or_else(|e| panic!("bad abbreviation pattern '{}': {}", pattern, e))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Abbreviate `text` to at most `max_len` characters.
///
/// No-op on strings already within budget, which also makes the function
/// idempotent: the output always fits the budget, so a second pass returns
/// it unchanged.
pub fn abbreviate(text: &str, max_len: usize) -> String {
    if char_len(text) <= max_len {
        return text.to_string();
    }

    let mut result = text.to_string();

    for (re, abbrev) in compiled_abbreviations() {
        if char_len(&result) <= max_len {
            break;
        }
        result = re.replace_all(&result, *abbrev).into_owned();
    }

    if char_len(&result) > max_len {
        result = contract_ordinals_and_articles(&result);
    }

    if char_len(&result) > max_len {
        result = truncate_at_boundary(&result, max_len);
    }

    result
}

/// True when `text` exceeds `max_len` characters.
pub fn needs_abbreviation(text: &str, max_len: usize) -> bool {
    char_len(text) > max_len
}

fn contract_ordinals_and_articles(text: &str) -> String {
    let mut result = text.to_string();

    for (re, abbrev) in compiled_ordinals() {
        result = re.replace_all(&result, *abbrev).into_owned();
    }
    for re in compiled_articles() {
        result = re.replace_all(&result, " ").into_owned();
    }

    // Collapse any doubled spaces the contractions left behind.
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").unwrap_or_else(|e| panic!("{}", e)));
    spaces.replace_all(result.trim(), " ").into_owned()
}

/// Cut `text` down to `max_len` characters, preferring the last whitespace
/// boundary when one falls within the final [`BOUNDARY_WINDOW`] characters
/// of the budget. Without a boundary that close, cut mid-word.
fn truncate_at_boundary(text: &str, max_len: usize) -> String {
    let prefix: String = text.chars().take(max_len).collect();

    let last_boundary = prefix
        .chars()
        .enumerate()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .last();

    match last_boundary {
        Some(idx) if idx + BOUNDARY_WINDOW >= max_len => {
            prefix.chars().take(idx).collect::<String>().trim_end().to_string()
        },
        _ => prefix.trim_end().to_string(),
    }
}
