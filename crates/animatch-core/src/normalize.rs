//! Title normalization used for dictionary keys and equivalence checks.
//!
//! Two normalizers live here. [`normalize`] is the full pipeline used to
//! build the fallback lookup keys of the title index. [`normalize_light`] is
//! the lighter pass the equivalence cascade applies after its own baseline
//! folding. Both are pure and locale-independent.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// First parenthetical group, non-greedy, spanning newlines.
static RE_PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\(.*?\)").expect("parenthetical pattern is valid"));

/// Characters dropped outright by the full pipeline.
const DROPPED: &[char] = &['"', '\'', '!', '`', '?'];

/// Characters replaced by a single space by the full pipeline.
const SPACED: &[char] = &[
    '/', ',', '.', ':', ';', '\\', '(', ')', '{', '}', '[', ']', '+', '-', '_', '=', '\u{2013}',
    '*',
];

/// Zero-width markers some feeds embed between words.
const MARKERS: &[char] = &['\u{200B}', '\u{2423}'];

/// Apply the full normalization pipeline.
///
/// Steps applied in order:
/// 1. Lowercase + NFKD decomposition
/// 2. Character filtering (diacritics, quotes, separators, ampersand)
/// 3. Article removal
/// 4. Whitespace collapse + trim
///
/// Article removal is a literal substring replace, so words that merely
/// contain "the " lose it as well ("bathe x" becomes "bax"). Existing id
/// mappings depend on this, keep it.
pub fn normalize(s: &str) -> String {
    let s = decompose(s);
    let s = filter_chars(&s);
    let s = strip_articles_and_spaces(&s);
    s.trim().to_string()
}

// ── Step 1: Lowercase + NFKD ──────────────────────────────────────────

/// Lowercase, decompose, then lowercase again so compatibility mappings
/// that yield capitals (e.g. modifier letters) cannot survive.
fn decompose(s: &str) -> String {
    s.to_lowercase().nfkd().collect::<String>().to_lowercase()
}

// ── Step 2: Character filtering ───────────────────────────────────────

fn filter_chars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\u{02B0}'..='\u{0333}' => {}
            c if DROPPED.contains(&c) => {}
            c if SPACED.contains(&c) => out.push(' '),
            '&' => out.push_str(" and "),
            c => out.push(c),
        }
    }
    out
}

// ── Step 3/4: Articles + whitespace ───────────────────────────────────

/// Remove article patterns and collapse spaces, repeating until stable.
///
/// Both passes can expose new matches for each other ("a  the  b"), so
/// they run as one fixpoint loop.
fn strip_articles_and_spaces(s: &str) -> String {
    let mut current = s.to_string();
    loop {
        let next = collapse_spaces(
            &current
                .replace(", the", "")
                .replace("the ", "")
                .replace(" the ", ""),
        );
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Collapse every run of spaces into one space.
pub fn collapse_spaces(s: &str) -> String {
    let mut current = s.to_string();
    while current.contains("  ") {
        current = current.replace("  ", " ");
    }
    current
}

// ── Light normalizer ──────────────────────────────────────────────────

/// The lighter normalizer applied as one equivalence step.
///
/// Strips one parenthetical, treats `.`/`-` as spaces, drops quotes and
/// colons, spells out `&`, and undoes the digit-for-syllable German
/// ordinals fansubs like to use (`2wei` → `zwei`).
pub fn normalize_light(s: &str) -> String {
    let mut s = s.to_string();
    // Inside the cascade the input has already lost its spaces.
    let sep = if s.contains(' ') { " " } else { "" };
    if s.contains("Gekijyouban") {
        s = format!("{}{sep}Movie", s.replace("Gekijyouban", "").trim());
    }
    if s.contains("gekijyouban") {
        s = format!("{}{sep}movie", s.replace("gekijyouban", "").trim());
    }

    let s = strip_parenthetical(&s);
    let mut s = s
        .replace(['.', '-'], " ")
        .replace(['`', '\''], "")
        .replace('&', "and")
        .replace(':', "");
    s.retain(|c| !MARKERS.contains(&c));
    s.replace("2wei", "zwei")
        .replace("3rei", "drei")
        .replace("4ier", "vier")
        .trim()
        .to_string()
}

// ── Parentheticals ────────────────────────────────────────────────────

/// The first `(...)` group of `s`, if any.
pub fn first_parenthetical(s: &str) -> Option<&str> {
    RE_PARENTHETICAL.find(s).map(|m| m.as_str())
}

/// Remove every occurrence of the first `(...)` group. Returns `s`
/// unchanged when there is none.
pub fn strip_parenthetical(s: &str) -> String {
    match first_parenthetical(s) {
        Some(group) => s.replace(group, ""),
        None => s.to_string(),
    }
}

// ── Symbol runs ───────────────────────────────────────────────────────

/// Replace the longest run of `symbol` with its length written in digits.
///
/// Matching ignores ASCII case, so `III`, `iii` and `IiI` all fold to `3`.
/// Every run of that maximal length is replaced; shorter runs are kept.
/// A lone symbol is not a run: `"online"` keeps its `i`.
pub fn fold_symbol_run(s: &str, symbol: char) -> String {
    let longest = longest_run(s, symbol);
    if longest < 2 {
        return s.to_string();
    }

    let digits = longest.to_string();
    let mut out = String::with_capacity(s.len());
    let mut run = String::new();
    for c in s.chars() {
        if c.eq_ignore_ascii_case(&symbol) {
            run.push(c);
            continue;
        }
        flush_run(&mut out, &mut run, longest, &digits);
        out.push(c);
    }
    flush_run(&mut out, &mut run, longest, &digits);
    out
}

fn longest_run(s: &str, symbol: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in s.chars() {
        if c.eq_ignore_ascii_case(&symbol) {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn flush_run(out: &mut String, run: &mut String, longest: usize, digits: &str) {
    if run.is_empty() {
        return;
    }
    if run.chars().count() == longest {
        out.push_str(digits);
    } else {
        out.push_str(run);
    }
    run.clear();
}
