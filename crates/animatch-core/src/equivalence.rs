//! Fuzzy title equivalence.
//!
//! This is not a similarity score. Two titles are equivalent when any step
//! of a fixed, ordered cascade of transforms makes them identical. The
//! cascade runs in both argument orders so the relation is symmetric, and
//! stops at the first step that matches.

use crate::normalize::{fold_symbol_run, normalize, normalize_light, strip_parenthetical};

/// A single equivalence step over baseline-folded titles.
type Step = fn(&str, &str) -> bool;

/// Ordered cascade applied after the raw equality check. The first entry
/// is the baseline comparison itself; every later step receives the
/// baseline-folded strings.
const STEPS: &[(&str, Step)] = &[
    ("baseline", identical),
    ("normalized", normalized),
    ("light", light),
    ("dash", dash),
    ("second_season", second_season),
    ("symbol_run", symbol_run),
    ("ordinal_season", ordinal_season),
    ("parenthetical", parenthetical),
];

/// Whether `a` and `b` name the same series.
pub fn are_equivalent(a: &str, b: &str) -> bool {
    matching_step(a, b).is_some()
}

/// Name of the first cascade step under which `a` and `b` are equivalent.
pub fn matching_step(a: &str, b: &str) -> Option<&'static str> {
    core_compare(a, b).or_else(|| core_compare(b, a))
}

fn core_compare(a: &str, b: &str) -> Option<&'static str> {
    if a == b {
        return Some("raw");
    }

    let a = baseline(a);
    let b = baseline(b);
    STEPS
        .iter()
        .find(|(_, step)| step(&a, &b))
        .map(|(name, _)| *name)
}

/// Lowercase, drop spaces and dots. Later steps see only this form.
fn baseline(s: &str) -> String {
    s.to_lowercase()
        .replace(' ', "")
        .trim()
        .replace('.', "")
}

fn identical(a: &str, b: &str) -> bool {
    a == b
}

fn normalized(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn light(a: &str, b: &str) -> bool {
    normalize_light(a) == normalize_light(b)
}

fn dash(a: &str, b: &str) -> bool {
    a.replace('-', " ") == b.replace('-', " ")
}

// ── Second season aliasing ────────────────────────────────────────────

fn second_season_spaced(s: &str) -> String {
    s.replace(" 2", ":secondseason")
}

fn second_season_bare(s: &str) -> String {
    s.replace('2', "secondseason")
}

/// Both alias forms applied in sequence.
fn second_season_fold(s: &str) -> String {
    second_season_spaced(&second_season_bare(s))
}

fn second_season(a: &str, b: &str) -> bool {
    second_season_spaced(a) == second_season_spaced(b)
        || second_season_bare(a) == second_season_bare(b)
        || second_season_spaced(a) == b
        || second_season_bare(a) == b
        || second_season_fold(a) == b
}

// ── Symbol runs ───────────────────────────────────────────────────────

/// `III` → `3` and `!!` → `2`, folded independently.
fn symbol_run(a: &str, b: &str) -> bool {
    ['i', '!']
        .iter()
        .any(|&symbol| fold_symbol_run(a, symbol) == fold_symbol_run(b, symbol))
}

// ── Ordinal suffixes ──────────────────────────────────────────────────

fn strip_ordinal_season(s: &str) -> String {
    s.replace("ndseason", "").replace("rdseason", "")
}

fn ordinal_season(a: &str, b: &str) -> bool {
    let stripped = strip_ordinal_season(a);
    stripped == strip_ordinal_season(b) || stripped == b
}

// ── Parentheticals ────────────────────────────────────────────────────

fn parenthetical(a: &str, b: &str) -> bool {
    let a_stripped = strip_parenthetical(a);
    let b_stripped = strip_parenthetical(b);
    a_stripped == b
        || a_stripped == b_stripped
        || second_season_fold(&a_stripped) == b
        || second_season_fold(&a_stripped) == second_season_fold(&b_stripped)
        || second_season_bare(&a_stripped) == b_stripped
}
