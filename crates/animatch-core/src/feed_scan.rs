//! Full-text fallback search over the raw title feed.
//!
//! Used only after both dictionary lookups miss. Every `<anime>` block that
//! contains the leading half of both search strings is a candidate; the
//! candidates are then narrowed with [`are_equivalent`] against each block's
//! title list.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::equivalence::are_equivalent;

/// Outcome of a raw feed search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSearch {
    /// Exactly one block matched.
    Found(String),
    /// Several blocks matched equally well.
    Ambiguous(usize),
    NotFound,
}

impl FeedSearch {
    pub fn found(self) -> Option<String> {
        match self {
            Self::Found(aid) => Some(aid),
            Self::Ambiguous(_) | Self::NotFound => None,
        }
    }
}

/// One `<anime aid="...">...</anime>` record, borrowed from the feed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimeBlock<'a> {
    pub aid: &'a str,
    pub body: &'a str,
}

/// Leading half of `s`, but at least `min_len` characters when `s` has
/// that many.
pub fn half_string(s: &str, min_len: usize) -> &str {
    let len = s.chars().count();
    let half = len / 2;
    let take = if half > min_len { half } else { len.min(min_len) };
    match s.char_indices().nth(take) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Iterate over the `<anime>` blocks of a feed. Truncated or attribute-less
/// records end the walk or are skipped; they never fail it.
pub fn anime_blocks(xml: &str) -> impl Iterator<Item = AnimeBlock<'_>> + '_ {
    let mut rest = xml;
    std::iter::from_fn(move || loop {
        let start = rest.find("<anime")?;
        let after_name = &rest[start + "<anime".len()..];
        let open_end = after_name.find('>')?;
        let attrs = &after_name[..open_end];
        let body_and_rest = &after_name[open_end + 1..];
        // A self-closing record has no titles.
        if attrs.trim_end().ends_with('/') {
            rest = body_and_rest;
            continue;
        }

        let Some(close) = body_and_rest.find("</anime>") else {
            rest = "";
            return None;
        };
        let body = &body_and_rest[..close];
        rest = &body_and_rest[close + "</anime>".len()..];

        // `<animetitles>` also starts with `<anime`.
        if !attrs.is_empty() && !attrs.starts_with(char::is_whitespace) {
            rest = body_and_rest;
            continue;
        }
        if let Some(aid) = aid_attribute(attrs) {
            return Some(AnimeBlock { aid, body });
        }
    })
}

fn aid_attribute(attrs: &str) -> Option<&str> {
    let value = &attrs[attrs.find("aid=\"")? + "aid=\"".len()..];
    let aid = &value[..value.find('"')?];
    (!aid.is_empty()).then_some(aid)
}

/// The `<title>` texts of one block body. Markup that fails to parse ends
/// the list early.
pub fn block_titles(body: &str) -> Vec<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut titles = Vec::new();
    let mut in_title = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"title" => in_title = true,
            Ok(Event::End(e)) if e.name().as_ref() == b"title" => in_title = false,
            Ok(Event::Text(e)) if in_title => match e.unescape() {
                Ok(text) => titles.push(text.into_owned()),
                Err(_) => continue,
            },
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    titles
}

/// Search `xml` for the block naming `a` / `b`.
///
/// When `a == b`, the candidate containing the most literal occurrences of
/// the search string wins outright if it is the unique maximum. Otherwise a
/// candidate must have a title equivalent to `b` or `a`, and only a single
/// such candidate counts as found.
pub fn search_feed_text(xml: &str, a: &str, b: &str) -> FeedSearch {
    if a.trim().is_empty() || b.trim().is_empty() {
        return FeedSearch::NotFound;
    }

    let needle_a = half_string(a, 4).to_lowercase();
    let needle_b = half_string(b, 4).to_lowercase();
    let candidates: Vec<AnimeBlock<'_>> = anime_blocks(xml)
        .filter(|block| {
            let body = block.body.to_lowercase();
            body.contains(&needle_a) && body.contains(&needle_b)
        })
        .collect();

    if candidates.is_empty() {
        return FeedSearch::NotFound;
    }

    if a == b {
        if let Some(aid) = most_occurrences(&candidates, a) {
            return FeedSearch::Found(aid.to_string());
        }
    }

    let mut verified: Vec<&str> = candidates
        .iter()
        .filter(|block| {
            block_titles(block.body)
                .iter()
                .any(|title| are_equivalent(title, b) || are_equivalent(title, a))
        })
        .map(|block| block.aid)
        .collect();
    verified.dedup();

    match verified.as_slice() {
        [] => FeedSearch::NotFound,
        [aid] => FeedSearch::Found(aid.to_string()),
        many => FeedSearch::Ambiguous(many.len()),
    }
}

/// The candidate with strictly the most occurrences of `needle`.
fn most_occurrences<'a>(candidates: &[AnimeBlock<'a>], needle: &str) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    let mut tied = false;
    for block in candidates {
        let count = block.body.matches(needle).count();
        if count == 0 {
            continue;
        }
        match best {
            Some((_, top)) if count < top => {}
            Some((_, top)) if count == top => tied = true,
            _ => {
                best = Some((block.aid, count));
                tied = false;
            }
        }
    }
    if tied {
        return None;
    }
    best.map(|(aid, _)| aid)
}
