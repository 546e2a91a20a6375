use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::MatchError;
use crate::models::{TitleEntry, TitleType};
use crate::normalize::normalize;

/// Immutable title dictionary built from one title feed.
///
/// Keys are case-folded titles. The literal titles from the feed are
/// inserted first; their normalized forms are added afterwards only where
/// they do not collide with a literal key.
#[derive(Debug, Clone)]
pub struct TitleIndex {
    titles: HashMap<String, TitleEntry>,
    literal_count: usize,
    source_modified: Option<SystemTime>,
    loaded_at: DateTime<Utc>,
}

impl TitleIndex {
    /// Look up a title, ignoring case.
    pub fn lookup(&self, title: &str) -> Option<&TitleEntry> {
        self.titles.get(&title.to_lowercase())
    }

    /// Total number of keys, normalized expansions included.
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    /// Number of keys that came straight from the feed.
    pub fn literal_len(&self) -> usize {
        self.literal_count
    }

    /// Modification time of the feed file this index was built from.
    pub fn source_modified(&self) -> Option<SystemTime> {
        self.source_modified
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Whether the backing feed is older than `max_age` (or of unknown age).
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.source_modified {
            Some(modified) => SystemTime::now()
                .duration_since(modified)
                .map(|age| age > max_age)
                .unwrap_or(false),
            None => true,
        }
    }
}

/// Accumulates feed entries under the "better type wins" rule.
#[derive(Debug, Default)]
pub struct TitleIndexBuilder {
    titles: HashMap<String, TitleEntry>,
}

impl TitleIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. On a key collision the entry with the better
    /// (lower) title type replaces the existing one; ties keep the first.
    pub fn insert(&mut self, entry: TitleEntry) {
        let key = entry.title.to_lowercase();
        match self.titles.get(&key) {
            Some(existing) if !entry.title_type.outranks(existing.title_type) => {}
            _ => {
                self.titles.insert(key, entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    /// Finish the primary index and add normalized fallback keys.
    pub fn build(self, source_modified: Option<SystemTime>) -> TitleIndex {
        let mut titles = self.titles;
        let literal_count = titles.len();

        // Computed from a snapshot so expansions never see each other.
        let mut expansions: Vec<(String, TitleEntry)> = titles
            .iter()
            .map(|(key, entry)| (normalize(key), entry))
            .filter(|(normalized, _)| !normalized.is_empty() && !titles.contains_key(normalized))
            .map(|(normalized, entry)| (normalized, entry.clone()))
            .collect();

        // Several literals can normalize to the same key; the best-ranked
        // one claims it so the result does not depend on hash order.
        expansions.sort_by(|(ka, a), (kb, b)| {
            ka.cmp(kb)
                .then(a.title_type.cmp(&b.title_type))
                .then_with(|| a.title.cmp(&b.title))
        });
        for (normalized, entry) in expansions {
            titles.entry(normalized).or_insert(entry);
        }

        TitleIndex {
            titles,
            literal_count,
            source_modified,
            loaded_at: Utc::now(),
        }
    }
}

/// Read and index the feed at `path`.
pub fn load_index(path: &Path) -> Result<TitleIndex, MatchError> {
    let file = File::open(path)?;
    let source_modified = file.metadata().and_then(|m| m.modified()).ok();
    let builder = parse_feed(BufReader::new(file))?;
    Ok(builder.build(source_modified))
}

/// A `<title>` element whose text is still being read.
struct PendingTitle {
    title_type: TitleType,
    language: Option<String>,
    text: String,
}

/// Stream `<anime aid><title xml:lang type>NAME</title></anime>` records
/// into a builder.
///
/// Records without an `aid`, and titles that are empty, are skipped. A
/// document that is not well-formed XML fails the whole parse.
pub fn parse_feed<R: BufRead>(source: R) -> Result<TitleIndexBuilder, MatchError> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut builder = TitleIndexBuilder::new();
    let mut buf = Vec::new();
    let mut current_aid: Option<String> = None;
    let mut pending: Option<PendingTitle> = None;
    let mut skipped = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"anime" => current_aid = attribute(&e, "aid").filter(|aid| !aid.is_empty()),
                b"title" => {
                    pending = Some(PendingTitle {
                        title_type: attribute(&e, "type")
                            .map(|t| TitleType::from_feed(&t))
                            .unwrap_or(TitleType::Synonym),
                        language: attribute(&e, "xml:lang"),
                        text: String::new(),
                    });
                }
                _ => {}
            },
            Event::Text(e) => {
                if let Some(title) = pending.as_mut() {
                    match e.unescape() {
                        Ok(text) => title.text.push_str(&text),
                        Err(_) => skipped += 1,
                    }
                }
            }
            Event::CData(e) => {
                if let Some(title) = pending.as_mut() {
                    title.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"title" => {
                    if let Some(title) = pending.take() {
                        let name = title.text.trim();
                        match (&current_aid, name.is_empty()) {
                            (Some(aid), false) => builder.insert(TitleEntry {
                                external_id: aid.clone(),
                                title: name.to_string(),
                                title_type: title.title_type,
                                language: title.language,
                            }),
                            _ => skipped += 1,
                        }
                    }
                }
                b"anime" => current_aid = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if skipped > 0 {
        tracing::debug!(skipped, "Skipped malformed title records");
    }
    Ok(builder)
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Option<String> {
    element
        .try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}
