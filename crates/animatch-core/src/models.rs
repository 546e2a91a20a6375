use serde::{Deserialize, Serialize};

/// Rank of a title within its catalog entry. Lower ordinal is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleType {
    Main = 0,
    Official = 1,
    Short = 2,
    Synonym = 3,
}

impl TitleType {
    /// Map the feed's `type` attribute. Unknown values rank as synonyms.
    pub fn from_feed(value: &str) -> Self {
        match value {
            "main" => Self::Main,
            "official" => Self::Official,
            "short" => Self::Short,
            _ => Self::Synonym,
        }
    }

    /// Whether `self` should replace an existing mapping of type `other`.
    pub fn outranks(self, other: TitleType) -> bool {
        self < other
    }
}

impl std::fmt::Display for TitleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Official => write!(f, "official"),
            Self::Short => write!(f, "short"),
            Self::Synonym => write!(f, "syn"),
        }
    }
}

/// One known alias of one catalog entry, as parsed from the title feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleEntry {
    pub external_id: String,
    pub title: String,
    pub title_type: TitleType,
    pub language: Option<String>,
}

impl TitleEntry {
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        title_type: TitleType,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            title_type,
            language: None,
        }
    }
}
