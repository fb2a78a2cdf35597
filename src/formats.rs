use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const STATE_SCHEMA_VERSION: u32 = 1;

// Stable series identifier. The catalog writes it as a JSON number, the state files as a
// string key; both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesId(String);

impl SeriesId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for SeriesId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SeriesId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => Ok(Self(n.to_string())),
            NumberOrString::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(serde::de::Error::custom("series id must not be empty"));
                }
                Ok(Self(trimmed.to_owned()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpisodeNumber(u32);

impl EpisodeNumber {
    pub fn new(n: u32) -> Option<Self> {
        (n > 0).then_some(Self(n))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn entry_name(self) -> String {
        format!("Episode {}", self.0)
    }

    pub fn from_entry_name(name: &str) -> Option<Self> {
        name.split_whitespace().last()?.parse().ok()
    }
}

impl fmt::Display for EpisodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EpisodeNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("episode number is not an integer: {s:?}"))?;
        Self::new(n).ok_or_else(|| format!("episode number must be positive: {s:?}"))
    }
}

impl Serialize for EpisodeNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EpisodeNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => u32::try_from(n)
                .ok()
                .and_then(Self::new)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid episode number: {n}"))),
            NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Vk,
    Deva,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Vk, Source::Deva];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Vk => "vk",
            Source::Deva => "deva",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: SeriesId,
    pub name: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_ar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub ribbon: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRef {
    pub number: EpisodeNumber,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLinkEntry {
    pub url: String,
    pub size: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityLinks {
    by_source: BTreeMap<Source, BTreeMap<String, QualityLinkEntry>>,
}

impl QualityLinks {
    pub fn insert(&mut self, source: Source, quality: String, entry: QualityLinkEntry) {
        self.by_source
            .entry(source)
            .or_default()
            .insert(quality, entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Source, &str, &QualityLinkEntry)> {
        self.by_source.iter().flat_map(|(source, qualities)| {
            qualities
                .iter()
                .map(move |(quality, entry)| (*source, quality.as_str(), entry))
        })
    }

    pub fn len(&self) -> usize {
        self.by_source.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeEntry {
    pub name: String,
    pub url: String,
    pub size: String,
}

impl EpisodeEntry {
    pub fn number(&self) -> Option<EpisodeNumber> {
        EpisodeNumber::from_entry_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFile {
    pub title: String,
    #[serde(default)]
    pub episodes: Vec<EpisodeEntry>,
}

impl QualityFile {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            episodes: Vec::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.episodes.iter().any(|episode| episode.name == name)
    }

    // Ascending by episode number; names without a numeric trailing token go last.
    pub fn sort_episodes(&mut self) {
        self.episodes
            .sort_by_key(|episode| episode.number().map_or(u32::MAX, EpisodeNumber::get));
    }

    pub fn episode_numbers(&self) -> impl Iterator<Item = EpisodeNumber> + '_ {
        self.episodes.iter().filter_map(EpisodeEntry::number)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub title: String,
    pub qualities: BTreeMap<Source, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub schema_version: u32,
    pub completed_series: BTreeSet<SeriesId>,
    pub completed_episodes: BTreeMap<SeriesId, BTreeSet<EpisodeNumber>>,
    pub failed_episodes: BTreeMap<SeriesId, BTreeSet<EpisodeNumber>>,
    pub last_update: BTreeMap<SeriesId, String>,
    pub current_series: Option<SeriesId>,
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            completed_series: BTreeSet::new(),
            completed_episodes: BTreeMap::new(),
            failed_episodes: BTreeMap::new(),
            last_update: BTreeMap::new(),
            current_series: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEpisode {
    pub number: EpisodeNumber,
    pub processed_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesLedger {
    pub episodes: Vec<ProcessedEpisode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedIndex {
    pub schema_version: u32,
    pub series: BTreeMap<SeriesId, SeriesLedger>,
}

impl Default for ProcessedIndex {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            series: BTreeMap::new(),
        }
    }
}
