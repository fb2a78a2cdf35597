use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;
use tokio::fs;

use crate::formats::{EpisodeNumber, EpisodeRef};
use crate::layout::SUMMARY_FILE_NAME;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub is_complete: bool,
    pub missing: Vec<EpisodeNumber>,
    pub found: BTreeSet<EpisodeNumber>,
}

pub async fn validate(series_dir: &Path, live: &[EpisodeRef]) -> anyhow::Result<CompletionReport> {
    let found = episodes_on_disk(series_dir).await?;
    let missing: Vec<EpisodeNumber> = live
        .iter()
        .map(|ep| ep.number)
        .collect::<BTreeSet<_>>()
        .difference(&found)
        .copied()
        .collect();

    Ok(CompletionReport {
        is_complete: missing.is_empty(),
        missing,
        found,
    })
}

#[derive(Deserialize)]
struct EpisodeNames {
    #[serde(default)]
    episodes: Vec<NamedEntry>,
}

#[derive(Deserialize)]
struct NamedEntry {
    #[serde(default)]
    name: String,
}

pub async fn episodes_on_disk(series_dir: &Path) -> anyhow::Result<BTreeSet<EpisodeNumber>> {
    let mut found = BTreeSet::new();
    let mut entries = match fs::read_dir(series_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("read series dir: {}", series_dir.display()));
        }
    };

    while let Some(entry) = entries.next_entry().await.context("read series dir entry")? {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".json") || file_name == SUMMARY_FILE_NAME {
            continue;
        }

        let parsed = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<EpisodeNames>(&bytes).map_err(anyhow::Error::from),
            Err(err) => Err(err.into()),
        };
        let names = match parsed {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(path = %path.display(), ?err, "skipping unreadable quality file");
                continue;
            }
        };

        found.extend(names.episodes.iter().filter_map(|entry| {
            entry
                .name
                .strip_prefix("Episode ")
                .and_then(|number| number.parse::<EpisodeNumber>().ok())
        }));
    }

    Ok(found)
}
