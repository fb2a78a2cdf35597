use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

use crate::durable::{self, LoadOrigin};
use crate::formats::{EpisodeEntry, EpisodeNumber, QualityFile, QualityLinkEntry, Source};
use crate::layout::{parse_quality_file_name, quality_file_name, sanitize_quality};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    AlreadyPresent,
}

// Takes `&mut self` for merges: a series has exactly one store and one writer, so two merges
// can never interleave their read and write of the same file.
#[derive(Debug)]
pub struct QualityFileStore {
    series_dir: PathBuf,
    title: String,
    files: BTreeMap<(Source, String), QualityFile>,
}

impl QualityFileStore {
    pub async fn open(series_dir: impl Into<PathBuf>, title: impl Into<String>) -> anyhow::Result<Self> {
        let series_dir = series_dir.into();
        fs::create_dir_all(&series_dir)
            .await
            .with_context(|| format!("create series dir: {}", series_dir.display()))?;

        let mut files = BTreeMap::new();
        for (source, quality) in list_quality_files(&series_dir, true).await? {
            let path = series_dir.join(quality_file_name(source, &quality));
            let loaded =
                durable::load_json_or_default::<QualityFile, _>(&path, || QualityFile::new("")).await;
            if matches!(loaded.origin, LoadOrigin::Missing | LoadOrigin::Reset) {
                continue;
            }
            let mut file = loaded.value;
            file.sort_episodes();
            files.insert((source, quality), file);
        }

        Ok(Self {
            series_dir,
            title: title.into(),
            files,
        })
    }

    pub fn series_dir(&self) -> &Path {
        &self.series_dir
    }

    pub fn path_for(&self, source: Source, quality: &str) -> PathBuf {
        self.series_dir.join(quality_file_name(source, quality))
    }

    pub async fn merge(
        &mut self,
        episode: EpisodeNumber,
        source: Source,
        quality: &str,
        entry: &QualityLinkEntry,
    ) -> anyhow::Result<MergeOutcome> {
        let key = (source, sanitize_quality(quality));
        let name = episode.entry_name();

        let mut updated = match self.files.get(&key) {
            Some(existing) if existing.contains(&name) => return Ok(MergeOutcome::AlreadyPresent),
            Some(existing) => existing.clone(),
            None => QualityFile::new(self.title.clone()),
        };
        updated.episodes.push(EpisodeEntry {
            name,
            url: entry.url.clone(),
            size: entry.size.clone(),
        });
        updated.sort_episodes();

        let path = self.path_for(source, &key.1);
        durable::write_json(&path, &updated)
            .await
            .with_context(|| format!("save quality file: {}", path.display()))?;
        self.files.insert(key, updated);

        Ok(MergeOutcome::Added)
    }

    pub fn keys(&self) -> impl Iterator<Item = (Source, &str)> {
        self.files
            .keys()
            .map(|(source, quality)| (*source, quality.as_str()))
    }

    pub fn episode_numbers(&self) -> BTreeSet<EpisodeNumber> {
        self.files
            .values()
            .flat_map(QualityFile::episode_numbers)
            .collect()
    }
}

// With `include_orphan_backups`, a `.backup` whose primary is gone (a crash between the
// backup rename and the new write) also counts, so loading can recover it.
pub async fn list_quality_files(
    dir: &Path,
    include_orphan_backups: bool,
) -> anyhow::Result<Vec<(Source, String)>> {
    let mut found = BTreeSet::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read series dir: {}", dir.display()));
        }
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("read series dir entry: {}", dir.display()))?
    {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(key) = parse_quality_file_name(file_name) {
            found.insert(key);
            continue;
        }
        if include_orphan_backups
            && let Some(primary) = file_name.strip_suffix(".backup")
            && let Some(key) = parse_quality_file_name(primary)
            && !dir.join(primary).exists()
        {
            found.insert(key);
        }
    }

    Ok(found.into_iter().collect())
}
