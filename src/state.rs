use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::durable::{self, LoadOrigin};
use crate::formats::{
    EpisodeNumber, ProcessedEpisode, ProcessedIndex, ProgressRecord, STATE_SCHEMA_VERSION,
    SeriesId, SeriesLedger,
};

pub struct ProgressStore {
    path: PathBuf,
    record: ProgressRecord,
}

impl ProgressStore {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded = durable::load_or_default(&path, parse_progress, ProgressRecord::default).await;
        log_load(&path, loaded.origin, "progress");
        Self {
            path,
            record: loaded.value,
        }
    }

    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    pub fn is_completed(&self, series: &SeriesId) -> bool {
        self.record.completed_series.contains(series)
    }

    pub fn set_current_series(&mut self, series: Option<&SeriesId>) {
        self.record.current_series = series.cloned();
    }

    pub fn mark_failed(&mut self, series: &SeriesId, episode: EpisodeNumber) {
        self.record
            .failed_episodes
            .entry(series.clone())
            .or_default()
            .insert(episode);
    }

    pub fn clear_failed(&mut self, series: &SeriesId, episode: EpisodeNumber) -> bool {
        let Some(failed) = self.record.failed_episodes.get_mut(series) else {
            return false;
        };
        let removed = failed.remove(&episode);
        if failed.is_empty() {
            self.record.failed_episodes.remove(series);
        }
        removed
    }

    pub fn failed_episodes(&self, series: &SeriesId) -> Vec<EpisodeNumber> {
        self.record
            .failed_episodes
            .get(series)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    // Failures only stay recorded for episodes still listed and still missing from disk.
    pub fn finish_series(
        &mut self,
        series: &SeriesId,
        live: &BTreeSet<EpisodeNumber>,
        episodes_on_disk: BTreeSet<EpisodeNumber>,
        complete: bool,
        finished_at: String,
    ) {
        if let Some(failed) = self.record.failed_episodes.get_mut(series) {
            failed.retain(|n| live.contains(n) && !episodes_on_disk.contains(n));
            if failed.is_empty() {
                self.record.failed_episodes.remove(series);
            }
        }
        self.record.last_update.insert(series.clone(), finished_at);
        self.record
            .completed_episodes
            .insert(series.clone(), episodes_on_disk);
        if complete {
            self.record.completed_series.insert(series.clone());
        }
        if self.record.current_series.as_ref() == Some(series) {
            self.record.current_series = None;
        }
    }

    pub async fn flush(&mut self) -> anyhow::Result<()> {
        self.record.schema_version = STATE_SCHEMA_VERSION;
        durable::write_json(&self.path, &self.record)
            .await
            .context("save progress")?;
        tracing::debug!(path = %self.path.display(), "progress saved");
        Ok(())
    }
}

pub struct ProcessedIndexStore {
    path: PathBuf,
    index: ProcessedIndex,
}

impl ProcessedIndexStore {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded =
            durable::load_or_default(&path, parse_processed_index, ProcessedIndex::default).await;
        log_load(&path, loaded.origin, "processed index");
        Self {
            path,
            index: loaded.value,
        }
    }

    pub fn index(&self) -> &ProcessedIndex {
        &self.index
    }

    pub fn processed(&self, series: &SeriesId) -> BTreeSet<EpisodeNumber> {
        self.index
            .series
            .get(series)
            .map(|ledger| ledger.episodes.iter().map(|ep| ep.number).collect())
            .unwrap_or_default()
    }

    pub fn reconcile(
        &mut self,
        series: &SeriesId,
        on_disk: &BTreeSet<EpisodeNumber>,
        adopted_at: &str,
    ) -> Reconciliation {
        let ledger = self.index.series.entry(series.clone()).or_default();
        let mut reconciliation = Reconciliation::default();
        let mut kept = BTreeSet::new();

        ledger.episodes.retain(|ep| {
            if !on_disk.contains(&ep.number) {
                reconciliation.dropped.push(ep.number);
                return false;
            }
            kept.insert(ep.number)
        });
        for number in on_disk.difference(&kept) {
            ledger.episodes.push(ProcessedEpisode {
                number: *number,
                processed_at: adopted_at.to_owned(),
            });
            reconciliation.adopted.push(*number);
        }
        ledger.episodes.sort_by_key(|ep| ep.number);
        reconciliation.dropped.sort();
        reconciliation.dropped.dedup();

        if ledger.episodes.is_empty() {
            self.index.series.remove(series);
        }
        reconciliation
    }

    pub fn record(&mut self, series: &SeriesId, episode: EpisodeNumber, processed_at: String) {
        let ledger = self.index.series.entry(series.clone()).or_default();
        if ledger.episodes.iter().any(|ep| ep.number == episode) {
            return;
        }
        ledger.episodes.push(ProcessedEpisode {
            number: episode,
            processed_at,
        });
    }

    pub async fn flush(&mut self) -> anyhow::Result<()> {
        self.index.schema_version = STATE_SCHEMA_VERSION;
        durable::write_json(&self.path, &self.index)
            .await
            .context("save processed index")?;
        tracing::debug!(path = %self.path.display(), "processed index saved");
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub dropped: Vec<EpisodeNumber>,
    pub adopted: Vec<EpisodeNumber>,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        !self.dropped.is_empty() || !self.adopted.is_empty()
    }
}

fn log_load(path: &std::path::Path, origin: LoadOrigin, what: &str) {
    match origin {
        LoadOrigin::Primary => tracing::info!(path = %path.display(), "loaded {what}"),
        LoadOrigin::Missing => tracing::info!(path = %path.display(), "no {what} yet; starting fresh"),
        LoadOrigin::Backup => tracing::warn!(path = %path.display(), "loaded {what} from backup"),
        LoadOrigin::Reset => tracing::warn!(path = %path.display(), "{what} reset to default"),
    }
}

pub fn parse_progress(bytes: &[u8]) -> anyhow::Result<ProgressRecord> {
    let value: Value = serde_json::from_slice(bytes).context("parse progress json")?;
    let Value::Object(object) = value else {
        anyhow::bail!("progress file is not a json object");
    };

    Ok(ProgressRecord {
        schema_version: STATE_SCHEMA_VERSION,
        completed_series: repair_key(&object, "completed_series"),
        completed_episodes: repair_series_map(&object, "completed_episodes"),
        failed_episodes: repair_series_map(&object, "failed_episodes"),
        last_update: repair_series_map(&object, "last_update"),
        current_series: repair_key(&object, "current_series"),
    })
}

// Parses `processed_data.json`. A file without `schema_version` is the legacy layout, a bare
// map from series id to ledger.
pub fn parse_processed_index(bytes: &[u8]) -> anyhow::Result<ProcessedIndex> {
    let value: Value = serde_json::from_slice(bytes).context("parse processed index json")?;
    let Value::Object(object) = value else {
        anyhow::bail!("processed index is not a json object");
    };

    let series = if object.contains_key("schema_version") {
        repair_series_map::<SeriesLedger>(&object, "series")
    } else {
        tracing::info!("migrating legacy processed index layout");
        repair_entries::<SeriesLedger>(&object, "processed index")
    };

    Ok(ProcessedIndex {
        schema_version: STATE_SCHEMA_VERSION,
        series,
    })
}

fn repair_key<T: DeserializeOwned + Default>(object: &Map<String, Value>, key: &str) -> T {
    let Some(value) = object.get(key) else {
        tracing::warn!(key, "missing key in state file; repairing");
        return T::default();
    };
    serde_json::from_value(value.clone()).unwrap_or_else(|err| {
        tracing::warn!(key, %err, "malformed key in state file; resetting");
        T::default()
    })
}

fn repair_series_map<T: DeserializeOwned + Default>(
    object: &Map<String, Value>,
    key: &str,
) -> BTreeMap<SeriesId, T> {
    match object.get(key) {
        Some(Value::Object(entries)) => repair_entries(entries, key),
        Some(_) => {
            tracing::warn!(key, "state key is not a map; resetting");
            BTreeMap::new()
        }
        None => {
            tracing::warn!(key, "missing key in state file; repairing");
            BTreeMap::new()
        }
    }
}

fn repair_entries<T: DeserializeOwned + Default>(
    entries: &Map<String, Value>,
    key: &str,
) -> BTreeMap<SeriesId, T> {
    let mut out = BTreeMap::new();
    for (series, value) in entries {
        let id = SeriesId::new(series.trim());
        let entry = serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            tracing::warn!(key, series = %id, %err, "invalid series entry; resetting");
            T::default()
        });
        out.insert(id, entry);
    }
    out
}
