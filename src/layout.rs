use std::path::{Path, PathBuf};

use crate::formats::{SeriesId, Source};

pub const SUMMARY_FILE_NAME: &str = "summary.json";
const BACKUP_SUFFIX: &str = "backup";

#[derive(Debug, Clone)]
pub struct DataLayout {
    data_dir: PathBuf,
    catalog: PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let catalog = data_dir.join("ar-series.json");
        Self { data_dir, catalog }
    }

    pub fn with_catalog(mut self, catalog: impl Into<PathBuf>) -> Self {
        self.catalog = catalog.into();
        self
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog
    }

    pub fn progress_path(&self) -> PathBuf {
        self.data_dir.join("progress.json")
    }

    pub fn processed_index_path(&self) -> PathBuf {
        self.data_dir.join("processed_data.json")
    }

    pub fn ids_dir(&self) -> PathBuf {
        self.data_dir.join("ids")
    }

    pub fn series_dir(&self, id: &SeriesId) -> PathBuf {
        self.ids_dir().join(id.as_str())
    }
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}

pub fn quality_file_name(source: Source, quality: &str) -> String {
    format!("{}_{}.json", source.as_str(), sanitize_quality(quality))
}

pub fn parse_quality_file_name(file_name: &str) -> Option<(Source, String)> {
    let stem = file_name.strip_suffix(".json")?;
    Source::ALL.into_iter().find_map(|source| {
        let quality = stem.strip_prefix(source.as_str())?.strip_prefix('_')?;
        (!quality.is_empty()).then(|| (source, quality.to_owned()))
    })
}

pub fn sanitize_quality(quality: &str) -> String {
    let cleaned: String = quality
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    match cleaned.as_str() {
        "" => "unknown".to_owned(),
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}
