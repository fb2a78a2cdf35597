use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context as _;

use crate::durable;
use crate::formats::{Source, SummaryFile};
use crate::layout::{SUMMARY_FILE_NAME, quality_file_name};
use crate::quality_store::{QualityFileStore, list_quality_files};

pub fn build_summary<'a>(
    title: &str,
    keys: impl IntoIterator<Item = (Source, &'a str)>,
) -> SummaryFile {
    let mut summary = SummaryFile {
        title: title.to_owned(),
        ..SummaryFile::default()
    };
    for (source, quality) in keys {
        summary
            .qualities
            .entry(source)
            .or_default()
            .insert(quality.to_owned(), quality_file_name(source, quality));
    }
    summary
}

// The directory listing is what the presentation layer will find, so it wins; the store's own
// index is only compared against it to report drift.
pub async fn rebuild(store: &QualityFileStore, title: &str) -> anyhow::Result<SummaryFile> {
    let series_dir = store.series_dir();
    let on_disk = list_quality_files(series_dir, false)
        .await
        .context("scan quality files")?;

    let scanned: BTreeSet<(Source, &str)> = on_disk
        .iter()
        .map(|(source, quality)| (*source, quality.as_str()))
        .collect();
    let indexed: BTreeSet<(Source, &str)> = store.keys().collect();
    for (source, quality) in indexed.symmetric_difference(&scanned) {
        tracing::warn!(
            dir = %series_dir.display(),
            %source,
            quality,
            on_disk = scanned.contains(&(*source, *quality)),
            "quality file index drifted from directory contents"
        );
    }

    let summary = build_summary(title, scanned.iter().copied());
    write_summary(series_dir, &summary).await?;
    Ok(summary)
}

async fn write_summary(series_dir: &Path, summary: &SummaryFile) -> anyhow::Result<()> {
    let path = series_dir.join(SUMMARY_FILE_NAME);
    durable::write_json(&path, summary)
        .await
        .with_context(|| format!("save summary: {}", path.display()))
}
