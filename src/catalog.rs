use std::collections::HashSet;
use std::path::Path;

use anyhow::Context as _;

use crate::formats::SeriesRecord;

pub fn load(path: &Path) -> anyhow::Result<Vec<SeriesRecord>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read catalog: {}", path.display()))?;
    let records: Vec<SeriesRecord> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse catalog: {}", path.display()))?;

    let mut seen = HashSet::new();
    let mut series = Vec::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id.clone()) {
            tracing::warn!(series_id = %record.id, "duplicate series id in catalog; skipping");
            continue;
        }
        series.push(record);
    }
    Ok(series)
}
