use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Context as _;
use futures::StreamExt as _;

use crate::config::RunConfig;
use crate::error::ExtractError;
use crate::extract::{EpisodeLinkExtractor, QualityLinkExtractor};
use crate::formats::{EpisodeNumber, EpisodeRef, QualityLinks, SeriesId, SeriesRecord};
use crate::http::{HttpFetcher, PageFetcher};
use crate::quality_store::{MergeOutcome, QualityFileStore};
use crate::retry::with_retry;
use crate::state::{ProcessedIndexStore, ProgressStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesPhase {
    FetchingEpisodeList,
    Diffing,
    ProcessingEpisodes,
    RebuildingSummary,
    Validating,
    Done,
}

impl fmt::Display for SeriesPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeriesPhase::FetchingEpisodeList => "fetching_episode_list",
            SeriesPhase::Diffing => "diffing",
            SeriesPhase::ProcessingEpisodes => "processing_episodes",
            SeriesPhase::RebuildingSummary => "rebuilding_summary",
            SeriesPhase::Validating => "validating",
            SeriesPhase::Done => "done",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesStatus {
    Complete,
    Incomplete,
    NoEpisodes,
    Skipped,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesReport {
    pub series_id: SeriesId,
    pub status: SeriesStatus,
    pub added: Vec<EpisodeNumber>,
    pub failed: Vec<EpisodeNumber>,
    pub missing: Vec<EpisodeNumber>,
}

impl SeriesReport {
    fn empty(series_id: &SeriesId, status: SeriesStatus) -> Self {
        Self {
            series_id: series_id.clone(),
            status,
            added: Vec::new(),
            failed: Vec::new(),
            missing: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub series: Vec<SeriesReport>,
}

impl RunReport {
    pub fn count(&self, status: SeriesStatus) -> usize {
        self.series.iter().filter(|s| s.status == status).count()
    }
}

#[derive(Debug)]
enum EpisodeOutcome {
    Added(usize),
    NothingNew,
    NoLinks,
    Failed,
}

pub struct ScrapeOrchestrator {
    config: RunConfig,
    episodes: EpisodeLinkExtractor,
    qualities: QualityLinkExtractor,
    progress: ProgressStore,
    index: ProcessedIndexStore,
}

impl ScrapeOrchestrator {
    pub async fn new(config: RunConfig, fetcher: Arc<dyn PageFetcher>) -> Self {
        let progress = ProgressStore::load(config.layout.progress_path()).await;
        let index = ProcessedIndexStore::load(config.layout.processed_index_path()).await;
        Self {
            episodes: EpisodeLinkExtractor::new(Arc::clone(&fetcher)),
            qualities: QualityLinkExtractor::new(fetcher),
            config,
            progress,
            index,
        }
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn processed_index(&self) -> &ProcessedIndexStore {
        &self.index
    }

    pub async fn run(&mut self, catalog: &[SeriesRecord]) -> RunReport {
        let mut report = RunReport::default();
        for (position, series) in catalog.iter().enumerate() {
            tracing::info!(
                series_id = %series.id,
                name = %series.name,
                position = position + 1,
                total = catalog.len(),
                "processing series"
            );
            let series_report = match self.process_series(series).await {
                Ok(series_report) => series_report,
                Err(err) => {
                    tracing::error!(series_id = %series.id, ?err, "series aborted");
                    SeriesReport::empty(&series.id, SeriesStatus::Errored)
                }
            };
            report.series.push(series_report);
        }

        self.retry_failed(catalog, &mut report).await;
        report
    }

    // One more pass over episodes that failed earlier in this run, so a short outage does not
    // leave gaps until the next run.
    async fn retry_failed(&mut self, catalog: &[SeriesRecord], report: &mut RunReport) {
        for (series, series_report) in catalog.iter().zip(report.series.iter_mut()) {
            if matches!(series_report.status, SeriesStatus::Skipped | SeriesStatus::Errored) {
                continue;
            }
            let failed: BTreeSet<EpisodeNumber> =
                self.progress.failed_episodes(&series.id).into_iter().collect();
            if failed.is_empty() {
                continue;
            }

            tracing::info!(series_id = %series.id, count = failed.len(), "retrying failed episodes");
            match self.scrape_series(series, Some(&failed)).await {
                Ok(retried) if retried.status == SeriesStatus::NoEpisodes => {}
                Ok(retried) => {
                    let mut added = std::mem::take(&mut series_report.added);
                    added.extend(retried.added.iter().copied());
                    added.sort();
                    *series_report = SeriesReport { added, ..retried };
                }
                Err(err) => {
                    tracing::error!(series_id = %series.id, ?err, "retry of failed episodes aborted");
                }
            }
        }
    }

    pub async fn process_series(&mut self, series: &SeriesRecord) -> anyhow::Result<SeriesReport> {
        self.scrape_series(series, None).await
    }

    // `only` restricts processing to the given episodes and bypasses `skip_completed`.
    async fn scrape_series(
        &mut self,
        series: &SeriesRecord,
        only: Option<&BTreeSet<EpisodeNumber>>,
    ) -> anyhow::Result<SeriesReport> {
        let Self {
            config,
            episodes,
            qualities,
            progress,
            index,
        } = self;
        let (episodes, qualities) = (&*episodes, &*qualities);
        let id = &series.id;

        if only.is_none() && config.skip_completed && progress.is_completed(id) {
            tracing::info!(series_id = %id, "series already completed; skipping");
            return Ok(SeriesReport::empty(id, SeriesStatus::Skipped));
        }

        enter(id, SeriesPhase::FetchingEpisodeList);
        let listed = with_retry(config.retry, "episode list", || episodes.extract(&series.link))
            .await
            .unwrap_or_else(|err| {
                tracing::error!(series_id = %id, url = %series.link, %err, "failed to extract episode list");
                Vec::new()
            });
        if listed.is_empty() {
            tracing::error!(series_id = %id, name = %series.name, "no episodes found");
            enter(id, SeriesPhase::Done);
            return Ok(SeriesReport::empty(id, SeriesStatus::NoEpisodes));
        }
        let mut live = listed;
        live.sort_by_key(|ep| ep.number);

        enter(id, SeriesPhase::Diffing);
        let series_dir = config.layout.series_dir(id);
        let mut store = QualityFileStore::open(&series_dir, &series.name)
            .await
            .context("open quality files")?;
        let reconciliation = index.reconcile(id, &store.episode_numbers(), &now());
        for number in &reconciliation.dropped {
            tracing::warn!(
                series_id = %id,
                episode = %number,
                "episode marked as processed but missing from quality files; will reprocess"
            );
        }
        if !reconciliation.adopted.is_empty() {
            tracing::info!(
                series_id = %id,
                count = reconciliation.adopted.len(),
                "adopted episodes found on disk into the processed index"
            );
        }
        if reconciliation.changed() {
            flush_index(index).await;
        }

        let processed = index.processed(id);
        let pending: Vec<&EpisodeRef> = live
            .iter()
            .filter(|ep| !processed.contains(&ep.number))
            .filter(|ep| only.is_none_or(|only| only.contains(&ep.number)))
            .collect();

        let mut report = SeriesReport::empty(id, SeriesStatus::Incomplete);
        if pending.is_empty() {
            tracing::info!(series_id = %id, "all episodes already processed");
        } else {
            enter(id, SeriesPhase::ProcessingEpisodes);
            tracing::info!(series_id = %id, count = pending.len(), "episodes to process");
            progress.set_current_series(Some(id));
            flush_progress(progress).await;

            let retry = config.retry;
            // Fetches run as their own tasks so they keep going while a merge is being written.
            // `buffered` still yields in input order, so merges are applied one episode at a
            // time in ascending episode order with up to `batch_size` fetches in flight.
            let mut fetched = futures::stream::iter(pending)
                .map(|ep| {
                    let qualities = qualities.clone();
                    let url = ep.url.clone();
                    let task = tokio::spawn(async move {
                        with_retry(retry, "watching page", || qualities.extract(&url)).await
                    });
                    async move { (ep, task.await) }
                })
                .buffered(config.batch_size.max(1));

            while let Some((ep, joined)) = fetched.next().await {
                let outcome = match joined {
                    Ok(result) => apply_episode(&mut store, id, ep.number, result).await,
                    Err(err) => {
                        tracing::error!(series_id = %id, episode = %ep.number, %err, "episode task aborted");
                        EpisodeOutcome::Failed
                    }
                };
                match outcome {
                    EpisodeOutcome::Added(files) => {
                        tracing::info!(series_id = %id, episode = %ep.number, files, "episode processed");
                        index.record(id, ep.number, now());
                        flush_index(index).await;
                        if progress.clear_failed(id, ep.number) {
                            flush_progress(progress).await;
                        }
                        report.added.push(ep.number);
                    }
                    EpisodeOutcome::NothingNew => {
                        tracing::warn!(series_id = %id, episode = %ep.number, "no new content added");
                    }
                    EpisodeOutcome::NoLinks => {
                        tracing::warn!(series_id = %id, episode = %ep.number, "no download links found");
                    }
                    EpisodeOutcome::Failed => {
                        progress.mark_failed(id, ep.number);
                        flush_progress(progress).await;
                    }
                }
            }
        }

        enter(id, SeriesPhase::RebuildingSummary);
        if let Err(err) = crate::summary::rebuild(&store, &series.name).await {
            tracing::error!(series_id = %id, ?err, "failed to rebuild summary");
        }

        enter(id, SeriesPhase::Validating);
        let completion = crate::validate::validate(&series_dir, &live)
            .await
            .context("validate series")?;
        if completion.found != store.episode_numbers() {
            tracing::warn!(series_id = %id, "quality file contents drifted from the in-memory index");
        }
        if completion.is_complete {
            tracing::info!(series_id = %id, name = %series.name, "series complete");
        } else {
            let missing: Vec<String> = completion.missing.iter().map(ToString::to_string).collect();
            tracing::warn!(series_id = %id, name = %series.name, missing = ?missing, "series incomplete");
        }

        enter(id, SeriesPhase::Done);
        let listed: BTreeSet<EpisodeNumber> = live.iter().map(|ep| ep.number).collect();
        progress.finish_series(id, &listed, completion.found, completion.is_complete, now());
        flush_progress(progress).await;

        report.status = if completion.is_complete {
            SeriesStatus::Complete
        } else {
            SeriesStatus::Incomplete
        };
        report.failed = progress.failed_episodes(id);
        report.missing = completion.missing;
        Ok(report)
    }
}

async fn apply_episode(
    store: &mut QualityFileStore,
    series: &SeriesId,
    episode: EpisodeNumber,
    fetched: Result<QualityLinks, ExtractError>,
) -> EpisodeOutcome {
    let links = match fetched {
        Ok(links) => links,
        Err(err) if err.is_retryable() => {
            tracing::error!(series_id = %series, %episode, %err, "episode failed after retries");
            return EpisodeOutcome::Failed;
        }
        Err(err) => {
            tracing::warn!(series_id = %series, %episode, %err, "unexpected watching page");
            return EpisodeOutcome::NoLinks;
        }
    };
    if links.is_empty() {
        return EpisodeOutcome::NoLinks;
    }

    let mut added = 0;
    let mut write_failures = 0;
    for (source, quality, entry) in links.iter() {
        match store.merge(episode, source, quality, entry).await {
            Ok(MergeOutcome::Added) => added += 1,
            Ok(MergeOutcome::AlreadyPresent) => {}
            Err(err) => {
                write_failures += 1;
                tracing::error!(
                    series_id = %series,
                    %episode,
                    %source,
                    quality,
                    ?err,
                    "failed to save quality file"
                );
            }
        }
    }

    match (added, write_failures) {
        (0, 0) => EpisodeOutcome::NothingNew,
        (0, _) => EpisodeOutcome::Failed,
        (added, _) => EpisodeOutcome::Added(added),
    }
}

fn enter(series: &SeriesId, phase: SeriesPhase) {
    tracing::debug!(series_id = %series, %phase, "series phase");
}

async fn flush_progress(progress: &mut ProgressStore) {
    if let Err(err) = progress.flush().await {
        tracing::error!(?err, "failed to save progress; continuing");
    }
}

async fn flush_index(index: &mut ProcessedIndexStore) {
    if let Err(err) = index.flush().await {
        tracing::error!(?err, "failed to save processed index; continuing");
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub async fn run(config: RunConfig) -> anyhow::Result<RunReport> {
    let catalog = crate::catalog::load(config.layout.catalog_path()).context("load catalog")?;
    tracing::info!(
        catalog = %config.layout.catalog_path().display(),
        series = catalog.len(),
        "loaded catalog"
    );
    tokio::fs::create_dir_all(config.layout.ids_dir())
        .await
        .with_context(|| format!("create ids dir: {}", config.layout.ids_dir().display()))?;

    let fetcher = Arc::new(HttpFetcher::new(&config.http)?);
    let mut orchestrator = ScrapeOrchestrator::new(config, fetcher).await;
    let report = orchestrator.run(&catalog).await;

    let failed: BTreeSet<&SeriesId> = report
        .series
        .iter()
        .filter(|s| !s.failed.is_empty())
        .map(|s| &s.series_id)
        .collect();
    tracing::info!(
        complete = report.count(SeriesStatus::Complete),
        incomplete = report.count(SeriesStatus::Incomplete),
        no_episodes = report.count(SeriesStatus::NoEpisodes),
        skipped = report.count(SeriesStatus::Skipped),
        errored = report.count(SeriesStatus::Errored),
        series_with_failures = failed.len(),
        "run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::config::RetryPolicy;
    use crate::error::FetchError;
    use crate::formats::{QualityFile, SummaryFile};
    use crate::layout::DataLayout;

    const BASE: &str = "https://site.test";

    #[derive(Clone, Default)]
    struct Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[derive(Default)]
    struct StubFetcher {
        pages: Mutex<HashMap<String, String>>,
        failing: Mutex<HashSet<String>>,
        flaky: Mutex<HashMap<String, u32>>,
        delays: Mutex<HashMap<String, Duration>>,
        gates: Mutex<HashMap<String, Gate>>,
        hits: Mutex<HashMap<String, u32>>,
    }

    impl StubFetcher {
        fn fail_times(&self, url: &str, times: u32) {
            self.flaky.lock().unwrap().insert(url.to_owned(), times);
        }

        fn delay(&self, url: &str, delay: Duration) {
            self.delays.lock().unwrap().insert(url.to_owned(), delay);
        }

        fn pause(&self, url: &str) -> Gate {
            let gate = Gate::default();
            self.gates.lock().unwrap().insert(url.to_owned(), gate.clone());
            gate
        }

        fn page(&self, url: &str, body: String) {
            self.pages.lock().unwrap().insert(url.to_owned(), body);
        }

        fn fail(&self, url: &str, failing: bool) {
            let mut set = self.failing.lock().unwrap();
            if failing {
                set.insert(url.to_owned());
            } else {
                set.remove(url);
            }
        }

        fn hits(&self, url: &str) -> u32 {
            self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
            *self.hits.lock().unwrap().entry(url.to_owned()).or_default() += 1;

            let delay = self.delays.lock().unwrap().get(url).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let gate = self.gates.lock().unwrap().get(url).cloned();
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }

            let flaky = match self.flaky.lock().unwrap().get_mut(url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            if flaky || self.failing.lock().unwrap().contains(url) {
                return Err(FetchError::Status {
                    url: url.to_owned(),
                    status: 503,
                });
            }
            self.pages
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: url.to_owned(),
                    status: 404,
                })
        }
    }

    fn series_page(episodes: &[u32]) -> String {
        let items: String = episodes
            .iter()
            .map(|n| format!(r#"<li><a href="/ep-{n}/"><em>{n}</em></a></li>"#))
            .collect();
        format!(r#"<html><body><ul class="tabcontent active" id="eps">{items}</ul></body></html>"#)
    }

    fn watching_page(n: u32) -> String {
        format!(
            r#"<html><body><ul><li aria-label="quality">
                <a href="https://drone.worldcdn.online/{n}.mp4">720p<p>{n}00 MB</p></a>
                <a href="https://vk.com/video{n}">720p<p>vk</p></a>
            </li></ul></body></html>"#
        )
    }

    fn watching_url(n: u32) -> String {
        format!("{BASE}/ep-{n}/watching/")
    }

    fn ep(n: u32) -> EpisodeNumber {
        EpisodeNumber::new(n).expect("positive")
    }

    fn series(id: &str) -> SeriesRecord {
        SeriesRecord {
            id: SeriesId::new(id),
            name: format!("Series {id}"),
            link: format!("{BASE}/series/{id}/"),
            title_ar: None,
            genre: None,
            season: None,
            year: None,
            image: None,
            ribbon: Vec::new(),
        }
    }

    fn stub_with_episodes(series_id: &str, episodes: &[u32]) -> Arc<StubFetcher> {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.page(&format!("{BASE}/series/{series_id}/"), series_page(episodes));
        for n in episodes {
            fetcher.page(&watching_url(*n), watching_page(*n));
        }
        fetcher
    }

    fn config(dir: &Path) -> RunConfig {
        let mut config = RunConfig::new(DataLayout::new(dir));
        config.retry = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        config.batch_size = 2;
        config
    }

    fn read_quality(dir: &Path, name: &str) -> anyhow::Result<QualityFile> {
        Ok(serde_json::from_slice(&std::fs::read(dir.join(name))?)?)
    }

    fn numbers(file: &QualityFile) -> Vec<u32> {
        file.episode_numbers().map(EpisodeNumber::get).collect()
    }

    #[tokio::test]
    async fn failing_episode_is_recorded_and_others_are_saved() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1, 2, 3]);
        fetcher.fail(&watching_url(2), true);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let report = orchestrator.run(&[series("7")]).await;

        let series_report = &report.series[0];
        assert_eq!(series_report.status, SeriesStatus::Incomplete);
        assert_eq!(series_report.added, [ep(1), ep(3)]);
        assert_eq!(series_report.failed, [ep(2)]);
        assert_eq!(series_report.missing, [ep(2)]);
        // Three attempts in the series pass, three more in the end-of-run retry.
        assert_eq!(fetcher.hits(&watching_url(2)), 6);

        let series_dir = temp.path().join("ids").join("7");
        let deva = read_quality(&series_dir, "deva_720p.json")?;
        assert_eq!(numbers(&deva), [1, 3]);
        assert!(deva.episodes[0].url.contains("deva-cpmav9sk6x41.cimanowtv.com"));
        assert_eq!(numbers(&read_quality(&series_dir, "vk_720p.json")?), [1, 3]);

        let summary: SummaryFile =
            serde_json::from_slice(&std::fs::read(series_dir.join("summary.json"))?)?;
        assert_eq!(summary.title, "Series 7");
        assert_eq!(summary.qualities.len(), 2);

        let progress: serde_json::Value =
            serde_json::from_slice(&std::fs::read(temp.path().join("progress.json"))?)?;
        assert_eq!(progress["failed_episodes"]["7"], serde_json::json!(["2"]));
        assert_eq!(progress["completed_series"], serde_json::json!([]));
        assert!(progress["last_update"]["7"].is_string());
        assert!(progress["current_series"].is_null());
        Ok(())
    }

    #[tokio::test]
    async fn rerun_fetches_nothing_until_an_episode_goes_missing() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1, 2, 3]);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let first = orchestrator.run(&[series("7")]).await;
        assert_eq!(first.series[0].status, SeriesStatus::Complete);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let second = orchestrator.run(&[series("7")]).await;
        assert!(second.series[0].added.is_empty());
        for n in [1, 2, 3] {
            assert_eq!(fetcher.hits(&watching_url(n)), 1);
        }

        // Drop episode 2 from every quality file but leave the processed index alone.
        let series_dir = temp.path().join("ids").join("7");
        for name in ["deva_720p.json", "vk_720p.json"] {
            let mut file = read_quality(&series_dir, name)?;
            file.episodes.retain(|e| e.name != "Episode 2");
            std::fs::write(series_dir.join(name), serde_json::to_vec_pretty(&file)?)?;
        }

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let third = orchestrator.run(&[series("7")]).await;
        assert_eq!(third.series[0].added, [ep(2)]);
        assert_eq!(third.series[0].status, SeriesStatus::Complete);
        assert_eq!(fetcher.hits(&watching_url(1)), 1);
        assert_eq!(fetcher.hits(&watching_url(2)), 2);
        assert_eq!(
            numbers(&read_quality(&series_dir, "deva_720p.json")?),
            [1, 2, 3]
        );
        Ok(())
    }

    #[tokio::test]
    async fn recovered_episode_clears_failure_and_completes_series() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1, 2]);
        fetcher.fail(&watching_url(2), true);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        orchestrator.run(&[series("7")]).await;
        assert_eq!(orchestrator.progress().failed_episodes(&SeriesId::new("7")), [ep(2)]);

        fetcher.fail(&watching_url(2), false);
        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let report = orchestrator.run(&[series("7")]).await;

        assert_eq!(report.series[0].status, SeriesStatus::Complete);
        assert!(report.series[0].failed.is_empty());
        let id = SeriesId::new("7");
        assert!(orchestrator.progress().is_completed(&id));
        assert_eq!(
            orchestrator.progress().record().completed_episodes[&id],
            BTreeSet::from([ep(1), ep(2)])
        );
        assert_eq!(
            orchestrator.processed_index().processed(&id),
            BTreeSet::from([ep(1), ep(2)])
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_episode_list_leaves_progress_untouched() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[]);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let report = orchestrator.run(&[series("7"), series("8")]).await;

        let statuses: Vec<_> = report.series.iter().map(|s| s.status).collect();
        assert_eq!(statuses, [SeriesStatus::NoEpisodes, SeriesStatus::NoEpisodes]);
        assert!(!temp.path().join("progress.json").exists());
        // Series 8 has no page at all: a 404 is retried like any other status.
        assert_eq!(fetcher.hits(&format!("{BASE}/series/8/")), 3);
        Ok(())
    }

    #[tokio::test]
    async fn completed_series_can_be_skipped() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1]);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        orchestrator.run(&[series("7")]).await;

        let mut skipping = config(temp.path());
        skipping.skip_completed = true;
        let mut orchestrator = ScrapeOrchestrator::new(skipping, fetcher.clone()).await;
        let report = orchestrator.run(&[series("7")]).await;
        assert_eq!(report.series[0].status, SeriesStatus::Skipped);
        assert_eq!(fetcher.hits(&format!("{BASE}/series/7/")), 1);
        Ok(())
    }

    #[tokio::test]
    async fn lost_index_is_rebuilt_from_quality_files() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1, 2]);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        orchestrator.run(&[series("7")]).await;
        std::fs::write(temp.path().join("processed_data.json"), b"{ truncated")?;

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let report = orchestrator.run(&[series("7")]).await;
        assert!(report.series[0].added.is_empty());
        assert_eq!(fetcher.hits(&watching_url(1)), 1);
        assert_eq!(
            orchestrator.processed_index().processed(&SeriesId::new("7")),
            BTreeSet::from([ep(1), ep(2)])
        );
        Ok(())
    }

    #[tokio::test]
    async fn failed_episode_is_retried_before_the_run_ends() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1, 2, 3]);
        fetcher.fail_times(&watching_url(2), 3);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let report = orchestrator.run(&[series("7")]).await;

        let series_report = &report.series[0];
        assert_eq!(series_report.status, SeriesStatus::Complete);
        assert_eq!(series_report.added, [ep(1), ep(2), ep(3)]);
        assert!(series_report.failed.is_empty());
        assert_eq!(fetcher.hits(&watching_url(2)), 4);
        assert_eq!(fetcher.hits(&format!("{BASE}/series/7/")), 2);

        let progress: serde_json::Value =
            serde_json::from_slice(&std::fs::read(temp.path().join("progress.json"))?)?;
        assert!(progress["failed_episodes"].get("7").is_none());
        assert_eq!(progress["completed_series"], serde_json::json!(["7"]));

        let series_dir = temp.path().join("ids").join("7");
        assert_eq!(numbers(&read_quality(&series_dir, "vk_720p.json")?), [1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn merges_follow_episode_order_when_fetches_finish_out_of_order() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1, 2, 3]);
        fetcher.delay(&watching_url(1), Duration::from_millis(150));
        fetcher.delay(&watching_url(2), Duration::from_millis(75));

        let mut run_config = config(temp.path());
        run_config.batch_size = 3;
        let mut orchestrator = ScrapeOrchestrator::new(run_config, fetcher.clone()).await;
        let report = orchestrator.run(&[series("7")]).await;
        assert_eq!(report.series[0].added, [ep(1), ep(2), ep(3)]);

        let index: serde_json::Value =
            serde_json::from_slice(&std::fs::read(temp.path().join("processed_data.json"))?)?;
        let ledger: Vec<&str> = index["series"]["7"]["episodes"]
            .as_array()
            .expect("ledger array")
            .iter()
            .filter_map(|entry| entry["number"].as_str())
            .collect();
        assert_eq!(ledger, ["1", "2", "3"]);
        Ok(())
    }

    #[tokio::test]
    async fn current_series_is_saved_while_episodes_are_in_flight() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1]);
        let gate = fetcher.pause(&watching_url(1));
        let progress_path = temp.path().join("progress.json");

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let catalog = [series("7")];
        let (report, during) = tokio::join!(orchestrator.run(&catalog), async {
            gate.entered.notified().await;
            let during = std::fs::read(&progress_path)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<serde_json::Value>(&bytes)?));
            gate.release.notify_one();
            during
        });

        assert_eq!(during?["current_series"], "7");
        assert_eq!(report.series[0].status, SeriesStatus::Complete);
        let after: serde_json::Value = serde_json::from_slice(&std::fs::read(&progress_path)?)?;
        assert!(after["current_series"].is_null());
        Ok(())
    }

    #[tokio::test]
    async fn delisted_episode_no_longer_counts_as_failed() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let fetcher = stub_with_episodes("7", &[1, 2]);
        fetcher.fail(&watching_url(2), true);

        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        orchestrator.run(&[series("7")]).await;
        assert_eq!(orchestrator.progress().failed_episodes(&SeriesId::new("7")), [ep(2)]);

        fetcher.page(&format!("{BASE}/series/7/"), series_page(&[1]));
        let mut orchestrator = ScrapeOrchestrator::new(config(temp.path()), fetcher.clone()).await;
        let report = orchestrator.run(&[series("7")]).await;

        assert_eq!(report.series[0].status, SeriesStatus::Complete);
        assert!(report.series[0].failed.is_empty());
        assert!(
            orchestrator
                .progress()
                .failed_episodes(&SeriesId::new("7"))
                .is_empty()
        );
        Ok(())
    }
}
