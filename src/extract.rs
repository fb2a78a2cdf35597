use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::ExtractError;
use crate::formats::{EpisodeNumber, EpisodeRef, QualityLinkEntry, QualityLinks, Source};
use crate::http::PageFetcher;

const EPISODE_LIST_SELECTOR: &str = "ul.tabcontent.active#eps";
const QUALITY_BLOCK_SELECTOR: &str = r#"li[aria-label="quality"]"#;
const WATCHING_SUFFIX: &str = "watching/";

// The site serves this redirecting CDN host inside otherwise stable links.
pub const CDN_REDIRECT_HOST: &str = "drone.worldcdn.online";
pub const CDN_STABLE_HOST: &str = "deva-cpmav9sk6x41.cimanowtv.com";

static EPISODE_LIST: LazyLock<Selector> = LazyLock::new(|| selector(EPISODE_LIST_SELECTOR));
static EPISODE_ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("li a"));
static EPISODE_NUMBER: LazyLock<Selector> = LazyLock::new(|| selector("em"));
static QUALITY_BLOCK: LazyLock<Selector> = LazyLock::new(|| selector(QUALITY_BLOCK_SELECTOR));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static SIZE: LazyLock<Selector> = LazyLock::new(|| selector("p"));

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid built-in selector {css:?}: {err}"))
}

#[derive(Clone)]
pub struct EpisodeLinkExtractor {
    fetcher: Arc<dyn PageFetcher>,
}

impl EpisodeLinkExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn extract(&self, series_url: &str) -> Result<Vec<EpisodeRef>, ExtractError> {
        let html = self.fetcher.fetch_page(series_url).await?;
        parse_episode_list(&html, series_url)
    }

    pub async fn extract_or_empty(&self, series_url: &str) -> Vec<EpisodeRef> {
        self.extract(series_url).await.unwrap_or_else(|err| {
            tracing::error!(url = series_url, %err, "failed to extract episode list");
            Vec::new()
        })
    }
}

#[derive(Clone)]
pub struct QualityLinkExtractor {
    fetcher: Arc<dyn PageFetcher>,
}

impl QualityLinkExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn extract(&self, episode_url: &str) -> Result<QualityLinks, ExtractError> {
        let url = watching_url(episode_url);
        let html = self.fetcher.fetch_page(&url).await?;
        parse_quality_links(&html, &url)
    }

    pub async fn extract_or_empty(&self, episode_url: &str) -> QualityLinks {
        self.extract(episode_url).await.unwrap_or_else(|err| {
            tracing::error!(url = episode_url, %err, "failed to extract quality links");
            QualityLinks::default()
        })
    }
}

pub fn watching_url(episode_url: &str) -> String {
    if episode_url.ends_with('/') {
        format!("{episode_url}{WATCHING_SUFFIX}")
    } else {
        format!("{episode_url}/{WATCHING_SUFFIX}")
    }
}

pub fn parse_episode_list(html: &str, page_url: &str) -> Result<Vec<EpisodeRef>, ExtractError> {
    let base = parse_url(page_url)?;
    let document = Html::parse_document(html);
    let list = document
        .select(&EPISODE_LIST)
        .next()
        .ok_or_else(|| ExtractError::MissingContainer {
            url: page_url.to_owned(),
            selector: EPISODE_LIST_SELECTOR,
        })?;

    let mut seen = HashSet::new();
    let mut episodes = Vec::new();
    for anchor in list.select(&EPISODE_ANCHOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let raw_number = anchor
            .select(&EPISODE_NUMBER)
            .next()
            .map(|em| em.text().collect::<String>())
            .unwrap_or_default();
        let number = match raw_number.parse::<EpisodeNumber>() {
            Ok(number) => number,
            Err(err) => {
                tracing::warn!(url = page_url, href, %err, "skipping episode link");
                continue;
            }
        };
        if !seen.insert(number) {
            continue;
        }
        let url = match base.join(href) {
            Ok(url) => url.to_string(),
            Err(err) => {
                tracing::warn!(url = page_url, href, %err, "skipping unresolvable episode link");
                continue;
            }
        };
        episodes.push(EpisodeRef { number, url });
    }

    Ok(episodes)
}

pub fn parse_quality_links(html: &str, page_url: &str) -> Result<QualityLinks, ExtractError> {
    let base = parse_url(page_url)?;
    let document = Html::parse_document(html);

    let mut blocks = document.select(&QUALITY_BLOCK).peekable();
    if blocks.peek().is_none() {
        return Err(ExtractError::MissingContainer {
            url: page_url.to_owned(),
            selector: QUALITY_BLOCK_SELECTOR,
        });
    }

    let mut links = QualityLinks::default();
    for block in blocks {
        for anchor in block.select(&ANCHOR) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(quality) = anchor_label(anchor) else {
                tracing::debug!(url = page_url, href, "media link without quality label");
                continue;
            };
            let size = anchor
                .select(&SIZE)
                .next()
                .map(|p| p.text().collect::<String>().trim().to_owned())
                .unwrap_or_default();

            let absolute = base
                .join(href)
                .map(|url| url.to_string())
                .unwrap_or_else(|_| href.to_owned());
            let url = rewrite_media_url(&absolute);
            let source = classify_source(&url);
            links.insert(source, quality, QualityLinkEntry { url, size });
        }
    }

    Ok(links)
}

fn anchor_label(anchor: ElementRef<'_>) -> Option<String> {
    let mut text = String::new();
    for child in anchor.children() {
        if let Some(element) = ElementRef::wrap(child) {
            if element.value().name() != "p" {
                text.extend(element.text());
            }
        } else if let Some(node) = child.value().as_text() {
            text.push_str(&node.text);
        }
    }
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
}

pub fn rewrite_media_url(url: &str) -> String {
    url.replace(CDN_REDIRECT_HOST, CDN_STABLE_HOST)
}

pub fn classify_source(url: &str) -> Source {
    let is_vk = match Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .is_some_and(|host| host == "vk.com" || host.ends_with(".vk.com")),
        Err(_) => url.contains("vk.com"),
    };
    if is_vk { Source::Vk } else { Source::Deva }
}

fn parse_url(url: &str) -> Result<Url, ExtractError> {
    Url::parse(url).map_err(|source| ExtractError::InvalidUrl {
        url: url.to_owned(),
        source,
    })
}
