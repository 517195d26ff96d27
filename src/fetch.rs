//! Fetch capability: cache-backed page reads plus live HTTP, and the crawl
//! routine that seeds the page cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::db::PageCache;
use crate::parser::{self, nodes::PageNode};
use crate::sites::SiteSpec;

const USER_AGENT: &str = concat!("novel2epub/", env!("CARGO_PKG_VERSION"));
const CRAWL_CONCURRENCY: usize = 8;

pub struct Fetcher {
    client: reqwest::Client,
    cache: Option<Arc<PageCache>>,
}

impl Fetcher {
    pub fn new(cache: Option<Arc<PageCache>>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { client, cache })
    }

    /// Page markup for `url`: the cached copy when present, a live GET
    /// otherwise. The cache is never written here.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        if let Some(cache) = &self.cache {
            if let Some(bytes) = cache.get(&url_path(url)?)? {
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("GET {url}"))?;
        Ok(response.text().await?)
    }

    /// Binary fetch for media: (content type, bytes). Never cached.
    pub async fn fetch_media(&self, url: &str) -> Result<(String, Vec<u8>)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("GET {url}"))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await?;
        Ok((content_type, bytes.to_vec()))
    }
}

/// Normalized cache key for a URL.
pub fn url_path(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("invalid URL {url}"))?;
    Ok(parsed.path().to_string())
}

pub struct CrawlStats {
    pub fetched: usize,
    pub cached: usize,
    pub errors: usize,
}

struct FetchRow {
    path: String,
    html: Option<String>,
    error: Option<String>,
}

/// Seed the page cache: fetch the volumes page, then every chapter it links
/// to, storing raw markup keyed by URL path.
pub async fn crawl(cache: &PageCache, site: &'static SiteSpec, url: &str) -> Result<CrawlStats> {
    let fetcher = Arc::new(Fetcher::new(None)?);

    let html = fetcher
        .fetch_page(url)
        .await
        .context("fetch volumes page")?;
    cache.put(&url_path(url)?, html.as_bytes())?;

    let mut targets = Vec::new();
    let mut stats = CrawlStats {
        fetched: 1,
        cached: 0,
        errors: 0,
    };
    for link in chapter_urls(&html, site)? {
        let path = url_path(&link)?;
        if cache.contains(&path)? {
            stats.cached += 1;
        } else {
            targets.push((path, link));
        }
    }
    info!(
        "Crawling {} chapter pages ({} already cached)",
        targets.len(),
        stats.cached
    );

    let pb = ProgressBar::new(targets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let semaphore = Arc::new(Semaphore::new(CRAWL_CONCURRENCY));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchRow>(CRAWL_CONCURRENCY * 2);

    for (path, link) in targets {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let row = match fetcher.fetch_page(&link).await {
                Ok(html) => FetchRow {
                    path,
                    html: Some(html),
                    error: None,
                },
                Err(e) => FetchRow {
                    path,
                    html: None,
                    error: Some(format!("{e:#}")),
                },
            };
            let _ = tx.send(row).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    while let Some(row) = rx.recv().await {
        match row.html {
            Some(html) => {
                cache.put(&row.path, html.as_bytes())?;
                stats.fetched += 1;
            }
            None => {
                warn!(
                    path = %row.path,
                    "chapter fetch failed: {}",
                    row.error.as_deref().unwrap_or("unknown")
                );
                stats.errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(stats)
}

/// Every chapter URL linked from the volumes page, in document order,
/// deduplicated.
fn chapter_urls(html: &str, site: &'static SiteSpec) -> Result<Vec<String>> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for node in parser::page_nodes(html, site)? {
        if let PageNode::Links { links, .. } = node {
            for (_, href) in links {
                if href.starts_with("http") && seen.insert(href.clone()) {
                    urls.push(href);
                }
            }
        }
    }
    Ok(urls)
}
