//! The producer/consumer pipeline: one cooperative task segments the source
//! page and fetches chapter content, a bounded queue hands finished
//! `VolumeRecord`s to a consumer that dispatches them in pool-sized batches
//! to rayon workers for archive assembly.
//!
//! The queue's capacity is the sole backpressure mechanism; a `None` on the
//! queue is the sentinel meaning no further volumes will be produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::epub::{self, CHAPTER_STYLE};
use crate::fetch::Fetcher;
use crate::model::{ChapterRecord, MediaRecord, RawVolumeBlock, TagRecord, VolumeRecord};
use crate::naming::BuiltIndex;
use crate::parser;
use crate::parser::chapter::{self, ChapterTag};
use crate::parser::segment::Segmenter;
use crate::sites::SiteSpec;

const CHAPTER_CONCURRENCY: usize = 6;

pub struct PipelineConfig {
    pub queue_size: usize,
    pub workers: usize,
    pub limit: Option<usize>,
    pub out_dir: PathBuf,
}

pub struct RunStats {
    pub produced: usize,
    pub built: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Run the full pipeline for one source page.
pub async fn run(
    fetcher: Arc<Fetcher>,
    site: &'static SiteSpec,
    url: &str,
    index: &dyn BuiltIndex,
    config: &PipelineConfig,
) -> Result<RunStats> {
    let (tx, rx) = tokio::sync::mpsc::channel(config.queue_size.max(1));

    let (produced, consumed) = tokio::join!(
        produce(&fetcher, site, url, index, tx, config.limit),
        consume(rx, config.workers, config.out_dir.clone()),
    );
    let consumed = consumed?;
    let produced = produced?;

    Ok(RunStats {
        produced,
        built: consumed.built,
        failed: consumed.failed,
        batches: consumed.batches,
    })
}

/// Segment the source page and enqueue one `VolumeRecord` per block,
/// followed by exactly one sentinel. The sentinel goes out even when the
/// page itself cannot be fetched, so the consumer never hangs.
pub async fn produce(
    fetcher: &Arc<Fetcher>,
    site: &'static SiteSpec,
    url: &str,
    index: &dyn BuiltIndex,
    tx: Sender<Option<VolumeRecord>>,
    limit: Option<usize>,
) -> Result<usize> {
    let result = produce_inner(fetcher, site, url, index, &tx, limit).await;
    if tx.send(None).await.is_err() {
        warn!("consumer gone before sentinel");
    }
    result
}

async fn produce_inner(
    fetcher: &Arc<Fetcher>,
    site: &'static SiteSpec,
    url: &str,
    index: &dyn BuiltIndex,
    tx: &Sender<Option<VolumeRecord>>,
    limit: Option<usize>,
) -> Result<usize> {
    let html = fetcher
        .fetch_page(url)
        .await
        .context("fetch source page")?;
    let nodes = parser::page_nodes(&html, site)?;

    let mut segmenter = Segmenter::new(nodes, index);
    let mut produced = 0usize;

    // Volumes are produced one at a time: segmentation shares cursor state,
    // and the bounded queue is what limits how far we run ahead.
    while let Some(block) = segmenter.next_block() {
        if limit.is_some_and(|n| produced >= n) {
            break;
        }
        let volume = build_volume(fetcher, site, block).await;
        tx.send(Some(volume))
            .await
            .ok()
            .context("consumer dropped the queue")?;
        produced += 1;
    }

    info!(source = url, produced, "source page exhausted");
    Ok(produced)
}

/// Resolve one raw block into a full `VolumeRecord`: chapters concurrently
/// with each other, media eagerly, cover last.
async fn build_volume(
    fetcher: &Arc<Fetcher>,
    site: &'static SiteSpec,
    block: RawVolumeBlock,
) -> VolumeRecord {
    let pb = ProgressBar::new(block.chapter_refs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:30}] {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );
    pb.set_message(block.title.clone());

    let semaphore = Arc::new(Semaphore::new(CHAPTER_CONCURRENCY));
    let mut tasks = JoinSet::new();
    for (n, chapter) in block.chapter_refs.iter().enumerate() {
        let fetcher = Arc::clone(fetcher);
        let sem = Arc::clone(&semaphore);
        let pb = pb.clone();
        let name = chapter.name.clone();
        let url = chapter.url.clone();
        let volume = block.title.clone();
        tasks.spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let record = match chapter_record(&fetcher, site, &name, &url, &volume).await {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(chapter = %name, volume = %volume, "skipping chapter: {e:#}");
                    None
                }
            };
            pb.inc(1);
            (n, record)
        });
    }

    let mut slots: Vec<Option<ChapterRecord>> = vec![None; block.chapter_refs.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((n, record)) => slots[n] = record,
            Err(e) => warn!(volume = %block.title, "chapter task failed: {e}"),
        }
    }
    pb.finish_and_clear();

    let cover = match &block.cover_url {
        Some(url) => match fetcher.fetch_media(url).await {
            Ok((content_type, bytes)) => Some(MediaRecord::new(
                bytes,
                Some("cover".into()),
                Some(content_type),
                None,
            )),
            Err(e) => {
                warn!(volume = %block.title, "cover fetch failed, continuing without cover: {e:#}");
                None
            }
        },
        None => None,
    };

    VolumeRecord {
        title: block.title,
        author: block.author,
        series: block.series,
        language: site.language.to_string(),
        direction: site.direction,
        cover,
        chapters: slots.into_iter().flatten().collect(),
        metadata: Vec::new(),
        filename: None,
    }
}

/// Fetch and normalize one chapter, replacing every img reference with its
/// fetched media.
async fn chapter_record(
    fetcher: &Arc<Fetcher>,
    site: &'static SiteSpec,
    name: &str,
    url: &str,
    volume: &str,
) -> Result<ChapterRecord> {
    let html = fetcher.fetch_page(url).await?;
    // The DOM stays inside extract(); only owned tags cross the awaits below.
    let tags = chapter::extract(&html, site)?;

    let sources: Vec<String> = tags
        .iter()
        .filter_map(|t| match t {
            ChapterTag::Img { src } => Some(src.clone()),
            _ => None,
        })
        .collect();

    // Media fetches are concurrent across the tags of this one chapter; the
    // fetch capability's own limits are the bound.
    let mut fetches = JoinSet::new();
    for (i, src) in sources.iter().enumerate() {
        let fetcher = Arc::clone(fetcher);
        let src = src.clone();
        let chapter = name.to_string();
        let volume = volume.to_string();
        fetches.spawn(async move {
            let media = match fetcher.fetch_media(&src).await {
                Ok((content_type, bytes)) => {
                    Some(MediaRecord::new(bytes, None, Some(content_type), None))
                }
                Err(e) => {
                    warn!(chapter = %chapter, volume = %volume, url = %src, "media fetch failed: {e:#}");
                    None
                }
            };
            (i, media)
        });
    }
    let mut media: Vec<Option<MediaRecord>> = vec![None; sources.len()];
    while let Some(joined) = fetches.join_next().await {
        if let Ok((i, m)) = joined {
            media[i] = m;
        }
    }

    Ok(ChapterRecord {
        name: name.to_string(),
        tags: attach_media(tags, media),
        stylesheets: vec![CHAPTER_STYLE.to_string()],
    })
}

/// Pair extracted tags with their fetched media: the nth img tag consumes
/// the nth fetch result; a failed fetch drops the tag (already logged at the
/// fetch site).
fn attach_media(tags: Vec<ChapterTag>, media: Vec<Option<MediaRecord>>) -> Vec<TagRecord> {
    let mut media = media.into_iter();
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        match tag {
            ChapterTag::Img { .. } => {
                if let Some(Some(m)) = media.next() {
                    out.push(TagRecord::Img(m));
                }
            }
            ChapterTag::H3(text) => out.push(TagRecord::H3(text)),
            ChapterTag::P(text) => out.push(TagRecord::P(text)),
            ChapterTag::Ul(links) => out.push(TagRecord::Ul(links)),
        }
    }
    out
}

pub struct ConsumeStats {
    pub built: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Drain the queue, batching up to `capacity` records before handing them to
/// the worker pool. Terminates once the sentinel is seen and the final
/// partial batch has been dispatched.
pub async fn consume(
    mut rx: Receiver<Option<VolumeRecord>>,
    capacity: usize,
    out_dir: PathBuf,
) -> Result<ConsumeStats> {
    let capacity = capacity.max(1);
    let mut batch: Vec<VolumeRecord> = Vec::with_capacity(capacity);
    let mut stats = ConsumeStats {
        built: 0,
        failed: 0,
        batches: 0,
    };

    loop {
        match rx.recv().await {
            Some(Some(volume)) => {
                batch.push(volume);
                if batch.len() >= capacity {
                    dispatch(std::mem::take(&mut batch), &out_dir, &mut stats).await?;
                }
            }
            // Sentinel, or a producer that died without one: flush and stop.
            Some(None) | None => {
                if !batch.is_empty() {
                    dispatch(std::mem::take(&mut batch), &out_dir, &mut stats).await?;
                }
                return Ok(stats);
            }
        }
    }
}

/// One worker per record; the whole batch is awaited before the next pop,
/// so at most `capacity` volumes are ever in flight.
async fn dispatch(
    batch: Vec<VolumeRecord>,
    out_dir: &Path,
    stats: &mut ConsumeStats,
) -> Result<()> {
    stats.batches += 1;
    let out_dir = out_dir.to_path_buf();
    let results = tokio::task::spawn_blocking(move || {
        batch
            .into_par_iter()
            .map(|volume| {
                let title = volume.title.clone();
                (title, epub::assemble(&volume, &out_dir))
            })
            .collect::<Vec<_>>()
    })
    .await
    .context("assembly worker pool panicked")?;

    for (title, result) in results {
        match result {
            Ok(path) => {
                info!(volume = %title, path = %path.display(), "archive written");
                stats.built += 1;
            }
            Err(e) => {
                error!(volume = %title, "archive write failed: {e:#}");
                stats.failed += 1;
            }
        }
    }
    Ok(())
}
