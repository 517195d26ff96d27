mod db;
mod epub;
mod fetch;
mod model;
mod naming;
mod parser;
mod pipeline;
mod sites;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "novel2epub", about = "Scrape serialized web novels into EPUB volumes")]
struct Cli {
    /// Page cache database
    #[arg(long, default_value = "data/pages.sqlite", global = true)]
    cache: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the page cache: fetch the volumes page and every chapter it links
    Crawl { url: String },
    /// Segment the source page and assemble every missing volume
    Build {
        url: String,
        /// Output directory for the archives
        #[arg(short, long, default_value = "ebooks")]
        out_dir: PathBuf,
        /// Worker pool capacity for archive assembly (default: CPU count)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Queue capacity between producer and consumer
        #[arg(long, default_value = "2")]
        queue_size: usize,
        /// Stop after this many volumes
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Fetch pages live even when cached
        #[arg(long)]
        live: bool,
    },
    /// Dry-run segmentation: list the volumes the page would produce
    Plan {
        url: String,
        #[arg(long)]
        json: bool,
        /// Fetch the page live even when cached
        #[arg(long)]
        live: bool,
    },
    /// Page cache statistics
    Stats,
}

#[derive(serde::Serialize)]
struct PlanEntry {
    title: String,
    filename: String,
    series: Option<String>,
    chapters: usize,
    cover: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Crawl { url } => {
            let site = sites::for_url(&url)?;
            let cache = db::PageCache::open(&cli.cache)?;
            let stats = fetch::crawl(&cache, site, &url).await?;
            println!(
                "Crawled {} pages ({} already cached, {} errors).",
                stats.fetched, stats.cached, stats.errors
            );
            Ok(())
        }
        Commands::Build {
            url,
            out_dir,
            workers,
            queue_size,
            limit,
            live,
        } => {
            let site = sites::for_url(&url)?;
            let cache = if live {
                None
            } else {
                Some(Arc::new(db::PageCache::open(&cli.cache)?))
            };
            let fetcher = Arc::new(fetch::Fetcher::new(cache)?);
            let index = naming::FsIndex::new(out_dir.clone());
            let config = pipeline::PipelineConfig {
                queue_size,
                workers: workers.unwrap_or_else(rayon::current_num_threads),
                limit,
                out_dir,
            };
            let stats = pipeline::run(fetcher, site, &url, &index, &config).await?;
            println!(
                "Produced {} volumes: {} built, {} failed ({} batches).",
                stats.produced, stats.built, stats.failed, stats.batches
            );
            Ok(())
        }
        Commands::Plan { url, json, live } => {
            let site = sites::for_url(&url)?;
            let cache = if live {
                None
            } else {
                Some(Arc::new(db::PageCache::open(&cli.cache)?))
            };
            let fetcher = fetch::Fetcher::new(cache)?;
            let html = fetcher.fetch_page(&url).await?;
            let nodes = parser::page_nodes(&html, site)?;

            let mut segmenter = parser::segment::Segmenter::new(nodes, &naming::NullIndex);
            let mut entries = Vec::new();
            while let Some(block) = segmenter.next_block() {
                entries.push(PlanEntry {
                    filename: naming::generate_filename(&block.title),
                    title: block.title,
                    series: block.series,
                    chapters: block.chapter_refs.len(),
                    cover: block.cover_url.is_some(),
                });
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No volumes found.");
            } else {
                println!(
                    "{:>3} | {:<32} | {:>8} | {:>5} | {}",
                    "#", "Volume", "Chapters", "Cover", "Filename"
                );
                println!("{}", "-".repeat(80));
                for (i, e) in entries.iter().enumerate() {
                    println!(
                        "{:>3} | {:<32} | {:>8} | {:>5} | {}",
                        i + 1,
                        truncate(&e.title, 32),
                        e.chapters,
                        if e.cover { "yes" } else { "no" },
                        e.filename
                    );
                }
                if let Some(series) = entries.first().and_then(|e| e.series.as_deref()) {
                    println!("\nSeries: {series}");
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let cache = db::PageCache::open(&cli.cache)?;
            let s = cache.stats()?;
            println!("Pages: {}", s.pages);
            println!("Bytes: {}", s.bytes);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
