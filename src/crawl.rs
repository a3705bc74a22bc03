use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use rusqlite::Connection;
use scraper::{Html, Selector};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::db;
use crate::export::{self, ImageRequest};
use crate::extract;
use crate::sheet::SheetWriter;
use crate::tracker::FetchTracker;
use crate::units::UnitNormalizer;

const CONCURRENCY: usize = 10;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; ultrabook_scraper/0.1)";

static LISTING_LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".archive-text2 a").unwrap());

/// Crawl stats returned after completion.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub listed: usize,
    pub skipped: usize,
    pub fetched: usize,
    pub extracted: usize,
    pub errors: usize,
    pub images: usize,
}

struct FetchedPage {
    url: String,
    seq: usize,
    body: Option<String>,
    error: Option<String>,
}

/// Walk the listing pages, fetch every not-yet-seen review with bounded
/// concurrency, and run each through the record pipeline in one logical
/// sequence. Image fetches are deferred to a final phase.
pub async fn run(
    conn: &Connection,
    tracker: &mut FetchTracker,
    normalizer: &mut UnitNormalizer,
    writer: &mut SheetWriter,
    output_dir: &Path,
    limit: Option<usize>,
) -> Result<CrawlStats> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()?;
    let mut stats = CrawlStats::default();

    // Phase 1: discovery. Pagination ends at the first page with no listings;
    // the tracker gates every link before it is ever scheduled.
    let mut queue: Vec<(String, usize)> = Vec::new();
    let mut page = 1usize;
    loop {
        let url = listing_url(page);
        let body = match fetch_text(&client, &url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Listing fetch failed for {}: {}", url, e);
                break;
            }
        };
        let links = listing_links(&body);
        if links.is_empty() {
            break;
        }
        stats.listed += links.len();
        for link in links {
            if limit.is_some_and(|max| queue.len() >= max) {
                break;
            }
            if !tracker.should_follow(&link) {
                stats.skipped += 1;
                continue;
            }
            tracker.mark_seen(&link);
            queue.push((link, tracker.len()));
        }
        if limit.is_some_and(|max| queue.len() >= max) {
            break;
        }
        page += 1;
    }

    if queue.is_empty() {
        info!("No new review pages discovered");
        return Ok(stats);
    }
    info!("Fetching {} review pages", queue.len());

    // Phase 2: concurrent fetch, serialized processing. Workers ship raw
    // bodies over the channel; parsing and the pipeline stages run here.
    // Writer, normalizer and tracker state must stay single-owner.
    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = mpsc::channel::<FetchedPage>(CONCURRENCY * 2);
    let total = queue.len();
    for (url, seq) in queue {
        let client = client.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let page = match fetch_text(&client, &url).await {
                Ok(body) => FetchedPage {
                    url,
                    seq,
                    body: Some(body),
                    error: None,
                },
                Err(e) => FetchedPage {
                    url,
                    seq,
                    body: None,
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(page).await;
        });
    }
    drop(tx);

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut image_queue: Vec<ImageRequest> = Vec::new();
    while let Some(page) = rx.recv().await {
        pb.inc(1);
        let Some(body) = page.body else {
            warn!(
                "Fetch failed for {}: {}",
                page.url,
                page.error.as_deref().unwrap_or("unknown error")
            );
            stats.errors += 1;
            continue;
        };
        stats.fetched += 1;
        let doc = Html::parse_document(&body);
        let Some(extracted) = extract::review_page(&doc, &page.url, page.seq) else {
            continue;
        };
        stats.extracted += 1;
        process_record(
            conn,
            normalizer,
            writer,
            output_dir,
            &page.url,
            extracted,
            &mut image_queue,
        )?;
    }
    pb.finish_and_clear();

    // Phase 3: deferred image fetches.
    stats.images = download_images(&client, output_dir, image_queue).await;
    Ok(stats)
}

/// One record through the pipeline: raw record to the store, data points to
/// disk, normalized record to the sheet, image references to the fetch queue.
/// Only the sheet append is fatal; everything else logs and moves on.
fn process_record(
    conn: &Connection,
    normalizer: &mut UnitNormalizer,
    writer: &mut SheetWriter,
    output_dir: &Path,
    url: &str,
    extracted: extract::Extracted,
    image_queue: &mut Vec<ImageRequest>,
) -> Result<()> {
    let name = extracted
        .record
        .get(extract::PRODUCT_NAME_KEY)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    if let Err(e) = db::insert_record(conn, url, &name, &extracted.record) {
        warn!("Record store insert failed for {}: {}", url, e);
    }
    if let Err(e) = export::write_data_points(output_dir, &name, &extracted.data_points) {
        warn!("Data point export failed for {}: {}", name, e);
    }

    let normalized = normalizer.normalize(extracted.record);
    writer.append_row(&normalized)?;

    image_queue.extend(export::image_requests(&name, &extracted.images));
    Ok(())
}

async fn download_images(client: &Client, output_dir: &Path, requests: Vec<ImageRequest>) -> usize {
    if requests.is_empty() {
        return 0;
    }
    info!("Downloading {} images", requests.len());
    let pb = ProgressBar::new(requests.len() as u64);

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = mpsc::channel::<Option<PathBuf>>(CONCURRENCY * 2);
    for request in requests {
        let client = client.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let output_dir = output_dir.to_path_buf();
        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let saved = match fetch_bytes(&client, &request.url).await {
                Ok(bytes) => match request.save(&output_dir, &bytes) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!("Unable to save {}: {}", request.url, e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Image fetch failed for {}: {}", request.url, e);
                    None
                }
            };
            let _ = tx.send(saved).await;
        });
    }
    drop(tx);

    let mut saved = 0usize;
    while let Some(result) = rx.recv().await {
        if result.is_some() {
            saved += 1;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    saved
}

fn listing_url(page: usize) -> String {
    if page == 1 {
        extract::BASE_URL.to_string()
    } else {
        format!("{}page/{}/", extract::BASE_URL, page)
    }
}

/// Review links on a listing page, in document order.
pub fn listing_links(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.select(&LISTING_LINKS)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

// ── Tests ──
