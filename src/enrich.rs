use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db;
use crate::images::fetch::PageFetcher;
use crate::images::{self, ImageSource};
use crate::report::{banner, percent, thousands};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub total: usize,
    pub processed: usize,
    pub opengraph: usize,
    pub favicon: usize,
    pub fallback_no_website: usize,
    pub fallback_no_image: usize,
    pub fallback_error: usize,
    pub skipped: usize,
}

impl EnrichStats {
    pub fn record(&mut self, source: &ImageSource) {
        self.processed += 1;
        match source {
            ImageSource::OpenGraph => self.opengraph += 1,
            ImageSource::Favicon => self.favicon += 1,
            ImageSource::FallbackNoWebsite => self.fallback_no_website += 1,
            ImageSource::FallbackNoImage => self.fallback_no_image += 1,
            ImageSource::FallbackError(_) => self.fallback_error += 1,
        }
    }

    pub fn real_images(&self) -> usize {
        self.opengraph + self.favicon
    }

    pub fn fallbacks(&self) -> usize {
        self.fallback_no_website + self.fallback_no_image + self.fallback_error
    }

    pub fn print(&self) {
        banner("ENRICHMENT RESULTS");
        let line = |label: &str, n: usize| {
            println!("  {:<28} {:>8} ({:.1}%)", label, thousands(n), percent(n, self.processed));
        };
        println!("\nTotal Processed: {}", thousands(self.processed));
        println!("Skipped:         {}", thousands(self.skipped));
        println!("\nImage Sources:");
        line("OpenGraph (og:image):", self.opengraph);
        line("Favicon/Apple Touch Icon:", self.favicon);
        line("Fallback (no website):", self.fallback_no_website);
        line("Fallback (no image found):", self.fallback_no_image);
        line("Fallback (fetch error):", self.fallback_error);
        println!("\nSummary:");
        line("Real Images:", self.real_images());
        line("Fallback Images:", self.fallbacks());
    }
}

/// Resolve and persist an image for every active college, one at a time,
/// pausing `rate_limit_delay` after each persisted record.
pub async fn run<F>(
    conn: &Connection,
    settings: &Settings,
    fetcher: &F,
    limit: Option<usize>,
) -> Result<EnrichStats>
where
    F: PageFetcher + ?Sized,
{
    let target = settings.target_collection.as_str();
    let delay = settings.rate_limit_delay();

    banner("COLLEGE IMAGE ENRICHMENT");

    let active = db::count_colleges(conn, target, true)?;
    let total = limit.map_or(active, |n| n.min(active));
    let mut stats = EnrichStats {
        total,
        ..Default::default()
    };
    println!("\nTotal colleges to process: {}", thousands(total));
    if total == 0 {
        println!("Nothing to enrich. Run `transform` first.");
        stats.print();
        return Ok(stats);
    }
    println!(
        "Processing in batches of {} ({}ms between requests)\n",
        settings.enrich_batch_size,
        delay.as_millis()
    );

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut seen = 0;
    let mut last_id = 0;
    while seen < total {
        let want = settings.enrich_batch_size.min(total - seen);
        let batch = db::fetch_image_targets(conn, target, true, last_id, want)?;
        let Some(last) = batch.last() else { break };
        last_id = last.id;

        for college in &batch {
            seen += 1;
            let resolution = images::resolve_image(fetcher, college).await;
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

            match db::update_image(conn, target, &college.ipeds_id, &resolution.image_url, &now) {
                Ok(1) => {
                    if resolution.source.is_fallback() {
                        debug!("{}: {}", college.name, resolution.source);
                    } else {
                        debug!("{} -> {} ({})", college.name, resolution.image_url, resolution.source);
                    }
                    stats.record(&resolution.source);
                    tokio::time::sleep(delay).await;
                }
                Ok(n) => {
                    warn!("Error processing {}: update matched {} records", college.name, n);
                    stats.skipped += 1;
                }
                Err(e) => {
                    warn!("Error processing {}: {}", college.name, e);
                    stats.skipped += 1;
                }
            }
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    info!(
        "Enriched {} colleges ({} real, {} fallback, {} skipped)",
        stats.processed,
        stats.real_images(),
        stats.fallbacks(),
        stats.skipped
    );
    stats.print();
    Ok(stats)
}
