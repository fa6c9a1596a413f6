use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db;
use crate::images::{branded_fallback, FALLBACK_IMAGES};
use crate::report::{banner, thousands};

#[derive(Debug, Default)]
pub struct AssignStats {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    /// `(category key, records carrying that key's URL)`, zero counts left out.
    pub distribution: Vec<(&'static str, usize)>,
}

pub fn run(conn: &Connection, settings: &Settings) -> Result<AssignStats> {
    let target = settings.target_collection.as_str();

    banner("QUICK IMAGE ASSIGNMENT");

    let total = db::count_colleges(conn, target, false)?;
    println!("\nTotal colleges: {}", thousands(total));
    let mut stats = AssignStats {
        total,
        ..Default::default()
    };
    if total == 0 {
        println!("Nothing to assign. Run `transform` first.");
        return Ok(stats);
    }

    println!("\nAssigning branded images...");
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut last_id = 0;
    loop {
        let page = db::fetch_image_targets(conn, target, false, last_id, settings.assign_batch_size)?;
        let Some(last) = page.last() else { break };
        last_id = last.id;

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let tx = conn.unchecked_transaction()?;
        for college in &page {
            let url = branded_fallback(&college.public_private, &college.degree_level);
            match db::update_image(&tx, target, &college.ipeds_id, url, &now) {
                Ok(1) => stats.processed += 1,
                Ok(n) => {
                    warn!("Error assigning {}: update matched {} records", college.name, n);
                    stats.skipped += 1;
                }
                Err(e) => {
                    warn!("Error assigning {}: {}", college.name, e);
                    stats.skipped += 1;
                }
            }
            pb.inc(1);
        }
        tx.commit()?;
    }
    pb.finish_and_clear();
    info!(
        "Assigned fallback images to {} colleges ({} skipped)",
        stats.processed, stats.skipped
    );
    println!(
        "\nAssignment complete: {}/{}",
        thousands(stats.processed),
        thousands(stats.total)
    );
    if stats.skipped > 0 {
        println!("Skipped: {}", thousands(stats.skipped));
    }

    // Entries that share a URL each report the combined count.
    for &(key, url) in FALLBACK_IMAGES {
        let count = db::count_with_image(conn, target, url)?;
        if count > 0 {
            stats.distribution.push((key, count));
        }
    }

    banner("IMAGE DISTRIBUTION");
    for (key, count) in &stats.distribution {
        println!("  {:<35}: {}", key, thousands(*count));
    }
    Ok(stats)
}
