use anyhow::{bail, Result};
use chrono::{SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::{self, CollegeRow, QualityCounts};
use crate::normalize::{
    as_code, as_number, calculate_average, convert_acceptance_rate, normalize_website, safe_add,
    slugify, Control, DegreeLevel,
};
use crate::report::{banner, percent, thousands};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("document is not a JSON object")]
    NotAnObject,
    #[error("document has no ipedsId")]
    MissingIpedsId,
}

/// Map one raw document to its UI record.
pub fn transform_college(doc: &str, source_collection: &str, now: &str) -> Result<CollegeRow, TransformError> {
    let college: Value = serde_json::from_str(doc)?;
    if !college.is_object() {
        return Err(TransformError::NotAnObject);
    }
    let ipeds_id = ipeds_id(&college).ok_or(TransformError::MissingIpedsId)?;

    let name = non_empty_str(&college, "/name").unwrap_or("Unknown College").to_string();
    let slug = slugify(&name);
    let state = non_empty_str(&college, "/location/state").unwrap_or_default().to_string();
    let number = |ptr: &str| as_number(college.pointer(ptr));

    let tuition_in = number("/financials/tuitionInState");
    let tuition_out = number("/financials/tuitionOutOfState");

    Ok(CollegeRow {
        canonical_url: format!("/colleges/{}/{}", state.to_lowercase(), slug),
        city: non_empty_str(&college, "/location/city").map(str::to_string),
        public_private: Control::from_code(as_code(college.get("control"))).label().to_string(),
        degree_level: DegreeLevel::from_sector(as_code(college.get("sector"))).label().to_string(),
        in_state_tuition: tuition_in,
        out_state_tuition: tuition_out,
        avg_net_price: number("/financials/avgCostAttendance"),
        sticker_price_in_state: safe_add(tuition_in, number("/financials/feesInState")),
        sticker_price_out_state: safe_add(tuition_out, number("/financials/feesOutOfState")),
        acceptance_rate: convert_acceptance_rate(number("/admissions/acceptanceRate")),
        sat_avg: calculate_average(number("/admissions/satRange/min"), number("/admissions/satRange/max")),
        act_avg: calculate_average(number("/admissions/actRange/min"), number("/admissions/actRange/max")),
        website: college
            .get("website")
            .and_then(Value::as_str)
            .and_then(normalize_website),
        is_active: true,
        source_collection: source_collection.to_string(),
        created_at: now.to_string(),
        updated_at: now.to_string(),
        ipeds_id,
        name,
        slug,
        state,
    })
}

fn ipeds_id(college: &Value) -> Option<String> {
    match college.get("ipedsId")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_str<'a>(college: &'a Value, ptr: &str) -> Option<&'a str> {
    college
        .pointer(ptr)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Per-kind counts of documents that could not be transformed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TransformErrors {
    pub malformed: usize,
    pub not_an_object: usize,
    pub missing_ipeds_id: usize,
}

impl TransformErrors {
    fn record(&mut self, err: &TransformError) {
        match err {
            TransformError::Malformed(_) => self.malformed += 1,
            TransformError::NotAnObject => self.not_an_object += 1,
            TransformError::MissingIpedsId => self.missing_ipeds_id += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.malformed + self.not_an_object + self.missing_ipeds_id
    }
}

#[derive(Debug, Default)]
pub struct TransformStats {
    pub source_count: usize,
    pub processed: usize,
    pub inserted: usize,
    pub failed_inserts: usize,
    pub errors: TransformErrors,
}

impl TransformStats {
    /// Fold one per-record result: successes join the batch, failures are counted.
    fn fold(&mut self, source_id: i64, result: Result<CollegeRow, TransformError>, batch: &mut Vec<CollegeRow>) {
        match result {
            Ok(row) => {
                self.processed += 1;
                batch.push(row);
            }
            Err(e) => {
                warn!("Skipping source document {}: {}", source_id, e);
                self.errors.record(&e);
            }
        }
    }
}

/// Rebuild the UI collection from scratch.
pub fn run(conn: &Connection, settings: &Settings) -> Result<TransformStats> {
    let source = settings.source_collection.as_str();
    let target = settings.target_collection.as_str();

    banner("IPEDS → UI TRANSFORMATION PIPELINE");

    db::init_source(conn, source)?;
    let source_count = db::count_rows(conn, source)?;
    println!("\nSource: {}", source);
    println!("   Records: {}", thousands(source_count));
    if source_count == 0 {
        bail!("Source collection {} is empty; run `import` first", source);
    }

    if db::drop_colleges_ui(conn, target)? {
        info!("Dropped existing {} collection", target);
    } else {
        info!("{} does not exist yet (first run)", target);
    }
    db::create_colleges_ui(conn, target)?;

    println!("\nTransforming {} colleges...", thousands(source_count));
    let pb = ProgressBar::new(source_count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut stats = TransformStats {
        source_count,
        ..Default::default()
    };
    let mut last_id = 0;
    loop {
        let page = db::fetch_source_page(conn, source, last_id, settings.transform_batch_size)?;
        let Some(last) = page.last() else { break };
        last_id = last.id;

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut batch = Vec::with_capacity(page.len());
        for doc in &page {
            stats.fold(doc.id, transform_college(&doc.doc, source, &now), &mut batch);
        }

        let outcome = db::insert_colleges(conn, target, &batch)?;
        stats.inserted += outcome.inserted;
        stats.failed_inserts += outcome.failed;
        pb.inc(page.len() as u64);
    }
    pb.finish_and_clear();

    println!("\nTransformation complete");
    println!(
        "   Processed: {}/{}",
        thousands(stats.processed),
        thousands(stats.source_count)
    );
    println!("   Inserted:  {}", thousands(stats.inserted));
    println!("   Errors:    {}", stats.errors.total() + stats.failed_inserts);

    db::create_ui_indexes(conn, target)?;
    println!("\nIndexes created (slug, state, public_private, degree_level, is_active, name text)");

    print_quality_report(&db::quality_counts(conn, target)?);
    print_samples(conn, target)?;

    banner("TRANSFORMATION COMPLETE");
    println!("\nNew collection: {}", target);
    println!("Total records: {}", thousands(stats.inserted));
    Ok(stats)
}

fn print_quality_report(q: &QualityCounts) {
    println!("\nData Quality Report:");
    println!("   {}", "-".repeat(60));
    let rows = [
        ("Total Records", q.total),
        ("With Acceptance Rate", q.acceptance_rate),
        ("With SAT Average", q.sat_avg),
        ("With ACT Average", q.act_avg),
        ("With In-State Tuition", q.in_state_tuition),
        ("With Out-State Tuition", q.out_state_tuition),
        ("With Avg Net Price", q.avg_net_price),
        ("With Website", q.website),
    ];
    for (label, value) in rows {
        println!(
            "   {:<30}: {:>8} ({:.1}%)",
            label,
            thousands(value),
            percent(value, q.total)
        );
    }
}

fn print_samples(conn: &Connection, target: &str) -> Result<()> {
    println!("\nSample Records:");
    for (i, s) in db::fetch_samples(conn, target, 3)?.iter().enumerate() {
        println!("\n   {}. {}", i + 1, s.name);
        println!("      Slug: {}", s.slug);
        println!("      Location: {}, {}", s.city.as_deref().unwrap_or("-"), s.state);
        println!("      Type: {} - {}", s.public_private, s.degree_level);
        println!("      URL: {}", s.canonical_url);
    }
    Ok(())
}

/// Build a UI collection straight from documents, skipping the source table.
#[cfg(test)]
pub(crate) fn seed_ui_collection(conn: &Connection, table: &str, docs: &[Value]) {
    let rows: Vec<CollegeRow> = docs
        .iter()
        .map(|d| transform_college(&d.to_string(), "colleges", "2025-01-01T00:00:00.000Z").unwrap())
        .collect();
    db::create_colleges_ui(conn, table).unwrap();
    db::insert_colleges(conn, table, &rows).unwrap();
}
