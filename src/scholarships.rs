use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::{self, ScholarshipRow, SCHOLARSHIPS_TABLE};
use crate::normalize::slugify;
use crate::report::banner;
use crate::validate;

static AMOUNT_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:,\d{3})*(?:\.\d+)?").unwrap());
static NON_TAG_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

const FULL_RIDE_KEYWORDS: [&str; 4] = ["full cost", "full tuition", "full ride", "varies"];
const DEADLINE_FORMATS: [&str; 2] = ["%B %d, %Y", "%Y-%m-%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountType {
    Fixed,
    Range,
    FullRide,
    Unknown,
}

impl AmountType {
    pub fn as_str(self) -> &'static str {
        match self {
            AmountType::Fixed => "fixed",
            AmountType::Range => "range",
            AmountType::FullRide => "full-ride",
            AmountType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedAmount {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub kind: AmountType,
}

impl ParsedAmount {
    fn unbounded(kind: AmountType) -> Self {
        ParsedAmount {
            min: None,
            max: None,
            kind,
        }
    }
}

/// Bounds and kind from display text such as `"Up to $2,500"` or `"$5,000-$10,000"`.
pub fn parse_amount(text: Option<&str>) -> ParsedAmount {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return ParsedAmount::unbounded(AmountType::Unknown);
    };
    let lower = text.to_lowercase();
    if FULL_RIDE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return ParsedAmount::unbounded(AmountType::FullRide);
    }

    // Commas dropped, fraction truncated.
    let numbers: Vec<i64> = AMOUNT_NUMBER
        .find_iter(text)
        .filter_map(|m| {
            let whole = m.as_str().split('.').next().unwrap_or_default();
            whole.replace(',', "").parse().ok()
        })
        .collect();

    match numbers.as_slice() {
        [] => ParsedAmount::unbounded(AmountType::Unknown),
        [first, ..] if lower.contains("up to") => ParsedAmount {
            min: Some(0),
            max: Some(*first),
            kind: AmountType::Range,
        },
        [a, b] => ParsedAmount {
            min: Some(*a.min(b)),
            max: Some(*a.max(b)),
            kind: AmountType::Range,
        },
        [first, ..] => ParsedAmount {
            min: Some(*first),
            max: Some(*first),
            kind: AmountType::Fixed,
        },
    }
}

/// `"October 15, 2025"` or `"2025-10-15"` → `"2025-10-15T23:59:59.999Z"`.
pub fn parse_deadline(text: &str) -> Option<String> {
    let text = text.trim();
    let date = DEADLINE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok());
    let Some(date) = date else {
        warn!("Invalid deadline: {:?}", text);
        return None;
    };
    let end_of_day = date.and_hms_milli_opt(23, 59, 59, 999)?;
    Some(end_of_day.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Type as a dashed tag, plus category words longer than two characters.
pub fn generate_tags(kind: Option<&str>, category: Option<&str>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut push = |tag: String| {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    };
    if let Some(kind) = kind.filter(|k| !k.is_empty()) {
        push(NON_TAG_CHARS.replace_all(&kind.to_lowercase(), "-").into_owned());
    }
    if let Some(category) = category {
        for word in category.to_lowercase().split_whitespace() {
            if word.chars().count() > 2 {
                push(word.to_string());
            }
        }
    }
    tags
}

#[derive(Debug, Deserialize)]
pub struct RawScholarship {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub eligibility: Vec<String>,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub application_required: bool,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct Enrichment {
    #[serde(default)]
    pub sponsor: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default, rename = "applicationUrl")]
    pub application_url: Option<String>,
}

/// Slug → enrichment, from an already-parsed enrichment document.
/// Entries without a slug or an `enrichment_data` object are left out.
pub fn enrichment_map(doc: &Value) -> HashMap<String, Enrichment> {
    let Some(entries) = doc.get("scholarships").and_then(Value::as_array) else {
        warn!("Enrichment file has no scholarships array; continuing without enrichment");
        return HashMap::new();
    };
    let mut map = HashMap::new();
    for entry in entries {
        let Some(slug) = entry.get("slug").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            continue;
        };
        let Some(data) = entry.get("enrichment_data").filter(|d| d.is_object()) else {
            continue;
        };
        match Enrichment::deserialize(data) {
            Ok(e) => {
                map.insert(slug.to_string(), e);
            }
            Err(e) => warn!("Ignoring enrichment for {}: {}", slug, e),
        }
    }
    map
}

fn load_enrichment(path: &Path) -> HashMap<String, Enrichment> {
    match validate::load_document(path) {
        Ok(doc) => enrichment_map(&doc),
        Err(e) => {
            warn!("{}; sponsor and website fields will be empty", e);
            HashMap::new()
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn transform_scholarship(
    raw: &RawScholarship,
    enrichment: &HashMap<String, Enrichment>,
    now: &str,
) -> Result<ScholarshipRow> {
    let slug = slugify(&raw.name);
    let amount = parse_amount(raw.amount.as_deref());
    let extra = enrichment.get(&slug).cloned().unwrap_or_default();
    let website = present(&extra.website);

    Ok(ScholarshipRow {
        id: raw.id.clone().unwrap_or_else(|| slug.clone()),
        name: raw.name.clone(),
        amount: raw.amount.clone(),
        amount_min: amount.min,
        amount_max: amount.max,
        amount_type: amount.kind.as_str().to_string(),
        deadline: raw.deadline.as_deref().and_then(parse_deadline),
        deadline_display: raw.deadline.clone(),
        is_rolling: false,
        kind: raw.kind.clone(),
        category: raw.category.clone(),
        tags: serde_json::to_string(&generate_tags(raw.kind.as_deref(), raw.category.as_deref()))?,
        description: raw.description.clone(),
        eligibility: serde_json::to_string(&raw.eligibility)?,
        renewable: raw.renewable,
        application_required: raw.application_required,
        application_url: present(&extra.application_url),
        sponsor: present(&extra.sponsor),
        sponsor_website: website.clone(),
        website,
        image_url: raw.image.clone(),
        created_at: now.to_string(),
        updated_at: now.to_string(),
        slug,
    })
}

/// Listings without a source `id` fall back to their slug. Repeated slugs get
/// `-2`, `-3`, ... so they never collide with each other or with a source id.
fn disambiguate_fallback_ids(raw: &[RawScholarship], rows: &mut [ScholarshipRow]) {
    let mut taken: HashSet<String> = raw.iter().filter_map(|r| r.id.clone()).collect();
    for (r, row) in raw.iter().zip(rows.iter_mut()) {
        if r.id.is_some() {
            continue;
        }
        let mut id = row.id.clone();
        let mut n = 2;
        while taken.contains(&id) {
            id = format!("{}-{}", row.id, n);
            n += 1;
        }
        taken.insert(id.clone());
        row.id = id;
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScholarshipStats {
    pub total: usize,
    pub inserted: usize,
    pub failed_inserts: usize,
    pub enrichment_entries: usize,
    pub fixed: usize,
    pub range: usize,
    pub full_ride: usize,
    pub unknown: usize,
    pub deadlines_parsed: usize,
    pub with_bounds: usize,
    pub with_tags: usize,
    pub needs_website: usize,
    pub needs_sponsor: usize,
    pub needs_application_url: usize,
}

impl ScholarshipStats {
    fn from_rows(rows: &[ScholarshipRow]) -> Self {
        let count = |f: &dyn Fn(&ScholarshipRow) -> bool| rows.iter().filter(|r| f(r)).count();
        ScholarshipStats {
            total: rows.len(),
            fixed: count(&|r| r.amount_type == AmountType::Fixed.as_str()),
            range: count(&|r| r.amount_type == AmountType::Range.as_str()),
            full_ride: count(&|r| r.amount_type == AmountType::FullRide.as_str()),
            unknown: count(&|r| r.amount_type == AmountType::Unknown.as_str()),
            deadlines_parsed: count(&|r| r.deadline.is_some()),
            with_bounds: count(&|r| r.amount_min.is_some() && r.amount_max.is_some()),
            with_tags: count(&|r| r.tags != "[]"),
            needs_website: count(&|r| r.website.is_none()),
            needs_sponsor: count(&|r| r.sponsor.is_none()),
            needs_application_url: count(&|r| r.application_url.is_none()),
            ..Default::default()
        }
    }

    fn print(&self) {
        let n = self.total;
        banner("TRANSFORMATION STATISTICS");
        println!("\nAmount Types:");
        println!("  Fixed amount:     {}", self.fixed);
        println!("  Range:            {}", self.range);
        println!("  Full-ride:        {}", self.full_ride);
        println!("  Unknown:          {}", self.unknown);
        println!("\nDeadlines:");
        println!("  Successfully parsed: {}/{}", self.deadlines_parsed, n);
        println!("\nField Completeness:");
        println!("  amount bounds:    {}/{}", self.with_bounds, n);
        println!("  tags:             {}/{}", self.with_tags, n);
        println!("\nManual Enrichment Needed:");
        println!("  website:          {}/{}", self.needs_website, n);
        println!("  sponsor:          {}/{}", self.needs_sponsor, n);
        println!("  applicationUrl:   {}/{}", self.needs_application_url, n);
    }
}

/// Rebuild `scholarships_ui` from a JSON array of raw listings.
pub fn run(conn: &Connection, source: &Path, enrichment_path: &Path) -> Result<ScholarshipStats> {
    banner("SCHOLARSHIP ETL PIPELINE");

    let text = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let raw: Vec<RawScholarship> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of scholarships", source.display()))?;
    println!("\nSource: {} ({} records)", source.display(), raw.len());

    let enrichment = load_enrichment(enrichment_path);
    println!("Loaded enrichment for {} scholarships", enrichment.len());

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut rows = raw
        .iter()
        .map(|r| transform_scholarship(r, &enrichment, &now))
        .collect::<Result<Vec<_>>>()?;
    disambiguate_fallback_ids(&raw, &mut rows);

    if db::recreate_scholarships_ui(conn)? {
        info!("Dropped existing {} collection", SCHOLARSHIPS_TABLE);
    }
    let outcome = db::insert_scholarships(conn, &rows)?;
    println!("Inserted {} records into {}", outcome.inserted, SCHOLARSHIPS_TABLE);
    if outcome.failed > 0 {
        println!("Failed inserts: {}", outcome.failed);
    }

    let stats = ScholarshipStats {
        inserted: outcome.inserted,
        failed_inserts: outcome.failed,
        enrichment_entries: enrichment.len(),
        ..ScholarshipStats::from_rows(&rows)
    };
    stats.print();
    Ok(stats)
}
