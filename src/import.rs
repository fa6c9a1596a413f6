use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use crate::config::Settings;
use crate::db;
use crate::report::thousands;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub read: usize,
    pub cleared: usize,
    pub inserted: usize,
}

/// Split a JSON array or a JSON Lines file into one text per document.
///
/// Array elements are re-serialized. JSON Lines are kept verbatim, so a
/// malformed line reaches the store and is counted later by `transform`.
pub fn split_documents(text: &str) -> Result<Vec<String>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let docs: Vec<Value> =
            serde_json::from_str(trimmed).context("Input looks like a JSON array but does not parse")?;
        return Ok(docs.iter().map(Value::to_string).collect());
    }
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Write serialized documents into the source collection in batches,
/// clearing it first when `replace` is set.
pub fn store_documents(
    conn: &Connection,
    settings: &Settings,
    docs: &[String],
    replace: bool,
) -> Result<ImportStats> {
    let source = settings.source_collection.as_str();
    db::init_source(conn, source)?;
    let mut stats = ImportStats {
        read: docs.len(),
        ..Default::default()
    };
    if replace {
        stats.cleared = db::clear_source(conn, source)?;
        info!("Cleared {} documents from {}", stats.cleared, source);
    }
    for chunk in docs.chunks(settings.transform_batch_size) {
        stats.inserted += db::insert_source_docs(conn, source, chunk)?;
    }
    Ok(stats)
}

pub fn run(conn: &Connection, settings: &Settings, path: &Path, replace: bool) -> Result<ImportStats> {
    let source = settings.source_collection.as_str();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let docs = split_documents(&text)?;
    let stats = store_documents(conn, settings, &docs, replace)?;

    println!(
        "Imported {}/{} documents from {} into {} ({} total)",
        thousands(stats.inserted),
        thousands(stats.read),
        path.display(),
        source,
        thousands(db::count_rows(conn, source)?)
    );
    Ok(stats)
}
