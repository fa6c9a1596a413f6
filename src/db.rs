use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    Connection::open_in_memory().unwrap()
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    if !table_exists(conn, table)? {
        return Ok(0);
    }
    let n: usize = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
    Ok(n)
}

// ── Source collection ──

/// Raw college documents, stored verbatim as JSON text.
pub fn init_source(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id          INTEGER PRIMARY KEY,
            doc         TEXT NOT NULL,
            imported_at TEXT NOT NULL DEFAULT (datetime('now'))
        );"
    ))?;
    Ok(())
}

pub fn clear_source(conn: &Connection, table: &str) -> Result<usize> {
    Ok(conn.execute(&format!("DELETE FROM {}", table), [])?)
}

pub fn insert_source_docs(conn: &Connection, table: &str, docs: &[String]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(&format!("INSERT INTO {} (doc) VALUES (?1)", table))?;
        for doc in docs {
            count += stmt.execute(params![doc])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub struct SourceDoc {
    pub id: i64,
    pub doc: String,
}

/// One page of source documents after `after_id`, in id order.
pub fn fetch_source_page(
    conn: &Connection,
    table: &str,
    after_id: i64,
    limit: usize,
) -> Result<Vec<SourceDoc>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, doc FROM {} WHERE id > ?1 ORDER BY id LIMIT ?2",
        table
    ))?;
    let rows = stmt
        .query_map(params![after_id, limit as i64], |row| {
            Ok(SourceDoc {
                id: row.get(0)?,
                doc: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── UI collection ──

pub struct CollegeRow {
    pub ipeds_id: String,
    pub name: String,
    pub slug: String,
    pub city: Option<String>,
    pub state: String,
    pub public_private: String,
    pub degree_level: String,
    pub in_state_tuition: Option<f64>,
    pub out_state_tuition: Option<f64>,
    pub avg_net_price: Option<f64>,
    pub sticker_price_in_state: Option<f64>,
    pub sticker_price_out_state: Option<f64>,
    pub acceptance_rate: Option<i64>,
    pub sat_avg: Option<i64>,
    pub act_avg: Option<i64>,
    pub website: Option<String>,
    pub canonical_url: String,
    pub is_active: bool,
    pub source_collection: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Drops the UI collection together with its name index.
pub fn drop_colleges_ui(conn: &Connection, table: &str) -> Result<bool> {
    let existed = table_exists(conn, table)?;
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table}_fts;
         DROP TABLE IF EXISTS {table};"
    ))?;
    Ok(existed)
}

pub fn create_colleges_ui(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id                      INTEGER PRIMARY KEY,
            ipeds_id                TEXT NOT NULL UNIQUE,
            name                    TEXT NOT NULL,
            slug                    TEXT NOT NULL,
            city                    TEXT,
            state                   TEXT NOT NULL,
            public_private          TEXT NOT NULL,
            degree_level            TEXT NOT NULL,
            in_state_tuition        REAL,
            out_state_tuition       REAL,
            avg_net_price           REAL,
            sticker_price_in_state  REAL,
            sticker_price_out_state REAL,
            acceptance_rate         INTEGER,
            sat_avg                 INTEGER,
            act_avg                 INTEGER,
            website                 TEXT,
            canonical_url           TEXT NOT NULL,
            is_active               BOOLEAN NOT NULL DEFAULT 1,
            image_url               TEXT,
            source_collection       TEXT NOT NULL,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );"
    ))?;
    Ok(())
}

pub struct InsertOutcome {
    pub inserted: usize,
    pub failed: usize,
}

/// Insert a batch in one transaction. A row that violates a constraint is
/// logged and counted; the rest of the batch still goes in.
pub fn insert_colleges(conn: &Connection, table: &str, rows: &[CollegeRow]) -> Result<InsertOutcome> {
    let tx = conn.unchecked_transaction()?;
    let mut outcome = InsertOutcome { inserted: 0, failed: 0 };
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {table}
             (ipeds_id, name, slug, city, state, public_private, degree_level,
              in_state_tuition, out_state_tuition, avg_net_price,
              sticker_price_in_state, sticker_price_out_state,
              acceptance_rate, sat_avg, act_avg, website, canonical_url,
              is_active, source_collection, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)"
        ))?;
        for r in rows {
            let res = stmt.execute(params![
                r.ipeds_id, r.name, r.slug, r.city, r.state, r.public_private, r.degree_level,
                r.in_state_tuition, r.out_state_tuition, r.avg_net_price,
                r.sticker_price_in_state, r.sticker_price_out_state,
                r.acceptance_rate, r.sat_avg, r.act_avg, r.website, r.canonical_url,
                r.is_active, r.source_collection, r.created_at, r.updated_at,
            ]);
            match res {
                Ok(n) => outcome.inserted += n,
                Err(e) => {
                    warn!("Insert failed for ipeds_id {}: {}", r.ipeds_id, e);
                    outcome.failed += 1;
                }
            }
        }
    }
    tx.commit()?;
    Ok(outcome)
}

/// Lookup indexes plus an FTS5 index over `name`.
pub fn create_ui_indexes(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_slug ON {table}(slug);
         CREATE INDEX IF NOT EXISTS idx_{table}_state ON {table}(state);
         CREATE INDEX IF NOT EXISTS idx_{table}_public_private ON {table}(public_private);
         CREATE INDEX IF NOT EXISTS idx_{table}_degree_level ON {table}(degree_level);
         CREATE INDEX IF NOT EXISTS idx_{table}_is_active ON {table}(is_active);
         CREATE VIRTUAL TABLE IF NOT EXISTS {table}_fts
             USING fts5(name, content='{table}', content_rowid='id');
         INSERT INTO {table}_fts({table}_fts) VALUES('rebuild');"
    ))?;
    Ok(())
}

pub struct QualityCounts {
    pub total: usize,
    pub acceptance_rate: usize,
    pub sat_avg: usize,
    pub act_avg: usize,
    pub in_state_tuition: usize,
    pub out_state_tuition: usize,
    pub avg_net_price: usize,
    pub website: usize,
}

pub fn quality_counts(conn: &Connection, table: &str) -> Result<QualityCounts> {
    let sql = format!(
        "SELECT COUNT(*), COUNT(acceptance_rate), COUNT(sat_avg), COUNT(act_avg),
                COUNT(in_state_tuition), COUNT(out_state_tuition),
                COUNT(avg_net_price), COUNT(website)
         FROM {}",
        table
    );
    let counts = conn.query_row(&sql, [], |r| {
        Ok(QualityCounts {
            total: r.get(0)?,
            acceptance_rate: r.get(1)?,
            sat_avg: r.get(2)?,
            act_avg: r.get(3)?,
            in_state_tuition: r.get(4)?,
            out_state_tuition: r.get(5)?,
            avg_net_price: r.get(6)?,
            website: r.get(7)?,
        })
    })?;
    Ok(counts)
}

pub struct SampleRow {
    pub name: String,
    pub slug: String,
    pub city: Option<String>,
    pub state: String,
    pub public_private: String,
    pub degree_level: String,
    pub canonical_url: String,
}

pub fn fetch_samples(conn: &Connection, table: &str, limit: usize) -> Result<Vec<SampleRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name, slug, city, state, public_private, degree_level, canonical_url
         FROM {} ORDER BY id LIMIT ?1",
        table
    ))?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok(SampleRow {
                name: row.get(0)?,
                slug: row.get(1)?,
                city: row.get(2)?,
                state: row.get(3)?,
                public_private: row.get(4)?,
                degree_level: row.get(5)?,
                canonical_url: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_colleges(conn: &Connection, table: &str, active_only: bool) -> Result<usize> {
    if !table_exists(conn, table)? {
        return Ok(0);
    }
    let sql = format!(
        "SELECT COUNT(*) FROM {}{}",
        table,
        if active_only { " WHERE is_active = 1" } else { "" }
    );
    Ok(conn.query_row(&sql, [], |r| r.get(0))?)
}

/// The fields image assignment needs from a UI record.
#[derive(Debug, Clone)]
pub struct ImageTarget {
    pub id: i64,
    pub ipeds_id: String,
    pub name: String,
    pub website: Option<String>,
    pub public_private: String,
    pub degree_level: String,
}

pub fn fetch_image_targets(
    conn: &Connection,
    table: &str,
    active_only: bool,
    after_id: i64,
    limit: usize,
) -> Result<Vec<ImageTarget>> {
    let sql = format!(
        "SELECT id, ipeds_id, name, website, public_private, degree_level
         FROM {} WHERE id > ?1{} ORDER BY id LIMIT ?2",
        table,
        if active_only { " AND is_active = 1" } else { "" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![after_id, limit as i64], |row| {
            Ok(ImageTarget {
                id: row.get(0)?,
                ipeds_id: row.get(1)?,
                name: row.get(2)?,
                website: row.get(3)?,
                public_private: row.get(4)?,
                degree_level: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Sets `image_url` on the record with this `ipeds_id`; returns rows touched.
pub fn update_image(
    conn: &Connection,
    table: &str,
    ipeds_id: &str,
    image_url: &str,
    updated_at: &str,
) -> Result<usize> {
    let n = conn.execute(
        &format!("UPDATE {} SET image_url = ?1, updated_at = ?2 WHERE ipeds_id = ?3", table),
        params![image_url, updated_at, ipeds_id],
    )?;
    Ok(n)
}

pub fn count_with_image(conn: &Connection, table: &str, image_url: &str) -> Result<usize> {
    let n = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE image_url = ?1", table),
        params![image_url],
        |r| r.get(0),
    )?;
    Ok(n)
}

pub struct SearchHit {
    pub name: String,
    pub state: String,
    pub canonical_url: String,
}

/// Full-text name search. Each whitespace-separated term is quoted so user
/// input never reaches FTS5 query syntax.
pub fn search_by_name(conn: &Connection, table: &str, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT c.name, c.state, c.canonical_url
         FROM {table}_fts f JOIN {table} c ON c.id = f.rowid
         WHERE {table}_fts MATCH ?1
         ORDER BY rank LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![terms.join(" "), limit as i64], |row| {
            Ok(SearchHit {
                name: row.get(0)?,
                state: row.get(1)?,
                canonical_url: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Scholarships ──

pub const SCHOLARSHIPS_TABLE: &str = "scholarships_ui";

pub struct ScholarshipRow {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub amount: Option<String>,
    pub amount_min: Option<i64>,
    pub amount_max: Option<i64>,
    pub amount_type: String,
    pub deadline: Option<String>,
    pub deadline_display: Option<String>,
    pub is_rolling: bool,
    pub kind: Option<String>,
    pub category: Option<String>,
    /// JSON array text.
    pub tags: String,
    pub description: Option<String>,
    /// JSON array text.
    pub eligibility: String,
    pub renewable: bool,
    pub application_required: bool,
    pub website: Option<String>,
    pub application_url: Option<String>,
    pub sponsor: Option<String>,
    pub sponsor_website: Option<String>,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub fn recreate_scholarships_ui(conn: &Connection) -> Result<bool> {
    let existed = table_exists(conn, SCHOLARSHIPS_TABLE)?;
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {t};
         CREATE TABLE {t} (
            id                   TEXT PRIMARY KEY,
            slug                 TEXT NOT NULL,
            name                 TEXT NOT NULL,
            amount               TEXT,
            amount_min           INTEGER,
            amount_max           INTEGER,
            amount_type          TEXT NOT NULL
                CHECK(amount_type IN ('fixed','range','full-ride','unknown')),
            deadline             TEXT,
            deadline_display     TEXT,
            is_rolling           BOOLEAN NOT NULL DEFAULT 0,
            type                 TEXT,
            category             TEXT,
            tags                 TEXT NOT NULL,
            description          TEXT,
            eligibility          TEXT NOT NULL,
            renewable            BOOLEAN NOT NULL,
            application_required BOOLEAN NOT NULL,
            website              TEXT,
            application_url      TEXT,
            sponsor              TEXT,
            sponsor_website      TEXT,
            image_url            TEXT,
            is_active            BOOLEAN NOT NULL DEFAULT 1,
            featured             BOOLEAN NOT NULL DEFAULT 0,
            source_collection    TEXT NOT NULL DEFAULT 'seed',
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_{t}_slug ON {t}(slug);",
        t = SCHOLARSHIPS_TABLE
    ))?;
    Ok(existed)
}

pub fn insert_scholarships(conn: &Connection, rows: &[ScholarshipRow]) -> Result<InsertOutcome> {
    let tx = conn.unchecked_transaction()?;
    let mut outcome = InsertOutcome { inserted: 0, failed: 0 };
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {}
             (id, slug, name, amount, amount_min, amount_max, amount_type,
              deadline, deadline_display, is_rolling, type, category, tags,
              description, eligibility, renewable, application_required,
              website, application_url, sponsor, sponsor_website, image_url,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24)",
            SCHOLARSHIPS_TABLE
        ))?;
        for r in rows {
            let res = stmt.execute(params![
                r.id, r.slug, r.name, r.amount, r.amount_min, r.amount_max, r.amount_type,
                r.deadline, r.deadline_display, r.is_rolling, r.kind, r.category, r.tags,
                r.description, r.eligibility, r.renewable, r.application_required,
                r.website, r.application_url, r.sponsor, r.sponsor_website, r.image_url,
                r.created_at, r.updated_at,
            ]);
            match res {
                Ok(n) => outcome.inserted += n,
                Err(e) => {
                    warn!("Insert failed for scholarship {}: {}", r.id, e);
                    outcome.failed += 1;
                }
            }
        }
    }
    tx.commit()?;
    Ok(outcome)
}

// ── Stats ──

pub struct Stats {
    pub source: usize,
    pub colleges: usize,
    pub active: usize,
    pub with_image: usize,
    pub scholarships: usize,
}

pub fn get_stats(conn: &Connection, source: &str, target: &str) -> Result<Stats> {
    let with_image = if table_exists(conn, target)? {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE image_url IS NOT NULL", target),
            [],
            |r| r.get(0),
        )?
    } else {
        0
    };
    Ok(Stats {
        source: count_rows(conn, source)?,
        colleges: count_colleges(conn, target, false)?,
        active: count_colleges(conn, target, true)?,
        with_image,
        scholarships: count_rows(conn, SCHOLARSHIPS_TABLE)?,
    })
}
