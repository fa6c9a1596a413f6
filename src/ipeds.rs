use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use csv::ReaderBuilder;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::Settings;
use crate::db;
use crate::import::{store_documents, ImportStats};
use crate::normalize::normalize_website;
use crate::report::{banner, percent, thousands};

pub const STATIC_SOURCE: &str = "IPEDS_2022_revised";

/// Race/ethnicity keys and their fall enrollment (EF) columns.
const RACE_COLUMNS: [(&str, &str); 9] = [
    ("black", "EFBKAAT"),
    ("hispanic", "EFHISPT"),
    ("white", "EFWHITT"),
    ("asian", "EFASIAT"),
    ("nativeHawaiian", "EFNHPIT"),
    ("americanIndian", "EFAIANT"),
    ("twoOrMore", "EF2MORT"),
    ("nonResident", "EFNRALT"),
    ("unknown", "EFUNKNT"),
];

/// One CSV row keyed by upper-cased header.
type Row = HashMap<String, String>;

/// The survey files merged on UNITID. Only the directory (HD) file is required.
#[derive(Debug, Clone)]
pub struct IpedsFiles {
    pub hd: PathBuf,
    pub adm: Option<PathBuf>,
    pub ic_ay: Option<PathBuf>,
    pub ef: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IpedsStats {
    pub institutions: usize,
    pub mapped: usize,
    pub missing_unitid: usize,
    pub with_acceptance_rate: usize,
    pub with_sat: usize,
    pub with_act: usize,
    pub with_enrollment: usize,
    pub with_tuition: usize,
    pub stored: ImportStats,
}

impl IpedsStats {
    fn count(&mut self, doc: &Value) {
        let has = |ptr: &str| doc.pointer(ptr).is_some_and(|v| !v.is_null());
        self.mapped += 1;
        self.with_acceptance_rate += has("/admissions/acceptanceRate") as usize;
        self.with_sat += has("/admissions/satRange/min") as usize;
        self.with_act += has("/admissions/actRange/min") as usize;
        self.with_enrollment += has("/enrollment/undergrad") as usize;
        self.with_tuition += has("/financials/tuitionInState") as usize;
    }

    fn print(&self) {
        banner("DATASET SUMMARY");
        let line = |label: &str, n: usize| {
            println!("  {:<22} {:>8} ({:.1}%)", label, thousands(n), percent(n, self.mapped));
        };
        println!("\nInstitutions read: {}", thousands(self.institutions));
        println!("Mapped:            {}", thousands(self.mapped));
        if self.missing_unitid > 0 {
            println!("Skipped (no UNITID): {}", thousands(self.missing_unitid));
        }
        println!();
        line("with acceptance rate:", self.with_acceptance_rate);
        line("with SAT scores:", self.with_sat);
        line("with ACT scores:", self.with_act);
        line("with enrollment:", self.with_enrollment);
        line("with tuition data:", self.with_tuition);
    }
}

fn read_csv(path: &Path) -> Result<Vec<Row>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    // IPEDS publishes Latin-1; every byte maps to the code point of the same value.
    let text: String = bytes.iter().map(|&b| char::from(b)).collect();

    let mut reader = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("{} has no header row", path.display()))?
        .iter()
        .map(|h| h.trim().to_uppercase())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Bad CSV row in {}", path.display()))?;
        rows.push(
            headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect(),
        );
    }
    info!("Loaded {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// A trimmed cell. IPEDS writes `.` for "not applicable".
fn cell<'a>(row: &'a Row, col: &str) -> Option<&'a str> {
    row.get(col)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && *s != ".")
}

fn float(row: &Row, col: &str) -> Option<f64> {
    cell(row, col)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn int(row: &Row, col: &str) -> Option<i64> {
    float(row, col).map(|v| v.trunc() as i64)
}

fn text(row: &Row, col: &str) -> Option<String> {
    cell(row, col).map(str::to_string)
}

/// `num / den` rounded to four places, only for a positive denominator.
pub fn safe_divide(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    match (num, den) {
        (Some(n), Some(d)) if d > 0.0 => Some(round4(n / d)),
        _ => None,
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Combined section score, only when both sections are reported.
fn section_sum(row: &Row, verbal: &str, math: &str) -> Option<i64> {
    Some(int(row, verbal)? + int(row, math)?)
}

/// First row per UNITID.
fn by_unitid(rows: Vec<Row>) -> HashMap<String, Row> {
    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        if let Some(id) = text(&row, "UNITID") {
            map.entry(id).or_insert(row);
        }
    }
    map
}

/// Undergraduate totals per UNITID: `EFALEVEL` 1 rows summed column by column.
/// A column stays absent when none of the summed rows reports it.
fn undergrad_totals(rows: Vec<Row>) -> HashMap<String, HashMap<&'static str, i64>> {
    let columns = std::iter::once("EFTOTLT").chain(RACE_COLUMNS.iter().map(|&(_, c)| c));
    let columns: Vec<&'static str> = columns.collect();

    let mut totals: HashMap<String, HashMap<&'static str, i64>> = HashMap::new();
    for row in rows.iter().filter(|r| int(r, "EFALEVEL") == Some(1)) {
        let Some(id) = text(row, "UNITID") else { continue };
        let entry = totals.entry(id).or_default();
        for &col in &columns {
            if let Some(v) = int(row, col) {
                *entry.entry(col).or_insert(0) += v;
            }
        }
    }
    totals
}

/// Build one source college document from the merged survey rows.
pub fn map_college(
    ipeds_id: &str,
    hd: &Row,
    adm: Option<&Row>,
    ic_ay: Option<&Row>,
    ef: Option<&HashMap<&'static str, i64>>,
    now: &str,
) -> Value {
    let empty = Row::new();
    let adm = adm.unwrap_or(&empty);
    let ic = ic_ay.unwrap_or(&empty);

    let undergrad = ef.and_then(|t| t.get("EFTOTLT").copied());
    let mut race = Map::new();
    if let (Some(total), Some(ef)) = (undergrad.filter(|&n| n > 0), ef) {
        for (key, col) in RACE_COLUMNS {
            if let Some(&n) = ef.get(col) {
                race.insert(key.to_string(), json!(round4(n as f64 / total as f64)));
            }
        }
    }

    json!({
        "ipedsId": ipeds_id,
        "name": text(hd, "INSTNM"),
        "alias": text(hd, "IALIAS"),
        "website": cell(hd, "WEBADDR").and_then(normalize_website),
        "location": {
            "city": text(hd, "CITY"),
            "state": text(hd, "STABBR"),
            "zip": text(hd, "ZIP"),
            "locale": int(hd, "LOCALE"),
        },
        "control": int(hd, "CONTROL"),
        "sector": int(hd, "SECTOR"),
        "admissions": {
            "acceptanceRate": safe_divide(float(adm, "ADMSSN"), float(adm, "APPLCN")),
            "satRange": {
                "min": section_sum(adm, "SATVR25", "SATMT25"),
                "max": section_sum(adm, "SATVR75", "SATMT75"),
            },
            "actRange": {
                "min": int(adm, "ACTCM25"),
                "max": int(adm, "ACTCM75"),
            },
        },
        "enrollment": { "undergrad": undergrad },
        "diversity": { "raceEthnicityPct": race },
        "financials": {
            "tuitionInState": int(ic, "TUITION1"),
            "tuitionOutOfState": int(ic, "TUITION2"),
            "feesInState": int(ic, "FEE1"),
            "feesOutOfState": int(ic, "FEE2"),
            "avgCostAttendance": int(ic, "CHG1AY3"),
        },
        "staticSource": STATIC_SOURCE,
        "lastStaticUpdate": now,
    })
}

fn optional(path: Option<&Path>) -> Result<Vec<Row>> {
    match path {
        Some(p) => read_csv(p),
        None => Ok(Vec::new()),
    }
}

/// Merge the survey CSVs on UNITID (left join from HD) and load the result
/// into the source collection.
pub fn run(conn: &Connection, settings: &Settings, files: &IpedsFiles, replace: bool) -> Result<IpedsStats> {
    banner("IPEDS DATA MERGE");

    let hd = read_csv(&files.hd)?;
    let adm = by_unitid(optional(files.adm.as_deref())?);
    let ic_ay = by_unitid(optional(files.ic_ay.as_deref())?);
    let ef = undergrad_totals(optional(files.ef.as_deref())?);
    println!(
        "\nInstitutions: {} (admissions {}, charges {}, enrollment {})",
        thousands(hd.len()),
        thousands(adm.len()),
        thousands(ic_ay.len()),
        thousands(ef.len())
    );

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut stats = IpedsStats {
        institutions: hd.len(),
        ..Default::default()
    };
    let mut docs = Vec::with_capacity(hd.len());
    for (line, row) in hd.iter().enumerate() {
        let Some(id) = cell(row, "UNITID") else {
            warn!("Skipping HD row {}: no UNITID", line + 2);
            stats.missing_unitid += 1;
            continue;
        };
        let doc = map_college(id, row, adm.get(id), ic_ay.get(id), ef.get(id), &now);
        stats.count(&doc);
        docs.push(doc.to_string());
    }

    stats.stored = store_documents(conn, settings, &docs, replace)?;
    println!(
        "\nStored {} documents in {} ({} total)",
        thousands(stats.stored.inserted),
        settings.source_collection,
        thousands(db::count_rows(conn, &settings.source_collection)?)
    );
    stats.print();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/ipeds").join(name)
    }

    fn all_files() -> IpedsFiles {
        IpedsFiles {
            hd: fixture("hd.csv"),
            adm: Some(fixture("adm.csv")),
            ic_ay: Some(fixture("ic_ay.csv")),
            ef: Some(fixture("ef.csv")),
        }
    }

    fn stored_docs(conn: &Connection) -> HashMap<String, Value> {
        db::fetch_source_page(conn, "colleges", 0, 100)
            .unwrap()
            .into_iter()
            .map(|d| {
                let v: Value = serde_json::from_str(&d.doc).unwrap();
                (v["ipedsId"].as_str().unwrap().to_string(), v)
            })
            .collect()
    }

    #[test]
    fn divide_guards_denominator() {
        assert_eq!(safe_divide(Some(5000.0), Some(8000.0)), Some(0.625));
        assert_eq!(safe_divide(Some(1.0), Some(3.0)), Some(0.3333));
        assert_eq!(safe_divide(Some(0.0), Some(0.0)), None);
        assert_eq!(safe_divide(None, Some(10.0)), None);
    }

    #[test]
    fn merges_surveys_on_unitid() {
        let conn = db::open_in_memory();
        let stats = run(&conn, &Settings::default(), &all_files(), false).unwrap();
        assert_eq!((stats.institutions, stats.mapped, stats.missing_unitid), (4, 3, 1));
        assert_eq!(stats.with_acceptance_rate, 1);
        assert_eq!(stats.with_sat, 1);
        assert_eq!(stats.with_act, 2);
        assert_eq!(stats.with_enrollment, 1);
        assert_eq!(stats.with_tuition, 1);
        assert_eq!(stats.stored.inserted, 3);

        let docs = stored_docs(&conn);
        let aamu = &docs["100654"];
        assert_eq!(aamu["name"], "Alabama A & M University");
        assert_eq!(aamu["alias"], "AAMU");
        assert_eq!(aamu["website"], "https://www.aamu.edu");
        assert_eq!(aamu["location"], json!({"city": "Normal", "state": "AL", "zip": "35762", "locale": 12}));
        assert_eq!(aamu["admissions"]["acceptanceRate"], 0.625);
        assert_eq!(aamu["admissions"]["satRange"], json!({"min": 840, "max": 1030}));
        assert_eq!(aamu["admissions"]["actRange"], json!({"min": 15, "max": 19}));
        assert_eq!(aamu["enrollment"]["undergrad"], 7000);
        assert_eq!(aamu["diversity"]["raceEthnicityPct"], json!({"black": 0.9, "white": 0.05}));
        assert_eq!(aamu["financials"]["feesOutOfState"], 1000);
        assert_eq!(aamu["staticSource"], STATIC_SOURCE);

        let uab = &docs["100663"];
        assert_eq!(uab["alias"], Value::Null);
        assert_eq!(uab["admissions"]["acceptanceRate"], Value::Null, "zero applicants");
        assert_eq!(uab["admissions"]["satRange"], json!({"min": null, "max": 1340}));
        assert_eq!(uab["enrollment"]["undergrad"], Value::Null);
        assert_eq!(uab["financials"]["tuitionInState"], Value::Null, "no charges row");

        let amridge = &docs["100690"];
        assert_eq!(amridge["website"], Value::Null);
        assert_eq!(amridge["admissions"]["actRange"]["min"], Value::Null, "no admissions row");
        assert_eq!(amridge["enrollment"]["undergrad"], Value::Null, "graduate rows only");
        assert_eq!(amridge["financials"]["tuitionInState"], Value::Null);
        assert_eq!(amridge["financials"]["avgCostAttendance"], 9800);
    }

    #[test]
    fn directory_file_alone_is_enough() {
        let conn = db::open_in_memory();
        let files = IpedsFiles {
            hd: fixture("hd.csv"),
            adm: None,
            ic_ay: None,
            ef: None,
        };
        let stats = run(&conn, &Settings::default(), &files, false).unwrap();
        assert_eq!(stats.mapped, 3);
        assert_eq!(stats.with_acceptance_rate + stats.with_act + stats.with_tuition, 0);

        let again = run(&conn, &Settings::default(), &files, true).unwrap();
        assert_eq!(again.stored.cleared, 3);
        assert_eq!(db::count_rows(&conn, "colleges").unwrap(), 3);
    }

    #[test]
    fn missing_directory_file_is_fatal() {
        let conn = db::open_in_memory();
        let files = IpedsFiles {
            hd: fixture("nope.csv"),
            ..all_files()
        };
        assert!(run(&conn, &Settings::default(), &files, false).is_err());
    }

    #[test]
    fn merged_documents_feed_the_transform() {
        let conn = db::open_in_memory();
        let settings = Settings::default();
        run(&conn, &settings, &all_files(), false).unwrap();
        let stats = transform::run(&conn, &settings).unwrap();
        assert_eq!(stats.inserted, 3);

        let row: (Option<i64>, Option<i64>, Option<i64>, Option<f64>, String) = conn
            .query_row(
                "SELECT acceptance_rate, sat_avg, act_avg, sticker_price_in_state, degree_level
                 FROM colleges_ui WHERE ipeds_id = '100654'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!(row, (Some(63), Some(935), Some(17), Some(10744.0), "4-Year".to_string()));
    }
}
