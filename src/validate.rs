use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use colored::Colorize;
use regex::Regex;
use serde_json::Value;

use crate::report::banner;

static SPONSOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\s&.,'-]+$").unwrap());
static HTTPS_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https://.+\..+").unwrap());

pub const REQUIRED_FIELDS: [&str; 3] = ["sponsor", "website", "applicationUrl"];

const SPONSOR_MIN_CHARS: usize = 5;
const SPONSOR_MAX_CHARS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentFileError {
    #[error("Enrichment file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Expected \"scholarships\" array not found")]
    MissingScholarships,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub scholarship: String,
    pub field: String,
    pub message: String,
    pub severity: Severity,
    /// The offending value, kept for pattern failures.
    pub value: Option<String>,
}

impl Issue {
    fn error(scholarship: &str, field: &str, message: impl Into<String>) -> Self {
        Issue {
            scholarship: scholarship.to_string(),
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Error,
            value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Valid,
    Invalid,
    Empty,
}

#[derive(Debug)]
pub struct FieldCheck {
    pub field: &'static str,
    pub value: Option<String>,
    pub state: FieldState,
}

#[derive(Debug)]
pub struct EntryReport {
    pub name: String,
    pub slug: Option<String>,
    /// `None` when the entry has no `enrichment_data` section.
    pub fields: Option<Vec<FieldCheck>>,
}

impl EntryReport {
    pub fn is_complete(&self) -> bool {
        self.fields
            .as_ref()
            .is_some_and(|fs| fs.iter().all(|f| f.state == FieldState::Valid))
    }
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub entries: Vec<EntryReport>,
    pub issues: Vec<Issue>,
    pub filled_fields: usize,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn total_fields(&self) -> usize {
        self.total() * REQUIRED_FIELDS.len()
    }

    pub fn completed(&self) -> usize {
        self.entries.iter().filter(|e| e.is_complete()).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Filled share of all required fields, rounded; 0 for an empty file.
    pub fn completion_percent(&self) -> u32 {
        let total = self.total_fields();
        if total == 0 {
            return 0;
        }
        (self.filled_fields as f64 / total as f64 * 100.0).round() as u32
    }

    /// Every entry complete and no errors. Warnings do not count.
    pub fn passed(&self) -> bool {
        self.completed() == self.total() && self.error_count() == 0
    }

    pub fn print(&self) {
        banner("VALIDATION RESULTS");
        for (i, entry) in self.entries.iter().enumerate() {
            println!("\n{}", format!("{}. {}", i + 1, entry.name).blue());
            println!("   Slug: {}", entry.slug.as_deref().unwrap_or("unknown"));
            let Some(fields) = &entry.fields else {
                println!("{}", "   ✗ Missing enrichment_data section".red());
                continue;
            };
            for f in fields {
                let value = f.value.as_deref().unwrap_or_default();
                match f.state {
                    FieldState::Valid => println!("   {}: {:?}", format!("✓ {}", f.field).green(), value),
                    FieldState::Invalid => println!("   {}: {:?}", format!("⚠ {}", f.field).yellow(), value),
                    FieldState::Empty => println!("   {}: EMPTY", format!("✗ {}", f.field).red()),
                }
            }
        }

        let (total, completed) = (self.total(), self.completed());
        let (errors, warnings) = (self.error_count(), self.warning_count());
        let paint = |n: usize, good: bool| {
            if good {
                n.to_string().green()
            } else {
                n.to_string().yellow()
            }
        };

        println!();
        banner("SUMMARY");
        println!("\nTotal Scholarships:     {}", total);
        println!("Fully Completed:        {}/{}", paint(completed, completed == total), total);
        println!(
            "Fields Filled:          {}/{}",
            paint(self.filled_fields, self.filled_fields == self.total_fields()),
            self.total_fields()
        );
        println!("Completion:             {}%", self.completion_percent());
        println!(
            "\nErrors:                 {}",
            if errors == 0 { errors.to_string().green() } else { errors.to_string().red() }
        );
        println!("Warnings:               {}", paint(warnings, warnings == 0));

        if !self.issues.is_empty() {
            println!();
            banner("ISSUES");
            for issue in &self.issues {
                let head = format!("{} [{}]", issue.scholarship, issue.severity);
                match issue.severity {
                    Severity::Error => println!("\n{}", head.red()),
                    Severity::Warning => println!("\n{}", head.yellow()),
                }
                println!("   Field: {}", issue.field);
                println!("   Error: {}", issue.message);
                if let Some(v) = &issue.value {
                    println!("   Value: {:?}", v);
                }
            }
        }

        println!("\n{}", "=".repeat(80));
        if self.passed() {
            println!("{}", "VALIDATION PASSED".green().bold());
            println!("   All scholarships are enriched and ready to load.");
        } else {
            println!("{}", "VALIDATION FAILED".red().bold());
            println!("   {} scholarship(s) need attention", total - completed);
            println!("   {} error(s) must be fixed", errors);
        }
    }
}

pub fn load_document(path: &Path) -> Result<Value, EnrichmentFileError> {
    if !path.exists() {
        return Err(EnrichmentFileError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| EnrichmentFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

pub fn validate_document(doc: &Value) -> Result<ValidationReport, EnrichmentFileError> {
    let scholarships = doc
        .get("scholarships")
        .and_then(Value::as_array)
        .ok_or(EnrichmentFileError::MissingScholarships)?;

    let mut report = ValidationReport::default();
    for (i, entry) in scholarships.iter().enumerate() {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("Scholarship #{}", i + 1), str::to_string);
        let slug = text(entry.get("slug")).map(str::to_string);

        if slug.is_none() {
            report.issues.push(Issue {
                severity: Severity::Warning,
                ..Issue::error(&name, "slug", "Missing slug; entry cannot be joined to a scholarship")
            });
        }

        let Some(data) = entry.get("enrichment_data").filter(|d| !d.is_null()) else {
            report.issues.push(Issue::error(&name, "enrichment_data", "Section missing"));
            report.entries.push(EntryReport { name, slug, fields: None });
            continue;
        };

        let mut fields = Vec::with_capacity(REQUIRED_FIELDS.len());
        for field in REQUIRED_FIELDS {
            let value = text(data.get(field));
            let issues = value.map_or_else(
                || vec![Issue::error(&name, field, "Field is empty")],
                |v| field_issues(&name, field, v),
            );
            let state = match value {
                None => FieldState::Empty,
                Some(_) if issues.is_empty() => FieldState::Valid,
                Some(_) => FieldState::Invalid,
            };
            if value.is_some() {
                report.filled_fields += 1;
            }
            fields.push(FieldCheck {
                field,
                value: value.map(str::to_string),
                state,
            });
            report.issues.extend(issues);
        }
        report.entries.push(EntryReport {
            name,
            slug,
            fields: Some(fields),
        });
    }
    Ok(report)
}

/// Load, validate and print. File-level problems are errors; data problems are in the report.
pub fn run(path: &Path) -> anyhow::Result<ValidationReport> {
    banner("SCHOLARSHIP ENRICHMENT VALIDATOR");
    let doc = load_document(path)?;
    println!("\n{} Enrichment file found: {}", "✓".green(), path.display());
    let report = validate_document(&doc)?;
    println!("{} Found {} scholarships\n", "✓".green(), report.total());
    report.print();
    Ok(report)
}

/// Non-blank string content; anything else counts as empty.
fn text(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn field_issues(scholarship: &str, field: &str, value: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    let (pattern, message) = match field {
        "sponsor" => {
            let len = value.chars().count();
            if len < SPONSOR_MIN_CHARS {
                issues.push(Issue::error(
                    scholarship,
                    field,
                    format!("Too short ({} chars, minimum {})", len, SPONSOR_MIN_CHARS),
                ));
            }
            if len > SPONSOR_MAX_CHARS {
                issues.push(Issue::error(
                    scholarship,
                    field,
                    format!("Too long ({} chars, maximum {})", len, SPONSOR_MAX_CHARS),
                ));
            }
            (
                &*SPONSOR_PATTERN,
                "Sponsor must be 5-100 characters, alphanumeric with basic punctuation",
            )
        }
        "website" => (&*HTTPS_URL, "Website must be a valid HTTPS URL"),
        _ => (&*HTTPS_URL, "Application URL must be a valid HTTPS URL"),
    };
    if !pattern.is_match(value) {
        issues.push(Issue {
            value: Some(value.to_string()),
            ..Issue::error(scholarship, field, message)
        });
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    fn entry(sponsor: &str, website: &str, application_url: &str) -> Value {
        json!({
            "name": "Test Award",
            "slug": "test-award",
            "enrichment_data": {
                "sponsor": sponsor,
                "website": website,
                "applicationUrl": application_url,
            }
        })
    }

    fn validate(entries: Vec<Value>) -> ValidationReport {
        validate_document(&json!({ "scholarships": entries })).unwrap()
    }

    #[test]
    fn short_sponsor_is_an_error() {
        let report = validate(vec![entry("AB", "https://a.org", "https://a.org/apply")]);
        assert_eq!(report.error_count(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.field, "sponsor");
        assert_eq!(issue.message, "Too short (2 chars, minimum 5)");
        assert!(!report.passed());
        assert_eq!(report.filled_fields, 3);
    }

    #[test]
    fn sponsor_length_and_charset() {
        let long = "A".repeat(101);
        let report = validate(vec![entry(&long, "https://a.org", "https://a.org/x")]);
        assert_eq!(report.issues[0].message, "Too long (101 chars, maximum 100)");

        let report = validate(vec![entry("Acme & Sons, Inc.", "https://a.org", "https://a.org/x")]);
        assert!(report.passed());

        let report = validate(vec![entry("Acme <Sons>", "https://a.org", "https://a.org/x")]);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].value.as_deref(), Some("Acme <Sons>"));
    }

    #[test]
    fn plain_http_url_fails_the_pattern() {
        let report = validate(vec![entry("Acme Foundation", "http://x.com", "https://nodot")]);
        let fields: Vec<_> = report.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, ["website", "applicationUrl"]);
        assert_eq!(report.issues[0].message, "Website must be a valid HTTPS URL");
        assert_eq!(report.issues[0].value.as_deref(), Some("http://x.com"));
        let states: Vec<_> = report.entries[0]
            .fields
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| f.state)
            .collect();
        assert_eq!(states, [FieldState::Valid, FieldState::Invalid, FieldState::Invalid]);
    }

    #[test]
    fn blank_and_non_string_values_are_empty() {
        let report = validate(vec![json!({
            "name": "Sparse",
            "slug": "sparse",
            "enrichment_data": { "sponsor": "   ", "website": 42 }
        })]);
        assert_eq!(report.filled_fields, 0);
        assert_eq!(report.error_count(), 3);
        assert!(report.issues.iter().all(|i| i.message == "Field is empty"));
        assert_eq!(report.completion_percent(), 0);
    }

    #[test]
    fn missing_section_and_slug() {
        let report = validate(vec![json!({}), entry("Acme Foundation", "https://a.org", "https://a.org/x")]);
        assert_eq!(report.entries[0].name, "Scholarship #1");
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 1);
        assert!(report
            .issues
            .iter()
            .any(|i| i.field == "enrichment_data" && i.message == "Section missing"));
        assert_eq!(report.completed(), 1);
        // 3 of 6 fields filled.
        assert_eq!(report.completion_percent(), 50);
    }

    #[test]
    fn warnings_alone_do_not_fail() {
        let mut e = entry("Acme Foundation", "https://a.org", "https://a.org/x");
        e.as_object_mut().unwrap().remove("slug");
        let report = validate(vec![e]);
        assert_eq!(report.warning_count(), 1);
        assert!(report.passed());
    }

    #[test]
    fn completion_rounds_to_nearest() {
        // 2 of 3 fields → 66.7% → 67.
        let report = validate(vec![entry("Acme Foundation", "https://a.org", "")]);
        assert_eq!(report.completion_percent(), 67);
    }

    #[test]
    fn empty_list_passes_vacuously() {
        let report = validate(vec![]);
        assert_eq!(report.completion_percent(), 0);
        assert!(report.passed());
    }

    #[test]
    fn valid_fixture_passes() {
        let doc = load_document(&fixture("enrichment_valid.json")).unwrap();
        let report = validate_document(&doc).unwrap();
        assert_eq!(report.total(), 3);
        assert_eq!(report.completion_percent(), 100);
        assert!(report.passed(), "{:?}", report.issues);
    }

    #[test]
    fn incomplete_fixture_fails() {
        let doc = load_document(&fixture("enrichment_incomplete.json")).unwrap();
        let report = validate_document(&doc).unwrap();
        assert!(!report.passed());
        assert_eq!(report.completed(), 1);
        assert_eq!(report.error_count(), 4);
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn file_level_failures_are_typed() {
        assert!(matches!(
            load_document(&fixture("does_not_exist.json")),
            Err(EnrichmentFileError::NotFound(_))
        ));
        assert!(matches!(
            load_document(&fixture("enrichment_broken.json")),
            Err(EnrichmentFileError::Parse(_))
        ));
        let doc = json!({ "scholarships": { "not": "an array" } });
        assert!(matches!(
            validate_document(&doc),
            Err(EnrichmentFileError::MissingScholarships)
        ));
        assert!(run(&fixture("enrichment_broken.json")).is_err());
    }
}
