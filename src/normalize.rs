use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\s-]").unwrap());
static SEPARATOR_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s_-]+").unwrap());

/// URL-friendly slug: `"Stanford University!"` → `"stanford-university"`.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = NON_SLUG_CHARS.replace_all(lowered.trim(), "");
    let hyphenated = SEPARATOR_RUNS.replace_all(&stripped, "-");
    hyphenated.trim_matches('-').to_string()
}

/// Force an `https://` scheme when none is given and drop one trailing slash.
pub fn normalize_website(url: &str) -> Option<String> {
    let url = url.trim();
    let mut normalized = if url.is_empty()
        || url.starts_with("http://")
        || url.starts_with("https://")
    {
        url.to_string()
    } else {
        format!("https://{}", url)
    };
    if normalized.ends_with('/') {
        normalized.pop();
    }
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Rounded midpoint of a reported score range.
///
/// Zero and negative bounds are placeholders for "not reported" in the
/// source data, so they produce `None` rather than a skewed average.
pub fn calculate_average(min: Option<f64>, max: Option<f64>) -> Option<i64> {
    match (min, max) {
        (Some(min), Some(max)) if min > 0.0 && max > 0.0 => Some(((min + max) / 2.0).round() as i64),
        _ => None,
    }
}

/// `0.15` → `15`. Anything outside `[0, 1]` is rejected.
pub fn convert_acceptance_rate(rate: Option<f64>) -> Option<i64> {
    let rate = rate?;
    if !(0.0..=1.0).contains(&rate) {
        return None;
    }
    Some((rate * 100.0).round() as i64)
}

/// Null-propagating addition.
pub fn safe_add(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some(a + b),
        _ => None,
    }
}

/// A JSON number as `f64`; strings, booleans and nulls are "not reported".
pub fn as_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|n| n.is_finite())
}

/// An integer code, accepting both `1` and `"1"`.
pub fn as_code(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Institutional control, from the IPEDS `control` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Public,
    Private,
    PrivateForProfit,
    /// Unmapped codes, including the `-3` "not reported" sentinel.
    Unknown,
}

impl Control {
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(1) => Control::Public,
            Some(2) => Control::Private,
            Some(3) => Control::PrivateForProfit,
            _ => Control::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Control::Public => "Public",
            Control::Private => "Private",
            Control::PrivateForProfit => "Private For-Profit",
            Control::Unknown => "Unknown",
        }
    }
}

/// Degree-level bucket, from the IPEDS `sector` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegreeLevel {
    AdministrativeUnit,
    FourYear,
    TwoYear,
    LessThanTwoYear,
    /// Unmapped codes, including the `99` "not reported" sentinel.
    Unknown,
}

impl DegreeLevel {
    pub fn from_sector(code: Option<i64>) -> Self {
        match code {
            Some(0) => DegreeLevel::AdministrativeUnit,
            Some(1 | 3 | 5) => DegreeLevel::FourYear,
            Some(2 | 4 | 6) => DegreeLevel::TwoYear,
            Some(7..=9) => DegreeLevel::LessThanTwoYear,
            _ => DegreeLevel::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DegreeLevel::AdministrativeUnit => "Administrative Unit",
            DegreeLevel::FourYear => "4-Year",
            DegreeLevel::TwoYear => "2-Year",
            DegreeLevel::LessThanTwoYear => "Less than 2-Year",
            DegreeLevel::Unknown => "Unknown",
        }
    }
}
