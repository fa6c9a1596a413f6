use std::sync::LazyLock;

use regex::Regex;

// The two attribute orders are separate patterns on purpose; a single
// alternation would change which tag wins when a page has both.
static OG_PROPERTY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+property=["']og:image["']\s+content=["']([^"']+)["']"#).unwrap()
});
static OG_CONTENT_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+content=["']([^"']+)["']\s+property=["']og:image["']"#).unwrap()
});
static APPLE_TOUCH_ICON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link\s+[^>]*rel=["']apple-touch-icon["'][^>]*href=["']([^"']+)["']"#).unwrap()
});
static ICON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<link\s+[^>]*rel=["'](?:shortcut\s+)?icon["'][^>]*href=["']([^"']+)["']"#)
        .unwrap()
});

/// Raw `og:image` content, property-first order tried before content-first.
pub fn extract_og_image(html: &str) -> Option<&str> {
    [&*OG_PROPERTY_FIRST, &*OG_CONTENT_FIRST]
        .into_iter()
        .find_map(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Apple touch icon, then a regular icon link, then `{base}/favicon.ico`.
pub fn extract_favicon(html: &str, base_url: &str) -> Option<String> {
    for re in [&*APPLE_TOUCH_ICON, &*ICON] {
        if let Some(href) = re.captures(html).and_then(|c| c.get(1)) {
            return make_absolute_url(href.as_str(), base_url);
        }
    }
    Some(format!("{}/favicon.ico", base_url))
}

/// Resolve `url` against the origin of `base_url`.
pub fn make_absolute_url(url: &str, base_url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Some(url.to_string());
    }
    if url.starts_with("//") {
        return Some(format!("https:{}", url));
    }
    let origin = origin(base_url);
    if url.starts_with('/') {
        Some(format!("{}{}", origin, url))
    } else {
        Some(format!("{}/{}", origin, url))
    }
}

fn origin(base_url: &str) -> String {
    match reqwest::Url::parse(base_url) {
        Ok(u) if u.origin().is_tuple() => u.origin().ascii_serialization(),
        _ => base_url.trim_end_matches('/').to_string(),
    }
}
