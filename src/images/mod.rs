pub mod fetch;
pub mod html;

use std::fmt;

use tracing::debug;

use crate::db::ImageTarget;
use crate::normalize::normalize_website;
use fetch::PageFetcher;

/// Category stock images keyed by `{publicPrivate}_{degreeLevel}`.
pub const FALLBACK_IMAGES: &[(&str, &str)] = &[
    ("Public_4-Year", "https://images.unsplash.com/photo-1541339907198-e08756dedf3f?w=800&q=80"),
    ("Public_2-Year", "https://images.unsplash.com/photo-1523050854058-8df90110c9f1?w=800&q=80"),
    ("Public_Less than 2-Year", "https://images.unsplash.com/photo-1523050854058-8df90110c9f1?w=800&q=80"),
    ("Private_4-Year", "https://images.unsplash.com/photo-1562774053-701939374585?w=800&q=80"),
    ("Private_2-Year", "https://images.unsplash.com/photo-1571260899304-425eee4c7efc?w=800&q=80"),
    ("Private_Less than 2-Year", "https://images.unsplash.com/photo-1571260899304-425eee4c7efc?w=800&q=80"),
    ("Private For-Profit_4-Year", "https://images.unsplash.com/photo-1498243691581-b145c3f54a5a?w=800&q=80"),
    ("Private For-Profit_2-Year", "https://images.unsplash.com/photo-1498243691581-b145c3f54a5a?w=800&q=80"),
    ("Private For-Profit_Less than 2-Year", "https://images.unsplash.com/photo-1498243691581-b145c3f54a5a?w=800&q=80"),
];

pub const DEFAULT_FALLBACK: &str =
    "https://images.unsplash.com/photo-1541339907198-e08756dedf3f?w=800&q=80";

const ERROR_REASON_CHARS: usize = 50;

pub fn branded_fallback(public_private: &str, degree_level: &str) -> &'static str {
    let key = format!("{}_{}", public_private, degree_level);
    FALLBACK_IMAGES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, url)| *url)
        .unwrap_or(DEFAULT_FALLBACK)
}

/// Which branch of the resolver produced an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    OpenGraph,
    Favicon,
    FallbackNoWebsite,
    FallbackNoImage,
    /// Fetch failed; holds the start of the error message.
    FallbackError(String),
}

impl ImageSource {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, ImageSource::OpenGraph | ImageSource::Favicon)
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::OpenGraph => f.write_str("opengraph"),
            ImageSource::Favicon => f.write_str("favicon"),
            ImageSource::FallbackNoWebsite => f.write_str("fallback_no_website"),
            ImageSource::FallbackNoImage => f.write_str("fallback_no_image"),
            ImageSource::FallbackError(reason) => write!(f, "fallback_error:{}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResolution {
    pub image_url: String,
    pub source: ImageSource,
}

/// OpenGraph image, else favicon, else the branded fallback for the
/// college's category. Never fails: fetch errors become a fallback.
pub async fn resolve_image<F>(fetcher: &F, college: &ImageTarget) -> ImageResolution
where
    F: PageFetcher + ?Sized,
{
    let fallback = |source| ImageResolution {
        image_url: branded_fallback(&college.public_private, &college.degree_level).to_string(),
        source,
    };

    let Some(base_url) = college.website.as_deref().and_then(normalize_website) else {
        return fallback(ImageSource::FallbackNoWebsite);
    };

    let html = match fetcher.fetch_html(&base_url).await {
        Ok(html) => html,
        Err(e) => {
            debug!("Fetch failed for {} ({}): {}", college.name, base_url, e);
            let reason: String = e.to_string().chars().take(ERROR_REASON_CHARS).collect();
            return fallback(ImageSource::FallbackError(reason));
        }
    };

    if let Some(image_url) =
        html::extract_og_image(&html).and_then(|og| html::make_absolute_url(og, &base_url))
    {
        return ImageResolution {
            image_url,
            source: ImageSource::OpenGraph,
        };
    }

    match html::extract_favicon(&html, &base_url) {
        Some(image_url) => ImageResolution {
            image_url,
            source: ImageSource::Favicon,
        },
        None => fallback(ImageSource::FallbackNoImage),
    }
}

#[cfg(test)]
mod tests {
    use super::fetch::testing::StubFetcher;
    use super::*;

    fn college(website: Option<&str>, public_private: &str, degree_level: &str) -> ImageTarget {
        ImageTarget {
            id: 1,
            ipeds_id: "1".into(),
            name: "Test College".into(),
            website: website.map(str::to_string),
            public_private: public_private.into(),
            degree_level: degree_level.into(),
        }
    }

    #[test]
    fn fallback_table_lookup() {
        assert_eq!(
            branded_fallback("Private", "4-Year"),
            "https://images.unsplash.com/photo-1562774053-701939374585?w=800&q=80"
        );
        assert_eq!(branded_fallback("Unknown", "4-Year"), DEFAULT_FALLBACK);
        assert_eq!(branded_fallback("Public", "Administrative Unit"), DEFAULT_FALLBACK);
        assert_eq!(FALLBACK_IMAGES.len(), 9);
    }

    #[test]
    fn source_tags() {
        assert_eq!(ImageSource::OpenGraph.to_string(), "opengraph");
        assert_eq!(ImageSource::FallbackNoImage.to_string(), "fallback_no_image");
        assert_eq!(
            ImageSource::FallbackError("HTTP 503".into()).to_string(),
            "fallback_error:HTTP 503"
        );
        assert!(ImageSource::FallbackNoWebsite.is_fallback());
        assert!(!ImageSource::Favicon.is_fallback());
    }

    #[tokio::test]
    async fn no_website_never_fetches() {
        let stub = StubFetcher::default();
        for website in [None, Some(""), Some("   ")] {
            let got = resolve_image(&stub, &college(website, "Public", "2-Year")).await;
            assert_eq!(got.source, ImageSource::FallbackNoWebsite);
            assert_eq!(got.image_url, branded_fallback("Public", "2-Year"));
        }
        let got = resolve_image(&stub, &college(None, "Unknown", "Unknown")).await;
        assert_eq!(got.image_url, DEFAULT_FALLBACK);
        assert!(stub.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn opengraph_image_wins() {
        let stub = StubFetcher::default().page(
            "https://x.edu",
            r#"<meta property="og:image" content="https://x.edu/logo.png"><link rel="icon" href="/f.ico">"#,
        );
        let got = resolve_image(&stub, &college(Some("x.edu/"), "Public", "4-Year")).await;
        assert_eq!(got.source, ImageSource::OpenGraph);
        assert_eq!(got.image_url, "https://x.edu/logo.png");
        assert_eq!(*stub.requests.lock().unwrap(), vec!["https://x.edu".to_string()]);
    }

    #[tokio::test]
    async fn relative_opengraph_is_made_absolute() {
        let stub = StubFetcher::default()
            .page("https://y.edu", r#"<meta content="//cdn.y.edu/hero.jpg" property="og:image">"#);
        let got = resolve_image(&stub, &college(Some("https://y.edu"), "Public", "4-Year")).await;
        assert_eq!(got.image_url, "https://cdn.y.edu/hero.jpg");
    }

    #[tokio::test]
    async fn favicon_found_or_guessed() {
        let stub = StubFetcher::default()
            .page("https://a.edu", r#"<link rel="apple-touch-icon" href="/apple.png">"#)
            .page("https://b.edu", "<html><body>plain</body></html>");

        let got = resolve_image(&stub, &college(Some("a.edu"), "Public", "4-Year")).await;
        assert_eq!(got.source, ImageSource::Favicon);
        assert_eq!(got.image_url, "https://a.edu/apple.png");

        let got = resolve_image(&stub, &college(Some("b.edu"), "Public", "4-Year")).await;
        assert_eq!(got.source, ImageSource::Favicon);
        assert_eq!(got.image_url, "https://b.edu/favicon.ico");
    }

    #[tokio::test]
    async fn fetch_errors_become_tagged_fallbacks() {
        let stub = StubFetcher::default()
            .status("https://gone.edu", 404)
            .too_large("https://huge.edu");

        let got = resolve_image(&stub, &college(Some("gone.edu"), "Private", "2-Year")).await;
        assert_eq!(got.source, ImageSource::FallbackError("HTTP 404".into()));
        assert_eq!(got.image_url, branded_fallback("Private", "2-Year"));

        let got = resolve_image(&stub, &college(Some("huge.edu"), "Private", "2-Year")).await;
        assert_eq!(got.source.to_string(), "fallback_error:Response too large");

        let got = resolve_image(&stub, &college(Some("slow.edu"), "Private", "2-Year")).await;
        assert_eq!(got.source.to_string(), "fallback_error:Request timeout");
    }
}
