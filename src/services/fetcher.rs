//! Article fetching and text extraction.
//!
//! The pipeline only needs plain text and a candidate title from a source
//! URL; everything else about the page is discarded. Extraction is
//! deliberately simple: drop script/style blocks, strip tags, decode the
//! common entities and collapse whitespace.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

use crate::error::FetchError;

/// Extracted article content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Plain-text body of the article.
    pub text: String,
    /// Candidate title from the page's `<title>` tag, if present.
    pub title: Option<String>,
}

/// Fetches a source URL and extracts its text content.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Downloads `url` and extracts text plus a candidate title.
    async fn fetch(&self, url: &str) -> Result<Page, FetchError>;
}

/// HTTP implementation of [`ContentFetcher`].
pub struct HttpContentFetcher {
    client: Client,
}

impl HttpContentFetcher {
    /// Creates a fetcher with a 30 second request timeout.
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(concat!("podforge/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Creates a fetcher from an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpContentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response.text().await?;
        let page = extract_page(&html);
        if page.text.len() < 4 {
            return Err(FetchError::EmptyContent(url.to_string()));
        }

        info!(
            url = %url,
            chars = page.text.len(),
            title = page.title.as_deref().unwrap_or("<none>"),
            "Fetched article"
        );
        Ok(page)
    }
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"))
}

fn noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<noscript[^>]*>.*?</noscript>|<head[^>]*>.*?</head>",
        )
        .expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Extracts plain text and a candidate title from an HTML document.
pub fn extract_page(html: &str) -> Page {
    let title = title_re()
        .captures(html)
        .map(|c| decode_entities(c[1].trim()))
        .filter(|t| !t.is_empty());

    let without_noise = noise_re().replace_all(html, " ");
    let without_tags = tag_re().replace_all(&without_noise, " ");
    let decoded = decode_entities(&without_tags);
    let text = whitespace_re().replace_all(&decoded, " ").trim().to_string();

    Page { text, title }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_title_and_text() {
        let html = r#"<html><head><title>The Big Story</title>
            <style>body { color: red; }</style></head>
            <body><h1>The Big Story</h1><p>First paragraph.</p>
            <script>alert("noise");</script>
            <p>Second &amp; final paragraph.</p></body></html>"#;

        let page = extract_page(html);
        assert_eq!(page.title.as_deref(), Some("The Big Story"));
        assert!(page.text.contains("First paragraph."));
        assert!(page.text.contains("Second & final paragraph."));
        assert!(!page.text.contains("alert"));
        assert!(!page.text.contains("color: red"));
    }

    #[test]
    fn test_missing_title_is_none() {
        let page = extract_page("<body><p>Just text.</p></body>");
        assert_eq!(page.title, None);
        assert_eq!(page.text, "Just text.");
    }

    #[test]
    fn test_empty_title_is_none() {
        let page = extract_page("<title>   </title><p>Body here.</p>");
        assert_eq!(page.title, None);
    }

    #[test]
    fn test_whitespace_collapsed() {
        let page = extract_page("<p>one</p>\n\n\n<p>two\t\tthree</p>");
        assert_eq!(page.text, "one two three");
    }
}
