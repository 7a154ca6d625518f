//! DuckDuckGo HTML scraper

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::{join_all, BoxFuture};
use lazy_static::lazy_static;
use regex_lite::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, LAST_MODIFIED, USER_AGENT};
use reqwest::Url;
use tracing::{debug, warn};

use super::text::{clean_text, decode_entities, generate_summary, html_title, html_to_text, strip_tags};
use super::{PageInfo, SearchOptions, SearchProvider};
use crate::error::{CoreError, CoreResult};

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";
const SEARCH_HOST: &str = "https://html.duckduckgo.com";
const PAGE_TIMEOUT: Duration = Duration::from_secs(30);
const ENRICH_TIMEOUT: Duration = Duration::from_secs(10);
const PAGE_DELAY: Duration = Duration::from_millis(200);
const MAX_ENRICH_BYTES: usize = 1024 * 1024;
const SKIPPED_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".xlsx"];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36 Edg/116.0.1938.62",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/117.0",
];

lazy_static! {
    static ref RESULT_LINK: Regex =
        Regex::new(r#"(?is)<a\s([^>]*class="[^"]*\bresult__a\b[^"]*"[^>]*)>(.*?)</a>"#).unwrap();
    static ref SNIPPET: Regex = Regex::new(
        r#"(?is)<(?:a|div|td)\s[^>]*class="[^"]*\bresult__snippet\b[^"]*"[^>]*>(.*?)</(?:a|div|td)>"#
    )
    .unwrap();
    static ref TIMESTAMP: Regex =
        Regex::new(r#"(?is)class="[^"]*\bresult__timestamp\b[^"]*"[^>]*>\s*([^<]*?)\s*<"#).unwrap();
    static ref NAV_LINK: Regex =
        Regex::new(r#"(?is)<a\s([^>]*class="[^"]*\bnav-link\b[^"]*"[^>]*)>(.*?)</a>"#).unwrap();
    static ref HREF: Regex = Regex::new(r#"(?i)href\s*=\s*"([^"]*)""#).unwrap();
}

fn random_user_agent() -> &'static str {
    USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]
}

/// A result as it appears on the results page
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawResult {
    pub page: PageInfo,
    /// Whether the results page carried a date for it
    pub dated: bool,
}

/// Unwrap `duckduckgo.com/l/?uddg=` redirects and force an absolute
/// `https` URL
pub(crate) fn clean_url(href: &str) -> String {
    let href = decode_entities(href.trim());
    let absolute = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        href.clone()
    };

    if absolute.contains("duckduckgo.com/l/") {
        if let Ok(parsed) = Url::parse(&absolute) {
            if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
                if !target.is_empty() {
                    return ensure_scheme(&target);
                }
            }
        }
    }
    ensure_scheme(&absolute)
}

fn ensure_scheme(url: &str) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else {
        format!("https://{}", url.trim_start_matches("//"))
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = text.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Results and the next-page URL found on one results page
pub(crate) fn parse_results_page(html: &str) -> (Vec<RawResult>, Option<String>) {
    let links: Vec<_> = RESULT_LINK.captures_iter(html).collect();
    let mut results = Vec::with_capacity(links.len());

    for (i, caps) in links.iter().enumerate() {
        let (Some(whole), Some(attrs), Some(title)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let Some(href) = HREF.captures(attrs.as_str()).and_then(|c| c.get(1)) else {
            continue;
        };
        let href = href.as_str();
        if href.trim().is_empty() {
            continue;
        }

        // the block runs from this link to the next one
        let block_end = links
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(html.len(), |m| m.start());
        let block = &html[whole.end()..block_end];

        let snippet = SNIPPET
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| strip_tags(m.as_str()))
            .unwrap_or_default();
        let published = TIMESTAMP
            .captures(block)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_timestamp(m.as_str()));

        results.push(RawResult {
            dated: published.is_some(),
            page: PageInfo {
                url: clean_url(href),
                title: strip_tags(title.as_str()),
                content: snippet.clone(),
                summary: snippet,
                published: published.unwrap_or_else(Utc::now),
            },
        });
    }

    let next = NAV_LINK
        .captures_iter(html)
        .filter(|c| {
            c.get(2)
                .is_some_and(|label| strip_tags(label.as_str()).to_lowercase().contains("next"))
        })
        .filter_map(|c| {
            let attrs = c.get(1)?;
            let href = HREF.captures(attrs.as_str())?.get(1)?;
            let href = decode_entities(href.as_str());
            Some(if href.starts_with("http") {
                href
            } else {
                format!("{}{}", SEARCH_HOST, href)
            })
        })
        .last();

    (results, next)
}

fn should_enrich(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    !SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// DuckDuckGo search through its JavaScript-free HTML endpoint
#[derive(Debug, Clone)]
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
}

impl DuckDuckGoProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PAGE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch_page(&self, url: &str, max_retries: usize) -> CoreResult<String> {
        let attempts = max_retries.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..attempts {
            let result = self
                .client
                .get(url)
                .header(USER_AGENT, random_user_agent())
                .header(
                    ACCEPT,
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                )
                .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.text().await?);
                }
                Ok(response) => last_error = format!("status {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }

            debug!("Search page attempt {} failed: {}", attempt + 1, last_error);
            if attempt + 1 < attempts {
                tokio::time::sleep(Duration::from_secs(attempt as u64 + 1)).await;
            }
        }

        Err(CoreError::Search(format!(
            "failed to fetch search results: {}",
            last_error
        )))
    }

    /// Replace snippet data with what the page itself says. Failures leave
    /// the result untouched.
    async fn enrich(&self, raw: RawResult) -> PageInfo {
        let RawResult { mut page, dated } = raw;
        if !should_enrich(&page.url) {
            return page;
        }

        let response = match self
            .client
            .get(&page.url)
            .header(USER_AGENT, random_user_agent())
            .timeout(ENRICH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return page,
        };

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        if !is_html {
            return page;
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let Some(body) = read_limited(response, MAX_ENRICH_BYTES).await else {
            return page;
        };
        let html = String::from_utf8_lossy(&body);

        if let Some(title) = html_title(&html) {
            page.title = title;
        }
        let content = clean_text(&html_to_text(&html));
        if !content.is_empty() {
            let summary = generate_summary(&content);
            if !summary.is_empty() {
                page.summary = summary;
            }
            page.content = content;
        }
        if !dated {
            if let Some(modified) = last_modified {
                page.published = modified;
            }
        }
        page
    }
}

impl Default for DuckDuckGoProvider {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_limited(mut response: reqwest::Response, limit: usize) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.ok()? {
        let room = limit - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Some(body)
}

impl SearchProvider for DuckDuckGoProvider {
    fn search<'a>(
        &'a self,
        query: &'a str,
        options: &'a SearchOptions,
    ) -> BoxFuture<'a, CoreResult<Vec<PageInfo>>> {
        Box::pin(async move {
            let max_pages = options.max_pages.max(1);
            let mut url = Url::parse_with_params(SEARCH_URL, &[("q", query)])
                .map_err(|e| CoreError::Search(e.to_string()))?
                .to_string();

            let mut seen = HashSet::new();
            let mut raw_results = Vec::new();

            for page in 0..max_pages {
                let html = match self.fetch_page(&url, options.max_retries).await {
                    Ok(html) => html,
                    Err(e) => {
                        warn!("Error scraping page {}: {}", page + 1, e);
                        break;
                    }
                };

                let (results, next) = parse_results_page(&html);
                for result in results {
                    if seen.insert(result.page.url.clone()) {
                        raw_results.push(result);
                    }
                }

                match next {
                    Some(next) if page + 1 < max_pages => {
                        url = next;
                        tokio::time::sleep(PAGE_DELAY).await;
                    }
                    _ => break,
                }
            }

            debug!("Enriching {} search results", raw_results.len());
            let enriched = join_all(raw_results.into_iter().map(|raw| self.enrich(raw))).await;
            Ok(enriched)
        })
    }

    fn name(&self) -> &'static str {
        "duckduckgo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
<div class="result results_links web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2Flearn&amp;rut=abc">Learn <b>Rust</b></a>
  </h2>
  <a class="result__url" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2Flearn">www.rust-lang.org/learn</a>
  <span class="result__timestamp">2024-03-05T00:00:00</span>
  <a class="result__snippet" href="x">Get started with <b>Rust</b> &amp; Cargo.</a>
</div>
<div class="result results_links web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Book</a>
  </h2>
  <a class="result__snippet" href="y">The Rust Programming Language.</a>
</div>
<div class="nav-link">
  <a class="nav-link" href="/html/?q=rust&amp;s=30">Next Page &gt;</a>
</div>
"#;

    #[test]
    fn test_parse_results_page() {
        let (results, next) = parse_results_page(RESULTS_PAGE);
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.page.url, "https://www.rust-lang.org/learn");
        assert_eq!(first.page.title, "Learn Rust");
        assert_eq!(first.page.content, "Get started with Rust & Cargo.");
        assert_eq!(first.page.summary, first.page.content);
        assert!(first.dated);
        assert_eq!(first.page.published.format("%Y-%m-%d").to_string(), "2024-03-05");

        let second = &results[1];
        assert_eq!(second.page.url, "https://doc.rust-lang.org/book/");
        assert!(!second.dated);

        assert_eq!(
            next.as_deref(),
            Some("https://html.duckduckgo.com/html/?q=rust&s=30")
        );
    }

    #[test]
    fn test_parse_empty_page() {
        let (results, next) = parse_results_page("<html><body>No results.</body></html>");
        assert!(results.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn test_clean_url() {
        assert_eq!(
            clean_url("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa%3Fb%3D1&rut=x"),
            "https://example.com/a?b=1"
        );
        assert_eq!(clean_url("//example.com/page"), "https://example.com/page");
        assert_eq!(clean_url("example.com"), "https://example.com");
        assert_eq!(clean_url("http://plain.org"), "http://plain.org");
    }

    #[test]
    fn test_should_enrich_skips_documents() {
        assert!(should_enrich("https://example.com/article"));
        assert!(!should_enrich("https://example.com/paper.PDF"));
        assert!(!should_enrich("https://example.com/sheet.xlsx?dl=1"));
        assert!(!should_enrich("https://example.com/memo.docx"));
    }

    #[test]
    fn test_parse_timestamp() {
        assert!(parse_timestamp("2023-01-15").is_some());
        assert!(parse_timestamp("2023-01-15T10:00:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
