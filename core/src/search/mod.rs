//! Web search: providers, filtering and ranking
//!
//! A [`SearchProvider`] turns a query into [`PageInfo`] results. [`scrape`]
//! is the entry point used by the API layer: it runs a provider, logs what
//! came back and applies the caller's domain and recency filters.

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, CoreResult};

mod duckduckgo;
mod mock;
mod rank;
pub mod text;

pub use duckduckgo::DuckDuckGoProvider;
pub use mock::MockSearchProvider;
pub use rank::rank_by_relevance;
pub use text::{clean_text, generate_summary, split_sentences};

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub published: DateTime<Utc>,
}

/// Knobs for a single search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub max_pages: usize,
    pub max_retries: usize,
    /// `example.com` allows a domain, `-example.com` blocks it
    pub domain_filter: Vec<String>,
    /// `hour`, `day`, `week`, `month` or empty
    pub recency_filter: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_pages: 3,
            max_retries: 2,
            domain_filter: Vec::new(),
            recency_filter: None,
        }
    }
}

impl SearchOptions {
    pub fn new(max_pages: usize, max_retries: usize) -> Self {
        Self {
            max_pages,
            max_retries,
            ..Default::default()
        }
    }

    pub fn domain_filter(mut self, domains: Vec<String>) -> Self {
        self.domain_filter = domains;
        self
    }

    pub fn recency_filter<S: Into<String>>(mut self, recency: S) -> Self {
        let recency = recency.into();
        self.recency_filter = (!recency.is_empty()).then_some(recency);
        self
    }

    fn has_filters(&self) -> bool {
        !self.domain_filter.is_empty() || self.recency_filter.is_some()
    }
}

/// A search engine backend
pub trait SearchProvider: Send + Sync {
    /// Run `query`, returning results in engine order
    fn search<'a>(
        &'a self,
        query: &'a str,
        options: &'a SearchOptions,
    ) -> BoxFuture<'a, CoreResult<Vec<PageInfo>>>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Provider by name: `duckduckgo` or `mock`; anything else is DuckDuckGo
pub fn provider_for(name: &str) -> Box<dyn SearchProvider> {
    match name.to_ascii_lowercase().as_str() {
        "mock" => Box::new(MockSearchProvider),
        "duckduckgo" | "" => Box::new(DuckDuckGoProvider::new()),
        other => {
            warn!("Unknown search provider '{}', using duckduckgo", other);
            Box::new(DuckDuckGoProvider::new())
        }
    }
}

/// Oldest publication time admitted by `recency`, `None` for no limit
pub fn recency_cutoff(recency: &str) -> CoreResult<Option<DateTime<Utc>>> {
    let now = Utc::now();
    let cutoff = match recency.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "hour" => now - ChronoDuration::hours(1),
        "day" => now - ChronoDuration::days(1),
        "week" => now - ChronoDuration::days(7),
        "month" => now
            .checked_sub_months(Months::new(1))
            .unwrap_or(now - ChronoDuration::days(30)),
        _ => return Err(CoreError::InvalidRecency(recency.to_string())),
    };
    Ok(Some(cutoff))
}

/// Host of `url` without scheme, `www.` or path
pub fn extract_domain(url: &str) -> &str {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    rest.split('/').next().unwrap_or(rest)
}

/// Apply domain and recency filters; an invalid recency is ignored
pub fn filter_results(results: Vec<PageInfo>, options: &SearchOptions) -> Vec<PageInfo> {
    if !options.has_filters() {
        return results;
    }

    let (blocked, allowed): (Vec<&str>, Vec<&str>) = options
        .domain_filter
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .partition(|f| f.starts_with('-'));
    let blocked: Vec<&str> = blocked
        .into_iter()
        .map(|f| f.trim_start_matches('-'))
        .filter(|f| !f.is_empty())
        .collect();

    let cutoff = match options.recency_filter.as_deref() {
        Some(recency) => recency_cutoff(recency).unwrap_or_else(|e| {
            warn!("Ignoring {}", e);
            None
        }),
        None => None,
    };

    results
        .into_iter()
        .filter(|result| {
            let domain = extract_domain(&result.url);
            if blocked.iter().any(|b| domain.contains(b)) {
                return false;
            }
            if !allowed.is_empty() && !allowed.iter().any(|a| domain.contains(a)) {
                return false;
            }
            cutoff.map_or(true, |min| result.published >= min)
        })
        .collect()
}

/// Search with `provider` and filter the results. Provider failures are
/// logged and produce an empty list.
pub async fn scrape(
    provider: &dyn SearchProvider,
    query: &str,
    options: &SearchOptions,
) -> Vec<PageInfo> {
    let started = std::time::Instant::now();
    let results = match provider.search(query, options).await {
        Ok(results) => results,
        Err(e) => {
            error!("Search error ({}): {}", provider.name(), e);
            return Vec::new();
        }
    };
    debug!(
        "{} search took {:?}",
        provider.name(),
        started.elapsed()
    );

    if results.is_empty() {
        warn!("Search returned no results");
    } else {
        info!("🔎 Search returned {} results", results.len());
        for (i, result) in results.iter().take(3).enumerate() {
            debug!("Result {}: URL={}, Title={}", i + 1, result.url, result.title);
        }
    }

    if options.has_filters() {
        let results = filter_results(results, options);
        info!("After filtering: {} results remain", results.len());
        return results;
    }
    results
}

#[cfg(test)]
pub(crate) fn sample_results() -> Vec<PageInfo> {
    let now = Utc::now();
    vec![
        PageInfo {
            url: "https://example.com/page1".to_string(),
            title: "Example Page 1".to_string(),
            content: "This is the content of page 1. It contains sample text.".to_string(),
            summary: "Summary of page 1".to_string(),
            published: now,
        },
        PageInfo {
            url: "https://www.test.org/page2".to_string(),
            title: "Test Page 2".to_string(),
            content: "This is the content of page 2. More sample text here.".to_string(),
            summary: "Summary of page 2".to_string(),
            published: now - ChronoDuration::hours(30),
        },
        PageInfo {
            url: "https://blocked.net/page3".to_string(),
            title: "Blocked Page 3".to_string(),
            content: "This is the content of page 3. Even more sample text.".to_string(),
            summary: String::new(),
            published: now - ChronoDuration::days(30),
        },
    ]
}
