//! Citation extraction from search results

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::search::PageInfo;

/// JSON schema describing [`CitationResponse`]
pub const CITATION_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "created": { "type": "number" },
    "citations": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "url": { "type": "string" },
          "title": { "type": "string" },
          "summary": { "type": "string" }
        },
        "required": ["url"]
      }
    }
  },
  "required": ["created", "citations"]
}"#;

/// A source reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

impl Citation {
    pub fn url_only<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            summary: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CitationStyle {
    /// URL only
    #[default]
    Short,
    /// URL, title and summary
    Full,
}

impl std::str::FromStr for CitationStyle {
    type Err = std::convert::Infallible;

    /// `full` selects [`CitationStyle::Full`]; anything else is short
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("full") {
            CitationStyle::Full
        } else {
            CitationStyle::Short
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationResponse {
    pub created: i64,
    pub citations: Vec<Citation>,
}

/// URLs of `results`, or `None` when there are none
pub fn extract_citation_urls(results: &[PageInfo]) -> Option<Vec<String>> {
    let urls: Vec<String> = results
        .iter()
        .filter(|r| !r.url.is_empty())
        .map(|r| r.url.clone())
        .collect();
    (!urls.is_empty()).then_some(urls)
}

/// URL, title and summary of each result that has a URL
pub fn extract_full_citations(results: &[PageInfo]) -> Option<Vec<Citation>> {
    let citations: Vec<Citation> = results
        .iter()
        .filter(|r| !r.url.is_empty())
        .map(|r| Citation {
            url: r.url.clone(),
            title: r.title.clone(),
            summary: r.summary.clone(),
        })
        .collect();
    (!citations.is_empty()).then_some(citations)
}

/// One citation per page in the requested style, stamped with the
/// current Unix time
pub fn extract_citations(pages: &[PageInfo], style: CitationStyle) -> CitationResponse {
    let citations = pages
        .iter()
        .map(|page| match style {
            CitationStyle::Full => Citation {
                url: page.url.clone(),
                title: page.title.clone(),
                summary: page.summary.clone(),
            },
            CitationStyle::Short => Citation::url_only(page.url.clone()),
        })
        .collect();
    CitationResponse {
        created: chrono::Utc::now().timestamp(),
        citations,
    }
}

/// Builds cleaned-up citations, capped at `max_results`
#[derive(Debug, Clone)]
pub struct CitationExtractor {
    pub max_results: usize,
}

impl Default for CitationExtractor {
    fn default() -> Self {
        Self { max_results: 10 }
    }
}

impl CitationExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_results(max_results: usize) -> Self {
        Self { max_results }
    }

    /// Full citations for the first `max_results` results, plus the URLs of
    /// all results
    pub fn extract(&self, results: &[PageInfo]) -> (Vec<Citation>, Vec<String>) {
        let full: Vec<Citation> = results
            .iter()
            .take(self.max_results)
            .map(|r| {
                let content = r.content.trim();
                let mut summary = r.summary.trim().to_string();
                if summary.is_empty() && !content.is_empty() {
                    summary = match content.char_indices().nth(200) {
                        Some((cut, _)) => format!("{}...", &content[..cut]),
                        None => content.to_string(),
                    };
                }
                Citation {
                    url: r.url.clone(),
                    title: r.title.trim().to_string(),
                    summary,
                }
            })
            .collect();
        let urls = extract_citation_urls(results).unwrap_or_default();

        debug!(
            "Extracted {} full and {} short citations",
            full.len(),
            urls.len()
        );
        (full, urls)
    }
}
