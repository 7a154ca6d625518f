//! Prompt construction from search results

use std::fmt::Write;

use crate::search::PageInfo;
use crate::utils::truncate_text;

/// System note used when a search came back empty
pub const NO_RESULTS_NOTE: &str = "No relevant search results were found for this query. \
Please respond based on your training data.";

const SEARCH_INSTRUCTIONS: &str = "INSTRUCTIONS:
1. Use ONLY the information from these search results to answer the user's query
2. If the search results don't contain relevant information, admit that you don't have enough information
3. Provide a comprehensive answer that synthesizes information from multiple sources
4. Include specific facts and details from the sources
5. Cite sources using [1], [2], etc., corresponding to the search result numbers
6. DO NOT make up or include information not present in these search results
7. Maintain a helpful, informative, and accurate tone

Your answer should be well-structured, accurate, and directly address the user's query.";

/// System prompt asking the model to answer `query` from numbered,
/// citable search results
pub fn search_prompt(query: &str, results: &[PageInfo]) -> String {
    let mut listing = String::new();
    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(listing, "[{}] {}\nURL: {}", i + 1, result.title, result.url);
        if !result.summary.is_empty() {
            let _ = write!(listing, "Summary: {}\n\n", result.summary);
        } else if !result.content.is_empty() {
            let _ = write!(listing, "Content: {}\n\n", truncate_text(&result.content, 300));
        }
    }

    format!(
        "I'll help answer the question based on the web search results provided below.\n\n\
         USER QUERY: {}\n\n\
         WEB SEARCH RESULTS:\n{}\n\n\
         {}",
        query, listing, SEARCH_INSTRUCTIONS
    )
}

/// Up to three `- title (url)` lines, the context format of `/chat`
pub fn format_search_results(results: &[PageInfo]) -> String {
    results
        .iter()
        .take(3)
        .map(|r| format!("- {} ({})\n", r.title, r.url))
        .collect()
}

/// Readable listing of results for `query` with summaries or content
/// excerpts
pub fn format_enhanced_results(results: &[PageInfo], query: &str) -> String {
    let mut out = format!("Web search results for query: \"{}\"\n\n", query);
    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(out, "[{}] {}", i + 1, result.title);
        let _ = writeln!(out, "URL: {}", result.url);
        if !result.summary.is_empty() {
            let _ = writeln!(out, "Summary: {}", truncate_text(&result.summary, 300));
        } else if !result.content.is_empty() {
            let _ = writeln!(out, "Content: {}", truncate_text(&result.content, 200));
        }
        out.push('\n');
    }
    out
}
