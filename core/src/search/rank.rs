use super::PageInfo;

const TITLE_WEIGHT: f64 = 2.0;
const CONTENT_WEIGHT: f64 = 1.0;
const CREDIBLE_BONUS: f64 = 1.5;
const CREDIBLE_MARKERS: &[&str] = &[".edu", ".gov", "wikipedia.org"];

fn score(result: &PageInfo, terms: &[String]) -> f64 {
    let title = result.title.to_lowercase();
    let content = result.content.to_lowercase();

    let mut score = 1.0;
    for term in terms {
        if title.contains(term.as_str()) {
            score += TITLE_WEIGHT;
        }
        if content.contains(term.as_str()) {
            score += CONTENT_WEIGHT;
        }
    }
    if CREDIBLE_MARKERS.iter().any(|m| result.url.contains(m)) {
        score += CREDIBLE_BONUS;
    }
    score
}

/// Order results by keyword overlap with `query`, most relevant first.
/// Ties keep their original order.
pub fn rank_by_relevance(results: Vec<PageInfo>, query: &str) -> Vec<PageInfo> {
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut scored: Vec<(f64, PageInfo)> = results
        .into_iter()
        .map(|r| (score(&r, &terms), r))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::sample_results;

    #[test]
    fn test_title_matches_outrank_content_matches() {
        let mut results = sample_results();
        results[0].title = "Unrelated".to_string();
        results[0].content = "all about ferris".to_string();
        results[1].title = "Ferris the crab".to_string();
        results[1].content = "nothing".to_string();

        let ranked = rank_by_relevance(results, "Ferris");
        assert_eq!(ranked[0].title, "Ferris the crab");
        assert_eq!(ranked[1].content, "all about ferris");
    }

    #[test]
    fn test_credible_domains_get_bonus() {
        let mut results = sample_results();
        results[2].url = "https://en.wikipedia.org/wiki/Rust".to_string();
        let ranked = rank_by_relevance(results, "zzz");
        assert!(ranked[0].url.contains("wikipedia.org"));
    }

    #[test]
    fn test_ties_are_stable() {
        let results = sample_results();
        let urls: Vec<_> = results.iter().map(|r| r.url.clone()).collect();
        let ranked = rank_by_relevance(results, "no-match-anywhere");
        let ranked_urls: Vec<_> = ranked.iter().map(|r| r.url.clone()).collect();
        assert_eq!(ranked_urls, urls);
        assert!(rank_by_relevance(Vec::new(), "q").is_empty());
    }
}
