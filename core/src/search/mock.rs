use chrono::{Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;

use super::{PageInfo, SearchOptions, SearchProvider};
use crate::error::{CoreError, CoreResult};

/// Canned results for tests and `TEST_MODE`
///
/// The query `empty` yields nothing and `error` fails; anything else
/// yields three results published now, a day ago and a month ago.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockSearchProvider;

impl SearchProvider for MockSearchProvider {
    fn search<'a>(
        &'a self,
        query: &'a str,
        _options: &'a SearchOptions,
    ) -> BoxFuture<'a, CoreResult<Vec<PageInfo>>> {
        Box::pin(async move {
            let now = Utc::now();
            match query {
                "empty" => Ok(Vec::new()),
                "error" => Err(CoreError::Search("mock search error".to_string())),
                _ => Ok(vec![
                    PageInfo {
                        url: "https://example.com/result1".to_string(),
                        title: "Example Result 1".to_string(),
                        content: format!("This is the first example result for {}", query),
                        summary: format!("First result summary about {}", query),
                        published: now,
                    },
                    PageInfo {
                        url: "https://example.org/result2".to_string(),
                        title: "Example Result 2".to_string(),
                        content: format!("This is the second example result for {}", query),
                        summary: format!("Second result summary about {}", query),
                        published: now - ChronoDuration::days(1),
                    },
                    PageInfo {
                        url: format!("https://wikipedia.org/wiki/{}", query),
                        title: format!("{} - Wikipedia", query),
                        content: format!("Wikipedia article about {}", query),
                        summary: format!("Encyclopedia entry for {}", query),
                        published: now - ChronoDuration::days(30),
                    },
                ]),
            }
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_results() {
        let opts = SearchOptions::default();
        let results = MockSearchProvider.search("golang", &opts).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].url, "https://wikipedia.org/wiki/golang");
        assert!(results[0].published > results[1].published);

        assert!(MockSearchProvider.search("empty", &opts).await.unwrap().is_empty());
        assert!(MockSearchProvider.search("error", &opts).await.is_err());
    }
}
