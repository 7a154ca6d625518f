//! Text extraction and cleanup for scraped pages

use lazy_static::lazy_static;
use regex_lite::Regex;

/// Longest summary produced by [`generate_summary`]
pub const MAX_SUMMARY_LEN: usize = 300;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]").unwrap();
    static ref SCRIPTS: Regex =
        Regex::new(r"(?is)<(script|style|noscript|svg|head|nav|footer)\b.*?</(script|style|noscript|svg|head|nav|footer)>").unwrap();
    static ref COMMENTS: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref TAGS: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref TITLE: Regex = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap();
    static ref BOILERPLATE: Vec<Regex> = [
        r"(?i)related articles:.*",
        r"(?i)see also:.*",
        r"(?i)references\s*\d*.*",
        r"(?i)external links:.*",
        r"(?i)share this article.*",
        r"(?i)you might also like.*",
        r"(?i)advertisement.*",
        r"(?i)subscribe for more.*",
        r"(?i)trending now:.*",
        r"(?i)follow us on.*",
        r"(?i)comments.*",
        r"(?i)leave a reply.*",
        r"(?i)watch now:.*",
        r"(?i)click here.*",
        r"(?i)continue reading.*",
        r"(?i)skip to main content.*",
        r"(?i)privacy policy.*",
        r"(?i)terms of service.*",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

/// Collapse whitespace and cut trailing boilerplate (share widgets,
/// comment sections, legal links)
pub fn clean_text(text: &str) -> String {
    let mut text = WHITESPACE.replace_all(text, " ").into_owned();
    for pattern in BOILERPLATE.iter() {
        text = pattern.replace_all(&text, "").into_owned();
    }
    text.trim().to_string()
}

/// Fragments between `.`, `!` and `?` longer than ten bytes, each
/// terminated with a period
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_END
        .split(text)
        .map(str::trim)
        .filter(|part| part.len() > 10)
        .map(|part| format!("{}.", part))
        .collect()
}

/// Up to three leading sentences, within [`MAX_SUMMARY_LEN`] bytes
pub fn generate_summary(content: &str) -> String {
    let mut summary = String::new();
    let mut total = 0;
    for sentence in split_sentences(content).into_iter().take(3) {
        if total + sentence.len() > MAX_SUMMARY_LEN {
            break;
        }
        if !summary.is_empty() {
            summary.push(' ');
        }
        total += sentence.len();
        summary.push_str(&sentence);
    }
    summary
}

/// Decode the handful of entities that show up in titles and snippets
pub fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Visible text of an HTML fragment
pub fn strip_tags(html: &str) -> String {
    let text = TAGS.replace_all(html, " ");
    let text = decode_entities(&text);
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Contents of `<title>`, if present and non-empty
pub fn html_title(html: &str) -> Option<String> {
    TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| strip_tags(m.as_str()))
        .filter(|t| !t.is_empty())
}

/// Body text of a page with scripts, styles and navigation removed
pub fn html_to_text(html: &str) -> String {
    let html = COMMENTS.replace_all(html, " ");
    let html = SCRIPTS.replace_all(&html, " ");
    strip_tags(&html)
}
