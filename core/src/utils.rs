//! Small helpers shared by handlers and providers

/// Random UUID v4 in hyphenated form
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Rough token estimate: one token per 0.75 words
pub fn simple_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * 1.33).round() as usize
}

/// Cut `text` to at most `max_len` bytes on a char boundary, trimming and
/// appending `...` when anything was removed
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", text[..end].trim())
}

/// Integer with comma thousands separators (`1234567` -> `1,234,567`)
pub fn format_int(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_is_uuid_v4() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        let parsed = uuid::Uuid::parse_str(&a).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_simple_token_count() {
        assert_eq!(simple_token_count(""), 0);
        assert_eq!(simple_token_count("   \n\t "), 0);
        assert_eq!(simple_token_count("one"), 1);
        assert_eq!(simple_token_count("This is a test sentence"), 7);
        assert_eq!(
            simple_token_count(
                "one two three four five six seven eight nine ten eleven twelve thirteen fourteen fifteen"
            ),
            20
        );
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("hello world again", 6), "hello...");
        // never splits a multi-byte char
        assert_eq!(truncate_text("héllo", 2), "h...");
    }

    #[test]
    fn test_format_int() {
        assert_eq!(format_int(0), "0");
        assert_eq!(format_int(999), "999");
        assert_eq!(format_int(1000), "1,000");
        assert_eq!(format_int(1234567), "1,234,567");
        assert_eq!(format_int(-45000), "-45,000");
    }
}
