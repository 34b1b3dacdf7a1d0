pub const DEFAULT_SNIPPET_LENGTH: usize = 200;

const ELLIPSIS: &str = "...";

/// A window of `snippet_length` characters around the first
/// case-insensitive occurrence of `query`, with `...` marking cut edges.
/// Falls back to the start of `content` when the query is empty or absent.
#[inline]
pub fn extract_snippet(content: &str, query: &str, snippet_length: usize) -> String {
    let chars: Vec<char> = content.chars().collect();

    let Some(position) = find_case_insensitive(&chars, query) else {
        return truncate_chars(&chars, snippet_length);
    };

    let start = position.saturating_sub(snippet_length / 2);
    let end = start + snippet_length;

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.extend(&chars[start..end.min(chars.len())]);
    if end < chars.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// The first `max_length` characters of `content`, plus `...` when cut
#[inline]
pub fn truncate_snippet(content: &str, max_length: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    truncate_chars(&chars, max_length)
}

fn truncate_chars(chars: &[char], max_length: usize) -> String {
    if chars.len() <= max_length {
        return chars.iter().collect();
    }
    let mut snippet: String = chars[..max_length].iter().collect();
    snippet.push_str(ELLIPSIS);
    snippet
}

/// Character index of the first match, comparing lowercase forms
fn find_case_insensitive(haystack: &[char], query: &str) -> Option<usize> {
    let needle: Vec<char> = query.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return None;
    }

    (0..haystack.len()).find(|&start| {
        let mut lowered = haystack[start..].iter().flat_map(|c| c.to_lowercase());
        needle.iter().all(|expected| lowered.next() == Some(*expected))
    })
}
