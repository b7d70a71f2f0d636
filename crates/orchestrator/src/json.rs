//! Pull a JSON payload out of free-form model output.
//!
//! Models wrap JSON in markdown fences, prefix it with chatter, or trail it
//! with commentary. Extraction tries, in order: a ```` ```json ```` fence, a
//! bare ```` ``` ```` fence whose body starts with the expected opener, then
//! a depth scan from the first opener that respects string literals.

/// Extract the first JSON object from `text`.
pub fn extract_object(text: &str) -> Option<&str> {
    extract(text, &['{'])
}

/// Extract a JSON array or object, whichever opens first.
pub fn extract_array_or_object(text: &str) -> Option<&str> {
    extract(text, &['[', '{'])
}

fn extract<'a>(text: &'a str, openers: &[char]) -> Option<&'a str> {
    if let Some(body) = fenced(text, "```json") {
        return Some(body);
    }
    if let Some(body) = fenced(text, "```").filter(|b| b.starts_with(openers)) {
        return Some(body);
    }
    let start = text.find(openers)?;
    balanced(&text[start..])
}

/// Body of the first fence opened by `marker`. A bare fence skips its info
/// string up to the end of the line.
fn fenced<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let mut start = text.find(marker)? + marker.len();
    if marker == "```" {
        if let Some(newline) = text[start..].find('\n') {
            start += newline + 1;
        }
    }
    let end = text[start..].find("```")?;
    Some(text[start..start + end].trim())
}

/// The balanced value `s` starts with, or `None` when it never closes.
fn balanced(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_object() {
        assert_eq!(extract_object(r#"{"mode":"quick"}"#), Some(r#"{"mode":"quick"}"#));
    }

    #[test]
    fn json_fence_wins() {
        let text = "Sure!\n```json\n{\"mode\": \"daemon\"}\n```\nanything else {\"mode\":\"quick\"}";
        assert_eq!(extract_object(text), Some("{\"mode\": \"daemon\"}"));
    }

    #[test]
    fn bare_fence_with_object() {
        let text = "```\n{\"adequate\": true}\n```";
        assert_eq!(extract_object(text), Some("{\"adequate\": true}"));
    }

    #[test]
    fn bare_fence_without_object_falls_through_to_scan() {
        let text = "```\nnot json\n```\nthen {\"mode\":\"status\"}";
        assert_eq!(extract_object(text), Some("{\"mode\":\"status\"}"));
    }

    #[test]
    fn loose_braces_are_depth_scanned() {
        let text = "I think mode should be {\"mode\":\"quick\"} - done";
        assert_eq!(extract_object(text), Some("{\"mode\":\"quick\"}"));
    }

    #[test]
    fn nested_and_quoted_braces() {
        let text = r#"x {"a": {"b": "}{"}, "c": "\"}"} y"#;
        assert_eq!(extract_object(text), Some(r#"{"a": {"b": "}{"}, "c": "\"}"}"#));
    }

    #[test]
    fn unbalanced_or_missing() {
        assert_eq!(extract_object("no json here"), None);
        assert_eq!(extract_object("{\"mode\": \"quick\""), None);
    }

    #[test]
    fn array_before_object() {
        let text = r#"Here: [{"key":"a"},{"key":"b"}]"#;
        assert_eq!(extract_array_or_object(text), Some(r#"[{"key":"a"},{"key":"b"}]"#));
        assert_eq!(extract_array_or_object("[]"), Some("[]"));
        assert_eq!(extract_array_or_object(r#"{"learnings": []}"#), Some(r#"{"learnings": []}"#));
    }
}
