//! Adaptive truncation of tool results before they enter the transcript.
//!
//! The fuller the context window, the smaller each new tool result may be.
//! Truncated results keep 60% head and the rest as tail, and end with a hint
//! telling the model how to ask for a narrower result next time.

use conclave_core::text::{head, tail};

/// Character cap for a tool result at the given fill ratio.
pub fn result_cap(fill_ratio: f64) -> usize {
    match fill_ratio {
        r if r < 0.40 => 16_000,
        r if r < 0.65 => 8_000,
        r if r < 0.80 => 4_000,
        _ => 2_000,
    }
}

/// Room kept for the omission notice.
const NOTICE_RESERVE: usize = 100;

/// Cap `result` at `cap` characters. Content already within the cap is
/// returned unchanged.
pub fn truncate_for_llm(result: &str, tool_name: &str, cap: usize) -> String {
    if result.len() <= cap {
        return result.to_string();
    }

    let head_len = cap * 60 / 100;
    let tail_len = cap.saturating_sub(head_len + NOTICE_RESERVE);

    let kept_head = head(result, head_len);
    let mut out = kept_head.to_string();
    if tail_len > 0 {
        let kept_tail = tail(result, tail_len);
        let omitted = result.len() - kept_head.len() - kept_tail.len();
        out.push_str(&format!("\n\n... [{omitted} chars omitted] ...\n\n"));
        out.push_str(kept_tail);
    }

    if let Some(hint) = narrowing_hint(tool_name) {
        out.push_str("\n\n");
        out.push_str(hint);
    }
    out
}

fn narrowing_hint(tool_name: &str) -> Option<&'static str> {
    let has = |needle: &str| tool_name.contains(needle);
    if has("browser") || has("snapshot") {
        Some("[Context note: browser output was truncated. Use targeted CSS selectors or element IDs to narrow results.]")
    } else if has("read") || has("file") {
        Some("[Context note: file content was truncated. Read specific line ranges with start_line/end_line.]")
    } else if has("exec") || has("bash") {
        Some("[Context note: command output was truncated. Pipe through head/tail/grep to get specific sections.]")
    } else if has("search") || has("grep") {
        Some("[Context note: search results were truncated. Narrow with more specific patterns or file filters.]")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_shrinks_as_window_fills() {
        let ratios = [0.0, 0.39, 0.40, 0.64, 0.65, 0.79, 0.80, 1.5];
        let caps: Vec<usize> = ratios.iter().map(|r| result_cap(*r)).collect();
        assert_eq!(caps, [16_000, 16_000, 8_000, 8_000, 4_000, 4_000, 2_000, 2_000]);
        assert!(caps.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn short_content_is_unchanged() {
        let s = "x".repeat(2_000);
        assert_eq!(truncate_for_llm(&s, "bash", 2_000), s);
        assert_eq!(truncate_for_llm("", "bash", 2_000), "");
    }

    #[test]
    fn long_content_keeps_head_and_tail() {
        let s = format!("{}{}", "h".repeat(5_000), "t".repeat(5_000));
        let out = truncate_for_llm(&s, "custom_tool", 2_000);
        assert!(out.starts_with(&"h".repeat(1_200)));
        assert!(out.ends_with(&"t".repeat(700)));
        assert!(out.contains("... [8100 chars omitted] ..."));
    }

    #[test]
    fn hint_matches_tool_kind() {
        let s = "x".repeat(10_000);
        assert!(truncate_for_llm(&s, "read_file", 2_000).contains("start_line/end_line"));
        assert!(truncate_for_llm(&s, "bash", 2_000).contains("head/tail/grep"));
        assert!(truncate_for_llm(&s, "browser_snapshot", 2_000).contains("CSS selectors"));
        assert!(truncate_for_llm(&s, "web_search", 2_000).contains("specific patterns"));
        assert!(!truncate_for_llm(&s, "calendar", 2_000).contains("[Context note"));
    }
}
