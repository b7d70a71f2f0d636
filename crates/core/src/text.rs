//! Char-boundary safe string shortening shared by prompts, logs and stores.

/// Largest byte index `<= idx` that sits on a char boundary.
pub fn floor_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest byte index `>= idx` that sits on a char boundary.
pub fn ceil_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Shorten to at most `max` bytes, ending in `...` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s[..floor_boundary(s, max)].to_string();
    }
    format!("{}...", &s[..floor_boundary(s, max - 3)])
}

/// First `n` bytes (boundary-adjusted).
pub fn head(s: &str, n: usize) -> &str {
    &s[..floor_boundary(s, n)]
}

/// Last `n` bytes (boundary-adjusted).
pub fn tail(s: &str, n: usize) -> &str {
    if n >= s.len() {
        return s;
    }
    &s[ceil_boundary(s, s.len() - n)..]
}

/// Keep `head_len` leading and `tail_len` trailing bytes joined by `marker`.
pub fn head_tail(s: &str, head_len: usize, tail_len: usize, marker: &str) -> String {
    format!("{}{}{}", head(s, head_len), marker, tail(s, tail_len))
}
