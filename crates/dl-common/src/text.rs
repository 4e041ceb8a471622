//! Label, name, and number text rules.
//!
//! Labels are compared after [`normalize_label`] (trimmed, lowercased), so
//! `Temp` and ` temp ` collide. Everything user-visible passes through
//! [`sanitize_text`] first.

/// Normalized form used for case-insensitive label/name comparison.
pub fn normalize_label(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Strip markup-sensitive characters and collapse whitespace runs.
pub fn sanitize_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for ch in value.chars() {
        if matches!(ch, '<' | '>' | '&' | '"' | '\'' | '`') {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }
    out
}

/// Return `base`, or the first `base_<n>` (n = 1, 2, ...) that `is_taken`
/// rejects.
pub fn make_unique(base: &str, mut is_taken: impl FnMut(&str) -> bool) -> String {
    if !is_taken(base) {
        return base.to_string();
    }
    let mut index = 1u64;
    loop {
        let candidate = format!("{}_{}", base, index);
        if !is_taken(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

/// Parse the longest numeric prefix of `text`, ignoring leading whitespace.
///
/// `"23.5C"` yields `23.5`, `"-1e3x"` yields `-1000`. Returns `None` when no
/// digits lead the string or the result is not finite.
pub fn parse_leading_f64(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }

    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}
