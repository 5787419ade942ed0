//! Output truncation strategies for log entries.

/// How to truncate text that exceeds the maximum character limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationMode {
    /// Keep first 40% and last 60%, with a marker in the middle.
    HeadTail,
    /// Keep the first `max_chars`, with a marker at the end.
    Head,
    /// Keep the last `max_chars`, with a marker at the start.
    Tail,
}

/// Truncate `text` to at most `max_chars` characters using the given mode.
///
/// Counts characters, not bytes, so multi-byte text is never split inside a
/// code point. Text within the limit is returned unchanged.
pub fn truncate_output(text: &str, max_chars: usize, mode: TruncationMode) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let removed = total - max_chars;

    match mode {
        TruncationMode::HeadTail => {
            let head_size = max_chars * 40 / 100;
            let tail_size = max_chars - head_size;
            format!(
                "{}\n[... {} characters truncated ...]\n{}",
                prefix(text, head_size),
                removed,
                suffix(text, total, tail_size)
            )
        }
        TruncationMode::Head => format!(
            "{}\n[... {} characters truncated]",
            prefix(text, max_chars),
            removed
        ),
        TruncationMode::Tail => format!(
            "[{} characters truncated ...]\n{}",
            removed,
            suffix(text, total, max_chars)
        ),
    }
}

fn prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn suffix(text: &str, total: usize, chars: usize) -> &str {
    match text.char_indices().nth(total - chars) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
