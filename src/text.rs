//! Small text helpers shared by the display view and payload rendering.

/// Joins items as a natural-language list.
///
/// `[] → ""`, `[A] → "A"`, `[A, B] → "A and B"`, `[A, B, C] → "A, B, and C"`.
pub fn readable_list<S: AsRef<str>>(items: &[S]) -> String {
    match items {
        [] => String::new(),
        [only] => only.as_ref().to_string(),
        [first, second] => format!("{} and {}", first.as_ref(), second.as_ref()),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(|s| s.as_ref()).collect();
            format!("{}, and {}", head.join(", "), last.as_ref())
        }
    }
}

/// Ellipsis appended to truncated text.
pub const ELLIPSIS: char = '…';

/// Truncates `text` to at most `max_chars` characters.
///
/// When truncation happens the last kept character is replaced by an
/// ellipsis, so the result never exceeds `max_chars`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push(ELLIPSIS);
    out
}

/// Renders an upstream tag for humans (`hatsune_miku` → `hatsune miku`).
pub fn humanize_tag(tag: &str) -> String {
    tag.replace('_', " ")
}

/// Formats a byte count in binary units (`512 B`, `1.5 KiB`, `2.0 MiB`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = *next;
    }
    format!("{value:.1} {unit}")
}
