/// Telegram rejects message bodies above this many characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Splits `text` into chunks Telegram will accept.
///
/// Prefers breaking on a newline in the last fifth of the window, then on
/// the last space, and only hard-cuts mid-word when the window has no
/// whitespace at all. Leading whitespace on continuation chunks is dropped.
pub fn split_message(text: &str) -> Vec<String> {
    split_with_limit(text, MAX_MESSAGE_LENGTH)
}

pub(crate) fn split_with_limit(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while chars.len() - start > limit {
        let window = &chars[start..start + limit];
        let newline_floor = limit * 4 / 5;
        let break_at = window
            .iter()
            .rposition(|&c| c == '\n')
            .filter(|&at| at >= newline_floor)
            .or_else(|| window.iter().rposition(|&c| c == ' '))
            .filter(|&at| at > 0)
            .unwrap_or(limit);

        chunks.push(chars[start..start + break_at].iter().collect());
        start += break_at;
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
    }

    if start < chars.len() || chunks.is_empty() {
        chunks.push(chars[start..].iter().collect());
    }
    chunks
}
