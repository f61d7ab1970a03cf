//! Small string helpers shared by logging, previews and titles.

/// Truncate a string for logging purposes, never splitting a character.
pub fn truncate_for_log(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}

/// Shorten a message into a conversation title.
///
/// Prefers to cut right after a nearby punctuation mark or space (searching
/// back at most a fifth of `max_chars`), and marks the cut with `...`.
pub fn title_from_message(message: &str, max_chars: usize) -> String {
    let message = message.trim();
    let chars: Vec<char> = message.chars().collect();
    if max_chars == 0 {
        return String::new();
    }
    if chars.len() <= max_chars {
        return message.to_string();
    }

    const BREAK_CHARS: &[char] = &[
        '，', '。', '、', ' ', ',', '.', ';', ':', '!', '?', '！', '？', '/', '\\', '-', '_',
    ];
    let search_range = max_chars / 5;
    let mut cut = max_chars;
    for i in (max_chars.saturating_sub(search_range)..max_chars).rev() {
        if BREAK_CHARS.contains(&chars[i]) {
            cut = i + 1;
            break;
        }
    }

    let mut title: String = chars[..cut].iter().collect();
    title.push_str("...");
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("扫描目标主机", 2), "扫描... [truncated]");
    }

    #[test]
    fn title_keeps_short_messages() {
        assert_eq!(title_from_message("  scan 10.0.0.1  ", 50), "scan 10.0.0.1");
    }

    #[test]
    fn title_breaks_near_punctuation() {
        let title = title_from_message("scan the host, then enumerate directories", 20);
        assert_eq!(title, "scan the host, then ...");
    }

    #[test]
    fn title_cuts_hard_without_break_chars() {
        let title = title_from_message("abcdefghijklmnopqrstuvwxyz", 10);
        assert_eq!(title, "abcdefghij...");
    }
}
