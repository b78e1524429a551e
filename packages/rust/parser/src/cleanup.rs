//! Per-line normalization applied to decoded payload text.

/// Prefixes that mark a whole line as a comment.
const COMMENT_PREFIXES: [&str; 3] = ["#", "//", ";"];

/// Clean one line; `None` for blank and comment lines.
///
/// Strips surrounding whitespace (including a stray `\r`) and a zero-width
/// no-break space some publishers leave in front of lines.
pub fn clean_line(line: &str) -> Option<&str> {
    let trimmed = line.trim().trim_start_matches('\u{feff}').trim_start();

    if trimmed.is_empty() {
        return None;
    }
    if COMMENT_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return None;
    }

    Some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_comment_lines_dropped() {
        assert_eq!(clean_line("   "), None);
        assert_eq!(clean_line("# header"), None);
        assert_eq!(clean_line("// note"), None);
        assert_eq!(clean_line("; ini style"), None);
    }

    #[test]
    fn whitespace_trimmed() {
        assert_eq!(clean_line("  vmess://abc \t\r"), Some("vmess://abc"));
        assert_eq!(clean_line("\u{feff}trojan://x@y:1"), Some("trojan://x@y:1"));
    }

    #[test]
    fn invalid_lines_are_kept_for_validation() {
        // Not a comment, so the validator decides and counts it.
        assert_eq!(clean_line("badline"), Some("badline"));
    }
}
