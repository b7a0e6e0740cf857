//! Turning video titles into file names

use regex::Regex;
use std::sync::LazyLock;

pub const UNKNOWN_TITLE: &str = "Unknown_Video";

const MAX_TITLE_CHARS: usize = 120;
const MAX_SANITIZED_CHARS: usize = 80;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid regex"));
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1f\x7f-\x9f]").expect("valid regex"));
static BV_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BV[A-Za-z0-9]+").expect("valid regex"));

/// Clean a title for use as a file name while keeping it readable.
///
/// Characters Windows refuses are swapped for full-width look-alikes rather
/// than dropped, so CJK titles survive intact.
pub fn clean_title(title: &str) -> String {
    if title.trim().is_empty() {
        return UNKNOWN_TITLE.to_string();
    }

    let mut cleaned: String = title
        .chars()
        .map(|c| match c {
            '<' => '＜',
            '>' => '＞',
            ':' => '：',
            '"' => '\'',
            '/' => '／',
            '\\' => '＼',
            '|' => '｜',
            '?' => '？',
            '*' => '＊',
            '【' => '[',
            '】' => ']',
            '（' => '(',
            '）' => ')',
            other => other,
        })
        .collect();

    cleaned = trim_edges(&cleaned).to_string();

    let chars: Vec<char> = cleaned.chars().collect();
    if chars.len() > MAX_TITLE_CHARS {
        let mut cut = &chars[..MAX_TITLE_CHARS];
        let last = cut[cut.len() - 1];
        if !matches!(last, ' ' | '-' | '_' | '.' | ',' | '，' | '。') {
            let good = cut
                .iter()
                .rposition(|c| matches!(c, ' ' | '-' | '_' | '，' | '。' | ',' | '.'));
            if let Some(pos) = good {
                if pos * 5 > MAX_TITLE_CHARS * 4 {
                    cut = &cut[..pos];
                }
            }
        }
        cleaned = cut.iter().collect();
    }

    let cleaned = trim_edges(&cleaned);
    if cleaned.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Strict variant: unsafe characters become `_` and the name is capped short.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    let stripped = CONTROL_CHARS.replace_all(&replaced, "");
    let trimmed = trim_edges(&stripped);
    let capped: String = trimmed.chars().take(MAX_SANITIZED_CHARS).collect();

    if capped.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        capped
    }
}

/// Title used when the extractor could not tell us one
pub fn fallback_title(url: &str) -> String {
    if url.contains("bilibili.com") {
        if let Some(m) = BV_ID.find(url) {
            return format!("Bilibili_Video_{}", m.as_str());
        }
    }
    UNKNOWN_TITLE.to_string()
}

fn trim_edges(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ' ' | '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clean_title_replaces_reserved_characters() {
        assert_eq!(clean_title("a/b:c?"), "a／b：c？");
        assert_eq!(clean_title("【官方】MV（完整版）"), "[官方]MV(完整版)");
        assert_eq!(clean_title(r#"say "hi""#), "say 'hi'");
    }

    #[test]
    fn test_clean_title_empty() {
        assert_eq!(clean_title(""), UNKNOWN_TITLE);
        assert_eq!(clean_title("   "), UNKNOWN_TITLE);
        assert_eq!(clean_title(" ._- "), UNKNOWN_TITLE);
    }

    #[test]
    fn test_clean_title_trims_edges() {
        assert_eq!(clean_title("  -My Video_. "), "My Video");
    }

    #[test]
    fn test_clean_title_truncates_on_word_boundary() {
        let title = format!("{} {}", "a".repeat(110), "b".repeat(30));
        let cleaned = clean_title(&title);
        assert_eq!(cleaned, "a".repeat(110));
    }

    #[test]
    fn test_clean_title_hard_cut_when_boundary_too_early() {
        let title = format!("{} {}", "a".repeat(10), "b".repeat(200));
        let cleaned = clean_title(&title);
        assert_eq!(cleaned.chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a<b>c|d"), "a_b_c_d");
        assert_eq!(sanitize_filename("tab\there"), "tabhere");
        assert_eq!(sanitize_filename("..."), UNKNOWN_TITLE);
        assert_eq!(sanitize_filename(&"x".repeat(100)).len(), 80);
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(
            fallback_title("https://www.bilibili.com/video/BV1xx411c7mD"),
            "Bilibili_Video_BV1xx411c7mD"
        );
        assert_eq!(fallback_title("https://youtu.be/abc"), UNKNOWN_TITLE);
    }

    proptest! {
        #[test]
        fn clean_title_never_contains_reserved(title in ".{0,300}") {
            let cleaned = clean_title(&title);
            prop_assert!(!cleaned.is_empty());
            prop_assert!(cleaned.chars().count() <= MAX_TITLE_CHARS);
            prop_assert!(!cleaned.contains(['<', '>', ':', '"', '/', '\\', '|', '?', '*']));
        }
    }
}
