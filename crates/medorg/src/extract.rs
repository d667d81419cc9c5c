//! Extract the movie code and subtitle tag from a filename.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

// Movie code: 2-6 letters, dash, 1-5 digits.
static MOVIE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z]{2,6})-(\d{1,5})").unwrap());

// Subtitle keywords, checked in order; the first match wins.
const SUBTITLE_KEYWORDS: [(&str, &str); 4] = [
    ("english", "English Sub"),
    ("chinese", "Chinese Sub"),
    ("korean", "Korean Sub"),
    ("japanese", "Japanese Sub"),
];

pub const NO_SUB: &str = "No Sub";

/// Extract a movie code like `SONE-760` from a filename.
///
/// Returns the first match normalized to upper-case, or `None`.
pub fn extract_movie_code(filename: &str) -> Option<String> {
    let stem = file_stem(filename);
    MOVIE_CODE_RE
        .captures(stem)
        .map(|caps| format!("{}-{}", caps[1].to_uppercase(), &caps[2]))
}

/// Detect the subtitle tag from filename keywords.
pub fn detect_subtitle(filename: &str) -> String {
    let stem = file_stem(filename).to_lowercase();
    for (keyword, label) in SUBTITLE_KEYWORDS {
        if stem.contains(keyword) {
            return label.to_string();
        }
    }
    NO_SUB.to_string()
}

fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_basic_code() {
        assert_eq!(
            extract_movie_code("SONE-760 English subbed.mp4"),
            Some("SONE-760".to_string())
        );
    }

    #[test]
    fn test_extract_lowercase_normalized() {
        assert_eq!(
            extract_movie_code("sone-760.mkv"),
            Some("SONE-760".to_string())
        );
    }

    #[test]
    fn test_extract_first_of_duplicates() {
        assert_eq!(
            extract_movie_code("SONE-760 SONE-760 sample.mp4"),
            Some("SONE-760".to_string())
        );
    }

    #[test]
    fn test_extract_bracketed_code() {
        assert_eq!(
            extract_movie_code("[javhd] MIDE-45 something.avi"),
            Some("MIDE-45".to_string())
        );
    }

    #[test]
    fn test_extract_no_code() {
        assert_eq!(extract_movie_code("random clip.mp4"), None);
    }

    #[test]
    fn test_extract_rejects_too_short_prefix() {
        // Single letter before the dash is not a code.
        assert_eq!(extract_movie_code("a-1.mp4"), None);
    }

    #[test]
    fn test_extract_caps_digit_run() {
        // Substring match: only the first five digits belong to the code.
        assert_eq!(
            extract_movie_code("ABCD-123456789.mp4"),
            Some("ABCD-12345".to_string())
        );
    }

    #[test]
    fn test_detect_english() {
        assert_eq!(detect_subtitle("SONE-760 English subbed.mp4"), "English Sub");
    }

    #[test]
    fn test_detect_chinese() {
        assert_eq!(detect_subtitle("ABC-123 chinese sub.mp4"), "Chinese Sub");
    }

    #[test]
    fn test_detect_korean() {
        assert_eq!(detect_subtitle("abc-123.korean.mkv"), "Korean Sub");
    }

    #[test]
    fn test_detect_japanese() {
        assert_eq!(detect_subtitle("abc-123 Japanese.mp4"), "Japanese Sub");
    }

    #[test]
    fn test_detect_priority_order() {
        // "english" outranks "chinese" regardless of position.
        assert_eq!(
            detect_subtitle("abc-123 chinese english.mp4"),
            "English Sub"
        );
    }

    #[test]
    fn test_detect_none() {
        assert_eq!(detect_subtitle("SONE-760.mp4"), "No Sub");
    }

    #[test]
    fn test_detect_case_insensitive() {
        assert_eq!(detect_subtitle("ABC-123 ENGLISH.mp4"), "English Sub");
    }
}
