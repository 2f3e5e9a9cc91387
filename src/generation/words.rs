//! Word counting for mixed Korean/Latin text.
//!
//! Each Hangul character (jamo or syllable, U+3131–U+D79D) counts as one
//! word; each run of ASCII letters counts as one word. Digits and punctuation
//! are ignored.

use once_cell::sync::Lazy;
use regex::Regex;

static HANGUL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{3131}-\u{D79D}]").expect("static pattern compiles"));
static LATIN_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z]+").expect("static pattern compiles"));

/// Reading speed used for read-time estimates.
pub const WORDS_PER_MINUTE: usize = 200;

pub fn count_words(text: &str) -> usize {
    HANGUL.find_iter(text).count() + LATIN_WORD.find_iter(text).count()
}

/// Whole minutes, rounded up.
pub fn read_time_minutes(word_count: usize) -> u32 {
    word_count.div_ceil(WORDS_PER_MINUTE) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hangul_counts_per_character() {
        assert_eq!(count_words("안녕하세요"), 5);
        assert_eq!(count_words("ㄱㄴ"), 2);
    }

    #[test]
    fn test_latin_runs() {
        assert_eq!(count_words("Hello, brave new world!"), 4);
        assert_eq!(count_words("abc123def"), 2);
    }

    #[test]
    fn test_mixed() {
        // 6 syllables + "Seoul"
        assert_eq!(count_words("그는 Seoul에서 왔다."), 7);
    }

    #[test]
    fn test_empty_and_symbols() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("123 !!! ..."), 0);
    }

    #[test]
    fn test_read_time() {
        assert_eq!(read_time_minutes(0), 0);
        assert_eq!(read_time_minutes(1), 1);
        assert_eq!(read_time_minutes(200), 1);
        assert_eq!(read_time_minutes(1001), 6);
    }
}
