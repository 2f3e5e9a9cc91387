//! Local keyword blocklist (first moderation stage).

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCategory {
    Profanity,
    Sexual,
    Violence,
    Hate,
}

impl BlockCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Profanity => "profanity",
            Self::Sexual => "sexual",
            Self::Violence => "violence",
            Self::Hate => "hate",
        }
    }
}

impl fmt::Display for BlockCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Built-in Korean blocklist, checked in this order.
pub const DEFAULT_BLOCKLIST: &[(BlockCategory, &[&str])] = &[
    (
        BlockCategory::Profanity,
        &["씨발", "개새끼", "병신", "엿먹어", "지랄", "미친", "좆", "염병"],
    ),
    (
        BlockCategory::Sexual,
        &["섹스", "야동", "포르노", "자위", "강간", "성폭행"],
    ),
    (
        BlockCategory::Violence,
        &["살인", "자살", "학살", "고문", "테러"],
    ),
    (
        BlockCategory::Hate,
        &["김치녀", "한남", "맘충", "틀딱", "급식충"],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordMatch {
    pub keyword: String,
    pub category: BlockCategory,
}

#[derive(Debug, Clone)]
struct KeywordRule {
    keyword: String,
    keyword_lower: String,
    category: BlockCategory,
}

/// Case-insensitive substring filter.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    rules: Vec<KeywordRule>,
}

impl KeywordFilter {
    /// Create a new empty keyword filter
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Filter loaded with [`DEFAULT_BLOCKLIST`].
    pub fn with_default_blocklist() -> Self {
        let mut filter = Self::new();
        for (category, keywords) in DEFAULT_BLOCKLIST {
            for keyword in *keywords {
                filter.add_keyword(*keyword, *category);
            }
        }
        filter
    }

    /// Add a keyword rule
    pub fn add_keyword(&mut self, keyword: impl Into<String>, category: BlockCategory) {
        let keyword = keyword.into();
        if keyword.is_empty() {
            return;
        }
        self.rules.push(KeywordRule {
            keyword_lower: keyword.to_lowercase(),
            keyword,
            category,
        });
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching rule, in insertion order.
    pub fn check(&self, content: &str) -> Option<KeywordMatch> {
        let content_lower = content.to_lowercase();
        self.rules
            .iter()
            .find(|rule| content_lower.contains(&rule.keyword_lower))
            .map(|rule| KeywordMatch {
                keyword: rule.keyword.clone(),
                category: rule.category,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_blocklist_loaded() {
        let filter = KeywordFilter::with_default_blocklist();
        assert_eq!(filter.len(), 24);
    }

    #[test]
    fn test_first_match_wins() {
        let filter = KeywordFilter::with_default_blocklist();
        let m = filter.check("그는 테러 조직의 고문 기록을 읽었다").unwrap();
        // "고문" precedes "테러" in the violence list.
        assert_eq!(m.keyword, "고문");
        assert_eq!(m.category, BlockCategory::Violence);
    }

    #[test]
    fn test_case_insensitive() {
        let mut filter = KeywordFilter::new();
        filter.add_keyword("Forbidden", BlockCategory::Hate);
        let m = filter.check("this is FORBIDDEN text").unwrap();
        assert_eq!(m.keyword, "Forbidden");
    }

    #[test]
    fn test_clean_text() {
        let filter = KeywordFilter::with_default_blocklist();
        assert!(filter.check("봄날 오후, 골목길에 햇살이 내려앉았다.").is_none());
    }

    #[test]
    fn test_empty_keyword_ignored() {
        let mut filter = KeywordFilter::new();
        filter.add_keyword("", BlockCategory::Sexual);
        assert!(filter.is_empty());
        assert!(filter.check("anything").is_none());
    }
}
