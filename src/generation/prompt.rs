//! Prompt assembly contract.
//!
//! Few-shot example selection lives outside this crate; anything that can
//! turn a writer style and a tag list into a [`Prompt`] can be plugged in.

use crate::providers::Prompt;

pub trait PromptBuilder: Send + Sync {
    fn build(&self, system_style: &str, tags: &[String]) -> Prompt;
}

/// Layered prompt: base instruction, writer style, writing rules, user task.
#[derive(Debug, Clone)]
pub struct DefaultPromptBuilder {
    target_words: usize,
}

impl DefaultPromptBuilder {
    pub fn new(target_words: usize) -> Self {
        Self { target_words }
    }
}

impl Default for DefaultPromptBuilder {
    fn default() -> Self {
        Self::new(1500)
    }
}

const BASE_INSTRUCTION: &str = "당신은 한국어 단편 소설을 쓰는 작가입니다.";

impl PromptBuilder for DefaultPromptBuilder {
    fn build(&self, system_style: &str, tags: &[String]) -> Prompt {
        let target = self.target_words;
        let system = format!(
            "{BASE_INSTRUCTION}\n\n\
             # 작가 스타일\n\n{style}\n\n\
             # 작성 규칙\n\n\
             1. 분량: {target}단어 이상으로 작성하세요.\n\
             2. 구조: 시작, 전개, 결말이 분명한 완결된 이야기로 쓰세요.\n\
             3. 문체: 자연스러운 한국어를 사용하세요.\n\
             4. 인물: 등장인물의 성격과 동기를 분명히 드러내세요.",
            style = system_style.trim(),
        );
        let user = format!(
            "다음 조건으로 단편 소설을 써 주세요.\n\n\
             - 장르/분위기: {tags}\n\
             - 분량: {target}단어 이상\n\n\
             제목 없이 본문만 출력하세요.",
            tags = tags.join(", "),
        );
        Prompt { system, user }
    }
}
