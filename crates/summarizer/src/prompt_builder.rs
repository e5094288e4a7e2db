//! Запрос на суммаризацию и сборка промпта из текста статьи.
//!
//! Шаги: clip_body → assemble. Текст уже очищен от разметки вызывающим.

use serde::{Deserialize, Serialize};

/// Системный промпт для статей по умолчанию.
pub const ARTICLE_SYSTEM_PROMPT: &str = "You summarize news articles. \
Reply with two or three plain sentences. Do not add a title or a preface.";

/// Лимит тела статьи в символах: модель с маленьким контекстом.
pub const MAX_ARTICLE_CHARS: usize = 6000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl SummaryRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Промпт по заголовку и телу статьи; длинное тело обрезается.
    pub fn for_article(title: &str, body: &str) -> Self {
        let body = Self::clip_body(body.trim(), MAX_ARTICLE_CHARS);
        Self::new(Self::assemble(title.trim(), body)).with_system_prompt(ARTICLE_SYSTEM_PROMPT)
    }

    /// Шаг 1: тело в пределах лимита, по границе символа.
    fn clip_body(body: &str, max_chars: usize) -> &str {
        match body.char_indices().nth(max_chars) {
            Some((idx, _)) => body[..idx].trim_end(),
            None => body,
        }
    }

    /// Шаг 2: финальный текст промпта.
    fn assemble(title: &str, body: &str) -> String {
        if title.is_empty() {
            format!("Summarize the following article.\n\n{body}")
        } else {
            format!("Summarize the following article.\n\nTitle: {title}\n\n{body}")
        }
    }
}
