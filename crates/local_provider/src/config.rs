//! Параметры генерации и нативного контекста.

use serde::{Deserialize, Serialize};

use model_manager::{NativeError, NativeRequest};

/// Грубая оценка: символов на токен. Настоящего токенизатора на этом уровне нет.
pub const CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_CONTEXT_SIZE: usize = 4096;

/// Параметры одного запроса. Значения по умолчанию задаёт вызывающая сторона.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// Проверяются все; режем по самой ранней в тексте.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl InferenceConfig {
    pub fn new(max_tokens: usize, temperature: f32, top_p: f32) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            temperature,
            top_p,
            stop_sequences: Vec::new(),
        }
    }

    pub fn with_stop_sequences<I, S>(mut self, stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_sequences = stops.into_iter().map(Into::into).collect();
        self
    }

    /// Лимит длины ответа в символах.
    pub fn char_budget(&self) -> usize {
        self.max_tokens.max(1).saturating_mul(CHARS_PER_TOKEN)
    }

    pub(crate) fn native_request(&self, prompt: String) -> NativeRequest {
        NativeRequest {
            prompt,
            max_tokens: self.max_tokens.max(1),
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

/// Настройки нативного контекста llama.cpp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    pub context_size: usize,
    /// `None` — по числу ядер.
    #[serde(default)]
    pub n_threads: Option<usize>,
    pub seed: u32,
}

/// Размер контекста под один запрос.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextPlan {
    pub n_ctx: usize,
    /// Сколько токенов можно сгенерировать, не выходя за `n_ctx`.
    pub max_new_tokens: usize,
}

impl LocalConfig {
    /// Контекст по уже токенизированному промпту: промпт плюс `max_tokens`,
    /// не больше `context_size`. Промпт, не оставляющий места для ответа, отклоняется.
    pub fn plan_context(&self, prompt_tokens: usize, max_tokens: usize) -> Result<ContextPlan, NativeError> {
        let capacity = self.context_size.max(1);
        if prompt_tokens >= capacity {
            return Err(NativeError::Failed(format!(
                "prompt is too long: {prompt_tokens} tokens, context holds {capacity}"
            )));
        }
        let n_ctx = prompt_tokens.saturating_add(max_tokens.max(1)).min(capacity);
        Ok(ContextPlan {
            n_ctx,
            max_new_tokens: n_ctx - prompt_tokens,
        })
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            context_size: DEFAULT_CONTEXT_SIZE,
            n_threads: None,
            seed: 1234,
        }
    }
}
