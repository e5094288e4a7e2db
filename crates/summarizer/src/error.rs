//! Ошибки суммаризации.
//!
//! Все ошибки проходят через thiserror. Текст ошибки уходит в UI как есть.

use local_provider::InferenceError;
use memory_guard::MemoryGuardError;
use model_manager::LoadError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SummarizerError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("No summary generated")]
    EmptySummary,

    #[error("invalid memory settings: {0}")]
    Memory(#[from] MemoryGuardError),
}

impl SummarizerError {
    /// Отмена — не ошибка для пользователя.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SummarizerError::Inference(InferenceError::GenerationCancelled))
    }
}
