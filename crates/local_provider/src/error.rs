//! Ошибки движка генерации.

use model_manager::NativeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("model is not loaded")]
    ModelNotLoaded,

    #[error("not enough free memory to run the model")]
    MemoryPressure,

    #[error("generation cancelled")]
    GenerationCancelled,

    /// Сообщение нативного слоя, без обёртки: UI показывает его как есть.
    #[error("{0}")]
    GenerationFailed(String),
}

impl From<NativeError> for InferenceError {
    fn from(e: NativeError) -> Self {
        if e.is_memory_related() {
            InferenceError::MemoryPressure
        } else {
            InferenceError::GenerationFailed(e.to_string())
        }
    }
}
