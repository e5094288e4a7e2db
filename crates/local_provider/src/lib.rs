//! Локальный движок генерации поверх модели из `model_manager`.
//!
//! Нативный вызов неделимый, поэтому поток — ленивая последовательность из
//! одного элемента: готовая строка после стоп-последовательностей и лимита длины.

mod config;
mod engine;
mod error;
#[cfg(feature = "llama")]
mod inference;
mod postprocess;
mod prompt;

pub use config::{ContextPlan, InferenceConfig, LocalConfig, CHARS_PER_TOKEN, DEFAULT_CONTEXT_SIZE};
pub use engine::{InferenceEngine, TokenStream};
pub use error::InferenceError;
#[cfg(feature = "llama")]
pub use inference::{LlamaBackend, LlamaModelHandle};
pub use postprocess::{postprocess, truncate_at_stop_sequence, truncate_to_chars};
pub use prompt::assemble_prompt;
