//! Ошибки загрузки и нативного слоя.

use std::path::PathBuf;

use thiserror::Error;

/// Ошибки `ModelManager::load`. Повторов внутри нет: повтор — новое действие вызывающего.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("not enough free memory to load the model")]
    InsufficientMemory,

    #[error("model file not found: {}", .0.display())]
    AssetMissing(PathBuf),

    /// Сообщение нативного слоя показывается пользователю как есть.
    #[error("{0}")]
    LoadFailed(String),
}

/// Ошибка нативного движка (инициализация или генерация).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NativeError {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("{0}")]
    Failed(String),
}

const MEMORY_KEYWORDS: &[&str] = &["memory", "out of mem", "alloc failed", "allocation failed"];

impl NativeError {
    /// Ошибка связана с памятью: явный OOM или ключевое слово в сообщении.
    pub fn is_memory_related(&self) -> bool {
        match self {
            NativeError::OutOfMemory(_) => true,
            NativeError::Failed(message) => {
                let lower = message.to_lowercase();
                MEMORY_KEYWORDS.iter().any(|k| lower.contains(k))
            }
        }
    }
}
