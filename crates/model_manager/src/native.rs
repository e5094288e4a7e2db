//! Интерфейс нативного движка: «по промпту и конфигурации выдать строку».
//!
//! Оба вызова блокирующие и неделимые; вызывающий выносит их в blocking-пул.

use std::path::Path;

use crate::error::NativeError;

/// Параметры одного нативного вызова генерации. Промпт уже собран в шаблон чата.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

/// Загрузчик модели (llama.cpp и т.п.).
pub trait NativeBackend: Send + Sync {
    /// Инициализирует модель из файла. Долго, блокирует поток.
    fn load(&self, path: &Path) -> Result<Box<dyn NativeModel>, NativeError>;
}

/// Загруженная модель.
pub trait NativeModel: Send + Sync {
    /// Полная генерация одним блокирующим вызовом.
    fn generate(&self, request: &NativeRequest) -> Result<String, NativeError>;
}
