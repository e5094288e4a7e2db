//! InferenceEngine — генерация по загруженной модели.
//!
//! Проверки до нативного вызова дешёвые и идут по порядку: есть ли модель,
//! хватает ли памяти. Отмена проверяется сразу до и сразу после блокирующего
//! вызова; сам нативный вызов не прерывается.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures_util::Stream;
use memory_guard::OperationClass;
use model_manager::{CancelToken, ModelManager};

use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::postprocess::postprocess;
use crate::prompt::assemble_prompt;

/// Конечный поток ответа: ровно один элемент (текст или ошибка).
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>;

#[derive(Clone)]
pub struct InferenceEngine {
    manager: Arc<ModelManager>,
}

impl InferenceEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    /// Ленивый поток: работа начинается при первом poll. Каждый вызов независим
    /// и отменяется только через `ModelManager::cancel_in_flight_generation`.
    pub fn generate(
        &self,
        prompt: impl Into<String>,
        system_prompt: Option<String>,
        config: InferenceConfig,
    ) -> TokenStream {
        self.generate_with_token(prompt, system_prompt, config, CancelToken::new())
    }

    /// То же, но с флагом отмены вызывающего: `token.cancel()` отменяет только этот вызов.
    pub fn generate_with_token(
        &self,
        prompt: impl Into<String>,
        system_prompt: Option<String>,
        config: InferenceConfig,
        token: CancelToken,
    ) -> TokenStream {
        let manager = Arc::clone(&self.manager);
        let prompt = prompt.into();
        let stream = async_stream::stream! {
            yield run_generation(&manager, &prompt, system_prompt.as_deref(), &config, token).await;
        };
        Box::pin(stream)
    }

    /// То же, что `generate`, но сразу строкой.
    pub async fn generate_text(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &InferenceConfig,
    ) -> Result<String, InferenceError> {
        run_generation(&self.manager, prompt, system_prompt, config, CancelToken::new()).await
    }
}

async fn run_generation(
    manager: &ModelManager,
    prompt: &str,
    system_prompt: Option<&str>,
    config: &InferenceConfig,
    cancel: CancelToken,
) -> Result<String, InferenceError> {
    let handle = manager.snapshot().ok_or(InferenceError::ModelNotLoaded)?;

    // Память могла уйти после загрузки модели.
    if !manager.memory_guard().has_adequate_memory(OperationClass::Inference) {
        return Err(InferenceError::MemoryPressure);
    }

    manager.track_generation(&cancel);
    let request = config.native_request(assemble_prompt(prompt, system_prompt));

    if cancel.is_cancelled() {
        return Err(InferenceError::GenerationCancelled);
    }

    let started = Instant::now();
    let model_id = handle.id();
    let raw = tokio::task::spawn_blocking(move || handle.generate(&request))
        .await
        .map_err(|e| InferenceError::GenerationFailed(e.to_string()))?
        .map_err(|e| {
            tracing::warn!(model_id = %model_id, error = %e, "native generation failed");
            InferenceError::from(e)
        })?;

    if cancel.is_cancelled() {
        tracing::debug!(model_id = %model_id, "generation cancelled, result dropped");
        return Err(InferenceError::GenerationCancelled);
    }

    let text = postprocess(&raw, config);
    tracing::debug!(
        model_id = %model_id,
        raw_chars = raw.chars().count(),
        chars = text.chars().count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "generation finished"
    );
    Ok(text)
}
