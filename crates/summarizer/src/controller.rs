//! Summarizer — машина состояний одной суммаризации: загрузка модели,
//! генерация, пакетная публикация текста, отмена.
//!
//! UI не ждёт результата `start`; всё видно через поток состояний.
//! Каждый `start` и `cancel` увеличивает эпоху; задача старой эпохи больше
//! ничего не публикует.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use local_provider::{InferenceConfig, InferenceEngine};
use model_manager::{CancelToken, ModelManager};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use crate::error::SummarizerError;
use crate::logs::{append_log, SUMMARY_LOG};
use crate::prompt_builder::SummaryRequest;
use crate::sanitize::sanitize;
use crate::settings::{default_inference_config, DEFAULT_BATCH_SIZE};
use crate::state::SummarizationState;

/// Поток состояний: сначала текущее, затем изменения.
pub type SummarizationStateStream = WatchStream<SummarizationState>;

struct Inner {
    epoch: u64,
    task: Option<JoinHandle<()>>,
    /// Флаг отмены текущей генерации этого `Summarizer`.
    cancel: Option<CancelToken>,
}

impl Inner {
    /// Новая эпоха: текущая задача и её генерация отменяются.
    fn advance(&mut self) -> u64 {
        self.epoch += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.epoch
    }
}

struct Shared {
    state: watch::Sender<SummarizationState>,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Публикует, только если эпоха ещё текущая.
    fn publish(&self, epoch: u64, state: SummarizationState) -> bool {
        let inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }
        self.state.send_replace(state);
        true
    }
}

pub struct Summarizer {
    manager: Arc<ModelManager>,
    engine: InferenceEngine,
    config: InferenceConfig,
    batch_size: usize,
    log_dir: Option<PathBuf>,
    shared: Arc<Shared>,
}

impl Summarizer {
    pub fn new(manager: Arc<ModelManager>, engine: InferenceEngine) -> Self {
        let (state, _) = watch::channel(SummarizationState::Idle);
        Self {
            manager,
            engine,
            config: default_inference_config(),
            batch_size: DEFAULT_BATCH_SIZE,
            log_dir: None,
            shared: Arc::new(Shared {
                state,
                inner: Mutex::new(Inner {
                    epoch: 0,
                    task: None,
                    cancel: None,
                }),
            }),
        }
    }

    pub fn with_config(mut self, config: InferenceConfig) -> Self {
        self.config = config;
        self
    }

    /// Публиковать промежуточный текст каждые `batch_size` фрагментов (минимум 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    pub fn state(&self) -> SummarizationState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SummarizationState> {
        self.shared.state.subscribe()
    }

    pub fn state_stream(&self) -> SummarizationStateStream {
        WatchStream::new(self.shared.state.subscribe())
    }

    /// Запускает суммаризацию, отменяя предыдущую. Требует Tokio runtime.
    pub fn start(&self, request: SummaryRequest) {
        let mut inner = self.shared.inner.lock();
        let epoch = inner.advance();
        let cancel = CancelToken::new();
        inner.cancel = Some(cancel.clone());
        self.shared
            .state
            .send_replace(SummarizationState::LoadingModel { progress: 0.0 });

        let run = Run {
            epoch,
            cancel,
            shared: Arc::clone(&self.shared),
            manager: Arc::clone(&self.manager),
            engine: self.engine.clone(),
            config: self.config.clone(),
            batch_size: self.batch_size,
            log_dir: self.log_dir.clone(),
        };
        tracing::debug!(epoch, prompt_chars = request.prompt.chars().count(), "summarization started");
        inner.task = Some(tokio::spawn(run.execute(request)));
    }

    /// Отмена из `LoadingModel`/`Generating`; в остальных состояниях ничего не делает.
    /// Затрагивает только генерацию этого `Summarizer`; начатая загрузка модели
    /// доходит до конца.
    pub fn cancel(&self) {
        let mut inner = self.shared.inner.lock();
        if !self.shared.state.borrow().is_active() {
            return;
        }
        let epoch = inner.advance();
        self.shared.state.send_replace(SummarizationState::Idle);
        tracing::debug!(epoch, "summarization cancelled");
    }
}

impl Drop for Summarizer {
    fn drop(&mut self) {
        self.shared.inner.lock().advance();
    }
}

/// Одна попытка суммаризации в своей задаче.
struct Run {
    epoch: u64,
    cancel: CancelToken,
    shared: Arc<Shared>,
    manager: Arc<ModelManager>,
    engine: InferenceEngine,
    config: InferenceConfig,
    batch_size: usize,
    log_dir: Option<PathBuf>,
}

impl Run {
    async fn execute(self, request: SummaryRequest) {
        let started = Instant::now();
        let outcome = self.summarize(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (next, log_line) = match outcome {
            Ok(text) => {
                let line = format!("outcome=completed chars={} elapsed_ms={}", text.chars().count(), elapsed_ms);
                (SummarizationState::Completed { text }, line)
            }
            Err(e) if e.is_cancelled() => {
                let line = format!("outcome=cancelled elapsed_ms={}", elapsed_ms);
                (SummarizationState::Idle, line)
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed");
                let line = format!("outcome=error elapsed_ms={} error={}", elapsed_ms, e);
                (SummarizationState::Error { message: e.to_string() }, line)
            }
        };

        if self.shared.publish(self.epoch, next) {
            append_log(self.log_dir.as_deref(), SUMMARY_LOG, &log_line);
        }
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<String, SummarizerError> {
        let shared = Arc::clone(&self.shared);
        let epoch = self.epoch;
        self.manager
            .load(move |progress| {
                shared.publish(epoch, SummarizationState::LoadingModel { progress });
            })
            .await?;

        self.publish(SummarizationState::Generating {
            partial: String::new(),
        });

        let mut stream = self.engine.generate_with_token(
            request.prompt.clone(),
            request.system_prompt.clone(),
            self.config.clone(),
            self.cancel.clone(),
        );
        let mut raw = String::new();
        let mut pending = 0usize;
        while let Some(chunk) = stream.next().await {
            raw.push_str(&chunk?);
            pending += 1;
            if pending >= self.batch_size {
                pending = 0;
                self.publish(SummarizationState::Generating {
                    partial: sanitize(&raw),
                });
            }
        }

        let text = sanitize(&raw);
        if text.is_empty() {
            return Err(SummarizerError::EmptySummary);
        }
        Ok(text)
    }

    fn publish(&self, state: SummarizationState) -> bool {
        self.shared.publish(self.epoch, state)
    }
}
