//! Сервисы суммаризации: guard памяти, менеджер модели, движок, подписка на
//! сигнал нехватки памяти. Создаются один раз при старте процесса и раздают
//! `Summarizer` фичам.

use std::sync::Arc;
use std::time::Duration;

use local_provider::InferenceEngine;
use memory_guard::MemoryGuard;
use model_manager::{spawn_pressure_monitor, ModelManager, NativeBackend, PressureSignal, PressureSubscription};

use crate::controller::Summarizer;
use crate::error::SummarizerError;
use crate::settings::SummarizerSettings;

pub struct SummaryServices {
    settings: SummarizerSettings,
    manager: Arc<ModelManager>,
    engine: InferenceEngine,
    pressure: PressureSignal,
    subscription: Option<PressureSubscription>,
    monitor: Option<PressureSubscription>,
}

impl SummaryServices {
    /// Сборка на системном пробнике памяти. Требует Tokio runtime.
    pub fn new(
        settings: SummarizerSettings,
        backend: Arc<dyn NativeBackend>,
    ) -> Result<Self, SummarizerError> {
        let guard = MemoryGuard::system(settings.thresholds()?);
        Ok(Self::with_guard(settings, backend, guard))
    }

    /// То же с готовым guard (например, с другим пробником памяти).
    pub fn with_guard(
        settings: SummarizerSettings,
        backend: Arc<dyn NativeBackend>,
        guard: MemoryGuard,
    ) -> Self {
        let manager = ModelManager::new(settings.model_path.clone(), backend, guard.clone());
        let engine = InferenceEngine::new(Arc::clone(&manager));
        let pressure = PressureSignal::new();
        let subscription = manager.watch_pressure(&pressure);
        let monitor = settings.pressure_poll_ms.map(|ms| {
            spawn_pressure_monitor(
                guard,
                settings.pressure_floor_bytes(),
                Duration::from_millis(ms.max(1)),
                pressure.clone(),
            )
        });
        tracing::info!(
            model_path = %settings.model_path.display(),
            poll = monitor.is_some(),
            "summary services ready"
        );
        Self {
            settings,
            manager,
            engine,
            pressure,
            subscription: Some(subscription),
            monitor,
        }
    }

    /// Сборка с llama.cpp-бэкендом.
    #[cfg(feature = "llama")]
    pub fn with_llama(settings: SummarizerSettings) -> Result<Self, SummarizerError> {
        let backend = local_provider::LlamaBackend::init(settings.native.clone())
            .map_err(|e| SummarizerError::Load(model_manager::LoadError::LoadFailed(e.to_string())))?;
        Self::new(settings, Arc::new(backend))
    }

    pub fn settings(&self) -> &SummarizerSettings {
        &self.settings
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Сигнал, в который хост пробрасывает системные уведомления о памяти.
    pub fn pressure_signal(&self) -> &PressureSignal {
        &self.pressure
    }

    pub fn new_summarizer(&self) -> Summarizer {
        Summarizer::new(Arc::clone(&self.manager), self.engine.clone())
            .with_config(self.settings.inference.clone())
            .with_batch_size(self.settings.batch_size)
            .with_log_dir(self.settings.log_dir.clone())
    }

    /// Снимает подписки и выгружает модель.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.shutdown();
            self.manager.unload();
            tracing::info!("summary services shut down");
        }
    }
}

impl Drop for SummaryServices {
    fn drop(&mut self) {
        self.stop();
    }
}
