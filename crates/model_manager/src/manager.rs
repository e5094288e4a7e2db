//! Управление загруженной моделью: загрузка, публикация хэндла, выгрузка, отмена.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use memory_guard::{MemoryGuard, OperationClass};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

use crate::error::{LoadError, NativeError};
use crate::native::{NativeBackend, NativeModel, NativeRequest};
use crate::pressure::{PressureSignal, PressureSubscription};
use crate::status::{ModelStatus, ModelStatusStream};

const PROGRESS_VALIDATED: f64 = 0.1;
const PROGRESS_INITIALIZING: f64 = 0.3;
const PROGRESS_INITIALIZED: f64 = 0.8;
const PROGRESS_DONE: f64 = 1.0;

/// Хэндл загруженной модели. Клон делит ту же нативную модель.
#[derive(Clone)]
pub struct ModelHandle {
    id: Uuid,
    model: Arc<dyn NativeModel>,
}

impl ModelHandle {
    fn new(model: Box<dyn NativeModel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: Arc::from(model),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Блокирующий вызов нативной генерации.
    pub fn generate(&self, request: &NativeRequest) -> Result<String, NativeError> {
        self.model.generate(request)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Флаг отмены одной генерации. Клоны делят один флаг.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

enum Slot {
    Empty,
    Initializing { in_flight: usize },
    Ready(ModelHandle),
}

/// Результат нативной инициализации, уже разобранный под блокировкой.
enum InitOutcome {
    Published(Uuid),
    Discarded,
    Failed(LoadError),
}

/// Владелец единственной модели процесса. Создаётся при старте и передаётся
/// по `Arc` всем, кому нужна модель.
pub struct ModelManager {
    asset_path: PathBuf,
    backend: Arc<dyn NativeBackend>,
    guard: MemoryGuard,
    slot: Mutex<Slot>,
    status: watch::Sender<ModelStatus>,
    /// Флаги отмены идущих генераций.
    generations: Mutex<Vec<Weak<AtomicBool>>>,
}

impl ModelManager {
    pub fn new(
        asset_path: impl Into<PathBuf>,
        backend: Arc<dyn NativeBackend>,
        guard: MemoryGuard,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(ModelStatus::NotLoaded);
        Arc::new(Self {
            asset_path: asset_path.into(),
            backend,
            guard,
            slot: Mutex::new(Slot::Empty),
            status,
            generations: Mutex::new(Vec::new()),
        })
    }

    pub fn asset_path(&self) -> &Path {
        &self.asset_path
    }

    pub fn memory_guard(&self) -> &MemoryGuard {
        &self.guard
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    /// Текущий хэндл (клон), если модель готова.
    pub fn snapshot(&self) -> Option<ModelHandle> {
        match &*self.slot.lock() {
            Slot::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> ModelStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ModelStatus> {
        self.status.subscribe()
    }

    /// Поток статусов: новый подписчик сразу получает текущий статус.
    pub fn status_stream(&self) -> ModelStatusStream {
        WatchStream::new(self.status.subscribe())
    }

    /// Загружает модель. Если модель уже готова — сразу `Ok`.
    ///
    /// Проверки памяти и файла идут до нативной инициализации; сама инициализация
    /// и публикация хэндла выполняются в blocking-пуле без блокировки вызывающего.
    /// Если вызывающий бросил future, модель всё равно публикуется.
    /// Параллельный загрузчик, успевший раньше, побеждает: свежая модель
    /// отбрасывается, вызов всё равно завершается успехом.
    pub async fn load<F>(self: &Arc<Self>, mut on_progress: F) -> Result<(), LoadError>
    where
        F: FnMut(f64) + Send,
    {
        if self.is_loaded() {
            return Ok(());
        }

        self.set_loading(0.0);

        if !self.guard.has_adequate_memory(OperationClass::ModelLoad) {
            return Err(self.fail(LoadError::InsufficientMemory));
        }
        if !self.asset_path.is_file() {
            return Err(self.fail(LoadError::AssetMissing(self.asset_path.clone())));
        }
        self.report(&mut on_progress, PROGRESS_VALIDATED);

        self.enter_initializing();
        self.report(&mut on_progress, PROGRESS_INITIALIZING);

        tracing::info!(path = %self.asset_path.display(), "loading model");
        let started = Instant::now();
        let manager = Arc::clone(self);
        let outcome = tokio::task::spawn_blocking(move || {
            let built = std::panic::catch_unwind(AssertUnwindSafe(|| manager.backend.load(&manager.asset_path)))
                .unwrap_or_else(|_| Err(NativeError::Failed("native model init panicked".into())));
            manager.finish_initializing(built)
        })
        .await;

        match outcome {
            Ok(InitOutcome::Published(id)) => {
                tracing::info!(
                    model_id = %id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model loaded"
                );
            }
            Ok(InitOutcome::Discarded) => {
                tracing::debug!("model already published by a concurrent load, discarded ours");
            }
            Ok(InitOutcome::Failed(err)) => return Err(err),
            Err(join) => {
                self.leave_initializing();
                return Err(self.fail(LoadError::LoadFailed(join.to_string())));
            }
        }

        on_progress(PROGRESS_INITIALIZED);
        on_progress(PROGRESS_DONE);
        Ok(())
    }

    /// Выгружает модель. Безопасно вызывать в любом состоянии.
    /// Генерация, уже держащая клон хэндла, доработает на старой модели.
    pub fn unload(&self) {
        let mut slot = self.slot.lock();
        let previous = std::mem::replace(&mut *slot, Slot::Empty);
        self.status.send_replace(ModelStatus::NotLoaded);
        drop(slot);
        if let Slot::Ready(handle) = previous {
            tracing::info!(model_id = %handle.id(), "model unloaded");
        }
    }

    /// Новый флаг отмены для одной генерации; `cancel_in_flight_generation`
    /// взводит его вместе с остальными.
    pub fn begin_generation(&self) -> CancelToken {
        let token = CancelToken::new();
        self.track_generation(&token);
        token
    }

    /// Регистрирует флаг, созданный вызывающим.
    pub fn track_generation(&self, token: &CancelToken) {
        let mut generations = self.generations.lock();
        generations.retain(|flag| flag.strong_count() > 0);
        generations.push(Arc::downgrade(&token.flag));
    }

    /// Просит остановиться все идущие генерации. Уже идущий нативный вызов
    /// не прерывается, его результат будет отброшен.
    pub fn cancel_in_flight_generation(&self) {
        let mut generations = self.generations.lock();
        generations.retain(|flag| match flag.upgrade() {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        });
    }

    /// Подписывает менеджер на сигнал нехватки памяти: каждый сигнал выгружает модель.
    /// Подписка живёт, пока жив возвращённый хэндл. Требует Tokio runtime.
    pub fn watch_pressure(self: &Arc<Self>, signal: &PressureSignal) -> PressureSubscription {
        let mut rx = signal.subscribe();
        let manager: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let level = match rx.recv().await {
                    Ok(level) => Some(level),
                    Err(broadcast::error::RecvError::Lagged(_)) => None,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                tracing::warn!(?level, "memory pressure signal, evicting model");
                manager.unload();
            }
        });
        PressureSubscription::new(task)
    }

    fn enter_initializing(&self) {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Empty => *slot = Slot::Initializing { in_flight: 1 },
            Slot::Initializing { in_flight } => *in_flight += 1,
            Slot::Ready(_) => {}
        }
    }

    fn leave_initializing(&self) {
        let mut slot = self.slot.lock();
        if let Slot::Initializing { in_flight } = &mut *slot {
            *in_flight = in_flight.saturating_sub(1);
            if *in_flight == 0 {
                *slot = Slot::Empty;
            }
        }
    }

    /// Вызывается в blocking-пуле после нативной инициализации.
    /// Публикует модель, если хэндла ещё нет; иначе освобождает её вне блокировки.
    fn finish_initializing(&self, built: Result<Box<dyn NativeModel>, NativeError>) -> InitOutcome {
        let model = match built {
            Ok(model) => model,
            Err(e) => {
                self.leave_initializing();
                let err = if e.is_memory_related() {
                    LoadError::InsufficientMemory
                } else {
                    LoadError::LoadFailed(e.to_string())
                };
                return InitOutcome::Failed(self.fail(err));
            }
        };

        let mut slot = self.slot.lock();
        if let Slot::Ready(_) = &*slot {
            drop(slot);
            drop(model);
            return InitOutcome::Discarded;
        }
        let handle = ModelHandle::new(model);
        let id = handle.id();
        *slot = Slot::Ready(handle);
        self.status.send_replace(ModelStatus::Ready);
        InitOutcome::Published(id)
    }

    fn set_loading(&self, progress: f64) {
        // Статус победившего параллельного загрузчика не откатываем.
        self.status.send_if_modified(|status| {
            if status.is_ready() {
                return false;
            }
            *status = ModelStatus::Loading { progress };
            true
        });
    }

    fn report<F: FnMut(f64)>(&self, on_progress: &mut F, progress: f64) {
        self.set_loading(progress);
        on_progress(progress);
    }

    fn fail(&self, err: LoadError) -> LoadError {
        tracing::warn!(error = %err, "model load failed");
        let message = err.to_string();
        self.status.send_if_modified(|status| {
            if status.is_ready() {
                return false;
            }
            *status = ModelStatus::Failed { message };
            true
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pressure::PressureLevel;
    use futures_util::StreamExt;
    use memory_guard::{MemoryGuardError, MemoryReader, MemorySnapshot, MemoryThresholds};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const MIB: u64 = 1024 * 1024;

    struct FixedReader {
        headroom_mb: u64,
    }

    impl MemoryReader for FixedReader {
        fn snapshot(&self) -> Result<MemorySnapshot, MemoryGuardError> {
            Ok(MemorySnapshot {
                total_bytes: 16_384 * MIB,
                resident_bytes: (16_384 - self.headroom_mb) * MIB,
            })
        }
    }

    struct FakeModel {
        live: Arc<AtomicUsize>,
    }

    impl NativeModel for FakeModel {
        fn generate(&self, request: &NativeRequest) -> Result<String, NativeError> {
            Ok(format!("echo: {}", request.prompt))
        }
    }

    impl Drop for FakeModel {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        init_calls: AtomicUsize,
        live: Arc<AtomicUsize>,
        delay: Duration,
        error: Option<NativeError>,
    }

    impl NativeBackend for FakeBackend {
        fn load(&self, _path: &Path) -> Result<Box<dyn NativeModel>, NativeError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if let Some(e) = &self.error {
                return Err(e.clone());
            }
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeModel {
                live: Arc::clone(&self.live),
            }))
        }
    }

    fn asset() -> NamedTempFile {
        NamedTempFile::new().expect("temp model file")
    }

    fn manager(path: &Path, backend: Arc<FakeBackend>, headroom_mb: u64) -> Arc<ModelManager> {
        let thresholds = MemoryThresholds::from_megabytes(1024, 128).expect("valid thresholds");
        let guard = MemoryGuard::new(Arc::new(FixedReader { headroom_mb }), thresholds);
        ModelManager::new(path, backend, guard)
    }

    #[tokio::test]
    async fn test_load_reports_milestones_and_becomes_ready() {
        let file = asset();
        let backend = Arc::new(FakeBackend::default());
        let mgr = manager(file.path(), backend.clone(), 4096);

        let mut seen = Vec::new();
        mgr.load(|p| seen.push(p)).await.expect("load succeeds");

        assert_eq!(seen, vec![0.1, 0.3, 0.8, 1.0]);
        assert!(mgr.is_loaded());
        assert_eq!(mgr.status(), ModelStatus::Ready);
        assert_eq!(backend.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let file = asset();
        let backend = Arc::new(FakeBackend::default());
        let mgr = manager(file.path(), backend.clone(), 4096);

        mgr.load(|_| {}).await.expect("first load");
        let first_id = mgr.snapshot().map(|h| h.id());

        let mut progress_calls = 0;
        mgr.load(|_| progress_calls += 1).await.expect("second load");

        assert_eq!(mgr.snapshot().map(|h| h.id()), first_id);
        assert_eq!(backend.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(progress_calls, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_publish_single_handle() {
        let file = asset();
        let backend = Arc::new(FakeBackend {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let mgr = manager(file.path(), backend.clone(), 4096);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let mgr = Arc::clone(&mgr);
            tasks.push(tokio::spawn(async move { mgr.load(|_| {}).await }));
        }
        for task in tasks {
            assert_eq!(task.await.expect("task joined"), Ok(()));
        }

        assert!(mgr.is_loaded());
        assert!(backend.init_calls.load(Ordering::SeqCst) >= 1);
        // Проигравшие загрузчики освободили свои модели.
        assert_eq!(backend.live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_load_during_initialization_succeeds() {
        let file = asset();
        let backend = Arc::new(FakeBackend {
            delay: Duration::from_millis(80),
            ..Default::default()
        });
        let mgr = manager(file.path(), backend.clone(), 4096);

        let first = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.load(|_| {}).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = mgr.load(|_| {}).await;

        assert_eq!(second, Ok(()));
        assert_eq!(first.await.expect("task joined"), Ok(()));
        assert_eq!(backend.live.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.status(), ModelStatus::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_load_still_publishes_model() {
        let file = asset();
        let backend = Arc::new(FakeBackend {
            delay: Duration::from_millis(150),
            ..Default::default()
        });
        let mgr = manager(file.path(), backend.clone(), 4096);

        let task = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.load(|_| {}).await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        task.abort();

        let mut status = mgr.subscribe_status();
        tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| s.is_ready()))
            .await
            .expect("published in time")
            .expect("sender alive");
        assert!(mgr.is_loaded());

        mgr.load(|_| {}).await.expect("warm load");
        assert_eq!(backend.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_matches_slot_after_eviction() {
        let file = asset();
        let mgr = manager(file.path(), Arc::new(FakeBackend::default()), 4096);

        for _ in 0..50 {
            mgr.load(|_| {}).await.expect("load");
            assert_eq!(mgr.status().is_ready(), mgr.is_loaded());
            mgr.unload();
            assert_eq!(mgr.status(), ModelStatus::NotLoaded);
            assert!(!mgr.is_loaded());
        }
    }

    #[tokio::test]
    async fn test_insufficient_memory_skips_native_init() {
        let file = asset();
        let backend = Arc::new(FakeBackend::default());
        let mgr = manager(file.path(), backend.clone(), 512);

        let result = mgr.load(|_| {}).await;

        assert_eq!(result, Err(LoadError::InsufficientMemory));
        assert_eq!(backend.init_calls.load(Ordering::SeqCst), 0);
        assert!(!mgr.is_loaded());
        assert!(matches!(mgr.status(), ModelStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn test_missing_asset_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("absent.gguf");
        let backend = Arc::new(FakeBackend::default());
        let mgr = manager(&path, backend.clone(), 4096);

        let result = mgr.load(|_| {}).await;

        assert_eq!(result, Err(LoadError::AssetMissing(path)));
        assert_eq!(backend.init_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_native_failure_is_not_retried() {
        let file = asset();
        let backend = Arc::new(FakeBackend {
            error: Some(NativeError::Failed("bad gguf magic".into())),
            ..Default::default()
        });
        let mgr = manager(file.path(), backend.clone(), 4096);

        let result = mgr.load(|_| {}).await;

        assert_eq!(result, Err(LoadError::LoadFailed("bad gguf magic".into())));
        assert_eq!(backend.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            mgr.status(),
            ModelStatus::Failed {
                message: "bad gguf magic".into()
            }
        );
        assert!(mgr.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_native_oom_maps_to_insufficient_memory() {
        let file = asset();
        let backend = Arc::new(FakeBackend {
            error: Some(NativeError::OutOfMemory("metal buffer".into())),
            ..Default::default()
        });
        let mgr = manager(file.path(), backend, 4096);

        assert_eq!(mgr.load(|_| {}).await, Err(LoadError::InsufficientMemory));
    }

    #[tokio::test]
    async fn test_unload_always_safe() {
        let file = asset();
        let backend = Arc::new(FakeBackend::default());
        let mgr = manager(file.path(), backend.clone(), 4096);

        mgr.unload();
        assert_eq!(mgr.status(), ModelStatus::NotLoaded);

        mgr.load(|_| {}).await.expect("load");
        mgr.unload();
        assert!(!mgr.is_loaded());
        assert_eq!(mgr.status(), ModelStatus::NotLoaded);
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_status_stream_replays_current_value() {
        let file = asset();
        let mgr = manager(file.path(), Arc::new(FakeBackend::default()), 4096);
        mgr.load(|_| {}).await.expect("load");

        let mut stream = mgr.status_stream();
        assert_eq!(stream.next().await, Some(ModelStatus::Ready));

        mgr.unload();
        assert_eq!(stream.next().await, Some(ModelStatus::NotLoaded));
    }

    #[tokio::test]
    async fn test_cancel_tokens_are_per_generation() {
        let file = asset();
        let mgr = manager(file.path(), Arc::new(FakeBackend::default()), 4096);

        let first = mgr.begin_generation();
        let second = mgr.begin_generation();
        second.cancel();
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());

        // Отмена до начала генерации не задевает следующую.
        mgr.cancel_in_flight_generation();
        assert!(first.is_cancelled());
        let third = mgr.begin_generation();
        assert!(!third.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_all_reaches_tracked_tokens() {
        let file = asset();
        let mgr = manager(file.path(), Arc::new(FakeBackend::default()), 4096);

        let own = CancelToken::new();
        mgr.track_generation(&own);
        let dropped = mgr.begin_generation();
        drop(dropped);

        mgr.cancel_in_flight_generation();
        assert!(own.is_cancelled());
        assert_eq!(mgr.generations.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_pressure_signal_evicts_until_unsubscribed() {
        let file = asset();
        let mgr = manager(file.path(), Arc::new(FakeBackend::default()), 4096);
        let signal = PressureSignal::new();
        let subscription = mgr.watch_pressure(&signal);

        mgr.load(|_| {}).await.expect("load");
        signal.notify(PressureLevel::Critical);
        let mut status = mgr.subscribe_status();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| *s == ModelStatus::NotLoaded),
        )
        .await
        .expect("evicted in time")
        .expect("sender alive");
        assert!(!mgr.is_loaded());

        subscription.shutdown();
        mgr.load(|_| {}).await.expect("reload");
        signal.notify(PressureLevel::Critical);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mgr.is_loaded());
    }
}
