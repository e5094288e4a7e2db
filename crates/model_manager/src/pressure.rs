//! Сигнал нехватки памяти и фоновые подписки на него.
//!
//! Хост пробрасывает системные уведомления ОС через [`PressureSignal::notify`];
//! [`spawn_pressure_monitor`] дополнительно опрашивает счётчики памяти сам.

use std::time::Duration;

use memory_guard::MemoryGuard;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const SIGNAL_CHANNEL_CAP: usize = 16;

/// Уровень сигнала нехватки памяти.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Warning,
    Critical,
}

/// Широковещательный сигнал нехватки памяти. Клоны делят один канал.
#[derive(Clone)]
pub struct PressureSignal {
    tx: broadcast::Sender<PressureLevel>,
}

impl PressureSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CHANNEL_CAP);
        Self { tx }
    }

    /// Отправляет сигнал всем подписчикам. Возвращает число получателей.
    pub fn notify(&self, level: PressureLevel) -> usize {
        self.tx.send(level).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PressureLevel> {
        self.tx.subscribe()
    }
}

impl Default for PressureSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Хэндл фоновой задачи. Drop или `shutdown()` останавливают задачу.
pub struct PressureSubscription {
    task: Option<JoinHandle<()>>,
}

impl PressureSubscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PressureSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Опрос запаса памяти с интервалом. Когда запас падает ниже `floor_bytes`,
/// шлёт `Critical` (один раз на каждое пересечение порога сверху вниз).
/// Требует работающий Tokio runtime.
pub fn spawn_pressure_monitor(
    guard: MemoryGuard,
    floor_bytes: u64,
    interval: Duration,
    signal: PressureSignal,
) -> PressureSubscription {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut under_floor = false;
        loop {
            ticker.tick().await;
            let Some(headroom) = guard.headroom_bytes() else {
                continue;
            };
            let now_under = headroom < floor_bytes;
            if now_under && !under_floor {
                tracing::warn!(headroom_bytes = headroom, floor_bytes, "memory headroom under floor");
                signal.notify(PressureLevel::Critical);
            }
            under_floor = now_under;
        }
    });
    PressureSubscription::new(task)
}
