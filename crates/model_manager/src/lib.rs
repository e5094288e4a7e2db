//! Model Manager — жизненный цикл единственной локальной модели.
//!
//! Загрузка с проверкой памяти и файла модели, выгрузка, вытеснение по сигналу
//! нехватки памяти. Тяжёлая нативная инициализация идёт вне блокировки.

mod error;
mod manager;
mod native;
mod pressure;
mod status;

pub use error::{LoadError, NativeError};
pub use manager::{CancelToken, ModelHandle, ModelManager};
pub use native::{NativeBackend, NativeModel, NativeRequest};
pub use pressure::{spawn_pressure_monitor, PressureLevel, PressureSignal, PressureSubscription};
pub use status::{ModelStatus, ModelStatusStream};
