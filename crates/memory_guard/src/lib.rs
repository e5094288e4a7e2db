//! Memory Guard — предварительная проверка памяти перед дорогими операциями.
//!
//! Состояния нет: guard читает счётчики ОС и сравнивает запас памяти с порогом
//! класса операции (загрузка модели или один вызов генерации).

mod error;
mod guard;
mod reader;

pub use error::MemoryGuardError;
pub use guard::{MemoryGuard, MemoryThresholds, OperationClass};
pub use reader::{MemoryReader, MemorySnapshot, SystemReader};
