//! Проверка запаса памяти по классу операции.

use std::sync::Arc;

use crate::error::MemoryGuardError;
use crate::reader::{MemoryReader, SystemReader};

const MIB: u64 = 1024 * 1024;

/// Класс дорогой операции. У каждого свой минимальный запас памяти.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Загрузка весов модели целиком.
    ModelLoad,
    /// Один вызов генерации на уже загруженной модели.
    Inference,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::ModelLoad => "model_load",
            OperationClass::Inference => "inference",
        }
    }
}

/// Пороги запаса памяти. Загрузке модели всегда нужно больше, чем генерации.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryThresholds {
    model_load_bytes: u64,
    inference_bytes: u64,
}

impl MemoryThresholds {
    pub const DEFAULT_MODEL_LOAD_MB: u64 = 1536;
    pub const DEFAULT_INFERENCE_MB: u64 = 256;

    pub fn new(model_load_bytes: u64, inference_bytes: u64) -> Result<Self, MemoryGuardError> {
        if model_load_bytes <= inference_bytes {
            return Err(MemoryGuardError::InvalidThresholds {
                model_load_bytes,
                inference_bytes,
            });
        }
        Ok(Self {
            model_load_bytes,
            inference_bytes,
        })
    }

    pub fn from_megabytes(model_load_mb: u64, inference_mb: u64) -> Result<Self, MemoryGuardError> {
        Self::new(
            model_load_mb.saturating_mul(MIB),
            inference_mb.saturating_mul(MIB),
        )
    }

    pub fn required_bytes(&self, class: OperationClass) -> u64 {
        match class {
            OperationClass::ModelLoad => self.model_load_bytes,
            OperationClass::Inference => self.inference_bytes,
        }
    }
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            model_load_bytes: Self::DEFAULT_MODEL_LOAD_MB * MIB,
            inference_bytes: Self::DEFAULT_INFERENCE_MB * MIB,
        }
    }
}

/// Memory Guard: синхронная проверка без побочных эффектов, без ожиданий и повторов.
#[derive(Clone)]
pub struct MemoryGuard {
    reader: Arc<dyn MemoryReader>,
    thresholds: MemoryThresholds,
}

impl MemoryGuard {
    pub fn new(reader: Arc<dyn MemoryReader>, thresholds: MemoryThresholds) -> Self {
        Self { reader, thresholds }
    }

    /// Guard на счётчиках ОС.
    pub fn system(thresholds: MemoryThresholds) -> Self {
        Self::new(Arc::new(SystemReader), thresholds)
    }

    pub fn thresholds(&self) -> MemoryThresholds {
        self.thresholds
    }

    /// Достаточно ли памяти для операции. Ошибка опроса ОС не блокирует работу:
    /// в этом случае возвращается `true`.
    pub fn has_adequate_memory(&self, class: OperationClass) -> bool {
        let required = self.thresholds.required_bytes(class);
        match self.reader.snapshot() {
            Ok(snapshot) => {
                let headroom = snapshot.headroom_bytes();
                let ok = headroom >= required;
                if !ok {
                    tracing::warn!(
                        operation = class.as_str(),
                        headroom_mb = headroom / MIB,
                        required_mb = required / MIB,
                        "memory preflight rejected operation"
                    );
                }
                ok
            }
            Err(e) => {
                tracing::warn!(operation = class.as_str(), error = %e, "memory reading failed, allowing operation");
                true
            }
        }
    }

    /// Текущий запас памяти, если ОС ответила.
    pub fn headroom_bytes(&self) -> Option<u64> {
        self.reader.snapshot().ok().map(|s| s.headroom_bytes())
    }
}

impl std::fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}
