//! Статус модели для UI.

use serde::Serialize;
use tokio_stream::wrappers::WatchStream;

/// Статус загрузки. В пределах одной попытки: NotLoaded → Loading → Ready | Failed;
/// `unload()` возвращает в NotLoaded из любого состояния.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelStatus {
    NotLoaded,
    /// Грубые отметки прогресса 0.0..=1.0.
    Loading { progress: f64 },
    Ready,
    Failed { message: String },
}

impl ModelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready)
    }
}

/// Поток статусов: сначала текущий, затем изменения.
pub type ModelStatusStream = WatchStream<ModelStatus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_tagged() {
        let json = serde_json::to_string(&ModelStatus::Loading { progress: 0.3 }).expect("serializable");
        assert_eq!(json, r#"{"type":"loading","progress":0.3}"#);

        let json = serde_json::to_string(&ModelStatus::NotLoaded).expect("serializable");
        assert_eq!(json, r#"{"type":"not_loaded"}"#);
    }
}
