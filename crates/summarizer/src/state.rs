//! Состояние суммаризации, которое видит UI.

use serde::Serialize;

/// Начальное состояние `Idle`; `Completed` и `Error` — конечные до следующего `start`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SummarizationState {
    Idle,
    LoadingModel { progress: f64 },
    /// `partial` — очищенный промежуточный текст.
    Generating { partial: String },
    Completed { text: String },
    Error { message: String },
}

impl SummarizationState {
    /// Идёт загрузка или генерация.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SummarizationState::LoadingModel { .. } | SummarizationState::Generating { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SummarizationState::Completed { .. } | SummarizationState::Error { .. }
        )
    }
}
