//! Ошибки Memory Guard.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryGuardError {
    #[error("memory reading unavailable: {0}")]
    Unavailable(String),

    #[error("model load threshold ({model_load_bytes} B) must exceed inference threshold ({inference_bytes} B)")]
    InvalidThresholds {
        model_load_bytes: u64,
        inference_bytes: u64,
    },
}
