//! Суммаризация статей локальной моделью.
//!
//! `SummaryServices` создаётся при старте процесса и раздаёт `Summarizer`;
//! у каждого `Summarizer` свой поток `SummarizationState` и свой `start`/`cancel`.

mod controller;
mod error;
pub mod logs;
mod prompt_builder;
mod sanitize;
mod services;
pub mod settings;
mod state;

pub use controller::{SummarizationStateStream, Summarizer};
pub use error::SummarizerError;
pub use prompt_builder::{SummaryRequest, ARTICLE_SYSTEM_PROMPT, MAX_ARTICLE_CHARS};
pub use sanitize::sanitize;
pub use services::SummaryServices;
pub use settings::{
    default_inference_config, load_settings, save_settings, SummarizerSettings, DEFAULT_BATCH_SIZE,
};
pub use state::SummarizationState;
