//! Настройки суммаризации (<data_local_dir>/newsdesk/summarizer.json).
//!
//! Нет файла или он битый — берутся значения по умолчанию.

use std::path::{Path, PathBuf};

use local_provider::{InferenceConfig, LocalConfig};
use memory_guard::{MemoryGuardError, MemoryThresholds};
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "newsdesk";
const SETTINGS_FILE: &str = "summarizer.json";
const DEFAULT_MODEL_FILE: &str = "summary.gguf";

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_PRESSURE_FLOOR_MB: u64 = 128;

/// Конфигурация суммаризации по умолчанию.
pub fn default_inference_config() -> InferenceConfig {
    InferenceConfig::new(256, 0.3, 0.9).with_stop_sequences(["</s>", "<|im_end|>", "<|endoftext|>"])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerSettings {
    pub model_path: PathBuf,
    pub model_load_mb: u64,
    pub inference_mb: u64,
    /// Период опроса памяти; `None` — только внешний сигнал ОС.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_poll_ms: Option<u64>,
    pub pressure_floor_mb: u64,
    pub batch_size: usize,
    pub inference: InferenceConfig,
    pub native: LocalConfig,
    /// Куда писать summary.log; `None` — не писать.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            model_load_mb: MemoryThresholds::DEFAULT_MODEL_LOAD_MB,
            inference_mb: MemoryThresholds::DEFAULT_INFERENCE_MB,
            pressure_poll_ms: None,
            pressure_floor_mb: DEFAULT_PRESSURE_FLOOR_MB,
            batch_size: DEFAULT_BATCH_SIZE,
            inference: default_inference_config(),
            native: LocalConfig::default(),
            log_dir: None,
        }
    }
}

impl SummarizerSettings {
    pub fn thresholds(&self) -> Result<MemoryThresholds, MemoryGuardError> {
        MemoryThresholds::from_megabytes(self.model_load_mb, self.inference_mb)
    }

    pub fn pressure_floor_bytes(&self) -> u64 {
        self.pressure_floor_mb.saturating_mul(1024 * 1024)
    }
}

fn app_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn default_model_path() -> PathBuf {
    app_dir().join("models").join(DEFAULT_MODEL_FILE)
}

pub fn settings_path() -> PathBuf {
    app_dir().join(SETTINGS_FILE)
}

pub fn load_settings() -> SummarizerSettings {
    load_settings_from(&settings_path())
}

pub fn load_settings_from(path: &Path) -> SummarizerSettings {
    match std::fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "invalid summarizer settings, using defaults");
            SummarizerSettings::default()
        }),
        Err(_) => SummarizerSettings::default(),
    }
}

pub fn save_settings(settings: &SummarizerSettings) -> Result<(), String> {
    save_settings_to(&settings_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &SummarizerSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(|e| e.to_string())?;
    std::fs::write(path, json).map_err(|e| e.to_string())
}
