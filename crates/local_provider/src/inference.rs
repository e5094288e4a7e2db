//! GGUF через llama.cpp: реализация `NativeBackend` / `NativeModel`.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend as LlamaRuntime;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use model_manager::{NativeBackend, NativeError, NativeModel, NativeRequest};

use crate::config::LocalConfig;

/// Максимум токенов в одном batch для decode (иначе llama.cpp отвечает "Insufficient Space").
const PREFILL_BATCH_SIZE: usize = 512;
const FALLBACK_THREADS: usize = 4;

/// Логические ядра CPU, один раз на процесс.
fn cpu_cores() -> usize {
    static CORES: OnceLock<usize> = OnceLock::new();
    *CORES.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_THREADS)
    })
}

fn failed(e: impl std::fmt::Display) -> NativeError {
    NativeError::Failed(e.to_string())
}

/// Бэкенд llama.cpp. Инициализируется один раз на процесс; загрузки моделей
/// переиспользуют его.
pub struct LlamaBackend {
    runtime: Arc<LlamaRuntime>,
    config: LocalConfig,
}

impl LlamaBackend {
    pub fn init(config: LocalConfig) -> Result<Self, NativeError> {
        let runtime = LlamaRuntime::init().map_err(failed)?;
        Ok(Self {
            runtime: Arc::new(runtime),
            config,
        })
    }
}

impl NativeBackend for LlamaBackend {
    fn load(&self, path: &Path) -> Result<Box<dyn NativeModel>, NativeError> {
        let params = LlamaModelParams::default();
        let model = LlamaModel::load_from_file(&self.runtime, path, &params).map_err(failed)?;
        Ok(Box::new(LlamaModelHandle {
            runtime: Arc::clone(&self.runtime),
            model,
            config: self.config.clone(),
        }))
    }
}

pub struct LlamaModelHandle {
    runtime: Arc<LlamaRuntime>,
    model: LlamaModel,
    config: LocalConfig,
}

impl LlamaModelHandle {
    fn n_threads(&self) -> i32 {
        let n = self.config.n_threads.unwrap_or_else(cpu_cores);
        i32::try_from(n.max(1)).unwrap_or(FALLBACK_THREADS as i32)
    }
}

impl NativeModel for LlamaModelHandle {
    fn generate(&self, request: &NativeRequest) -> Result<String, NativeError> {
        let tokens = self
            .model
            .str_to_token(&request.prompt, AddBos::Always)
            .map_err(failed)?;
        let n_tokens = tokens.len();
        let plan = self.config.plan_context(n_tokens, request.max_tokens)?;
        let n_ctx = u32::try_from(plan.n_ctx)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| NativeError::Failed(format!("invalid context size {}", plan.n_ctx)))?;

        let n_threads = self.n_threads();
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_threads(n_threads)
            .with_n_threads_batch(n_threads);

        // Контекст не создаётся почти всегда из-за KV-кэша, которому не хватило памяти.
        let mut ctx = self
            .model
            .new_context(&self.runtime, ctx_params)
            .map_err(|e| NativeError::OutOfMemory(e.to_string()))?;

        let mut batch = LlamaBatch::new(PREFILL_BATCH_SIZE, 1);
        let last_pos = (n_tokens as i32).saturating_sub(1);

        // Prefill по чанкам.
        let mut pos = 0i32;
        for chunk in tokens.chunks(PREFILL_BATCH_SIZE) {
            batch.clear();
            for (j, &token) in chunk.iter().enumerate() {
                let p = pos + j as i32;
                batch.add(token, p, &[0], p == last_pos).map_err(failed)?;
            }
            ctx.decode(&mut batch).map_err(failed)?;
            pos += chunk.len() as i32;
        }

        let mut sampler = if request.temperature <= 0.0 {
            LlamaSampler::greedy()
        } else {
            LlamaSampler::chain_simple([
                LlamaSampler::top_p(request.top_p, 1),
                LlamaSampler::temp(request.temperature),
                LlamaSampler::dist(self.config.seed),
            ])
        };

        let start = Instant::now();
        let mut output = String::new();
        let mut n_cur = n_tokens as i32;
        let mut generated = 0usize;

        for _ in 0..plan.max_new_tokens {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }

            let piece = self
                .model
                .token_to_str(token, Special::Tokenize)
                .unwrap_or_default();
            output.push_str(&piece);

            batch.clear();
            batch.add(token, n_cur, &[0], true).map_err(failed)?;
            n_cur += 1;
            generated += 1;

            ctx.decode(&mut batch).map_err(failed)?;
        }

        tracing::debug!(
            prompt_tokens = n_tokens,
            generated_tokens = generated,
            latency_ms = start.elapsed().as_millis() as u64,
            "llama generation done"
        );
        Ok(output)
    }
}
