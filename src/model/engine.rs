use thiserror::Error;

use crate::model::{GenerationOutput, SamplingParams};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error(
        "prompt is {prompt_tokens} tokens, which leaves no room within max_model_len {max_model_len}"
    )]
    ContextOverflow {
        prompt_tokens: usize,
        max_model_len: usize,
    },
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Boundary to whatever actually runs the model.
///
/// Calls are blocking; the registry moves them onto the blocking pool.
pub trait InferenceEngine: Send + Sync + 'static {
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<GenerationOutput, EngineError>;

    /// Fraction of the accelerator KV cache in use, if the backend tracks it.
    fn cache_usage(&self) -> Option<f64> {
        None
    }
}
