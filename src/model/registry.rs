use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use once_cell::sync::OnceCell;
use tokio::task;

use crate::{
    error::ServiceError,
    model::{GenerationOutput, GenerationRequest, InferenceEngine},
};

/// Holds the engine once it has loaded. Empty means the service is not ready.
pub struct ModelRegistry {
    model_label: String,
    engine: OnceCell<Arc<dyn InferenceEngine>>,
}

pub struct TimedGeneration {
    pub output: GenerationOutput,
    pub time_to_first_token: Duration,
}

impl ModelRegistry {
    pub fn new(model_label: impl Into<String>) -> Self {
        Self {
            model_label: model_label.into(),
            engine: OnceCell::new(),
        }
    }

    pub fn model_label(&self) -> &str {
        &self.model_label
    }

    /// Marks the service ready. Only the first engine is kept.
    pub fn install(&self, engine: Arc<dyn InferenceEngine>) {
        if self.engine.set(engine).is_err() {
            tracing::warn!("engine already installed, ignoring second install");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.get().is_some()
    }

    pub fn cache_usage(&self) -> Option<f64> {
        self.engine.get().and_then(|engine| engine.cache_usage())
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<TimedGeneration, ServiceError> {
        let engine = self.engine.get().cloned().ok_or(ServiceError::NotReady)?;
        let params = request.sampling_params();
        let prompt = request.prompt.clone();

        let started = Instant::now();
        let output = task::spawn_blocking(move || engine.generate(&prompt, &params))
            .await
            .map_err(|err| ServiceError::Generation(format!("inference task failed: {err}")))?
            .map_err(|err| ServiceError::Generation(err.to_string()))?;
        let elapsed = started.elapsed();

        let time_to_first_token = output.first_token_latency.unwrap_or(elapsed);
        Ok(TimedGeneration {
            output,
            time_to_first_token,
        })
    }
}
