use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    /// Accepted for compatibility; responses are never streamed.
    #[serde(default)]
    pub stream: bool,
}

fn default_max_tokens() -> usize {
    100
}
fn default_temperature() -> f64 {
    0.7
}
fn default_top_p() -> f64 {
    0.9
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            stream: false,
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.max_tokens == 0 {
            return Err(ServiceError::InvalidRequest(
                "max_tokens must be at least 1".into(),
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(ServiceError::InvalidRequest(
                "temperature must be a non-negative number".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ServiceError::InvalidRequest(
                "top_p must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Whitespace-split token count used for the prompt-token counter.
    pub fn approximate_prompt_tokens(&self) -> usize {
        self.prompt.split_whitespace().count()
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationResponse {
    pub generated_text: String,
    pub tokens_generated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: usize,
}

/// What an engine hands back for a single prompt.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub text: String,
    pub token_ids: Vec<u32>,
    /// Set by engines that observe the first sampled token directly.
    pub first_token_latency: Option<Duration>,
}

impl GenerationOutput {
    pub fn tokens_generated(&self) -> usize {
        self.token_ids.len()
    }
}
