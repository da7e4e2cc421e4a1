#![allow(dead_code)]

use std::sync::Arc;

use vllm_gateway::{
    EngineError, GenerationOutput, InferenceEngine, Metrics, ModelRegistry, SamplingParams,
};

pub const MODEL_LABEL: &str = "/models/test-model";

/// Engine with a canned answer.
pub struct ScriptedEngine {
    pub reply: Result<(String, usize), String>,
    pub cache: Option<f64>,
}

impl ScriptedEngine {
    pub fn replying(text: &str, tokens: usize) -> Self {
        Self {
            reply: Ok((text.to_string(), tokens)),
            cache: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            cache: None,
        }
    }
}

impl InferenceEngine for ScriptedEngine {
    fn generate(
        &self,
        _prompt: &str,
        _params: &SamplingParams,
    ) -> Result<GenerationOutput, EngineError> {
        match &self.reply {
            Ok((text, tokens)) => Ok(GenerationOutput {
                text: text.clone(),
                token_ids: (0..*tokens as u32).collect(),
                first_token_latency: None,
            }),
            Err(message) => Err(EngineError::Generation(message.clone())),
        }
    }

    fn cache_usage(&self) -> Option<f64> {
        self.cache
    }
}

/// Generates exactly `max_tokens` tokens.
pub struct FillEngine;

impl InferenceEngine for FillEngine {
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<GenerationOutput, EngineError> {
        Ok(GenerationOutput {
            text: prompt.chars().rev().collect(),
            token_ids: vec![7; params.max_tokens],
            first_token_latency: None,
        })
    }
}

pub fn fixtures() -> (Arc<ModelRegistry>, Arc<Metrics>) {
    (
        Arc::new(ModelRegistry::new(MODEL_LABEL)),
        Arc::new(Metrics::new().unwrap()),
    )
}

/// Checks every line against the Prometheus text exposition grammar.
pub fn assert_valid_exposition(body: &str) {
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("# ") {
            assert!(
                rest.starts_with("HELP ") || rest.starts_with("TYPE "),
                "bad comment line: {line}"
            );
            continue;
        }

        let (series, value) = line
            .rsplit_once(' ')
            .unwrap_or_else(|| panic!("sample without value: {line}"));
        let name = series.split('{').next().unwrap();
        assert!(
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
            "bad metric name: {line}"
        );
        let labels = &series[name.len()..];
        assert!(
            labels.is_empty() || (labels.starts_with('{') && labels.ends_with('}')),
            "bad label set: {line}"
        );
        assert!(
            matches!(value, "+Inf" | "-Inf" | "NaN") || value.parse::<f64>().is_ok(),
            "bad sample value: {line}"
        );
    }
}

/// Value of an unlabelled sample.
pub fn sample(body: &str, name: &str) -> Option<f64> {
    body.lines().find_map(|line| {
        let (metric, value) = line.split_once(' ')?;
        if metric == name { value.parse().ok() } else { None }
    })
}
