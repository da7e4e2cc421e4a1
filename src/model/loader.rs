use std::{path::Path, time::Instant};

use parking_lot::Mutex;
use tch::{Device, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;

use crate::{
    config::AppConfig,
    model::{EngineError, GenerationOutput, InferenceEngine, SamplingParams, sampling::Sampler},
};

pub const TORCHSCRIPT_FILE: &str = "model.pt";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

const EOS_CANDIDATES: [&str; 3] = ["</s>", "<|endoftext|>", "<|eot_id|>"];

/// Single-device TorchScript causal LM.
pub struct TorchEngine {
    tokenizer: Tokenizer,
    module: Mutex<tch::CModule>,
    device: Device,
    max_model_len: usize,
    eos_token_id: Option<u32>,
}

impl TorchEngine {
    pub fn load(config: &AppConfig) -> Result<Self, EngineError> {
        if config.tensor_parallel_size > 1 {
            tracing::warn!(
                tensor_parallel_size = config.tensor_parallel_size,
                "TorchScript backend runs on a single device; ignoring tensor parallelism"
            );
        }

        let dir = config.model_path.as_path();
        let tokenizer = Tokenizer::from_file(artifact(dir, TOKENIZER_FILE)?)
            .map_err(|e| EngineError::Load(e.to_string()))?;
        let eos_token_id = EOS_CANDIDATES
            .iter()
            .find_map(|token| tokenizer.token_to_id(token));

        let mut module = tch::CModule::load_on_device(artifact(dir, TORCHSCRIPT_FILE)?, config.device)
            .map_err(|e| EngineError::Load(e.to_string()))?;
        module.set_eval();

        tracing::info!(
            model = %dir.display(),
            device = ?config.device,
            max_model_len = config.max_model_len,
            ?eos_token_id,
            "TorchScript model loaded"
        );

        Ok(Self {
            tokenizer,
            module: Mutex::new(module),
            device: config.device,
            max_model_len: config.max_model_len,
            eos_token_id,
        })
    }

    fn next_token_logits(
        &self,
        module: &tch::CModule,
        input_ids: &[i64],
    ) -> Result<Vec<f32>, EngineError> {
        let input_tensor = Tensor::from_slice(input_ids)
            .reshape([1, input_ids.len() as i64])
            .to(self.device);

        // Traced models return either bare logits or a (logits, past) tuple.
        let output = module
            .forward_is(&[tch::IValue::Tensor(input_tensor)])
            .map_err(|e| EngineError::Generation(e.to_string()))?;
        let logits = match output {
            tch::IValue::Tensor(t) => t,
            tch::IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                tch::IValue::Tensor(t) => t.shallow_clone(),
                _ => {
                    return Err(EngineError::Generation(
                        "expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => {
                return Err(EngineError::Generation(
                    "unexpected model output format".into(),
                ));
            }
        };

        // [1, seq_len, vocab] -> [vocab] for the last position
        let last = logits
            .select(1, -1)
            .squeeze()
            .to_kind(Kind::Float)
            .to_device(Device::Cpu);
        Vec::<f32>::try_from(&last).map_err(|e| EngineError::Generation(e.to_string()))
    }
}

impl InferenceEngine for TorchEngine {
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<GenerationOutput, EngineError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| EngineError::Generation(e.to_string()))?;
        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if input_ids.is_empty() {
            input_ids.push(0);
        }
        let prompt_len = input_ids.len();
        if prompt_len >= self.max_model_len {
            return Err(EngineError::ContextOverflow {
                prompt_tokens: prompt_len,
                max_model_len: self.max_model_len,
            });
        }
        let budget = params.max_tokens.min(self.max_model_len - prompt_len);

        let mut sampler = Sampler::new(params);
        let mut generated: Vec<u32> = Vec::with_capacity(budget);
        let mut first_token_latency = None;
        let started = Instant::now();

        no_grad(|| {
            let module = self.module.lock();
            for _ in 0..budget {
                let logits = self.next_token_logits(&module, &input_ids)?;
                let next = sampler
                    .sample(&logits)
                    .ok_or_else(|| EngineError::Generation("model produced empty logits".into()))?
                    as u32;
                if first_token_latency.is_none() {
                    first_token_latency = Some(started.elapsed());
                }
                if Some(next) == self.eos_token_id {
                    break;
                }
                generated.push(next);
                input_ids.push(next as i64);
            }
            Ok::<(), EngineError>(())
        })?;

        let text = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| EngineError::Generation(e.to_string()))?;

        Ok(GenerationOutput {
            text,
            token_ids: generated,
            first_token_latency,
        })
    }
}

fn artifact(dir: &Path, name: &str) -> Result<std::path::PathBuf, EngineError> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(EngineError::Load(format!(
            "model artifact missing: {}",
            path.display()
        )));
    }
    Ok(path)
}
