mod engine;
mod registry;
pub mod sampling;
mod types;

#[cfg(feature = "tch-backend")]
mod loader;

pub use engine::{EngineError, InferenceEngine};
#[cfg(feature = "tch-backend")]
pub use loader::{TOKENIZER_FILE, TORCHSCRIPT_FILE, TorchEngine};
pub use registry::{ModelRegistry, TimedGeneration};
pub use types::{
    GenerationOutput, GenerationRequest, GenerationResponse, HealthResponse, SamplingParams,
};
