pub mod config;
pub mod error;
pub mod fetcher;
pub mod loadgen;
pub mod metrics;
pub mod model;
pub mod server;
pub mod telemetry;

pub use config::AppConfig;
pub use error::{FetchError, ServiceError};
pub use fetcher::{ModelSource, ObjectStoreSource, Preparation, prepare_model_dir};
pub use metrics::Metrics;
pub use model::{
    EngineError, GenerationOutput, GenerationRequest, GenerationResponse, InferenceEngine,
    ModelRegistry, SamplingParams,
};
pub use server::build_router;
