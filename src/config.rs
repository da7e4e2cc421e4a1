use std::{env, net::SocketAddr, path::PathBuf, str::FromStr};

use anyhow::{Context, bail};

#[cfg(feature = "tch-backend")]
use tch::Device;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MODEL_PATH: &str = "/models/llama-2-7b-merged-vllm";
pub const DEFAULT_S3_PREFIX: &str = "llama-2-7b-merged-vllm";
pub const DEFAULT_MAX_MODEL_LEN: usize = 2048;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_path: PathBuf,
    pub max_model_len: usize,
    pub tensor_parallel_size: usize,
    /// Object-store bucket holding the weights. `None` disables fetching.
    pub s3_bucket: Option<String>,
    pub s3_prefix: String,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = parse_or(&lookup, "SERVER_ADDR", || {
            SocketAddr::from_str(DEFAULT_LISTEN_ADDR).context("default listen address")
        })?;

        let model_path = PathBuf::from(
            lookup("MODEL_PATH").unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
        );

        let max_model_len = parse_or(&lookup, "MAX_MODEL_LEN", || Ok(DEFAULT_MAX_MODEL_LEN))?;
        let tensor_parallel_size = parse_or(&lookup, "TENSOR_PARALLEL_SIZE", || Ok(1usize))?;
        if max_model_len == 0 {
            bail!("MAX_MODEL_LEN must be at least 1");
        }
        if tensor_parallel_size == 0 {
            bail!("TENSOR_PARALLEL_SIZE must be at least 1");
        }

        let s3_bucket = lookup("S3_BUCKET")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let s3_prefix = lookup("S3_PREFIX").unwrap_or_else(|| DEFAULT_S3_PREFIX.to_string());

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = lookup("DEVICE").unwrap_or_else(|| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_path,
            max_model_len,
            tensor_parallel_size,
            s3_bucket,
            s3_prefix,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }

    /// Label reported by the health endpoint.
    pub fn model_label(&self) -> String {
        self.model_path.display().to_string()
    }
}

fn parse_or<F, T, D>(lookup: &F, key: &str, default: D) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    D: FnOnce() -> anyhow::Result<T>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => default(),
    }
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA unavailable, falling back to CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
