use std::sync::Arc;

use anyhow::Context;
use tokio::{net::TcpListener, task};

use vllm_gateway::{
    AppConfig, InferenceEngine, Metrics, ModelRegistry, Preparation, build_router,
    prepare_model_dir, telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        model = %config.model_path.display(),
        max_model_len = config.max_model_len,
        tensor_parallel_size = config.tensor_parallel_size,
        bucket = ?config.s3_bucket,
        "starting"
    );

    let prepared = prepare_model_dir(&config)
        .await
        .context("failed to download model weights")?;
    if prepared == Preparation::AlreadyPresent {
        tracing::info!("using model already on disk");
    }

    let registry = Arc::new(ModelRegistry::new(config.model_label()));
    let metrics = Arc::new(Metrics::new()?);
    let router = build_router(registry.clone(), metrics);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server listening, model loading");

    let load = async {
        let cfg = config.clone();
        let engine = task::spawn_blocking(move || load_engine(&cfg))
            .await
            .context("engine loader panicked")??;
        registry.install(engine);
        tracing::info!("model loaded, ready to serve");
        Ok::<(), anyhow::Error>(())
    };
    let serve = async {
        axum::serve(listener, router).await?;
        Ok::<(), anyhow::Error>(())
    };

    tokio::try_join!(serve, load)?;
    Ok(())
}

#[cfg(feature = "tch-backend")]
fn load_engine(config: &AppConfig) -> anyhow::Result<Arc<dyn InferenceEngine>> {
    let engine = vllm_gateway::model::TorchEngine::load(config)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "tch-backend"))]
fn load_engine(_config: &AppConfig) -> anyhow::Result<Arc<dyn InferenceEngine>> {
    anyhow::bail!("no inference backend compiled in; rebuild with `--features tch-backend`")
}
