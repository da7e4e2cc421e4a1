use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use vllm_gateway::{
    loadgen::{LoadGenArgs, LoadMetrics, metrics_router, run_load},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let args = LoadGenArgs::parse();
    let plan = args.plan()?;
    let metrics = Arc::new(LoadMetrics::new()?);

    let listener = TcpListener::bind(args.metrics_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "benchmark metrics available at /metrics");
    let router = metrics_router(metrics.clone());
    let exporter = tokio::spawn(async move { axum::serve(listener, router).await });

    tokio::select! {
        summary = run_load(plan, metrics) => {
            let summary = summary?;
            println!(
                "requests={} successes={} failures={}",
                summary.requests, summary.successes, summary.failures
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping load");
        }
    }

    exporter.abort();
    Ok(())
}
