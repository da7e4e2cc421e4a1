use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    error::ServiceError,
    metrics::{self, Metrics},
    model::{GenerationRequest, GenerationResponse, HealthResponse, ModelRegistry},
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(registry: Arc<ModelRegistry>, metrics: Arc<Metrics>) -> Router {
    let state = AppState { registry, metrics };

    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/metrics", get(render_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ServiceError> {
    if !state.registry.is_ready() {
        return Err(ServiceError::NotReady);
    }
    Ok(Json(HealthResponse {
        status: "healthy",
        model: state.registry.model_label().to_string(),
    }))
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationResponse>, ServiceError> {
    let started = Instant::now();
    request.validate()?;

    let timed = match state.registry.generate(&request).await {
        Ok(timed) => timed,
        Err(ServiceError::NotReady) => return Err(ServiceError::NotReady),
        Err(err) => {
            state.metrics.record_failure();
            warn!(error = %err, "generation failed");
            return Err(err);
        }
    };

    let tokens_generated = timed.output.tokens_generated();
    let generated_text = timed.output.text;

    state.metrics.record_success(
        started.elapsed(),
        timed.time_to_first_token,
        tokens_generated,
        request.approximate_prompt_tokens(),
    );

    Ok(Json(GenerationResponse {
        generated_text,
        tokens_generated,
    }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    if let Some(usage) = state.registry.cache_usage() {
        state.metrics.set_cache_usage(usage);
    }

    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, metrics::text_content_type())],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
