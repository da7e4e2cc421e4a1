//! Synthetic traffic against `POST /generate`.
//!
//! Simulated users pick a weighted traffic class and a random prompt, time the
//! call from the client side, and publish what they observe through a separate
//! Prometheus registry.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, Registry};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use tracing::{info, warn};

use crate::{metrics, model::GenerationResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficClass {
    pub name: &'static str,
    pub max_tokens: usize,
    pub weight: u32,
}

pub const TRAFFIC_CLASSES: [TrafficClass; 3] = [
    TrafficClass {
        name: "short_gen",
        max_tokens: 50,
        weight: 10,
    },
    TrafficClass {
        name: "medium_gen",
        max_tokens: 150,
        weight: 5,
    },
    TrafficClass {
        name: "long_gen",
        max_tokens: 300,
        weight: 2,
    },
];

pub const PROMPTS: [&str; 10] = [
    "Explain quantum computing in simple terms",
    "Write a short story about a robot learning to paint",
    "What are the key differences between supervised and unsupervised learning?",
    "Describe the process of photosynthesis",
    "How does blockchain technology work?",
    "What is the theory of relativity?",
    "Explain neural networks to a beginner",
    "What are the main causes of climate change?",
    "Describe the water cycle",
    "How do vaccines work?",
];

const TEMPERATURE: f64 = 0.7;
const TOP_P: f64 = 0.9;

#[derive(Debug, Clone, Parser)]
#[command(name = "loadgen", about = "Drive synthetic traffic against the generate endpoint")]
pub struct LoadGenArgs {
    /// Base URL of the serving façade.
    #[arg(long, env = "LOADGEN_HOST", default_value = "http://localhost:8000")]
    pub host: String,
    /// Concurrent simulated users.
    #[arg(long, env = "LOADGEN_USERS", default_value_t = 10)]
    pub users: usize,
    #[arg(long, env = "LOADGEN_DURATION_SECS", default_value_t = 60)]
    pub duration_secs: u64,
    #[arg(long, env = "LOADGEN_MIN_WAIT_SECS", default_value_t = 0.5)]
    pub min_wait_secs: f64,
    #[arg(long, env = "LOADGEN_MAX_WAIT_SECS", default_value_t = 2.0)]
    pub max_wait_secs: f64,
    /// Client-side request timeout; server-side work is not cancelled.
    #[arg(long, env = "LOADGEN_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,
    #[arg(long, env = "LOADGEN_METRICS_ADDR", default_value = "0.0.0.0:8089")]
    pub metrics_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub host: String,
    pub users: usize,
    pub duration: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub timeout: Duration,
    pub classes: Vec<TrafficClass>,
}

impl LoadGenArgs {
    pub fn plan(&self) -> anyhow::Result<LoadPlan> {
        if self.users == 0 {
            anyhow::bail!("--users must be at least 1");
        }
        if !(self.min_wait_secs >= 0.0 && self.min_wait_secs <= self.max_wait_secs) {
            anyhow::bail!("wait range must satisfy 0 <= min <= max");
        }
        Ok(LoadPlan {
            host: self.host.clone(),
            users: self.users,
            duration: Duration::from_secs(self.duration_secs),
            min_wait: Duration::from_secs_f64(self.min_wait_secs),
            max_wait: Duration::from_secs_f64(self.max_wait_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            classes: TRAFFIC_CLASSES.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { tokens: u64, latency: Duration },
    Failure { reason: String },
}

pub struct LoadMetrics {
    registry: Registry,
    requests: IntCounter,
    success: IntCounter,
    failure: IntCounter,
    latency: Histogram,
    ttft: Histogram,
    tokens_per_second: Gauge,
}

impl LoadMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let requests = IntCounter::new("benchmark_requests_total", "Total benchmark requests")?;
        let success =
            IntCounter::new("benchmark_success_total", "Successful benchmark requests")?;
        let failure = IntCounter::new("benchmark_failure_total", "Failed benchmark requests")?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "benchmark_latency_seconds",
            "Benchmark request latency",
        ))?;
        let ttft = Histogram::with_opts(HistogramOpts::new(
            "benchmark_ttft_seconds",
            "Benchmark time to first token",
        ))?;
        let tokens_per_second =
            Gauge::new("benchmark_tokens_per_second", "Tokens generated per second")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(success.clone()))?;
        registry.register(Box::new(failure.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(ttft.clone()))?;
        registry.register(Box::new(tokens_per_second.clone()))?;

        Ok(Self {
            registry,
            requests,
            success,
            failure,
            latency,
            ttft,
            tokens_per_second,
        })
    }

    pub fn start_request(&self) {
        self.requests.inc();
    }

    pub fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Success { tokens, latency } => {
                let secs = latency.as_secs_f64();
                self.success.inc();
                self.latency.observe(secs);
                // Client-side approximation: no streaming, so spread latency evenly.
                if *tokens > 0 && secs > 0.0 {
                    self.tokens_per_second.set(*tokens as f64 / secs);
                    self.ttft.observe(secs / *tokens as f64);
                }
            }
            Outcome::Failure { .. } => self.failure.inc(),
        }
    }

    pub fn summary(&self) -> LoadSummary {
        LoadSummary {
            requests: self.requests.get(),
            successes: self.success.get(),
            failures: self.failure.get(),
        }
    }

    pub fn tokens_per_second(&self) -> f64 {
        self.tokens_per_second.get()
    }

    pub fn render(&self) -> prometheus::Result<String> {
        metrics::encode_text(&self.registry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Serialize)]
struct GeneratePayload<'a> {
    prompt: &'a str,
    max_tokens: usize,
    temperature: f64,
    top_p: f64,
}

pub struct LoadClient {
    http: reqwest::Client,
    generate_url: String,
}

impl LoadClient {
    pub fn new(host: &str, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            generate_url: format!("{}/generate", host.trim_end_matches('/')),
        })
    }

    pub async fn generate(&self, prompt: &str, max_tokens: usize) -> Outcome {
        let payload = GeneratePayload {
            prompt,
            max_tokens,
            temperature: TEMPERATURE,
            top_p: TOP_P,
        };

        let started = Instant::now();
        let response = match self.http.post(&self.generate_url).json(&payload).send().await {
            Ok(response) => response,
            Err(err) => {
                return Outcome::Failure {
                    reason: err.to_string(),
                };
            }
        };
        // Clock stops at the response head, before the body is read.
        let latency = started.elapsed();

        if response.status() != StatusCode::OK {
            return Outcome::Failure {
                reason: format!("status {}", response.status()),
            };
        }
        match response.json::<GenerationResponse>().await {
            Ok(body) => Outcome::Success {
                tokens: body.tokens_generated as u64,
                latency,
            },
            Err(err) => Outcome::Failure {
                reason: err.to_string(),
            },
        }
    }
}

/// Draws a class with probability proportional to its weight.
pub fn pick_class<'a, R: Rng>(rng: &mut R, classes: &'a [TrafficClass]) -> &'a TrafficClass {
    let total: u32 = classes.iter().map(|c| c.weight).sum();
    if total == 0 {
        return &classes[0];
    }
    let mut roll = rng.random_range(0..total);
    for class in classes {
        if roll < class.weight {
            return class;
        }
        roll -= class.weight;
    }
    &classes[classes.len() - 1]
}

/// Runs every simulated user until the plan's duration elapses.
pub async fn run_load(plan: LoadPlan, metrics: Arc<LoadMetrics>) -> anyhow::Result<LoadSummary> {
    if plan.classes.is_empty() {
        anyhow::bail!("at least one traffic class is required");
    }
    let client = Arc::new(LoadClient::new(&plan.host, plan.timeout)?);
    let plan = Arc::new(plan);
    let deadline = Instant::now() + plan.duration;

    info!(host = %plan.host, users = plan.users, duration = ?plan.duration, "starting load");
    let users: Vec<_> = (0..plan.users)
        .map(|user| {
            tokio::spawn(run_user(
                user,
                client.clone(),
                metrics.clone(),
                plan.clone(),
                deadline,
            ))
        })
        .collect();
    for handle in futures::future::join_all(users).await {
        if let Err(err) = handle {
            warn!(error = %err, "simulated user aborted");
        }
    }

    let summary = metrics.summary();
    info!(
        requests = summary.requests,
        successes = summary.successes,
        failures = summary.failures,
        "load finished"
    );
    Ok(summary)
}

async fn run_user(
    user: usize,
    client: Arc<LoadClient>,
    metrics: Arc<LoadMetrics>,
    plan: Arc<LoadPlan>,
    deadline: Instant,
) {
    let mut rng = StdRng::from_os_rng();
    while Instant::now() < deadline {
        let class = *pick_class(&mut rng, &plan.classes);
        let prompt = PROMPTS[rng.random_range(0..PROMPTS.len())];

        metrics.start_request();
        let outcome = client.generate(prompt, class.max_tokens).await;
        metrics.record(&outcome);

        match &outcome {
            Outcome::Success { tokens, latency } => info!(
                user,
                class = class.name,
                tokens,
                latency_s = latency.as_secs_f64(),
                "request ok"
            ),
            Outcome::Failure { reason } => warn!(user, class = class.name, %reason, "request failed"),
        }

        let wait = if plan.max_wait > plan.min_wait {
            Duration::from_secs_f64(
                rng.random_range(plan.min_wait.as_secs_f64()..=plan.max_wait.as_secs_f64()),
            )
        } else {
            plan.min_wait
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(wait.min(remaining)).await;
    }
}

pub fn metrics_router(metrics: Arc<LoadMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(load): State<Arc<LoadMetrics>>) -> Response {
    match load.render() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_drawn_in_proportion_to_weight() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = [0usize; 3];
        let draws = 17_000;
        for _ in 0..draws {
            let class = pick_class(&mut rng, &TRAFFIC_CLASSES);
            let idx = TRAFFIC_CLASSES.iter().position(|c| c == class).unwrap();
            counts[idx] += 1;
        }
        // Expected 10000 / 5000 / 2000.
        assert!((9_500..10_500).contains(&counts[0]), "{counts:?}");
        assert!((4_600..5_400).contains(&counts[1]), "{counts:?}");
        assert!((1_700..2_300).contains(&counts[2]), "{counts:?}");
    }

    #[test]
    fn zero_weight_class_is_never_drawn() {
        let classes = [
            TrafficClass {
                name: "never",
                max_tokens: 1,
                weight: 0,
            },
            TrafficClass {
                name: "always",
                max_tokens: 2,
                weight: 3,
            },
        ];
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            assert_eq!(pick_class(&mut rng, &classes).name, "always");
        }
    }

    #[test]
    fn success_sets_throughput_and_spreads_latency() {
        let metrics = LoadMetrics::new().unwrap();
        metrics.start_request();
        metrics.record(&Outcome::Success {
            tokens: 10,
            latency: Duration::from_secs(2),
        });
        assert_eq!(metrics.tokens_per_second(), 5.0);
        assert_eq!(
            metrics.summary(),
            LoadSummary {
                requests: 1,
                successes: 1,
                failures: 0
            }
        );
        let body = metrics.render().unwrap();
        assert!(body.contains("benchmark_ttft_seconds_sum 0.2"));
    }

    #[test]
    fn zero_token_success_leaves_throughput_untouched() {
        let metrics = LoadMetrics::new().unwrap();
        metrics.record(&Outcome::Success {
            tokens: 0,
            latency: Duration::from_millis(300),
        });
        assert_eq!(metrics.tokens_per_second(), 0.0);
        assert!(metrics.render().unwrap().contains("benchmark_ttft_seconds_count 0"));
    }

    #[test]
    fn failures_are_counted() {
        let metrics = LoadMetrics::new().unwrap();
        metrics.start_request();
        metrics.record(&Outcome::Failure {
            reason: "status 503".into(),
        });
        assert_eq!(metrics.summary().failures, 1);
        assert_eq!(metrics.summary().successes, 0);
    }

    #[test]
    fn invalid_wait_range_is_rejected() {
        let args = LoadGenArgs::parse_from([
            "loadgen",
            "--min-wait-secs",
            "3",
            "--max-wait-secs",
            "1",
        ]);
        assert!(args.plan().is_err());

        let args = LoadGenArgs::parse_from(["loadgen", "--users", "4"]);
        let plan = args.plan().unwrap();
        assert_eq!(plan.users, 4);
        assert_eq!(plan.classes, TRAFFIC_CLASSES.to_vec());
        assert_eq!(plan.timeout, Duration::from_secs(60));
    }
}
