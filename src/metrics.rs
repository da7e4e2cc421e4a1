use std::time::Duration;

use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

pub const REQUEST_SUCCESS_TOTAL: &str = "vllm_request_success_total";
pub const REQUEST_FAILURE_TOTAL: &str = "vllm_request_failure_total";
pub const REQUEST_LATENCY_SECONDS: &str = "vllm_request_latency_seconds";
pub const TIME_TO_FIRST_TOKEN_SECONDS: &str = "vllm_time_to_first_token_seconds";
pub const GENERATION_TOKENS_TOTAL: &str = "vllm_generation_tokens_total";
pub const PROMPT_TOKENS_TOTAL: &str = "vllm_prompt_tokens_total";
pub const GPU_CACHE_USAGE_PERC: &str = "vllm_gpu_cache_usage_perc";

/// Upper bounds, in seconds, shared by the latency and first-token histograms.
pub const LATENCY_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Instruments recorded by the generate handler, kept in a private registry.
///
/// Names and histogram buckets follow the vLLM exporter.
pub struct Metrics {
    registry: Registry,
    request_success: IntCounter,
    request_failure: IntCounter,
    request_latency: Histogram,
    time_to_first_token: Histogram,
    generation_tokens: IntCounter,
    prompt_tokens: IntCounter,
    gpu_cache_usage: Gauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let request_success =
            IntCounter::new(REQUEST_SUCCESS_TOTAL, "Total successful requests")?;
        let request_failure = IntCounter::new(REQUEST_FAILURE_TOTAL, "Total failed requests")?;
        let request_latency = Histogram::with_opts(
            HistogramOpts::new(REQUEST_LATENCY_SECONDS, "Request latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let time_to_first_token = Histogram::with_opts(
            HistogramOpts::new(TIME_TO_FIRST_TOKEN_SECONDS, "Time to first token in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let generation_tokens =
            IntCounter::new(GENERATION_TOKENS_TOTAL, "Total tokens generated")?;
        let prompt_tokens = IntCounter::new(PROMPT_TOKENS_TOTAL, "Total prompt tokens")?;
        let gpu_cache_usage = Gauge::new(GPU_CACHE_USAGE_PERC, "GPU cache usage percentage")?;

        registry.register(Box::new(request_success.clone()))?;
        registry.register(Box::new(request_failure.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(time_to_first_token.clone()))?;
        registry.register(Box::new(generation_tokens.clone()))?;
        registry.register(Box::new(prompt_tokens.clone()))?;
        registry.register(Box::new(gpu_cache_usage.clone()))?;

        Ok(Self {
            registry,
            request_success,
            request_failure,
            request_latency,
            time_to_first_token,
            generation_tokens,
            prompt_tokens,
            gpu_cache_usage,
        })
    }

    pub fn record_success(
        &self,
        latency: Duration,
        time_to_first_token: Duration,
        tokens_generated: usize,
        prompt_tokens: usize,
    ) {
        self.request_success.inc();
        self.request_latency.observe(latency.as_secs_f64());
        self.time_to_first_token
            .observe(time_to_first_token.as_secs_f64());
        self.generation_tokens.inc_by(tokens_generated as u64);
        self.prompt_tokens.inc_by(prompt_tokens as u64);
    }

    pub fn record_failure(&self) {
        self.request_failure.inc();
    }

    pub fn set_cache_usage(&self, usage: f64) {
        self.gpu_cache_usage.set(usage);
    }

    pub fn success_count(&self) -> u64 {
        self.request_success.get()
    }

    pub fn failure_count(&self) -> u64 {
        self.request_failure.get()
    }

    pub fn tokens_generated(&self) -> u64 {
        self.generation_tokens.get()
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens.get()
    }

    pub fn render(&self) -> prometheus::Result<String> {
        encode_text(&self.registry)
    }
}

/// Content type of [`encode_text`] output.
pub fn text_content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

/// Serializes a registry in the Prometheus text exposition format.
pub fn encode_text(registry: &Registry) -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_value(body: &str, name: &str) -> f64 {
        body.lines()
            .find_map(|line| {
                let (metric, value) = line.split_once(' ')?;
                (metric == name).then(|| value.parse::<f64>().ok()).flatten()
            })
            .unwrap_or_else(|| panic!("{name} missing from exposition:\n{body}"))
    }

    #[test]
    fn every_instrument_is_exported_before_any_traffic() {
        let metrics = Metrics::new().unwrap();
        let body = metrics.render().unwrap();
        for name in [
            REQUEST_SUCCESS_TOTAL,
            REQUEST_FAILURE_TOTAL,
            GENERATION_TOKENS_TOTAL,
            PROMPT_TOKENS_TOTAL,
            GPU_CACHE_USAGE_PERC,
        ] {
            assert_eq!(sample_value(&body, name), 0.0);
        }
        assert_eq!(
            sample_value(&body, &format!("{REQUEST_LATENCY_SECONDS}_count")),
            0.0
        );
        assert_eq!(
            sample_value(&body, &format!("{TIME_TO_FIRST_TOKEN_SECONDS}_count")),
            0.0
        );
    }

    #[test]
    fn success_updates_counters_and_histograms() {
        let metrics = Metrics::new().unwrap();
        metrics.record_success(Duration::from_millis(250), Duration::from_millis(40), 7, 3);
        metrics.record_success(Duration::from_millis(500), Duration::from_millis(60), 5, 2);

        assert_eq!(metrics.success_count(), 2);
        assert_eq!(metrics.failure_count(), 0);
        assert_eq!(metrics.tokens_generated(), 12);
        assert_eq!(metrics.prompt_tokens(), 5);

        let body = metrics.render().unwrap();
        assert_eq!(
            sample_value(&body, &format!("{REQUEST_LATENCY_SECONDS}_count")),
            2.0
        );
        let sum = sample_value(&body, &format!("{REQUEST_LATENCY_SECONDS}_sum"));
        assert!((sum - 0.75).abs() < 1e-9);
    }

    #[test]
    fn latency_histograms_export_exporter_buckets() {
        let metrics = Metrics::new().unwrap();
        metrics.record_success(Duration::from_millis(70), Duration::from_millis(70), 1, 1);
        let body = metrics.render().unwrap();

        for name in [REQUEST_LATENCY_SECONDS, TIME_TO_FIRST_TOKEN_SECONDS] {
            for le in ["0.075", "0.75", "7.5", "+Inf"] {
                let bucket = format!("{name}_bucket{{le=\"{le}\"}}");
                assert_eq!(sample_value(&body, &bucket), 1.0, "{bucket}");
            }
            let below = format!("{name}_bucket{{le=\"0.05\"}}");
            assert_eq!(sample_value(&body, &below), 0.0);
        }
    }

    #[test]
    fn failure_only_touches_the_failure_counter() {
        let metrics = Metrics::new().unwrap();
        metrics.record_failure();
        assert_eq!(metrics.failure_count(), 1);
        assert_eq!(metrics.success_count(), 0);
        assert_eq!(metrics.tokens_generated(), 0);
    }

    #[test]
    fn cache_gauge_is_overwritten() {
        let metrics = Metrics::new().unwrap();
        metrics.set_cache_usage(0.5);
        metrics.set_cache_usage(0.25);
        let body = metrics.render().unwrap();
        assert_eq!(sample_value(&body, GPU_CACHE_USAGE_PERC), 0.25);
    }

    #[test]
    fn content_type_is_text_format_004() {
        assert!(text_content_type().starts_with("text/plain"));
        assert!(text_content_type().contains("version=0.0.4"));
    }
}
