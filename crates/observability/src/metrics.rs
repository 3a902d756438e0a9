//! Service counters and HTTP request metrics, exported in the Prometheus text
//! format.
//!
//! Handles are created once; incrementing them cannot fail, so recording a
//! metric never affects a job's outcome.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("metric exposition is not valid UTF-8")]
    Encoding,
}

/// Counters for submissions and job outcomes, plus per-route HTTP metrics.
#[derive(Clone, Debug)]
pub struct ServiceMetrics {
    registry: Registry,
    requests: IntCounter,
    jobs_processed: IntCounterVec,
    job_retries: IntCounterVec,
    http_requests: IntCounterVec,
    http_duration: HistogramVec,
}

impl ServiceMetrics {
    /// Register all counters on a fresh (non-global) registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests = IntCounter::with_opts(Opts::new(
            "api_requests_total",
            "Total job submission requests",
        ))?;
        registry.register(Box::new(requests.clone()))?;

        let jobs_processed = IntCounterVec::new(
            Opts::new("jobs_processed_total", "Total jobs processed, by status"),
            &["status"],
        )?;
        registry.register(Box::new(jobs_processed.clone()))?;

        let job_retries = IntCounterVec::new(
            Opts::new("job_retries_total", "Internal execute retries, by job type"),
            &["job_type"],
        )?;
        registry.register(Box::new(job_retries.clone()))?;

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests, by method, route and status"),
            &["method", "handler", "status"],
        )?;
        registry.register(Box::new(http_requests.clone()))?;

        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency, by method and route",
            ),
            &["method", "handler"],
        )?;
        registry.register(Box::new(http_duration.clone()))?;

        Ok(Self {
            registry,
            requests,
            jobs_processed,
            job_retries,
            http_requests,
            http_duration,
        })
    }

    pub fn record_request(&self) {
        self.requests.inc();
    }

    /// One increment per job reaching a terminal status.
    pub fn record_job_processed(&self, status: &str) {
        self.jobs_processed.with_label_values(&[status]).inc();
    }

    pub fn record_retry(&self, job_type: &str) {
        self.job_retries.with_label_values(&[job_type]).inc();
    }

    /// `handler` is the route template (`/v1/jobs/:id`), not the raw path.
    pub fn record_http(&self, method: &str, handler: &str, status: u16, elapsed: Duration) {
        self.http_requests
            .with_label_values(&[method, handler, &status.to_string()])
            .inc();
        self.http_duration
            .with_label_values(&[method, handler])
            .observe(elapsed.as_secs_f64());
    }

    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    pub fn jobs_processed(&self, status: &str) -> u64 {
        self.jobs_processed.with_label_values(&[status]).get()
    }

    pub fn retries(&self, job_type: &str) -> u64 {
        self.job_retries.with_label_values(&[job_type]).get()
    }

    pub fn http_requests(&self, method: &str, handler: &str, status: u16) -> u64 {
        self.http_requests
            .with_label_values(&[method, handler, &status.to_string()])
            .get()
    }

    pub fn http_observations(&self, method: &str, handler: &str) -> u64 {
        self.http_duration
            .with_label_values(&[method, handler])
            .get_sample_count()
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(MetricsError::Registration)?;
        String::from_utf8(buf).map_err(|_| MetricsError::Encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_exposed() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_request();
        metrics.record_request();
        metrics.record_job_processed("SUCCEEDED");
        metrics.record_job_processed("COMPENSATED");
        metrics.record_retry("hash");

        assert_eq!(metrics.requests(), 2);
        assert_eq!(metrics.jobs_processed("SUCCEEDED"), 1);
        assert_eq!(metrics.jobs_processed("FAILED"), 0);
        assert_eq!(metrics.retries("hash"), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("api_requests_total 2"));
        assert!(text.contains("jobs_processed_total{status=\"COMPENSATED\"} 1"));
        assert!(text.contains("job_retries_total{job_type=\"hash\"} 1"));
    }

    #[test]
    fn http_requests_are_counted_per_route_and_status() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_http("POST", "/v1/jobs", 200, Duration::from_millis(3));
        metrics.record_http("POST", "/v1/jobs", 400, Duration::from_millis(1));
        metrics.record_http("GET", "/v1/jobs/:id", 404, Duration::from_millis(2));

        assert_eq!(metrics.http_requests("POST", "/v1/jobs", 200), 1);
        assert_eq!(metrics.http_requests("POST", "/v1/jobs", 400), 1);
        assert_eq!(metrics.http_requests("GET", "/v1/jobs/:id", 200), 0);
        assert_eq!(metrics.http_observations("POST", "/v1/jobs"), 2);

        let text = metrics.render().unwrap();
        assert!(text.contains("http_requests_total{"));
        assert!(text.contains("http_request_duration_seconds_bucket{"));
        assert!(text.contains("http_request_duration_seconds_count{"));
    }

    #[test]
    fn instances_do_not_share_state() {
        let a = ServiceMetrics::new().unwrap();
        let b = ServiceMetrics::new().unwrap();
        a.record_request();
        assert_eq!(b.requests(), 0);
    }
}
