use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-wide metrics collector. Cheap to clone and share.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    translations_total: AtomicUsize,
    translation_errors: AtomicUsize,
    translation_latency_ms: RwLock<Vec<u64>>,

    images_processed: AtomicUsize,
    images_failed: AtomicUsize,
    regions_rendered: AtomicUsize,
    pipeline_latency_ms: RwLock<Vec<u64>>,

    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                translations_total: AtomicUsize::new(0),
                translation_errors: AtomicUsize::new(0),
                translation_latency_ms: RwLock::new(Vec::new()),
                images_processed: AtomicUsize::new(0),
                images_failed: AtomicUsize::new(0),
                regions_rendered: AtomicUsize::new(0),
                pipeline_latency_ms: RwLock::new(Vec::new()),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_translation(&self, duration: Duration) {
        self.inner.translations_total.fetch_add(1, Ordering::Relaxed);
        self.inner
            .translation_latency_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_translation_error(&self) {
        self.inner.translations_total.fetch_add(1, Ordering::Relaxed);
        self.inner.translation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image(&self, region_count: usize, duration: Duration) {
        self.inner.images_processed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .regions_rendered
            .fetch_add(region_count, Ordering::Relaxed);
        self.inner
            .pipeline_latency_ms
            .write()
            .push(duration.as_millis() as u64);
    }

    pub fn record_image_failure(&self) {
        self.inner.images_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let translation_latency = self.inner.translation_latency_ms.read();
        let translation_latency_avg = avg(&translation_latency);
        let translation_latency_p50 = percentile(&translation_latency, 0.5);
        let translation_latency_p95 = percentile(&translation_latency, 0.95);
        let translation_latency_p99 = percentile(&translation_latency, 0.99);
        drop(translation_latency);

        let pipeline_latency = self.inner.pipeline_latency_ms.read();
        let pipeline_latency_avg = avg(&pipeline_latency);
        let pipeline_latency_p95 = percentile(&pipeline_latency, 0.95);
        drop(pipeline_latency);

        MetricsSnapshot {
            translations_total: self.inner.translations_total.load(Ordering::Relaxed),
            translation_errors: self.inner.translation_errors.load(Ordering::Relaxed),
            translation_latency_avg_ms: translation_latency_avg,
            translation_latency_p50_ms: translation_latency_p50,
            translation_latency_p95_ms: translation_latency_p95,
            translation_latency_p99_ms: translation_latency_p99,
            images_processed: self.inner.images_processed.load(Ordering::Relaxed),
            images_failed: self.inner.images_failed.load(Ordering::Relaxed),
            regions_rendered: self.inner.regions_rendered.load(Ordering::Relaxed),
            pipeline_latency_avg_ms: pipeline_latency_avg,
            pipeline_latency_p95_ms: pipeline_latency_p95,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition for the /metrics endpoint.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP translations_total Total translation calls made
# TYPE translations_total counter
translations_total {{}} {}

# HELP translation_errors_total Failed translation calls
# TYPE translation_errors_total counter
translation_errors_total {{}} {}

# HELP translation_latency_avg_ms Average translation latency in milliseconds
# TYPE translation_latency_avg_ms gauge
translation_latency_avg_ms {{}} {}

# HELP images_processed_total Images translated end to end
# TYPE images_processed_total counter
images_processed_total {{}} {}

# HELP images_failed_total Images that failed the pipeline
# TYPE images_failed_total counter
images_failed_total {{}} {}

# HELP regions_rendered_total Text regions rendered across all images
# TYPE regions_rendered_total counter
regions_rendered_total {{}} {}

# HELP pipeline_latency_avg_ms Average end-to-end pipeline latency in milliseconds
# TYPE pipeline_latency_avg_ms gauge
pipeline_latency_avg_ms {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.translations_total,
            snapshot.translation_errors,
            snapshot.translation_latency_avg_ms,
            snapshot.images_processed,
            snapshot.images_failed,
            snapshot.regions_rendered,
            snapshot.pipeline_latency_avg_ms,
            snapshot.uptime_seconds,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub translations_total: usize,
    pub translation_errors: usize,
    pub translation_latency_avg_ms: u64,
    pub translation_latency_p50_ms: u64,
    pub translation_latency_p95_ms: u64,
    pub translation_latency_p99_ms: u64,
    pub images_processed: usize,
    pub images_failed: usize,
    pub regions_rendered: usize,
    pub pipeline_latency_avg_ms: u64,
    pub pipeline_latency_p95_ms: u64,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
