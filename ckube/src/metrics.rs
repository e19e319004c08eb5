//! The Prometheus metrics registry, exposed at
//! `GET /metrics`. Grounded on the original's `utils/prommonitor/metrics.go`
//! `up` gauge, generalized to the per-route request counters and
//! per-(cluster, gvr) watch reconnect counter this port reports.
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// The process's metrics registry and the metric families ckube reports.
pub struct Metrics {
    registry: Registry,
    /// Requests handled, by route/method/status code.
    pub requests_total: IntCounterVec,
    /// Request handling latency, by route.
    pub request_duration_seconds: HistogramVec,
    /// Watch stream reconnects, by cluster and resource.
    pub watch_reconnects_total: IntCounterVec,
}

impl Metrics {
    /// Build a fresh registry and register every metric family ckube reports,
    /// including the process collector and the `up` gauge.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("ckube_requests_total", "Requests handled, by route and outcome"),
            &["route", "method", "code"],
        )
        .expect("metric name and labels are valid");
        registry.register(Box::new(requests_total.clone())).expect("registered once");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("ckube_request_duration_seconds", "Request handling latency, by route"),
            &["route"],
        )
        .expect("metric name and labels are valid");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("registered once");

        let watch_reconnects_total = IntCounterVec::new(
            Opts::new("ckube_watch_reconnects_total", "Watch stream reconnects, by cluster and resource"),
            &["cluster", "gvr"],
        )
        .expect("metric name and labels are valid");
        registry
            .register(Box::new(watch_reconnects_total.clone()))
            .expect("registered once");

        let up = IntGaugeVec::new(Opts::new("up", "Component up status"), &["component"]).expect("metric name and labels are valid");
        up.with_label_values(&["ckube"]).set(1);
        registry.register(Box::new(up)).expect("registered once");

        let _ = registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()));

        Self {
            registry,
            requests_total,
            request_duration_seconds,
            watch_reconnects_total,
        }
    }

    /// Render every registered metric family in the Prometheus text
    /// exposition format.
    pub fn encode(&self) -> Vec<u8> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .expect("well-formed metric families always encode");
        buffer
    }

    /// Record one handled request's route, method, and resulting status code.
    pub fn observe_request(&self, route: &str, method: &str, code: u16, elapsed_seconds: f64) {
        self.requests_total.with_label_values(&[route, method, &code.to_string()]).inc();
        self.request_duration_seconds.with_label_values(&[route]).observe(elapsed_seconds);
    }

    /// Record a watch-engine reconnect for a (cluster, gvr) pair.
    pub fn observe_watch_reconnect(&self, cluster: &str, gvr: &str) {
        self.watch_reconnects_total.with_label_values(&[cluster, gvr]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_families() {
        let metrics = Metrics::new();
        metrics.observe_request("/healthy", "GET", 200, 0.001);
        let text = String::from_utf8(metrics.encode()).unwrap();
        assert!(text.contains("ckube_requests_total"));
        assert!(text.contains("up"));
    }
}
