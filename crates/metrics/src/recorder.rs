use {anyhow::Result, metrics_exporter_prometheus::PrometheusHandle, tracing::info};

/// Handle to the installed recorder; renders the `/metrics` payload.
#[derive(Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }
}

/// Install the global Prometheus recorder. Call once at startup; a second
/// call fails because the `metrics` facade allows only one global recorder.
pub fn init_metrics() -> Result<MetricsHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(MetricsHandle { prometheus: handle })
}
