use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);

    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!(
        "grading_tasks_created_total",
        "Grading tasks submitted to the grading API, by status"
    );
    metrics::describe_counter!(
        "grading_poll_outcomes_total",
        "Terminal outcomes of grading task pollers"
    );
    metrics::describe_gauge!("active_pollers", "Grading task pollers currently running");
    metrics::describe_counter!(
        "extraction_requests_total",
        "Image extraction calls to the model, by status"
    );
    metrics::describe_counter!("ledger_appends_total", "Result ledger appends, by status");
}
