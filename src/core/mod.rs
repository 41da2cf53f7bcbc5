pub(crate) mod config;
pub(crate) mod metrics;
pub(crate) mod shutdown;
pub(crate) mod state;
pub(crate) mod telemetry;
pub(crate) mod time;
