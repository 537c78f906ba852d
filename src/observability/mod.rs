//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters, gauges, and histograms via the `metrics` facade
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `sasplugin_modules_loaded` | Counter | Modules successfully loaded |
//! | `sasplugin_models_created` | Counter | Native models created |
//! | `sasplugin_models_destroyed` | Counter | Native models destroyed, including unload sweeps |
//! | `sasplugin_live_models` | Gauge | Live native models across all factories |
//! | `sasplugin_calculations` | Counter | Calculations dispatched, by `kind` |
//! | `sasplugin_calculation_points` | Counter | Points evaluated, by `kind` |
//! | `sasplugin_calculation_time_ns` | Histogram | Time spent inside the module, by `kind` |
//!
//! No exporter is bundled; install any `metrics` recorder to collect them.
//!
//! ## Tracing
//!
//! Spans are emitted around module loads and calculation dispatch. They can
//! be switched off with [`TracingConfig`].
//!
//! ```rust,ignore
//! use sasplugin::observability::{TracingConfig, init_metrics};
//!
//! init_metrics();
//! TracingConfig::minimal().apply();
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{
    init_metrics, record_calculation, record_model_created, record_model_destroyed,
    record_module_loaded,
};

#[cfg(test)]
pub(crate) use metrics::testing;
pub use tracing_support::{TracingConfig, instrument_load, span_calculation, span_load};
