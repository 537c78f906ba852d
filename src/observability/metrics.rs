//! Metrics collection using the `metrics` facade.

use crate::model::Calculation;
use metrics::{Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const MODULES_LOADED: &str = "sasplugin_modules_loaded";
const MODELS_CREATED: &str = "sasplugin_models_created";
const MODELS_DESTROYED: &str = "sasplugin_models_destroyed";
const LIVE_MODELS: &str = "sasplugin_live_models";
const CALCULATIONS: &str = "sasplugin_calculations";
const CALCULATION_POINTS: &str = "sasplugin_calculation_points";
const CALCULATION_TIME_NS: &str = "sasplugin_calculation_time_ns";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(MODULES_LOADED, Unit::Count, "Model modules loaded");
    metrics::describe_counter!(MODELS_CREATED, Unit::Count, "Native models created");
    metrics::describe_counter!(
        MODELS_DESTROYED,
        Unit::Count,
        "Native models destroyed, including unload sweeps"
    );
    metrics::describe_gauge!(LIVE_MODELS, Unit::Count, "Live native models");
    metrics::describe_counter!(CALCULATIONS, Unit::Count, "Calculations dispatched");
    metrics::describe_counter!(
        CALCULATION_POINTS,
        Unit::Count,
        "Points evaluated by calculations"
    );
    metrics::describe_histogram!(
        CALCULATION_TIME_NS,
        Unit::Nanoseconds,
        "Time spent inside the module per calculation"
    );
}

/// Record a successful module load.
#[inline]
pub fn record_module_loaded() {
    counter!(MODULES_LOADED).increment(1);
}

/// Record a native model creation.
///
/// The live gauge is shared by every factory in the process, so it moves
/// by deltas and is never set outright.
#[inline]
pub fn record_model_created() {
    counter!(MODELS_CREATED).increment(1);
    gauge!(LIVE_MODELS).increment(1.0);
}

/// Record `count` native model destructions.
#[inline]
pub fn record_model_destroyed(count: usize) {
    counter!(MODELS_DESTROYED).increment(count as u64);
    gauge!(LIVE_MODELS).decrement(count as f64);
}

/// Record one dispatched calculation.
#[inline]
pub fn record_calculation(calculation: Calculation, points: usize, duration: Duration) {
    let kind = calculation.as_str();
    counter!(CALCULATIONS, "kind" => kind).increment(1);
    counter!(CALCULATION_POINTS, "kind" => kind).increment(points as u64);
    histogram!(CALCULATION_TIME_NS, "kind" => kind).record(duration.as_nanos() as f64);
}
