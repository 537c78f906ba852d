//! Tracing integration for structured logging and spans.

use crate::model::Calculation;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, Span, span};

static LOAD_SPANS: AtomicBool = AtomicBool::new(true);
static CALCULATION_SPANS: AtomicBool = AtomicBool::new(true);

/// Configuration for tracing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Whether to create spans for module loads.
    pub load_spans: bool,
    /// Whether to create spans for calculation dispatch.
    pub calculation_spans: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::all()
    }
}

impl TracingConfig {
    /// All spans enabled.
    pub fn all() -> Self {
        Self {
            load_spans: true,
            calculation_spans: true,
        }
    }

    /// Load spans only; calculation spans can be hot in fitting loops.
    pub fn minimal() -> Self {
        Self {
            load_spans: true,
            calculation_spans: false,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            load_spans: false,
            calculation_spans: false,
        }
    }

    /// Make this the process-wide configuration.
    pub fn apply(self) {
        LOAD_SPANS.store(self.load_spans, Ordering::Relaxed);
        CALCULATION_SPANS.store(self.calculation_spans, Ordering::Relaxed);
    }

    /// The configuration currently in effect.
    pub fn current() -> Self {
        Self {
            load_spans: LOAD_SPANS.load(Ordering::Relaxed),
            calculation_spans: CALCULATION_SPANS.load(Ordering::Relaxed),
        }
    }
}

/// Create a span for loading a module, labelled by its path or name.
#[inline]
pub fn span_load(module: impl fmt::Display) -> Span {
    if !LOAD_SPANS.load(Ordering::Relaxed) {
        return Span::none();
    }
    span!(Level::INFO, "load_module", module = %module)
}

/// Create a span for one calculation on `model`.
#[inline]
pub fn span_calculation(model: &str, calculation: Calculation) -> Span {
    if !CALCULATION_SPANS.load(Ordering::Relaxed) {
        return Span::none();
    }
    span!(
        Level::DEBUG,
        "calculate",
        model = %model,
        kind = calculation.as_str()
    )
}

/// Enter a load span and return its guard.
pub fn instrument_load(module: impl fmt::Display) -> tracing::span::EnteredSpan {
    span_load(module).entered()
}
