//! Performance-focused tracing utilities
//!
//! Phase timings, bandwidth and affinity decisions are emitted as
//! structured events through the helpers in this module so that every
//! consumer logs them with identical field names.
//!
//! ## Example
//!
//! ```rust
//! use meabo_tracing::performance::{record_phase_timing, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("workload_generation", Some(100));
//! // ... do work ...
//! drop(span); // Logs only if duration > 100μs
//!
//! record_phase_timing("vector_add", 4, 1_250_000);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;

static PERFORMANCE_TRACING: AtomicBool = AtomicBool::new(true);
// u64::MAX encodes "no global threshold".
static GLOBAL_THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Toggle process-wide logging of [`PerformanceSpan`] guards.
///
/// Called by [`crate::init_global_tracing`]; spans created while disabled are
/// still timed but never emit their completion event.
pub fn set_performance_tracing(enabled: bool, threshold_us: Option<u64>) {
    PERFORMANCE_TRACING.store(enabled, Ordering::Relaxed);
    GLOBAL_THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Whether performance spans currently log on drop.
pub fn performance_tracing_enabled() -> bool {
    PERFORMANCE_TRACING.load(Ordering::Relaxed)
}

fn global_threshold_us() -> Option<u64> {
    match GLOBAL_THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        threshold => Some(threshold),
    }
}

/// RAII guard that measures span duration and conditionally logs based on threshold.
///
/// The span is timed from creation and logged when dropped, but only if the
/// duration reaches the threshold. A span without its own threshold inherits
/// the process-wide one configured through `MEABO_PERF_THRESHOLD_US`.
///
/// # Example
///
/// ```rust
/// use meabo_tracing::performance::PerformanceSpan;
///
/// {
///     let _span = PerformanceSpan::new("reference_copy", Some(1000));
///     // ... operation code ...
/// } // Span logged only if duration > 1000μs
/// ```
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a new performance span with optional threshold filtering.
    ///
    /// # Arguments
    ///
    /// * `span_name` - Name of the operation being measured
    /// * `threshold_us` - Minimum duration in microseconds to log (None = global threshold)
    pub fn new(span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, span_name, threshold_us)
    }

    /// Create a new performance span at the specified tracing level.
    pub fn with_level(level: Level, span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = span_name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    /// Time work inside an existing span, typically one carrying extra
    /// fields built by [`perf_span!`](crate::perf_span).
    pub fn in_span(span: tracing::Span, span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self {
            name: span_name.into(),
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the elapsed time since span creation.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter this span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    fn should_log(&self, elapsed_us: u64) -> bool {
        performance_tracing_enabled() && self.threshold_us.or_else(global_threshold_us).is_none_or(|t| elapsed_us >= t)
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();

        if self.should_log(elapsed_us) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record the timed region of one benchmark phase.
///
/// # Example
///
/// ```rust
/// use meabo_tracing::performance::record_phase_timing;
///
/// record_phase_timing("dense_matvec", 8, 2_000_000);
/// ```
pub fn record_phase_timing(phase: &str, threads: usize, duration_ns: u64) {
    tracing::debug!(
        event = "phase_timing",
        phase = phase,
        threads = threads,
        duration_ns = duration_ns,
        duration_ms = duration_ns as f64 / 1_000_000.0,
        "phase_timing"
    );
}

/// Record the effective memory bandwidth of a streaming phase.
///
/// # Arguments
///
/// * `phase` - Phase name
/// * `bytes` - Bytes read plus bytes written over all iterations
/// * `duration_ns` - Timed region in nanoseconds
pub fn record_bandwidth(phase: &str, bytes: u64, duration_ns: u64) {
    let bandwidth_mbps = if duration_ns > 0 {
        (bytes as f64 / duration_ns as f64) * 1_000_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "bandwidth",
        phase = phase,
        bytes = bytes,
        mb = bytes as f64 / (1024.0 * 1024.0),
        duration_ns = duration_ns,
        bandwidth_mbps = bandwidth_mbps,
        bandwidth_gbps = bandwidth_mbps / 1024.0,
        "phase_bandwidth"
    );
}

/// Record an affinity decision for one worker of a parallel region.
pub fn record_binding(worker: usize, action: &str) {
    tracing::trace!(event = "binding", worker = worker, action = action, "worker_binding");
}
