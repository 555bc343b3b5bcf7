//! Convenience macros for performance tracing

/// Start a [`PerformanceSpan`](crate::performance::PerformanceSpan) whose
/// tracing span carries the given fields.
///
/// The guard logs its duration when dropped, inside the span, so the fields
/// appear on the completion event.
///
/// ```rust
/// use meabo_tracing::perf_span;
///
/// {
///     let _span = perf_span!("reference_copy", phase = 4, bytes = 4096);
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let name = $name;
        $crate::performance::PerformanceSpan::in_span(
            tracing::debug_span!("perf", name = %name, $($field = $value),+),
            name,
            None,
        )
    }};
}

/// Emit a debug event tagged with `event = $name`.
///
/// ```rust
/// use meabo_tracing::perf_event;
///
/// perf_event!("shadow_allocated", phase = 2, buffers = 1);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        tracing::debug!(event = $name, $($field = $value),+)
    };
}

/// Time a block, yielding `(result, duration_ns)`.
///
/// The measurement ends before the debug event is emitted, so logging cost
/// never lands in the returned duration.
///
/// ```rust
/// use meabo_tracing::timed_block;
///
/// let (sum, duration_ns) = timed_block!("sum", { (1..=100).sum::<i32>() });
/// assert_eq!(sum, 5050);
/// # let _ = duration_ns;
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_ns = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        tracing::debug!(operation = $name, duration_ns, "timed_block_complete");
        (result, duration_ns)
    }};
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_perf_span_without_fields() {
        let span = perf_span!("generate_workload");
        assert_eq!(span.name(), "generate_workload");
    }

    #[test]
    fn test_perf_span_with_fields_keeps_name() {
        let span = perf_span!(String::from("reference_copy"), phase = 3, elements = 10);
        assert_eq!(span.name(), "reference_copy");
    }

    #[test]
    fn test_perf_event_accepts_mixed_fields() {
        perf_event!("shadow_allocated", phase = 1, mode = "reduced");
    }

    #[test]
    fn test_timed_block_measures_block() {
        let (result, duration_ns) = timed_block!("sleep", {
            thread::sleep(Duration::from_millis(10));
            42
        });
        assert_eq!(result, 42);
        assert!(duration_ns >= 10_000_000);
    }

    #[test]
    fn test_timed_block_passes_errors_through() {
        let (result, _) = timed_block!("failing", { Result::<i32, &str>::Err("bind failed") });
        assert_eq!(result, Err("bind failed"));
    }
}
