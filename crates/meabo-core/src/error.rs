//! Error types for meabo-core operations

use crate::phase::PhaseId;

/// Result type for meabo-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running benchmark phases.
///
/// Everything here except [`Error::Probe`] is fatal to a run. Validation
/// mismatches are not errors; they travel as
/// [`ValidationRecord`](crate::validation::ValidationRecord) data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OS rejected a thread affinity request
    #[error("failed to bind {target} to its CPU set: {source}")]
    Affinity {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Binding was requested on a platform without thread affinity support
    #[error("thread affinity is not supported on this platform")]
    AffinityUnsupported,

    /// Pin mode asked for a CPU index beyond the mask's set bits
    #[error("worker {worker} has no CPU to pin to: mask only has {available} eligible CPUs")]
    WorkerOutsideMask { worker: usize, available: usize },

    /// Worker pool construction failed
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A validation buffer could not be allocated
    #[error("failed to allocate {buffer}: requested {requested} elements")]
    Allocation { buffer: &'static str, requested: usize },

    /// Configuration values are inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A selected phase has no generated input buffers
    #[error("no workload was generated for phase {0}")]
    MissingWorkload(PhaseId),

    /// A hardware counter or energy probe failed
    #[error("probe failed: {0}")]
    Probe(String),
}

impl Error {
    /// Whether the error must abort the benchmark run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Probe(_))
    }
}

/// Allocate a vector of `len` copies of `value`, reporting failure as
/// [`Error::Allocation`] instead of aborting.
pub(crate) fn try_filled<T: Clone>(buffer: &'static str, len: usize, value: T) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| Error::Allocation { buffer, requested: len })?;
    data.resize(len, value);
    Ok(data)
}

/// Deep-copy a slice with fallible allocation.
pub(crate) fn try_copy<T: Clone>(buffer: &'static str, source: &[T]) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(source.len())
        .map_err(|_| Error::Allocation { buffer, requested: source.len() })?;
    data.extend_from_slice(source);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_errors_are_not_fatal() {
        assert!(!Error::Probe("counter unavailable".into()).is_fatal());
        assert!(Error::AffinityUnsupported.is_fatal());
        assert!(Error::WorkerOutsideMask { worker: 4, available: 3 }.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::WorkerOutsideMask { worker: 4, available: 3 };
        assert_eq!(
            err.to_string(),
            "worker 4 has no CPU to pin to: mask only has 3 eligible CPUs"
        );

        let err = Error::Affinity {
            target: "worker 2".into(),
            source: std::io::Error::from_raw_os_error(22),
        };
        assert!(err.to_string().starts_with("failed to bind worker 2"));
    }

    #[test]
    fn test_try_copy_and_filled() -> Result<()> {
        let copy = try_copy("reference", &[1.0, 2.0, 3.0])?;
        assert_eq!(copy, vec![1.0, 2.0, 3.0]);
        let filled = try_filled("shadow", 4, 7_i32)?;
        assert_eq!(filled, vec![7; 4]);
        Ok(())
    }

    #[test]
    fn test_try_filled_reports_allocation_failure() {
        let result = try_filled("shadow", usize::MAX, 0_u64);
        assert!(matches!(
            result,
            Err(Error::Allocation { buffer: "shadow", requested: usize::MAX })
        ));
    }
}
