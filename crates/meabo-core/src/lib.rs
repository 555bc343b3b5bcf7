//! # meabo-core - Phase-Based Micro-Architectural Benchmark
//!
//! Runs ten fixed computational phases, each stressing a different part of
//! the machine (ALU mixes, streaming bandwidth, pointer chasing, reductions,
//! sparse access, random writes), under per-phase thread placement.
//!
//! ## Architecture
//!
//! ### Placement
//!
//! Every phase has an [`AffinityMask`]. The mask decides how many workers a
//! phase gets ([`resolve_thread_count`]) and which CPUs they may run on
//! ([`AffinityBinder`]). Workers either share the whole eligible set or are
//! pinned one CPU each ([`BindMode`]).
//!
//! ### Execution
//!
//! - **Region**: [`KernelRunner::launch`] builds a fork-join [`Region`] of
//!   exactly the resolved worker count; every worker binds before any starts.
//! - **Kernels**: each phase is a [`PhaseKernel`] owning its buffers, stored
//!   as [`PhaseData`] in a seeded [`Workload`].
//! - **Timing**: only [`PhaseKernel::execute`] is timed. Pool creation,
//!   reference copies and validation stay outside.
//!
//! ### Validation
//!
//! [`ValidationEngine`] checks outputs in one of three modes:
//!
//! - **None**: no checks
//! - **Full**: deep copy before the run, serial re-execution afterwards
//! - **Reduced**: per-write shadow buffers compared after the run
//!
//! A mismatch is data ([`ValidationRecord`]), never an error.
//!
//! ## Example
//!
//! ```no_run
//! use meabo_core::{BenchConfig, PhaseOrchestrator, PhaseSelector, Workload, WorkloadConfig};
//!
//! # fn main() -> meabo_core::Result<()> {
//! let config = BenchConfig::default();
//! let mut workload = Workload::generate(&WorkloadConfig::default(), PhaseSelector::ALL)?;
//! let summary = PhaseOrchestrator::new(config)?.run(&mut workload)?;
//! assert!(summary.all_passed());
//! # Ok(())
//! # }
//! ```

pub mod affinity;
pub mod config;
pub mod error;
pub mod kernels;
pub mod orchestrator;
pub mod phase;
pub mod probes;
pub mod report;
pub mod runner;
pub mod validation;
pub mod workload;

pub use affinity::{
    resolve_thread_count, AffinityBinder, AffinityMask, AffinitySink, BindAction, BindMode, BindTarget, NoAffinity,
    OsAffinity, RecordingAffinity,
};
pub use config::{BenchConfig, FeatureFlags, WorkloadConfig, DEFAULT_ITERATIONS};
pub use error::{Error, Result};
pub use kernels::{Output, OutputValues, PhaseData, PhaseKernel, ShadowSet};
pub use orchestrator::{PhaseOrchestrator, PhaseState};
pub use phase::{PhaseId, PhaseSelector, PHASE_COUNT};
pub use probes::{EnergyProbe, PhaseProbe, ProbeSet, ResourceUsageProbe, Sample};
pub use report::{CollectingReporter, PhaseReport, ReportSink, RunSummary, TracingReporter};
pub use runner::{KernelRunner, Launch, Region, WorkerContext};
pub use validation::{Mismatch, ValidationEngine, ValidationMode, ValidationOutcome, ValidationRecord, Value};
pub use workload::Workload;
