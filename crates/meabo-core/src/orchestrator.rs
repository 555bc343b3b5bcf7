//! Sequencing of the ten phases.
//!
//! For each selected phase, in ascending order, the orchestrator resolves the
//! worker count from the phase mask, binds its own thread to the phase's CPU
//! set, builds the parallel region, prepares validation, times the kernel,
//! validates and reports. Phases never overlap.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::affinity::{resolve_thread_count, AffinityBinder, BindMode, BindTarget};
use crate::config::BenchConfig;
use crate::error::{Error, Result};
use crate::kernels::{dispatch, PhaseKernel};
use crate::phase::PhaseId;
use crate::probes::ProbeSet;
use crate::report::{PhaseReport, ReportSink, RunSummary, TracingReporter};
use crate::runner::{KernelRunner, Launch};
use crate::validation::ValidationEngine;
use crate::workload::Workload;

/// Lifecycle of one phase. Each selected phase walks these in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseState {
    Pending,
    Resolving,
    Running,
    Validating,
    Reported,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseState::Pending => "pending",
            PhaseState::Resolving => "resolving",
            PhaseState::Running => "running",
            PhaseState::Validating => "validating",
            PhaseState::Reported => "reported",
        })
    }
}

fn transition(phase: PhaseId, state: PhaseState) {
    tracing::trace!(phase = %phase, state = %state, "phase state");
}

/// Runs the selected phases of a [`Workload`] under a [`BenchConfig`].
pub struct PhaseOrchestrator {
    config: BenchConfig,
    runner: KernelRunner,
    engine: ValidationEngine,
    probes: ProbeSet,
    reporter: Arc<dyn ReportSink>,
}

impl PhaseOrchestrator {
    /// Orchestrator with OS binding (when enabled), probes from the feature
    /// flags and tracing reports.
    pub fn new(config: BenchConfig) -> Result<Self> {
        let binder = if config.features.binding {
            AffinityBinder::os(config.num_cpus, config.bind_mode)
        } else {
            AffinityBinder::disabled(config.num_cpus)
        };
        let probes = ProbeSet::from_flags(&config.features);
        Ok(Self::with_binder(config, binder)?.with_probes(probes))
    }

    /// Orchestrator binding through `binder`, with no probes.
    pub fn with_binder(config: BenchConfig, binder: AffinityBinder) -> Result<Self> {
        config.validate()?;
        if binder.num_cpus() != config.num_cpus {
            return Err(Error::InvalidConfig(format!(
                "binder covers {} CPUs but the run is configured for {}",
                binder.num_cpus(),
                config.num_cpus
            )));
        }
        Ok(Self {
            engine: ValidationEngine::new(config.features.validation),
            runner: KernelRunner::new(binder),
            probes: ProbeSet::empty(),
            reporter: Arc::new(TracingReporter),
            config,
        })
    }

    pub fn with_probes(mut self, probes: ProbeSet) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ReportSink>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Worker count a phase will run with.
    ///
    /// An unconstrained mask without override falls back to `num_cpus`.
    pub fn thread_count(&self, phase: PhaseId) -> usize {
        match resolve_thread_count(self.config.thread_override, self.config.mask(phase), self.config.num_cpus) {
            0 => self.config.num_cpus,
            threads => threads,
        }
    }

    /// Run every selected phase in ascending order.
    ///
    /// Validation failures are reported and do not stop the run; binding,
    /// allocation and pool errors abort it.
    pub fn run(&mut self, workload: &mut Workload) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        tracing::info!(
            num_cpus = self.config.num_cpus,
            iterations = self.config.iterations,
            selector = self.config.selector.bits(),
            validation = %self.engine.mode(),
            bind_mode = %self.config.bind_mode,
            "benchmark run starting"
        );

        for phase in PhaseId::ALL {
            if !self.config.selector.selects(phase) {
                tracing::info!(phase = %phase, "phase not selected, skipping");
                continue;
            }
            let report = self.run_phase(phase, workload)?;
            summary.reports.push(report);
        }

        summary.total_ns = elapsed_ns(started);
        tracing::info!(
            phases = summary.reports.len(),
            total_ms = summary.total_ns as f64 / 1_000_000.0,
            failed_validations = summary.failed_validations().len(),
            "benchmark run complete"
        );
        Ok(summary)
    }

    /// Run a single phase regardless of the selector.
    pub fn run_phase(&mut self, phase: PhaseId, workload: &mut Workload) -> Result<PhaseReport> {
        transition(phase, PhaseState::Pending);
        let data = workload.get_mut(phase).ok_or(Error::MissingWorkload(phase))?;

        transition(phase, PhaseState::Resolving);
        let mask = self.config.mask(phase);
        let threads = self.thread_count(phase);
        self.runner
            .binder()
            .bind_with(mask, BindMode::WholeSet, BindTarget::Orchestrator)?;

        let launch = Launch {
            phase,
            threads,
            iterations: phase.effective_iterations(self.config.iterations),
            mask,
        };
        let report = dispatch!(data, kernel => self.run_kernel(kernel, launch))?;

        self.reporter.report(&report);
        transition(phase, PhaseState::Reported);
        Ok(report)
    }

    fn run_kernel<K: PhaseKernel>(&mut self, kernel: &mut K, launch: Launch) -> Result<PhaseReport> {
        let phase = launch.phase;
        let region = self.runner.launch(launch)?;
        let mut validation = self.engine.prepare(&*kernel, launch.threads)?;

        transition(phase, PhaseState::Running);
        self.probes.start(phase);
        let (executed, duration_ns) =
            meabo_tracing::timed_block!(phase.name(), { kernel.execute(&region, validation.shadow_mut()) });
        executed?;
        let samples = self.probes.stop(phase);
        drop(region);

        transition(phase, PhaseState::Validating);
        let record = validation.finish(kernel, launch.iterations)?;

        Ok(PhaseReport {
            phase,
            threads: launch.threads,
            iterations: launch.iterations,
            duration_ns,
            bytes: kernel.bytes_per_iteration().saturating_mul(launch.iterations as u64),
            validation: record,
            samples,
        })
    }
}

impl fmt::Debug for PhaseOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseOrchestrator")
            .field("config", &self.config)
            .field("runner", &self.runner)
            .field("engine", &self.engine)
            .field("probes", &self.probes)
            .finish_non_exhaustive()
    }
}

fn elapsed_ns(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::{AffinityMask, BindAction, RecordingAffinity};
    use crate::config::WorkloadConfig;
    use crate::phase::PhaseSelector;
    use crate::report::CollectingReporter;
    use crate::validation::{ValidationMode, ValidationOutcome};

    fn config(num_cpus: usize, selector: PhaseSelector) -> BenchConfig {
        let mut config = BenchConfig {
            num_cpus,
            selector,
            iterations: 5,
            ..BenchConfig::default()
        };
        config.features.binding = false;
        config
    }

    #[test]
    fn test_unconstrained_mask_falls_back_to_num_cpus() -> Result<()> {
        let mut config = config(3, PhaseSelector::ALL);
        config.set_mask(PhaseId::VectorAdd, AffinityMask::Unconstrained);
        config.set_mask(PhaseId::Reduction, AffinityMask::from_raw(0b110));
        let orchestrator = PhaseOrchestrator::with_binder(config, AffinityBinder::disabled(3))?;

        assert_eq!(orchestrator.thread_count(PhaseId::VectorAdd), 3);
        assert_eq!(orchestrator.thread_count(PhaseId::Reduction), 2);
        assert_eq!(orchestrator.thread_count(PhaseId::ComputeMix), 3);
        Ok(())
    }

    #[test]
    fn test_missing_workload_is_fatal() -> Result<()> {
        let config = config(2, PhaseSelector::only(PhaseId::Palindromes));
        let mut orchestrator = PhaseOrchestrator::with_binder(config, AffinityBinder::disabled(2))?;
        let mut workload = Workload::default();

        let err = orchestrator.run(&mut workload).unwrap_err();
        assert!(matches!(err, Error::MissingWorkload(PhaseId::Palindromes)));
        Ok(())
    }

    #[test]
    fn test_binder_size_must_match_config() {
        let config = config(4, PhaseSelector::ALL);
        let result = PhaseOrchestrator::with_binder(config, AffinityBinder::disabled(2));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_selected_phases_run_in_order_with_full_validation() -> Result<()> {
        let selector: PhaseSelector = [PhaseId::SparseMatVec, PhaseId::VectorAdd, PhaseId::Reduction]
            .into_iter()
            .collect();
        let mut config = config(2, selector);
        config.features.validation = ValidationMode::Full;
        let workload_config = WorkloadConfig::small();
        let mut workload = Workload::generate(&workload_config, selector)?;

        let reporter = Arc::new(CollectingReporter::new());
        let mut orchestrator =
            PhaseOrchestrator::with_binder(config, AffinityBinder::disabled(2))?.with_reporter(reporter.clone());
        let summary = orchestrator.run(&mut workload)?;

        let order = vec![PhaseId::Reduction, PhaseId::VectorAdd, PhaseId::SparseMatVec];
        assert_eq!(summary.phases().collect::<Vec<_>>(), order);
        assert_eq!(reporter.phases(), order);
        assert!(summary.all_passed());
        let sparse = summary.get(PhaseId::SparseMatVec).map(|r| r.iterations);
        assert_eq!(sparse, Some(1));
        Ok(())
    }

    #[test]
    fn test_orchestrator_binds_whole_set_before_workers_pin() -> Result<()> {
        let mut config = config(4, PhaseSelector::only(PhaseId::VectorAdd));
        config.set_mask(PhaseId::VectorAdd, AffinityMask::from_raw(0b1100));
        config.bind_mode = BindMode::Pin;
        let sink = Arc::new(RecordingAffinity::new());
        let binder = AffinityBinder::new(sink.clone(), 4, BindMode::Pin);
        let mut workload = Workload::generate(&WorkloadConfig::small(), config.selector)?;

        let mut orchestrator = PhaseOrchestrator::with_binder(config, binder)?;
        let report = orchestrator.run_phase(PhaseId::VectorAdd, &mut workload)?;

        assert_eq!(report.threads, 2);
        assert_eq!(report.validation.outcome, ValidationOutcome::Skipped);
        let records = sink.records();
        assert_eq!(records[0].target, BindTarget::Orchestrator);
        assert_eq!(records[0].action, BindAction::Set(0b1100));
        assert_eq!(
            sink.worker_actions(),
            vec![(0, BindAction::Pin(2)), (1, BindAction::Pin(3))]
        );
        Ok(())
    }
}
