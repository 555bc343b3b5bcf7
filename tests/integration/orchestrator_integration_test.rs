//! End-to-end runs of the phase orchestrator

use std::sync::Arc;

use meabo_core::runner::Partitioned;
use meabo_core::{
    AffinityBinder, AffinityMask, BenchConfig, BindAction, BindMode, BindTarget, CollectingReporter, KernelRunner,
    Launch, Output, PhaseId, PhaseKernel, PhaseOrchestrator, PhaseSelector, RecordingAffinity, Region, Result,
    ShadowSet, ValidationEngine, ValidationMode, ValidationOutcome, Workload, WorkloadConfig,
};

fn bench_config(num_cpus: usize, selector: PhaseSelector) -> BenchConfig {
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
fn test_zero_selector_runs_all_ten_phases() -> Result<()> {
    let config = bench_config(2, PhaseSelector::from_bits(0));
    let mut workload = Workload::generate(&WorkloadConfig::small(), config.selector)?;
    assert_eq!(workload.len(), 10);

    let reporter = Arc::new(CollectingReporter::new());
    let mut orchestrator =
        PhaseOrchestrator::with_binder(config, AffinityBinder::disabled(2))?.with_reporter(reporter.clone());
    let summary = orchestrator.run(&mut workload)?;

    assert_eq!(summary.phases().collect::<Vec<_>>(), PhaseId::ALL.to_vec());
    assert_eq!(reporter.phases(), PhaseId::ALL.to_vec());
    assert!(summary.reports.iter().all(|report| report.threads == 2));
    assert_eq!(summary.get(PhaseId::SparseMatVec).map(|r| r.iterations), Some(1));
    assert_eq!(summary.get(PhaseId::Palindromes).map(|r| r.iterations), Some(1));
    assert_eq!(summary.get(PhaseId::VectorAdd).map(|r| r.iterations), Some(5));
    Ok(())
}

#[test]
fn test_pin_mode_places_workers_on_mask_cpus() -> Result<()> {
    let mut config = bench_config(4, PhaseSelector::only(PhaseId::VectorAdd));
    config.set_mask(PhaseId::VectorAdd, AffinityMask::from_raw(0b1011));
    config.bind_mode = BindMode::Pin;

    let sink = Arc::new(RecordingAffinity::new());
    let binder = AffinityBinder::new(sink.clone(), 4, BindMode::Pin);
    let mut workload = Workload::generate(&WorkloadConfig::small(), config.selector)?;
    let summary = PhaseOrchestrator::with_binder(config, binder)?.run(&mut workload)?;

    assert_eq!(summary.get(PhaseId::VectorAdd).map(|r| r.threads), Some(3));
    assert_eq!(
        sink.worker_actions(),
        vec![(0, BindAction::Pin(0)), (1, BindAction::Pin(1)), (2, BindAction::Pin(3))]
    );
    Ok(())
}

#[test]
fn test_vector_add_full_validation_passes() -> Result<()> {
    let mut config = bench_config(4, PhaseSelector::only(PhaseId::VectorAdd));
    config.features.validation = ValidationMode::Full;
    let workload_config = WorkloadConfig {
        array_size: 1024,
        ..WorkloadConfig::small()
    };
    let mut workload = Workload::generate(&workload_config, config.selector)?;

    let summary = PhaseOrchestrator::with_binder(config, AffinityBinder::disabled(4))?.run(&mut workload)?;
    let report = summary.get(PhaseId::VectorAdd).cloned();

    assert_eq!(report.as_ref().map(|r| r.validation.outcome), Some(ValidationOutcome::Passed));
    assert_eq!(report.map(|r| r.bytes), Some(1024 * 4 * 8 * 5));
    Ok(())
}

#[test]
fn test_binding_failure_aborts_run() -> Result<()> {
    let config = bench_config(2, PhaseSelector::only(PhaseId::Reduction));
    let sink = Arc::new(RecordingAffinity::failing_for(BindTarget::Worker(1)));
    let binder = AffinityBinder::new(sink, 2, BindMode::WholeSet);
    let mut workload = Workload::generate(&WorkloadConfig::small(), config.selector)?;

    let result = PhaseOrchestrator::with_binder(config, binder)?.run(&mut workload);
    assert!(matches!(result, Err(meabo_core::Error::Affinity { .. })));
    Ok(())
}

/// Writes the region's worker count into every slot, so the serial reference
/// disagrees with any parallel run.
struct WorkerCountKernel {
    out: Vec<f64>,
}

impl PhaseKernel for WorkerCountKernel {
    fn phase(&self) -> PhaseId {
        PhaseId::VectorAdd
    }

    fn execute(&mut self, region: &Region<'_>, _shadow: Option<&mut ShadowSet>) -> Result<()> {
        let out = Partitioned::new(self.out.as_mut_slice(), region.workers());
        region.run(|ctx| {
            let mut part = out.lock(ctx.index());
            part.data.fill(ctx.workers() as f64);
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("out", &self.out)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self { out: self.out.clone() }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        Ok(None)
    }
}

#[test]
fn test_mismatch_is_reported_not_raised() -> Result<()> {
    let runner = KernelRunner::new(AffinityBinder::disabled(3));
    let mut kernel = WorkerCountKernel { out: vec![0.0; 64] };
    let launch = Launch {
        phase: PhaseId::VectorAdd,
        threads: 3,
        iterations: 2,
        mask: AffinityMask::Reset,
    };

    let region = runner.launch(launch)?;
    let validation = ValidationEngine::new(ValidationMode::Full).prepare(&kernel, 3)?;
    kernel.execute(&region, None)?;
    let record = validation.finish(&kernel, launch.iterations)?;

    assert!(record.failed());
    let mismatch = record.mismatch().copied();
    assert_eq!(mismatch.map(|m| (m.buffer, m.index)), Some(("out", 0)));
    Ok(())
}
