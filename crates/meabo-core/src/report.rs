//! Per-phase results and where they go.

use parking_lot::Mutex;
use serde::Serialize;

use crate::phase::PhaseId;
use crate::probes::Sample;
use crate::validation::ValidationRecord;

/// Everything measured for one executed phase.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseReport {
    pub phase: PhaseId,
    pub threads: usize,
    pub iterations: usize,
    /// Wall time of the timed region only.
    pub duration_ns: u64,
    /// Bytes touched by all iterations, `0` for non-streaming phases.
    pub bytes: u64,
    pub validation: ValidationRecord,
    pub samples: Vec<Sample>,
}

impl PhaseReport {
    pub fn duration_ms(&self) -> f64 {
        self.duration_ns as f64 / 1_000_000.0
    }
}

/// Receives each phase report as soon as the phase finishes.
pub trait ReportSink: Send + Sync {
    fn report(&self, report: &PhaseReport);
}

/// Emits reports as tracing events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ReportSink for TracingReporter {
    fn report(&self, report: &PhaseReport) {
        tracing::info!(
            phase = %report.phase,
            threads = report.threads,
            iterations = report.iterations,
            duration_ms = report.duration_ms(),
            validation = ?report.validation.outcome,
            "phase complete"
        );
        let name = report.phase.name();
        meabo_tracing::performance::record_phase_timing(name, report.threads, report.duration_ns);
        if report.bytes > 0 {
            meabo_tracing::performance::record_bandwidth(name, report.bytes, report.duration_ns);
        }
        for sample in &report.samples {
            tracing::info!(
                phase = %report.phase,
                probe = sample.probe,
                counter = %sample.name,
                value = sample.value,
                unit = sample.unit,
                "probe sample"
            );
        }
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<PhaseReport>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<PhaseReport> {
        self.reports.lock().clone()
    }

    pub fn phases(&self) -> Vec<PhaseId> {
        self.reports.lock().iter().map(|report| report.phase).collect()
    }
}

impl ReportSink for CollectingReporter {
    fn report(&self, report: &PhaseReport) {
        self.reports.lock().push(report.clone());
    }
}

/// Outcome of a whole run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub reports: Vec<PhaseReport>,
    pub total_ns: u64,
}

impl RunSummary {
    pub fn phases(&self) -> impl Iterator<Item = PhaseId> + '_ {
        self.reports.iter().map(|report| report.phase)
    }

    pub fn get(&self, phase: PhaseId) -> Option<&PhaseReport> {
        self.reports.iter().find(|report| report.phase == phase)
    }

    /// Phases whose validation found a mismatch.
    pub fn failed_validations(&self) -> Vec<PhaseId> {
        self.reports
            .iter()
            .filter(|report| report.validation.failed())
            .map(|report| report.phase)
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.reports.iter().all(|report| !report.validation.failed())
    }
}
