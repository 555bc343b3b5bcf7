//! Output validation: serial reference re-execution and same-pass shadows.
//!
//! ## Modes
//!
//! - **Full**: inputs are deep-copied before the parallel run; afterwards the
//!   copy is executed on a single-worker [`Region`] and every output is
//!   compared against the parallel result.
//! - **Reduced**: each worker writes every produced value to a shadow buffer
//!   right after the primary write. A later difference between primary and
//!   shadow means another worker overwrote the primary element.
//!
//! Comparison stops at the first mismatch. Floats match when equal or
//! closer than [`FLOAT_TOLERANCE`]; integers must be identical.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kernels::{Output, OutputValues, PhaseKernel, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::Region;

/// Absolute tolerance for floating-point comparison.
pub const FLOAT_TOLERANCE: f64 = 1e-10;

/// How a run checks its outputs. Fixed for the whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    None,
    Full,
    Reduced,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationMode::None => "none",
            ValidationMode::Full => "full",
            ValidationMode::Reduced => "reduced",
        })
    }
}

impl FromStr for ValidationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "" => Ok(ValidationMode::None),
            "full" => Ok(ValidationMode::Full),
            "reduced" | "red" => Ok(ValidationMode::Reduced),
            other => Err(Error::InvalidConfig(format!("unknown validation mode '{other}'"))),
        }
    }
}

/// A single compared element.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Int(i64),
    UInt(u64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(value) => write!(f, "{value:.24}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::UInt(value) => write!(f, "{value}"),
        }
    }
}

/// Element types validation knows how to compare.
pub trait Element: Copy {
    fn matches(expected: Self, observed: Self) -> bool;
    fn value(self) -> Value;
}

impl Element for f64 {
    fn matches(expected: Self, observed: Self) -> bool {
        expected == observed
            || (expected.is_nan() && observed.is_nan())
            || (expected - observed).abs() < FLOAT_TOLERANCE
    }

    fn value(self) -> Value {
        Value::Float(self)
    }
}

impl Element for i32 {
    fn matches(expected: Self, observed: Self) -> bool {
        expected == observed
    }

    fn value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl Element for u64 {
    fn matches(expected: Self, observed: Self) -> bool {
        expected == observed
    }

    fn value(self) -> Value {
        Value::UInt(self)
    }
}

/// First divergence found in a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Mismatch {
    pub buffer: &'static str,
    pub index: usize,
    pub expected: Value,
    pub observed: Value,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]: expected {} found {}",
            self.buffer, self.index, self.expected, self.observed
        )
    }
}

/// Index and values of the first element where `observed` diverges.
pub fn first_mismatch<T: Element>(buffer: &'static str, expected: &[T], observed: &[T]) -> Option<Mismatch> {
    expected
        .iter()
        .zip(observed)
        .position(|(e, o)| !T::matches(*e, *o))
        .map(|index| Mismatch {
            buffer,
            index,
            expected: expected[index].value(),
            observed: observed[index].value(),
        })
}

/// Compare output lists pairwise, stopping at the first mismatch.
///
/// Buffers must agree in count, element type and length.
pub fn compare_outputs(expected: &[Output<'_>], observed: &[Output<'_>]) -> Result<Option<Mismatch>> {
    if expected.len() != observed.len() {
        return Err(Error::InvalidConfig(format!(
            "validation compares {} buffers against {}",
            expected.len(),
            observed.len()
        )));
    }

    for (exp, obs) in expected.iter().zip(observed) {
        if exp.values.len() != obs.values.len() {
            return Err(Error::InvalidConfig(format!(
                "buffer {} has {} elements, reference has {}",
                obs.name,
                obs.values.len(),
                exp.values.len()
            )));
        }
        let mismatch = match (exp.values, obs.values) {
            (OutputValues::F64(e), OutputValues::F64(o)) => first_mismatch(obs.name, e, o),
            (OutputValues::I32(e), OutputValues::I32(o)) => first_mismatch(obs.name, e, o),
            (OutputValues::U64(e), OutputValues::U64(o)) => first_mismatch(obs.name, e, o),
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "buffer {} differs in element type from its reference",
                    obs.name
                )))
            }
        };
        if mismatch.is_some() {
            return Ok(mismatch);
        }
    }
    Ok(None)
}

/// Result of validating one phase.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Validation mode is `None`.
    Skipped,
    /// The phase has no check for the configured mode.
    NotApplicable,
    Passed,
    Failed(Mismatch),
}

/// Per-phase validation result handed to reporting.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ValidationRecord {
    pub phase: PhaseId,
    pub mode: ValidationMode,
    pub outcome: ValidationOutcome,
}

impl ValidationRecord {
    pub fn skipped(phase: PhaseId) -> Self {
        Self {
            phase,
            mode: ValidationMode::None,
            outcome: ValidationOutcome::Skipped,
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self.outcome, ValidationOutcome::Passed)
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, ValidationOutcome::Failed(_))
    }

    pub fn mismatch(&self) -> Option<&Mismatch> {
        match &self.outcome {
            ValidationOutcome::Failed(mismatch) => Some(mismatch),
            _ => None,
        }
    }

    fn from_comparison(phase: PhaseId, mode: ValidationMode, mismatch: Option<Mismatch>) -> Self {
        let outcome = match mismatch {
            Some(mismatch) => ValidationOutcome::Failed(mismatch),
            None => ValidationOutcome::Passed,
        };
        Self { phase, mode, outcome }
    }
}

/// Compare a shadow set (expected) against the primary outputs (observed).
pub fn compare_reduced(phase: PhaseId, shadow: &ShadowSet, observed: &[Output<'_>]) -> Result<ValidationRecord> {
    let mismatch = compare_outputs(&shadow.outputs(), observed)?;
    Ok(ValidationRecord::from_comparison(phase, ValidationMode::Reduced, mismatch))
}

/// Creates per-phase validation state for the configured mode.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationEngine {
    mode: ValidationMode,
}

impl ValidationEngine {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Allocate reference copies or shadows before the parallel run.
    ///
    /// Allocation failures are fatal: validation cannot proceed without the
    /// transient buffers.
    pub fn prepare<K: PhaseKernel>(&self, kernel: &K, workers: usize) -> Result<PreparedValidation<K>> {
        let phase = kernel.phase();
        let state = match self.mode {
            ValidationMode::None => Prepared::Disabled,
            ValidationMode::Full => {
                let _span = meabo_tracing::perf_span!("reference_copy", phase = phase.number());
                match kernel.reference_copy()? {
                    Some(reference) => Prepared::Full(Box::new(reference)),
                    None => Prepared::NotApplicable,
                }
            }
            ValidationMode::Reduced => match kernel.shadow_layout(workers)? {
                Some(shadow) => {
                    meabo_tracing::perf_event!("shadow_allocated", phase = phase.number(), buffers = shadow.len());
                    Prepared::Reduced(shadow)
                }
                None => Prepared::NotApplicable,
            },
        };
        Ok(PreparedValidation {
            phase,
            mode: self.mode,
            state,
        })
    }
}

enum Prepared<K> {
    Disabled,
    NotApplicable,
    Full(Box<K>),
    Reduced(ShadowSet),
}

/// Validation state carried across one phase execution.
pub struct PreparedValidation<K> {
    phase: PhaseId,
    mode: ValidationMode,
    state: Prepared<K>,
}

impl<K: PhaseKernel> PreparedValidation<K> {
    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    /// Shadow buffers the kernel must fill during the parallel run.
    pub fn shadow_mut(&mut self) -> Option<&mut ShadowSet> {
        match &mut self.state {
            Prepared::Reduced(shadow) => Some(shadow),
            _ => None,
        }
    }

    /// Run the serial reference if needed and compare.
    ///
    /// `iterations` is the count the parallel run executed.
    pub fn finish(self, kernel: &K, iterations: usize) -> Result<ValidationRecord> {
        let record = match self.state {
            Prepared::Disabled => ValidationRecord::skipped(self.phase),
            Prepared::NotApplicable => ValidationRecord {
                phase: self.phase,
                mode: self.mode,
                outcome: ValidationOutcome::NotApplicable,
            },
            Prepared::Full(mut reference) => {
                let reference_region = Region::serial(iterations);
                reference.execute(&reference_region, None)?;
                let mismatch = compare_outputs(&reference.outputs(), &kernel.outputs())?;
                ValidationRecord::from_comparison(self.phase, ValidationMode::Full, mismatch)
            }
            Prepared::Reduced(shadow) => compare_reduced(self.phase, &shadow, &kernel.outputs())?,
        };

        match &record.outcome {
            ValidationOutcome::Passed => {
                tracing::info!(phase = %record.phase, mode = %record.mode, "validation passed")
            }
            ValidationOutcome::Failed(mismatch) => tracing::warn!(
                phase = %record.phase,
                mode = %record.mode,
                buffer = mismatch.buffer,
                index = mismatch.index,
                expected = %mismatch.expected,
                observed = %mismatch.observed,
                "validation failed"
            ),
            ValidationOutcome::NotApplicable => {
                tracing::info!(phase = %record.phase, mode = %record.mode, "validation not applicable")
            }
            ValidationOutcome::Skipped => {}
        }
        Ok(record)
    }
}
