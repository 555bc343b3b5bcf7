//! The ten phase kernels and the tagged variant that selects among them.
//!
//! Every kernel owns its input and output buffers. [`PhaseKernel`] is the
//! contract the orchestrator and the validation engine drive:
//!
//! - `execute` runs the kernel body on a [`Region`], writing shadow copies
//!   when reduced validation supplied a [`ShadowSet`]
//! - `reference_copy` deep-copies the buffers for a serial reference run
//! - `shadow_layout` allocates shadows shaped like the checked outputs
//! - `outputs` exposes the buffers that validation compares

mod compute;
mod list;
mod palindrome;
mod particles;
mod reduction;
mod scatter;
mod sparse;
mod streams;

pub use compute::ComputeMix;
pub use list::{IndexedList, ListTraversal};
pub use palindrome::{is_palindrome, nth_palindrome, Palindromes};
pub use particles::{Particle, ParticleForces, COULOMB_CONSTANT};
pub use reduction::Reduction;
pub use scatter::RandomScatter;
pub use sparse::{CsrMatrix, SparseMatVec};
pub use streams::{GatherStream, IndirectStream, VectorAdd};

use crate::error::{try_filled, Error, Result};
use crate::phase::PhaseId;
use crate::runner::Region;

/// Read-only view of one output buffer.
#[derive(Clone, Copy, Debug)]
pub enum OutputValues<'a> {
    F64(&'a [f64]),
    I32(&'a [i32]),
    U64(&'a [u64]),
}

impl OutputValues<'_> {
    pub fn len(&self) -> usize {
        match self {
            OutputValues::F64(values) => values.len(),
            OutputValues::I32(values) => values.len(),
            OutputValues::U64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named output buffer.
#[derive(Clone, Copy, Debug)]
pub struct Output<'a> {
    pub name: &'static str,
    pub values: OutputValues<'a>,
}

impl<'a> Output<'a> {
    pub fn f64(name: &'static str, values: &'a [f64]) -> Self {
        Self { name, values: OutputValues::F64(values) }
    }

    pub fn i32(name: &'static str, values: &'a [i32]) -> Self {
        Self { name, values: OutputValues::I32(values) }
    }

    pub fn u64(name: &'static str, values: &'a [u64]) -> Self {
        Self { name, values: OutputValues::U64(values) }
    }
}

/// Storage of one shadow buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum ShadowBuffer {
    F64(Vec<f64>),
    I32(Vec<i32>),
    U64(Vec<u64>),
}

/// Shadow copies for reduced validation, one per checked output and in the
/// same order as [`PhaseKernel::outputs`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShadowSet {
    names: Vec<&'static str>,
    buffers: Vec<ShadowBuffer>,
}

impl ShadowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_f64(mut self, name: &'static str, len: usize) -> Result<Self> {
        self.names.push(name);
        self.buffers.push(ShadowBuffer::F64(try_filled("shadow buffer", len, 0.0)?));
        Ok(self)
    }

    pub fn with_i32(mut self, name: &'static str, len: usize) -> Result<Self> {
        self.names.push(name);
        self.buffers.push(ShadowBuffer::I32(try_filled("shadow buffer", len, 0)?));
        Ok(self)
    }

    pub fn with_u64(mut self, name: &'static str, len: usize) -> Result<Self> {
        self.names.push(name);
        self.buffers.push(ShadowBuffer::U64(try_filled("shadow buffer", len, 0)?));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Mutable access to every buffer at once, for kernels that shadow more
    /// than one output.
    pub fn buffers_mut(&mut self) -> &mut [ShadowBuffer] {
        &mut self.buffers
    }

    /// The only buffer, which must hold `f64` values.
    pub fn single_f64_mut(&mut self) -> Result<&mut [f64]> {
        match self.buffers.as_mut_slice() {
            [ShadowBuffer::F64(values)] => Ok(values),
            _ => Err(layout_error("a single f64 buffer")),
        }
    }

    /// The only buffer, which must hold `u64` values.
    pub fn single_u64_mut(&mut self) -> Result<&mut [u64]> {
        match self.buffers.as_mut_slice() {
            [ShadowBuffer::U64(values)] => Ok(values),
            _ => Err(layout_error("a single u64 buffer")),
        }
    }

    /// Shadows viewed as expected outputs.
    pub fn outputs(&self) -> Vec<Output<'_>> {
        self.names
            .iter()
            .zip(&self.buffers)
            .map(|(&name, buffer)| match buffer {
                ShadowBuffer::F64(values) => Output::f64(name, values),
                ShadowBuffer::I32(values) => Output::i32(name, values),
                ShadowBuffer::U64(values) => Output::u64(name, values),
            })
            .collect()
    }
}

pub(crate) fn layout_error(expected: &str) -> Error {
    Error::InvalidConfig(format!("shadow set does not match kernel layout: expected {expected}"))
}

/// Contract shared by all phase kernels.
pub trait PhaseKernel: Sized + Send + Sync {
    fn phase(&self) -> PhaseId;

    /// Run the kernel body on every worker of `region`, `region.iterations()`
    /// times.
    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()>;

    /// Buffers compared by validation.
    fn outputs(&self) -> Vec<Output<'_>>;

    /// Deep copy used as the serial reference; `None` when the phase has no
    /// full validation.
    fn reference_copy(&self) -> Result<Option<Self>>;

    /// Shadow buffers for a region of `workers` workers; `None` when the
    /// phase has no reduced validation.
    fn shadow_layout(&self, workers: usize) -> Result<Option<ShadowSet>>;

    /// Bytes touched per iteration, used for bandwidth logging.
    fn bytes_per_iteration(&self) -> u64 {
        0
    }
}

/// Buffers for one phase, tagged by phase.
#[derive(Debug)]
pub enum PhaseData {
    ComputeMix(ComputeMix),
    IndirectStream(IndirectStream),
    Reduction(Reduction),
    VectorAdd(VectorAdd),
    GatherStream(GatherStream),
    SparseMatVec(SparseMatVec),
    ListTraversal(ListTraversal),
    ParticleForces(ParticleForces),
    Palindromes(Palindromes),
    RandomScatter(RandomScatter),
}

/// Evaluate `$body` with `$kernel` bound to the concrete kernel inside a
/// [`PhaseData`].
macro_rules! dispatch {
    ($data:expr, $kernel:ident => $body:expr) => {
        match $data {
            $crate::kernels::PhaseData::ComputeMix($kernel) => $body,
            $crate::kernels::PhaseData::IndirectStream($kernel) => $body,
            $crate::kernels::PhaseData::Reduction($kernel) => $body,
            $crate::kernels::PhaseData::VectorAdd($kernel) => $body,
            $crate::kernels::PhaseData::GatherStream($kernel) => $body,
            $crate::kernels::PhaseData::SparseMatVec($kernel) => $body,
            $crate::kernels::PhaseData::ListTraversal($kernel) => $body,
            $crate::kernels::PhaseData::ParticleForces($kernel) => $body,
            $crate::kernels::PhaseData::Palindromes($kernel) => $body,
            $crate::kernels::PhaseData::RandomScatter($kernel) => $body,
        }
    };
}
pub(crate) use dispatch;

impl PhaseData {
    pub fn phase(&self) -> PhaseId {
        dispatch!(self, kernel => kernel.phase())
    }

    pub fn outputs(&self) -> Vec<Output<'_>> {
        dispatch!(self, kernel => kernel.outputs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_set_layout() -> Result<()> {
        let mut shadow = ShadowSet::new().with_f64("vals", 4)?.with_i32("int_vals", 4)?;
        assert_eq!(shadow.len(), 2);
        assert!(shadow.single_f64_mut().is_err());

        match shadow.buffers_mut() {
            [ShadowBuffer::F64(vals), ShadowBuffer::I32(ints)] => {
                vals[1] = 2.5;
                ints[3] = 9;
            }
            _ => panic!("unexpected layout"),
        }

        let outputs = shadow.outputs();
        assert_eq!(outputs[0].name, "vals");
        assert!(matches!(outputs[0].values, OutputValues::F64(v) if v[1] == 2.5));
        assert!(matches!(outputs[1].values, OutputValues::I32(v) if v[3] == 9));
        Ok(())
    }

    #[test]
    fn test_single_buffer_accessors() -> Result<()> {
        let mut shadow = ShadowSet::new().with_u64("palindromes", 3)?;
        shadow.single_u64_mut()?[2] = 11;
        assert!(shadow.single_f64_mut().is_err());
        assert_eq!(shadow.outputs()[0].values.len(), 3);
        Ok(())
    }
}
