//! Streaming update phases: `dest[i] += term(i)`.

use crate::error::{try_copy, Error, Result};
use crate::kernels::{Output, PhaseKernel, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::{Partitioned, Region};

/// Add `term(i)` to every `dest[i]` on a static schedule, mirroring each
/// result into the shadow when one is present.
fn accumulate<F>(region: &Region<'_>, dest: &mut [f64], shadow: Option<&mut ShadowSet>, term: F) -> Result<()>
where
    F: Fn(usize) -> f64 + Sync,
{
    let shadow = match shadow {
        Some(shadow) => Some(shadow.single_f64_mut()?),
        None => None,
    };
    let workers = region.workers();
    let dest = Partitioned::new(dest, workers);
    let shadow = shadow.map(|shadow| Partitioned::new(shadow, workers));

    region.run(|ctx| {
        let mut part = dest.lock(ctx.index());
        let mut mirror = shadow.as_ref().map(|shadow| shadow.lock(ctx.index()));
        let start = part.start;
        for (offset, value) in part.data.iter_mut().enumerate() {
            *value += term(start + offset);
            if let Some(mirror) = mirror.as_mut() {
                mirror.data[offset] = *value;
            }
        }
    })
}

fn check_len(phase: PhaseId, name: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(Error::InvalidConfig(format!(
            "phase {phase}: {name} has {len} elements, expected {expected}"
        )));
    }
    Ok(())
}

fn check_indices(phase: PhaseId, name: &str, indices: &[u32], bound: usize) -> Result<()> {
    match indices.iter().position(|&index| index as usize >= bound) {
        Some(at) => Err(Error::InvalidConfig(format!(
            "phase {phase}: {name}[{at}] = {} is out of range for {bound} elements",
            indices[at]
        ))),
        None => Ok(()),
    }
}

/// Phase 2: `dest[i] += src1[i] * src2[ind_src2[i]]`.
#[derive(Clone, Debug)]
pub struct IndirectStream {
    pub dest: Vec<f64>,
    pub src1: Vec<f64>,
    pub src2: Vec<f64>,
    pub ind_src2: Vec<u32>,
}

impl IndirectStream {
    pub fn new(dest: Vec<f64>, src1: Vec<f64>, src2: Vec<f64>, ind_src2: Vec<u32>) -> Result<Self> {
        let phase = PhaseId::IndirectStream;
        check_len(phase, "src1", src1.len(), dest.len())?;
        check_len(phase, "ind_src2", ind_src2.len(), dest.len())?;
        check_indices(phase, "ind_src2", &ind_src2, src2.len())?;
        Ok(Self { dest, src1, src2, ind_src2 })
    }
}

impl PhaseKernel for IndirectStream {
    fn phase(&self) -> PhaseId {
        PhaseId::IndirectStream
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let (src1, src2, ind_src2) = (&self.src1, &self.src2, &self.ind_src2);
        accumulate(region, &mut self.dest, shadow, |i| src1[i] * src2[ind_src2[i] as usize])
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("dest", &self.dest)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self {
            dest: try_copy("reference dest", &self.dest)?,
            src1: try_copy("reference src1", &self.src1)?,
            src2: try_copy("reference src2", &self.src2)?,
            ind_src2: try_copy("reference ind_src2", &self.ind_src2)?,
        }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new().with_f64("dest", self.dest.len()).map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        // dest read+write, src1, gathered src2, index
        (self.dest.len() * (4 * 8 + 4)) as u64
    }
}

/// Phase 4: `dest[i] += src1[i] + src2[i]`.
#[derive(Clone, Debug)]
pub struct VectorAdd {
    pub dest: Vec<f64>,
    pub src1: Vec<f64>,
    pub src2: Vec<f64>,
}

impl VectorAdd {
    pub fn new(dest: Vec<f64>, src1: Vec<f64>, src2: Vec<f64>) -> Result<Self> {
        let phase = PhaseId::VectorAdd;
        check_len(phase, "src1", src1.len(), dest.len())?;
        check_len(phase, "src2", src2.len(), dest.len())?;
        Ok(Self { dest, src1, src2 })
    }
}

impl PhaseKernel for VectorAdd {
    fn phase(&self) -> PhaseId {
        PhaseId::VectorAdd
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let (src1, src2) = (&self.src1, &self.src2);
        accumulate(region, &mut self.dest, shadow, |i| src1[i] + src2[i])
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("dest", &self.dest)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self {
            dest: try_copy("reference dest", &self.dest)?,
            src1: try_copy("reference src1", &self.src1)?,
            src2: try_copy("reference src2", &self.src2)?,
        }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new().with_f64("dest", self.dest.len()).map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        (self.dest.len() * 4 * 8) as u64
    }
}

/// Phase 5: `dest[i] += src1[ind_src1[i]] + src2[ind_src2[i]]`.
#[derive(Clone, Debug)]
pub struct GatherStream {
    pub dest: Vec<f64>,
    pub src1: Vec<f64>,
    pub src2: Vec<f64>,
    pub ind_src1: Vec<u32>,
    pub ind_src2: Vec<u32>,
}

impl GatherStream {
    pub fn new(
        dest: Vec<f64>,
        src1: Vec<f64>,
        src2: Vec<f64>,
        ind_src1: Vec<u32>,
        ind_src2: Vec<u32>,
    ) -> Result<Self> {
        let phase = PhaseId::GatherStream;
        check_len(phase, "ind_src1", ind_src1.len(), dest.len())?;
        check_len(phase, "ind_src2", ind_src2.len(), dest.len())?;
        check_indices(phase, "ind_src1", &ind_src1, src1.len())?;
        check_indices(phase, "ind_src2", &ind_src2, src2.len())?;
        Ok(Self {
            dest,
            src1,
            src2,
            ind_src1,
            ind_src2,
        })
    }
}

impl PhaseKernel for GatherStream {
    fn phase(&self) -> PhaseId {
        PhaseId::GatherStream
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let (src1, src2) = (&self.src1, &self.src2);
        let (ind_src1, ind_src2) = (&self.ind_src1, &self.ind_src2);
        accumulate(region, &mut self.dest, shadow, |i| {
            src1[ind_src1[i] as usize] + src2[ind_src2[i] as usize]
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("dest", &self.dest)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self {
            dest: try_copy("reference dest", &self.dest)?,
            src1: try_copy("reference src1", &self.src1)?,
            src2: try_copy("reference src2", &self.src2)?,
            ind_src1: try_copy("reference ind_src1", &self.ind_src1)?,
            ind_src2: try_copy("reference ind_src2", &self.ind_src2)?,
        }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new().with_f64("dest", self.dest.len()).map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        (self.dest.len() * (4 * 8 + 2 * 4)) as u64
    }
}
