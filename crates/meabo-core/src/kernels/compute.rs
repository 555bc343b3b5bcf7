//! Phase 1: mixed floating-point and integer arithmetic over blocks.

use crate::error::{try_copy, Error, Result};
use crate::kernels::{layout_error, Output, PhaseKernel, ShadowBuffer, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::{Partitioned, Region};

/// Element-wise arithmetic on `vals` and `int_vals`, split across workers on
/// `block_size` boundaries.
#[derive(Clone, Debug)]
pub struct ComputeMix {
    pub vals: Vec<f64>,
    pub int_vals: Vec<i32>,
    pub block_size: usize,
}

impl ComputeMix {
    pub fn new(vals: Vec<f64>, int_vals: Vec<i32>, block_size: usize) -> Result<Self> {
        if vals.len() != int_vals.len() {
            return Err(Error::InvalidConfig(format!(
                "phase {}: vals has {} elements but int_vals has {}",
                PhaseId::ComputeMix,
                vals.len(),
                int_vals.len()
            )));
        }
        if block_size == 0 {
            return Err(Error::InvalidConfig("block size must be positive".into()));
        }
        Ok(Self {
            vals,
            int_vals,
            block_size,
        })
    }
}

#[inline]
fn step_float(v: f64) -> f64 {
    let t1 = v * v;
    let t2 = t1 + v;
    t2 / (1024.0 + t1) - v
}

#[inline]
fn step_int(i: i32) -> i32 {
    let i1 = i.wrapping_mul(i);
    let i2 = i1.wrapping_add(i);
    let i3 = i2.checked_div(i1.wrapping_add(1024)).unwrap_or(0).wrapping_sub(i);
    i.wrapping_add(i1.wrapping_add(i2).wrapping_add(i3) % 1024)
}

impl PhaseKernel for ComputeMix {
    fn phase(&self) -> PhaseId {
        PhaseId::ComputeMix
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let workers = region.workers();
        let block = self.block_size;

        let shadow = match shadow {
            Some(shadow) => match shadow.buffers_mut() {
                [ShadowBuffer::F64(vals), ShadowBuffer::I32(ints)] => Some((
                    Partitioned::blocked(vals, block, workers),
                    Partitioned::blocked(ints, block, workers),
                )),
                _ => return Err(layout_error("f64 vals followed by i32 int_vals")),
            },
            None => None,
        };
        let vals = Partitioned::blocked(&mut self.vals, block, workers);
        let ints = Partitioned::blocked(&mut self.int_vals, block, workers);

        region.run(|ctx| {
            let mut vals = vals.lock(ctx.index());
            let mut ints = ints.lock(ctx.index());
            let mut mirror = shadow
                .as_ref()
                .map(|(vals, ints)| (vals.lock(ctx.index()), ints.lock(ctx.index())));

            for (offset, (v, i)) in vals.data.iter_mut().zip(ints.data.iter_mut()).enumerate() {
                *v = step_float(*v);
                *i = step_int(*i);
                if let Some((shadow_vals, shadow_ints)) = mirror.as_mut() {
                    shadow_vals.data[offset] = *v;
                    shadow_ints.data[offset] = *i;
                }
            }
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("vals", &self.vals), Output::i32("int_vals", &self.int_vals)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self {
            vals: try_copy("reference vals", &self.vals)?,
            int_vals: try_copy("reference int_vals", &self.int_vals)?,
            block_size: self.block_size,
        }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new()
            .with_f64("vals", self.vals.len())?
            .with_i32("int_vals", self.int_vals.len())
            .map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        (self.vals.len() * 2 * (8 + 4)) as u64
    }
}
