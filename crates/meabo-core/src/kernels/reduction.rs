//! Phase 3: global sum reduction followed by a broadcast write.

use parking_lot::Mutex;

use crate::error::{try_copy, Result};
use crate::kernels::{Output, PhaseKernel, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::{Partitioned, Region};

/// Fixed-point scale for summed values.
const MICRO_UNITS: i128 = 1_000_000;

/// Each iteration adds 8 to every value, sums the array into a running
/// total, truncates the total to whole units and writes `total mod 1024` back
/// to every element.
///
/// Values are summed as rounded micro-units so the total does not depend on
/// how the array was split across workers. Micro-unit sums are `i128`.
#[derive(Debug)]
pub struct Reduction {
    pub vals: Vec<f64>,
    total: Mutex<i128>,
}

impl Reduction {
    pub fn new(vals: Vec<f64>) -> Self {
        Self {
            vals,
            total: Mutex::new(0),
        }
    }

    /// Running total in whole units.
    pub fn total(&self) -> i128 {
        *self.total.lock()
    }

    /// Value broadcast by the last iteration.
    pub fn reduction(&self) -> f64 {
        (self.total() % 1024) as f64
    }
}

fn to_micro(value: f64) -> i128 {
    (value * MICRO_UNITS as f64).round() as i128
}

impl PhaseKernel for Reduction {
    fn phase(&self) -> PhaseId {
        PhaseId::Reduction
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let shadow = match shadow {
            Some(shadow) => Some(shadow.single_f64_mut()?),
            None => None,
        };
        let workers = region.workers();
        let vals = Partitioned::new(&mut self.vals, workers);
        let shadow = shadow.map(|shadow| Partitioned::new(shadow, workers));
        let total = &self.total;
        let pending = Mutex::new(0i128);

        region.run(|ctx| {
            let mut part = vals.lock(ctx.index());

            let local: i128 = part
                .data
                .iter_mut()
                .map(|value| {
                    *value += 8.0;
                    to_micro(*value)
                })
                .sum();
            *pending.lock() += local;
            ctx.barrier();

            // Every worker derives the same new total; the leader publishes it
            // once all workers have read the old one.
            let next = (*total.lock() * MICRO_UNITS + *pending.lock()) / MICRO_UNITS;
            let reduction = (next % 1024) as f64;
            let mut mirror = shadow.as_ref().map(|shadow| shadow.lock(ctx.index()));
            for (offset, value) in part.data.iter_mut().enumerate() {
                *value = reduction;
                if let Some(mirror) = mirror.as_mut() {
                    mirror.data[offset] = reduction;
                }
            }
            ctx.barrier();

            if ctx.is_leader() {
                *total.lock() = next;
                *pending.lock() = 0;
            }
            ctx.barrier();
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("vals", &self.vals)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self {
            vals: try_copy("reference vals", &self.vals)?,
            total: Mutex::new(self.total()),
        }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new().with_f64("vals", self.vals.len()).map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        (self.vals.len() * 3 * 8) as u64
    }
}
