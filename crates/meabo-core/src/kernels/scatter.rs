//! Phase 10: GUPS-style random scatter.

use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};
use crate::kernels::{Output, PhaseKernel, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::Region;

/// Each iteration performs `len` random stores `loc[j] = j` split across
/// workers. Worker `w` draws from a generator seeded with `w`, so distinct
/// workers may hit the same slot; the stores are relaxed atomics and the
/// phase has no validation.
#[derive(Debug)]
pub struct RandomScatter {
    loc: Vec<AtomicI32>,
}

impl RandomScatter {
    pub fn new(initial: Vec<i32>) -> Result<Self> {
        if initial.is_empty() || initial.len() > i32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "random scatter needs 1..={} locations, got {}",
                i32::MAX,
                initial.len()
            )));
        }
        Ok(Self {
            loc: initial.into_iter().map(AtomicI32::new).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.loc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loc.is_empty()
    }

    /// Current contents of the location table.
    pub fn locations(&self) -> Vec<i32> {
        self.loc.iter().map(|cell| cell.load(Ordering::Relaxed)).collect()
    }
}

impl Clone for RandomScatter {
    fn clone(&self) -> Self {
        Self {
            loc: self.locations().into_iter().map(AtomicI32::new).collect(),
        }
    }
}

impl PhaseKernel for RandomScatter {
    fn phase(&self) -> PhaseId {
        PhaseId::RandomScatter
    }

    fn execute(&mut self, region: &Region<'_>, _shadow: Option<&mut ShadowSet>) -> Result<()> {
        let loc = &self.loc;
        let len = loc.len();
        let generators: Vec<Mutex<ChaCha8Rng>> = (0..region.workers())
            .map(|worker| Mutex::new(ChaCha8Rng::seed_from_u64(worker as u64)))
            .collect();

        region.run(|ctx| {
            let mut rng = generators[ctx.index()].lock();
            for _ in ctx.range(len) {
                let index = rng.gen_range(0..len);
                loc[index].store(index as i32, Ordering::Relaxed);
            }
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        Vec::new()
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(None)
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        Ok(None)
    }

    fn bytes_per_iteration(&self) -> u64 {
        (self.loc.len() * 4) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scatter_writes_own_index() -> Result<()> {
        let mut kernel = RandomScatter::new(vec![-1; 64])?;
        kernel.execute(&Region::serial(8), None)?;
        let locations = kernel.locations();
        assert!(locations.iter().any(|&value| value != -1));
        for (index, &value) in locations.iter().enumerate() {
            assert!(value == -1 || value == index as i32);
        }
        Ok(())
    }

    #[test]
    fn test_scatter_is_deterministic_for_one_worker() -> Result<()> {
        let mut a = RandomScatter::new(vec![-1; 128])?;
        let mut b = a.clone();
        a.execute(&Region::serial(2), None)?;
        b.execute(&Region::serial(2), None)?;
        assert_eq!(a.locations(), b.locations());
        Ok(())
    }

    #[test]
    fn test_rejects_empty_table() {
        assert!(RandomScatter::new(Vec::new()).is_err());
    }
}
