//! Phase 8: electrostatic force between adjacent particles.

use crate::error::{try_copy, Result};
use crate::kernels::{Output, PhaseKernel, ShadowSet};
use crate::phase::PhaseId;
use crate::runner::{Partitioned, Region};

/// Coulomb's constant in N·m²/C².
pub const COULOMB_CONSTANT: f64 = 8.987551e9;

/// A point charge on an integer grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub charge: f64,
}

impl Particle {
    /// Squared distance to `other`.
    pub fn distance_squared(&self, other: &Particle) -> f64 {
        let dx = f64::from(other.x) - f64::from(self.x);
        let dy = f64::from(other.y) - f64::from(self.y);
        let dz = f64::from(other.z) - f64::from(self.z);
        dx * dx + dy * dy + dz * dz
    }
}

/// `forces[i] = k * q[i] * q[i+1] / r²` for every adjacent pair; the last
/// element keeps its initial value.
#[derive(Clone, Debug)]
pub struct ParticleForces {
    pub particles: Vec<Particle>,
    pub forces: Vec<f64>,
}

impl ParticleForces {
    pub fn new(particles: Vec<Particle>) -> Self {
        let forces = vec![0.0; particles.len()];
        Self { particles, forces }
    }

    fn pairs(&self) -> usize {
        self.particles.len().saturating_sub(1)
    }
}

impl PhaseKernel for ParticleForces {
    fn phase(&self) -> PhaseId {
        PhaseId::ParticleForces
    }

    fn execute(&mut self, region: &Region<'_>, shadow: Option<&mut ShadowSet>) -> Result<()> {
        let shadow = match shadow {
            Some(shadow) => Some(shadow.single_f64_mut()?),
            None => None,
        };
        let workers = region.workers();
        let pairs = self.pairs();
        let particles = &self.particles;
        let forces = Partitioned::new(&mut self.forces[..pairs], workers);
        let shadow = shadow.map(|shadow| Partitioned::new(&mut shadow[..pairs], workers));

        region.run(|ctx| {
            let mut part = forces.lock(ctx.index());
            let mut mirror = shadow.as_ref().map(|shadow| shadow.lock(ctx.index()));
            let start = part.start;
            for (offset, force) in part.data.iter_mut().enumerate() {
                let (a, b) = (&particles[start + offset], &particles[start + offset + 1]);
                *force = COULOMB_CONSTANT * a.charge * b.charge / a.distance_squared(b);
                if let Some(mirror) = mirror.as_mut() {
                    mirror.data[offset] = *force;
                }
            }
        })
    }

    fn outputs(&self) -> Vec<Output<'_>> {
        vec![Output::f64("forces", &self.forces)]
    }

    fn reference_copy(&self) -> Result<Option<Self>> {
        Ok(Some(Self {
            particles: try_copy("reference particles", &self.particles)?,
            forces: try_copy("reference forces", &self.forces)?,
        }))
    }

    fn shadow_layout(&self, _workers: usize) -> Result<Option<ShadowSet>> {
        ShadowSet::new().with_f64("forces", self.forces.len()).map(Some)
    }

    fn bytes_per_iteration(&self) -> u64 {
        (self.pairs() * (2 * std::mem::size_of::<Particle>() + 8)) as u64
    }
}
