//! Seeded generation of the input buffers each selected phase consumes.

use std::collections::BTreeMap;

use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::WorkloadConfig;
use crate::error::Result;
use crate::kernels::{
    ComputeMix, CsrMatrix, GatherStream, IndexedList, IndirectStream, ListTraversal, Palindromes, Particle,
    ParticleForces, PhaseData, RandomScatter, Reduction, SparseMatVec, VectorAdd,
};
use crate::phase::{PhaseId, PhaseSelector};

/// Buffers for every selected phase, keyed by phase.
#[derive(Debug, Default)]
pub struct Workload {
    phases: BTreeMap<PhaseId, PhaseData>,
}

impl Workload {
    /// Generate buffers for exactly the phases `selector` picks.
    ///
    /// Each phase draws from its own generator seeded with
    /// `config.seed` and the phase number, so a phase's data does not depend
    /// on which other phases were selected.
    pub fn generate(config: &WorkloadConfig, selector: PhaseSelector) -> Result<Self> {
        config.validate()?;
        let mut phases = BTreeMap::new();
        for phase in selector.phases() {
            let _span = meabo_tracing::perf_span!("generate_workload", phase = phase.number());
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed ^ (u64::from(phase.number()) << 56));
            phases.insert(phase, generate_phase(phase, config, &mut rng)?);
        }
        tracing::debug!(phases = phases.len(), seed = config.seed, "workload generated");
        Ok(Self { phases })
    }

    pub fn insert(&mut self, data: PhaseData) {
        self.phases.insert(data.phase(), data);
    }

    pub fn get(&self, phase: PhaseId) -> Option<&PhaseData> {
        self.phases.get(&phase)
    }

    pub fn get_mut(&mut self, phase: PhaseId) -> Option<&mut PhaseData> {
        self.phases.get_mut(&phase)
    }

    pub fn phases(&self) -> impl Iterator<Item = PhaseId> + '_ {
        self.phases.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// `(rand % 1024) * trig(rand % 1024)`
fn scaled_trig(rng: &mut ChaCha8Rng, trig: fn(f64) -> f64) -> f64 {
    let magnitude = f64::from(rng.gen_range(0..1024u32));
    let angle = f64::from(rng.gen_range(0..1024u32));
    magnitude * trig(angle)
}

fn trig_vec(rng: &mut ChaCha8Rng, len: usize, trig: fn(f64) -> f64) -> Vec<f64> {
    (0..len).map(|_| scaled_trig(rng, trig)).collect()
}

fn index_vec(rng: &mut ChaCha8Rng, len: usize, bound: usize) -> Vec<u32> {
    (0..len).map(|_| rng.gen_range(0..bound) as u32).collect()
}

fn generate_phase(phase: PhaseId, config: &WorkloadConfig, rng: &mut ChaCha8Rng) -> Result<PhaseData> {
    let n = config.array_size;
    let data = match phase {
        PhaseId::ComputeMix => {
            let vals = trig_vec(rng, n, f64::cos);
            let int_vals = vals.iter().map(|value| value.ceil() as i32).collect();
            PhaseData::ComputeMix(ComputeMix::new(vals, int_vals, config.block_size)?)
        }
        PhaseId::IndirectStream => {
            let src1 = trig_vec(rng, n, f64::sin);
            let src2 = trig_vec(rng, n, f64::sin);
            let dest = trig_vec(rng, n, f64::cos);
            let ind_src2 = index_vec(rng, n, n);
            PhaseData::IndirectStream(IndirectStream::new(dest, src1, src2, ind_src2)?)
        }
        PhaseId::Reduction => PhaseData::Reduction(Reduction::new(trig_vec(rng, n, f64::cos))),
        PhaseId::VectorAdd => {
            let src1 = trig_vec(rng, n, f64::sin);
            let src2 = trig_vec(rng, n, f64::sin);
            let dest = trig_vec(rng, n, f64::cos);
            PhaseData::VectorAdd(VectorAdd::new(dest, src1, src2)?)
        }
        PhaseId::GatherStream => {
            let src1 = trig_vec(rng, n, f64::sin);
            let src2 = trig_vec(rng, n, f64::sin);
            let dest = trig_vec(rng, n, f64::cos);
            let ind_src1 = index_vec(rng, n, n);
            let ind_src2 = index_vec(rng, n, n);
            PhaseData::GatherStream(GatherStream::new(dest, src1, src2, ind_src1, ind_src2)?)
        }
        PhaseId::SparseMatVec => {
            let vect_in = trig_vec(rng, config.ncol, f64::sin);
            let rows = (0..config.nrow)
                .map(|_| {
                    let nonzeros = rng.gen_range(0..config.ncol);
                    index::sample(rng, config.ncol, nonzeros)
                        .into_iter()
                        .map(|col| (col as u32, scaled_trig(rng, f64::cos)))
                        .collect()
                })
                .collect();
            let matrix = CsrMatrix::from_rows(rows, config.ncol)?;
            PhaseData::SparseMatVec(SparseMatVec::new(matrix, vect_in)?)
        }
        PhaseId::ListTraversal => {
            let lists = (0..config.num_lists)
                .map(|_| {
                    let mut order: Vec<u32> = (0..config.llist_size as u32).collect();
                    order.shuffle(rng);
                    IndexedList::from_order(&order)
                })
                .collect::<Result<Vec<_>>>()?;
            PhaseData::ListTraversal(ListTraversal::new(lists)?)
        }
        PhaseId::ParticleForces => {
            let particles = (0..config.num_particles)
                .map(|_| Particle {
                    x: rng.gen_range(0..1024),
                    y: rng.gen_range(0..1024),
                    z: rng.gen_range(0..1024),
                    charge: f64::from(rng.gen_range(0..1024u32)).sin(),
                })
                .collect();
            PhaseData::ParticleForces(ParticleForces::new(particles))
        }
        PhaseId::Palindromes => PhaseData::Palindromes(Palindromes::new(config.num_palindromes)),
        PhaseId::RandomScatter => PhaseData::RandomScatter(RandomScatter::new(vec![0; config.num_randomloc])?),
    };
    Ok(data)
}
