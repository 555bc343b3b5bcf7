//! Phase identifiers and the phase-selection bitmask.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::affinity::parse_integer;
use crate::error::{Error, Result};

/// Number of phases in the suite.
pub const PHASE_COUNT: usize = 10;

/// One independently selectable compute kernel.
///
/// Discriminants are the user-facing phase numbers; phase `k` owns selector
/// bit `k - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum PhaseId {
    ComputeMix = 1,
    IndirectStream = 2,
    Reduction = 3,
    VectorAdd = 4,
    GatherStream = 5,
    SparseMatVec = 6,
    ListTraversal = 7,
    ParticleForces = 8,
    Palindromes = 9,
    RandomScatter = 10,
}

impl PhaseId {
    /// All phases in execution order.
    pub const ALL: [PhaseId; PHASE_COUNT] = [
        PhaseId::ComputeMix,
        PhaseId::IndirectStream,
        PhaseId::Reduction,
        PhaseId::VectorAdd,
        PhaseId::GatherStream,
        PhaseId::SparseMatVec,
        PhaseId::ListTraversal,
        PhaseId::ParticleForces,
        PhaseId::Palindromes,
        PhaseId::RandomScatter,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }

    /// Zero-based position, used to index per-phase configuration arrays.
    pub fn index(self) -> usize {
        usize::from(self.number()) - 1
    }

    /// Selector bit owned by this phase.
    pub fn bit(self) -> u32 {
        1 << self.index()
    }

    pub fn name(self) -> &'static str {
        match self {
            PhaseId::ComputeMix => "compute_mix",
            PhaseId::IndirectStream => "indirect_stream",
            PhaseId::Reduction => "reduction",
            PhaseId::VectorAdd => "vector_add",
            PhaseId::GatherStream => "gather_stream",
            PhaseId::SparseMatVec => "sparse_matvec",
            PhaseId::ListTraversal => "list_traversal",
            PhaseId::ParticleForces => "particle_forces",
            PhaseId::Palindromes => "palindromes",
            PhaseId::RandomScatter => "random_scatter",
        }
    }

    /// Iterations the phase actually executes for a configured count.
    ///
    /// The sparse product runs a fifth and the palindrome search a tenth of
    /// the configured iterations, floored at one.
    pub fn effective_iterations(self, iterations: usize) -> usize {
        match self {
            PhaseId::SparseMatVec => (iterations / 5).max(1),
            PhaseId::Palindromes => (iterations / 10).max(1),
            _ => iterations,
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

impl From<PhaseId> for u8 {
    fn from(phase: PhaseId) -> Self {
        phase.number()
    }
}

impl TryFrom<u8> for PhaseId {
    type Error = Error;

    fn try_from(number: u8) -> Result<Self> {
        PhaseId::from_number(number)
            .ok_or_else(|| Error::InvalidConfig(format!("phase must be in 1..={PHASE_COUNT}, got {number}")))
    }
}

impl FromStr for PhaseId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let number: u8 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid phase number '{s}'")))?;
        PhaseId::try_from(number)
    }
}

/// Bitmask over phases; `0` selects every phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseSelector(u32);

impl PhaseSelector {
    pub const ALL: PhaseSelector = PhaseSelector(0);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn only(phase: PhaseId) -> Self {
        Self(phase.bit())
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn selects(self, phase: PhaseId) -> bool {
        self.0 == 0 || self.0 & phase.bit() != 0
    }

    /// Selected phases in execution order.
    pub fn phases(self) -> impl Iterator<Item = PhaseId> {
        PhaseId::ALL.into_iter().filter(move |phase| self.selects(*phase))
    }
}

impl FromIterator<PhaseId> for PhaseSelector {
    fn from_iter<I: IntoIterator<Item = PhaseId>>(iter: I) -> Self {
        Self(iter.into_iter().fold(0, |bits, phase| bits | phase.bit()))
    }
}

impl FromStr for PhaseSelector {
    type Err = Error;

    /// Accepts decimal, `0x` hexadecimal or `0b` binary.
    fn from_str(s: &str) -> Result<Self> {
        let value = parse_integer(s)?;
        u32::try_from(value)
            .map(PhaseSelector)
            .map_err(|_| Error::InvalidConfig(format!("phase selector '{s}' is out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_selects_every_phase() {
        let selected: Vec<_> = PhaseSelector::ALL.phases().collect();
        assert_eq!(selected, PhaseId::ALL.to_vec());
    }

    #[test]
    fn test_single_bit_selects_single_phase() {
        for (bit, phase) in PhaseId::ALL.into_iter().enumerate() {
            let selector = PhaseSelector::from_bits(1 << bit);
            let selected: Vec<_> = selector.phases().collect();
            assert_eq!(selected, vec![phase]);
        }
    }

    #[test]
    fn test_bits_are_unique() {
        let combined = PhaseId::ALL.iter().fold(0u32, |acc, phase| {
            assert_eq!(acc & phase.bit(), 0, "{phase} shares a bit");
            acc | phase.bit()
        });
        assert_eq!(combined, 0x3ff);
    }

    #[test]
    fn test_effective_iterations() {
        assert_eq!(PhaseId::VectorAdd.effective_iterations(1000), 1000);
        assert_eq!(PhaseId::SparseMatVec.effective_iterations(1000), 200);
        assert_eq!(PhaseId::Palindromes.effective_iterations(1000), 100);
        assert_eq!(PhaseId::SparseMatVec.effective_iterations(3), 1);
        assert_eq!(PhaseId::Palindromes.effective_iterations(9), 1);
    }

    #[test]
    fn test_parse_phase_and_selector() -> Result<()> {
        assert_eq!("7".parse::<PhaseId>()?, PhaseId::ListTraversal);
        assert!("0".parse::<PhaseId>().is_err());
        assert!("11".parse::<PhaseId>().is_err());

        let selector: PhaseSelector = "0b1010".parse()?;
        let selected: Vec<_> = selector.phases().collect();
        assert_eq!(selected, vec![PhaseId::IndirectStream, PhaseId::VectorAdd]);
        assert_eq!("0x8".parse::<PhaseSelector>()?, PhaseSelector::only(PhaseId::VectorAdd));
        Ok(())
    }

    #[test]
    fn test_selector_from_phases() {
        let selector: PhaseSelector = [PhaseId::ComputeMix, PhaseId::RandomScatter].into_iter().collect();
        assert_eq!(selector.bits(), 0b10_0000_0001);
    }
}
