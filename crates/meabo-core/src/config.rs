//! Runtime configuration for a benchmark run.
//!
//! Configuration arrives already parsed; the CLI builds these structs and
//! the core only validates them once at startup.

use std::env;

use serde::{Deserialize, Serialize};

use crate::affinity::{AffinityMask, BindMode};
use crate::error::{Error, Result};
use crate::phase::{PhaseId, PhaseSelector, PHASE_COUNT};
use crate::validation::ValidationMode;

/// Default iteration count per phase.
pub const DEFAULT_ITERATIONS: usize = 1000;

/// Optional components, resolved once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Apply CPU affinity; when off every bind is a no-op.
    pub binding: bool,
    /// Sample resource-usage counters around each phase.
    pub hardware_counters: bool,
    /// Sample energy meters around each phase.
    pub energy: bool,
    pub validation: ValidationMode,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            binding: cfg!(target_os = "linux"),
            hardware_counters: false,
            energy: false,
            validation: ValidationMode::None,
        }
    }
}

impl FeatureFlags {
    /// Defaults overridden by `MEABO_BINDING`, `MEABO_COUNTERS`,
    /// `MEABO_ENERGY` and `MEABO_VALIDATION`.
    pub fn from_env() -> Result<Self> {
        let mut flags = Self::default();
        if let Ok(value) = env::var("MEABO_BINDING") {
            flags.binding = meabo_tracing::parse_flag(&value);
        }
        if let Ok(value) = env::var("MEABO_COUNTERS") {
            flags.hardware_counters = meabo_tracing::parse_flag(&value);
        }
        if let Ok(value) = env::var("MEABO_ENERGY") {
            flags.energy = meabo_tracing::parse_flag(&value);
        }
        if let Ok(value) = env::var("MEABO_VALIDATION") {
            flags.validation = value.parse()?;
        }
        Ok(flags)
    }
}

/// Phase selection, thread placement and iteration settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    pub num_cpus: usize,
    /// Worker count forced for every phase; `0` derives it from the mask.
    pub thread_override: usize,
    pub phase_masks: [AffinityMask; PHASE_COUNT],
    pub selector: PhaseSelector,
    pub iterations: usize,
    pub bind_mode: BindMode,
    pub features: FeatureFlags,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            num_cpus: available_cpus(),
            thread_override: 0,
            phase_masks: [AffinityMask::Reset; PHASE_COUNT],
            selector: PhaseSelector::ALL,
            iterations: DEFAULT_ITERATIONS,
            bind_mode: BindMode::WholeSet,
            features: FeatureFlags::default(),
        }
    }
}

impl BenchConfig {
    pub fn mask(&self, phase: PhaseId) -> AffinityMask {
        self.phase_masks[phase.index()]
    }

    pub fn set_mask(&mut self, phase: PhaseId, mask: AffinityMask) {
        self.phase_masks[phase.index()] = mask;
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_cpus == 0 {
            return Err(Error::InvalidConfig("num_cpus must be at least 1".into()));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be at least 1".into()));
        }
        Ok(())
    }
}

/// Buffer sizes for workload generation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub array_size: usize,
    pub llist_size: usize,
    pub nrow: usize,
    pub ncol: usize,
    pub num_particles: usize,
    pub num_palindromes: usize,
    pub num_randomloc: usize,
    pub block_size: usize,
    /// Independent lists for the traversal phase.
    pub num_lists: usize,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            array_size: 1 << 20,
            llist_size: 1 << 24,
            nrow: 1 << 14,
            ncol: 1 << 14,
            num_particles: 1 << 20,
            num_palindromes: 1 << 10,
            num_randomloc: 1 << 21,
            block_size: 8,
            num_lists: available_cpus(),
            seed: 0,
        }
    }
}

impl WorkloadConfig {
    /// Small buffers for tests and smoke runs.
    pub fn small() -> Self {
        Self {
            array_size: 1 << 10,
            llist_size: 1 << 10,
            nrow: 1 << 6,
            ncol: 1 << 6,
            num_particles: 1 << 10,
            num_palindromes: 1 << 7,
            num_randomloc: 1 << 10,
            block_size: 8,
            num_lists: 4,
            seed: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("array_size", self.array_size),
            ("llist_size", self.llist_size),
            ("nrow", self.nrow),
            ("ncol", self.ncol),
            ("num_particles", self.num_particles),
            ("num_palindromes", self.num_palindromes),
            ("num_randomloc", self.num_randomloc),
            ("block_size", self.block_size),
            ("num_lists", self.num_lists),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be at least 1")));
        }
        let u32_bound = u32::MAX as usize;
        if self.array_size > u32_bound || self.ncol > u32_bound || self.llist_size > u32_bound {
            return Err(Error::InvalidConfig("buffer sizes must fit in 32-bit indices".into()));
        }
        if self.num_randomloc > i32::MAX as usize {
            return Err(Error::InvalidConfig("num_randomloc must fit in i32".into()));
        }
        Ok(())
    }
}

/// Logical CPUs available to the process, at least 1.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const FLAG_VARS: [&str; 4] = ["MEABO_BINDING", "MEABO_COUNTERS", "MEABO_ENERGY", "MEABO_VALIDATION"];

    fn clear_flags() {
        for key in FLAG_VARS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_match_reference_sizes() {
        let workload = WorkloadConfig::default();
        assert_eq!(workload.array_size, 1 << 20);
        assert_eq!(workload.llist_size, 1 << 24);
        assert_eq!(workload.num_randomloc, 1 << 21);
        assert_eq!(workload.block_size, 8);

        let bench = BenchConfig::default();
        assert_eq!(bench.iterations, 1000);
        assert!(bench.phase_masks.iter().all(|mask| *mask == AffinityMask::Reset));
        assert_eq!(bench.selector, PhaseSelector::ALL);
        assert_eq!(bench.bind_mode, BindMode::WholeSet);
        assert!(bench.num_cpus >= 1);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let bench = BenchConfig {
            iterations: 0,
            ..BenchConfig::default()
        };
        assert!(bench.validate().is_err());

        let workload = WorkloadConfig {
            block_size: 0,
            ..WorkloadConfig::small()
        };
        assert!(workload.validate().is_err());
        assert!(WorkloadConfig::small().validate().is_ok());
    }

    #[test]
    fn test_per_phase_masks() {
        let mut bench = BenchConfig::default();
        bench.set_mask(PhaseId::Reduction, AffinityMask::Cpus(0b11));
        assert_eq!(bench.mask(PhaseId::Reduction), AffinityMask::Cpus(0b11));
        assert_eq!(bench.mask(PhaseId::VectorAdd), AffinityMask::Reset);
    }

    #[test]
    #[serial]
    fn test_feature_flags_from_env() -> Result<()> {
        clear_flags();
        env::set_var("MEABO_BINDING", "0");
        env::set_var("MEABO_COUNTERS", "yes");
        env::set_var("MEABO_VALIDATION", "reduced");

        let flags = FeatureFlags::from_env()?;
        assert!(!flags.binding);
        assert!(flags.hardware_counters);
        assert!(!flags.energy);
        assert_eq!(flags.validation, ValidationMode::Reduced);

        clear_flags();
        Ok(())
    }

    #[test]
    #[serial]
    fn test_feature_flags_reject_unknown_validation() {
        clear_flags();
        env::set_var("MEABO_VALIDATION", "sometimes");
        assert!(FeatureFlags::from_env().is_err());
        clear_flags();
    }
}
