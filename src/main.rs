//! meabo CLI - phase-based micro-architectural benchmark
//!
//! Runs the ten benchmark phases with per-phase CPU affinity and optional
//! output validation.
//!
//! Examples:
//!   meabo -C 8 -P 0x3 -i 100
//!   meabo -A 3=0b1111 -A 5=0xf0 --bind pin --validation full
//!   MEABO_TRACING_PROFILE=ci meabo --json > summary.json

use std::process::ExitCode;

use clap::Parser;
use meabo_core::{
    config::available_cpus, AffinityMask, BenchConfig, BindMode, FeatureFlags, PhaseId, PhaseOrchestrator,
    PhaseSelector, RunSummary, ValidationMode, Workload, WorkloadConfig, DEFAULT_ITERATIONS, PHASE_COUNT,
};
use meabo_tracing::TracingConfig;

/// Phase-based micro-architectural benchmark
#[derive(Parser, Debug)]
#[command(name = "meabo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Elements in the dense arrays (phases 1-5)
    #[arg(short = 's', long)]
    array_size: Option<usize>,

    /// Total linked-list nodes (phase 7)
    #[arg(short = 'l', long)]
    list_size: Option<usize>,

    /// Sparse matrix rows (phase 6)
    #[arg(short = 'r', long)]
    rows: Option<usize>,

    /// Sparse matrix columns (phase 6)
    #[arg(short = 'c', long)]
    cols: Option<usize>,

    /// Iterations per phase
    #[arg(short = 'i', long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,

    /// Particles (phase 8)
    #[arg(short = 'p', long)]
    particles: Option<usize>,

    /// Palindromes to find (phase 9)
    #[arg(short = 'x', long)]
    palindromes: Option<usize>,

    /// Random locations (phase 10)
    #[arg(short = 'R', long)]
    random_locations: Option<usize>,

    /// Block size for the compute mix partition (phase 1)
    #[arg(short = 'b', long)]
    block_size: Option<usize>,

    /// CPUs considered by affinity masks [default: available parallelism]
    #[arg(short = 'C', long)]
    cpus: Option<usize>,

    /// Per-phase affinity mask as PHASE=MASK (decimal, 0x, 0b, or -1 for reset)
    #[arg(short = 'A', long = "affinity", value_name = "PHASE=MASK", value_parser = parse_affinity)]
    affinity: Vec<(PhaseId, AffinityMask)>,

    /// Phase selector bitmask; bit N-1 selects phase N, 0 selects all
    #[arg(short = 'P', long = "phases", value_name = "MASK", default_value = "0", value_parser = parse_selector)]
    phases: PhaseSelector,

    /// Force this many threads for every phase (0 derives it from the mask)
    #[arg(short = 'T', long, default_value_t = 0)]
    threads: usize,

    /// How workers share the mask's CPUs: set or pin
    #[arg(long, default_value = "set", value_parser = parse_bind_mode)]
    bind: BindMode,

    /// Output validation: none, full or reduced [default: MEABO_VALIDATION or none]
    #[arg(long, value_parser = parse_validation)]
    validation: Option<ValidationMode>,

    /// Sample resource-usage counters around each phase
    #[arg(long)]
    counters: bool,

    /// Sample powercap energy counters around each phase
    #[arg(long)]
    energy: bool,

    /// Never change thread affinity
    #[arg(long)]
    no_binding: bool,

    /// Seed for workload generation
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn parse_affinity(value: &str) -> Result<(PhaseId, AffinityMask), String> {
    let (phase, mask) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PHASE=MASK, got '{value}'"))?;
    let phase: PhaseId = phase.parse().map_err(|err| format!("{err}"))?;
    let mask: AffinityMask = mask.parse().map_err(|err| format!("{err}"))?;
    Ok((phase, mask))
}

fn parse_selector(value: &str) -> Result<PhaseSelector, String> {
    value.parse().map_err(|err| format!("{err}"))
}

fn parse_bind_mode(value: &str) -> Result<BindMode, String> {
    value.parse().map_err(|err| format!("{err}"))
}

fn parse_validation(value: &str) -> Result<ValidationMode, String> {
    value.parse().map_err(|err| format!("{err}"))
}

impl Cli {
    fn features(&self) -> meabo_core::Result<FeatureFlags> {
        let mut features = FeatureFlags::from_env()?;
        if let Some(mode) = self.validation {
            features.validation = mode;
        }
        features.hardware_counters |= self.counters;
        features.energy |= self.energy;
        if self.no_binding {
            features.binding = false;
        }
        Ok(features)
    }

    fn bench_config(&self) -> meabo_core::Result<BenchConfig> {
        let mut phase_masks = [AffinityMask::Reset; PHASE_COUNT];
        for (phase, mask) in &self.affinity {
            phase_masks[phase.index()] = *mask;
        }
        Ok(BenchConfig {
            num_cpus: self.cpus.unwrap_or_else(available_cpus),
            thread_override: self.threads,
            phase_masks,
            selector: self.phases,
            iterations: self.iterations,
            bind_mode: self.bind,
            features: self.features()?,
        })
    }

    fn workload_config(&self, num_cpus: usize) -> WorkloadConfig {
        let defaults = WorkloadConfig::default();
        WorkloadConfig {
            array_size: self.array_size.unwrap_or(defaults.array_size),
            llist_size: self.list_size.unwrap_or(defaults.llist_size),
            nrow: self.rows.unwrap_or(defaults.nrow),
            ncol: self.cols.unwrap_or(defaults.ncol),
            num_particles: self.particles.unwrap_or(defaults.num_particles),
            num_palindromes: self.palindromes.unwrap_or(defaults.num_palindromes),
            num_randomloc: self.random_locations.unwrap_or(defaults.num_randomloc),
            block_size: self.block_size.unwrap_or(defaults.block_size),
            num_lists: num_cpus,
            seed: self.seed,
        }
    }
}

fn run(cli: &Cli) -> meabo_core::Result<RunSummary> {
    let config = cli.bench_config()?;
    let workload_config = cli.workload_config(config.num_cpus);
    tracing::debug!(?config, ?workload_config, "resolved configuration");

    let mut workload = Workload::generate(&workload_config, config.selector)?;
    let mut orchestrator = PhaseOrchestrator::new(config)?;
    orchestrator.run(&mut workload)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = TracingConfig::from_env().with_verbosity(cli.verbose);
    if let Err(err) = meabo_tracing::init_global_tracing(&tracing_config) {
        eprintln!("meabo: failed to initialise logging: {err}");
        return ExitCode::FAILURE;
    }

    let summary = match run(&cli) {
        Ok(summary) => summary,
        Err(err) => {
            tracing::error!(error = %err, "benchmark aborted");
            return ExitCode::FAILURE;
        }
    };

    for phase in summary.failed_validations() {
        tracing::warn!(phase = %phase, "phase output did not validate");
    }

    if cli.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialise run summary");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_affinity_flags_fill_phase_masks() {
        let cli = Cli::parse_from([
            "meabo", "-C", "8", "-A", "3=0b1111", "-A", "5=0xf0", "-A", "7=-1", "-P", "0x14", "--bind", "pin",
        ]);
        let config = cli.bench_config().unwrap();

        assert_eq!(config.num_cpus, 8);
        assert_eq!(config.mask(PhaseId::Reduction), AffinityMask::from_raw(0b1111));
        assert_eq!(config.mask(PhaseId::GatherStream), AffinityMask::from_raw(0xf0));
        assert_eq!(config.mask(PhaseId::ListTraversal), AffinityMask::Reset);
        assert_eq!(config.mask(PhaseId::ComputeMix), AffinityMask::Reset);
        assert_eq!(config.bind_mode, BindMode::Pin);
        assert!(config.selector.selects(PhaseId::Reduction));
        assert!(config.selector.selects(PhaseId::GatherStream));
        assert!(!config.selector.selects(PhaseId::VectorAdd));
    }

    #[test]
    fn test_malformed_affinity_is_rejected() {
        assert!(Cli::try_parse_from(["meabo", "-A", "3"]).is_err());
        assert!(Cli::try_parse_from(["meabo", "-A", "11=0x1"]).is_err());
        assert!(Cli::try_parse_from(["meabo", "--bind", "scatter"]).is_err());
    }

    #[test]
    fn test_workload_sizes_follow_flags() {
        let cli = Cli::parse_from(["meabo", "-s", "4096", "-x", "64", "--seed", "7"]);
        let workload = cli.workload_config(4);
        assert_eq!(workload.array_size, 4096);
        assert_eq!(workload.num_palindromes, 64);
        assert_eq!(workload.num_lists, 4);
        assert_eq!(workload.seed, 7);
        assert_eq!(workload.nrow, WorkloadConfig::default().nrow);
    }
}
