//! Start/stop sampling hooks that bracket a phase's timed region.
//!
//! Samples are opaque logging payloads for the reporter. A probe that fails
//! to start or stop produces a warning and no samples; it never aborts the
//! run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::FeatureFlags;
use crate::error::{Error, Result};
use crate::phase::PhaseId;

/// One measured quantity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub probe: &'static str,
    pub name: String,
    pub value: f64,
    pub unit: &'static str,
}

/// Hook pair called around a phase.
pub trait PhaseProbe: Send {
    fn name(&self) -> &'static str;
    fn start(&mut self, phase: PhaseId) -> Result<()>;
    fn stop(&mut self, phase: PhaseId) -> Result<Vec<Sample>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Usage {
    user_us: i64,
    system_us: i64,
    minor_faults: i64,
    major_faults: i64,
    voluntary_switches: i64,
    involuntary_switches: i64,
}

#[cfg(unix)]
fn current_usage() -> Result<Usage> {
    let usage = unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return Err(Error::Probe(format!(
                "getrusage failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        usage
    };
    let micros = |tv: libc::timeval| tv.tv_sec as i64 * 1_000_000 + tv.tv_usec as i64;
    Ok(Usage {
        user_us: micros(usage.ru_utime),
        system_us: micros(usage.ru_stime),
        minor_faults: usage.ru_minflt as i64,
        major_faults: usage.ru_majflt as i64,
        voluntary_switches: usage.ru_nvcsw as i64,
        involuntary_switches: usage.ru_nivcsw as i64,
    })
}

#[cfg(not(unix))]
fn current_usage() -> Result<Usage> {
    Err(Error::Probe("resource usage is not available on this platform".into()))
}

/// Process resource-usage deltas: CPU time, page faults and context switches.
#[derive(Debug, Default)]
pub struct ResourceUsageProbe {
    started: Option<Usage>,
}

impl ResourceUsageProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PhaseProbe for ResourceUsageProbe {
    fn name(&self) -> &'static str {
        "rusage"
    }

    fn start(&mut self, _phase: PhaseId) -> Result<()> {
        self.started = Some(current_usage()?);
        Ok(())
    }

    fn stop(&mut self, phase: PhaseId) -> Result<Vec<Sample>> {
        let start = self
            .started
            .take()
            .ok_or_else(|| Error::Probe(format!("rusage probe stopped for phase {phase} without start")))?;
        let end = current_usage()?;
        let sample = |name: &str, value: i64, unit| Sample {
            probe: "rusage",
            name: name.to_string(),
            value: value as f64,
            unit,
        };
        Ok(vec![
            sample("user_time", end.user_us - start.user_us, "us"),
            sample("system_time", end.system_us - start.system_us, "us"),
            sample("minor_faults", end.minor_faults - start.minor_faults, "count"),
            sample("major_faults", end.major_faults - start.major_faults, "count"),
            sample("voluntary_switches", end.voluntary_switches - start.voluntary_switches, "count"),
            sample(
                "involuntary_switches",
                end.involuntary_switches - start.involuntary_switches,
                "count",
            ),
        ])
    }
}

/// Default location of Linux powercap zones.
pub const POWERCAP_ROOT: &str = "/sys/class/powercap";

#[derive(Clone, Debug, PartialEq)]
struct EnergyZone {
    name: String,
    counter: PathBuf,
    max_range_uj: Option<u64>,
}

/// Cumulative energy counters from Linux powercap (`energy_uj`).
#[derive(Debug)]
pub struct EnergyProbe {
    zones: Vec<EnergyZone>,
    started: Option<Vec<u64>>,
}

fn read_u64(path: &Path) -> Result<u64> {
    let text = fs::read_to_string(path).map_err(|err| Error::Probe(format!("{}: {err}", path.display())))?;
    text.trim()
        .parse()
        .map_err(|_| Error::Probe(format!("{}: not an integer", path.display())))
}

/// Counter delta accounting for one wrap-around at `max_range`.
fn energy_delta(start: u64, end: u64, max_range: Option<u64>) -> u64 {
    if end >= start {
        end - start
    } else {
        match max_range {
            Some(range) => range.saturating_sub(start) + end,
            None => end,
        }
    }
}

impl EnergyProbe {
    /// Discover zones under [`POWERCAP_ROOT`].
    pub fn discover() -> Result<Self> {
        Self::with_root(POWERCAP_ROOT)
    }

    /// Discover zones under `root`; each zone is a directory holding an
    /// `energy_uj` counter.
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let entries = fs::read_dir(root).map_err(|err| Error::Probe(format!("{}: {err}", root.display())))?;

        let mut zones: Vec<EnergyZone> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|dir| dir.join("energy_uj").is_file())
            .map(|dir| {
                let name = fs::read_to_string(dir.join("name"))
                    .map(|name| name.trim().to_string())
                    .unwrap_or_else(|_| dir.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned()));
                EnergyZone {
                    name,
                    counter: dir.join("energy_uj"),
                    max_range_uj: read_u64(&dir.join("max_energy_range_uj")).ok(),
                }
            })
            .collect();
        zones.sort_by(|a, b| a.counter.cmp(&b.counter));

        if zones.is_empty() {
            return Err(Error::Probe(format!("no energy counters under {}", root.display())));
        }
        Ok(Self { zones, started: None })
    }

    pub fn zones(&self) -> usize {
        self.zones.len()
    }

    fn read_all(&self) -> Result<Vec<u64>> {
        self.zones.iter().map(|zone| read_u64(&zone.counter)).collect()
    }
}

impl PhaseProbe for EnergyProbe {
    fn name(&self) -> &'static str {
        "energy"
    }

    fn start(&mut self, _phase: PhaseId) -> Result<()> {
        self.started = Some(self.read_all()?);
        Ok(())
    }

    fn stop(&mut self, phase: PhaseId) -> Result<Vec<Sample>> {
        let start = self
            .started
            .take()
            .ok_or_else(|| Error::Probe(format!("energy probe stopped for phase {phase} without start")))?;
        let end = self.read_all()?;
        Ok(self
            .zones
            .iter()
            .zip(start.into_iter().zip(end))
            .map(|(zone, (start, end))| Sample {
                probe: "energy",
                name: zone.name.clone(),
                value: energy_delta(start, end, zone.max_range_uj) as f64,
                unit: "uJ",
            })
            .collect())
    }
}

/// The probes enabled for a run.
#[derive(Default)]
pub struct ProbeSet {
    probes: Vec<Box<dyn PhaseProbe>>,
}

impl ProbeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Probes selected by `flags`; probes that cannot initialise are
    /// dropped with a warning.
    pub fn from_flags(flags: &FeatureFlags) -> Self {
        let mut set = Self::empty();
        if flags.hardware_counters {
            set.push(Box::new(ResourceUsageProbe::new()));
        }
        if flags.energy {
            match EnergyProbe::discover() {
                Ok(probe) => set.push(Box::new(probe)),
                Err(err) => tracing::warn!(error = %err, "energy probe disabled"),
            }
        }
        set
    }

    pub fn push(&mut self, probe: Box<dyn PhaseProbe>) {
        self.probes.push(probe);
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn start(&mut self, phase: PhaseId) {
        for probe in &mut self.probes {
            if let Err(err) = probe.start(phase) {
                tracing::warn!(phase = %phase, probe = probe.name(), error = %err, "probe failed to start");
            }
        }
    }

    pub fn stop(&mut self, phase: PhaseId) -> Vec<Sample> {
        let mut samples = Vec::new();
        for probe in &mut self.probes {
            match probe.stop(phase) {
                Ok(mut taken) => samples.append(&mut taken),
                Err(err) => {
                    tracing::warn!(phase = %phase, probe = probe.name(), error = %err, "probe failed to stop")
                }
            }
        }
        samples
    }
}

impl std::fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.probes.iter().map(|probe| probe.name())).finish()
    }
}
