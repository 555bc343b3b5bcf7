//! CPU affinity masks, thread-count resolution and per-thread binding.
//!
//! OS thread affinity is ambient process state. Everything in this module
//! except [`OsAffinity`] is pure: [`plan_binding`] turns a mask, a bind mode
//! and a worker index into a [`BindAction`], and an [`AffinitySink`] applies
//! that action. Tests swap the OS sink for [`RecordingAffinity`].
//!
//! ## Mask encoding
//!
//! | Raw value | Meaning |
//! |-----------|---------|
//! | `0`       | no constraint; binding is skipped |
//! | `-1`      | reset; every CPU in `0..num_cpus` is eligible |
//! | other     | bit `i` set means CPU `i` is eligible; bits at or above `num_cpus` are ignored |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Widest CPU index a mask can address.
pub const MAX_MASK_CPUS: usize = 64;

/// Set of logical CPUs a thread may run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum AffinityMask {
    /// Raw value `0`: leave the thread's affinity alone.
    Unconstrained,
    /// Raw value `-1`: every CPU in `0..num_cpus`.
    #[default]
    Reset,
    /// Explicit CPU bitset.
    Cpus(u64),
}

impl AffinityMask {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => AffinityMask::Unconstrained,
            -1 => AffinityMask::Reset,
            bits => AffinityMask::Cpus(bits as u64),
        }
    }

    pub fn raw(self) -> i64 {
        match self {
            AffinityMask::Unconstrained => 0,
            AffinityMask::Reset => -1,
            AffinityMask::Cpus(bits) => bits as i64,
        }
    }

    /// Mask holding exactly the listed CPUs.
    pub fn from_cpus(cpus: impl IntoIterator<Item = usize>) -> Self {
        let bits = cpus
            .into_iter()
            .filter(|cpu| *cpu < MAX_MASK_CPUS)
            .fold(0u64, |bits, cpu| bits | (1 << cpu));
        AffinityMask::from_raw(bits as i64)
    }

    /// Eligible CPUs as a bitset truncated to `[0, num_cpus)`.
    ///
    /// `Unconstrained` yields an empty set.
    pub fn eligible_bits(self, num_cpus: usize) -> u64 {
        match self {
            AffinityMask::Unconstrained => 0,
            AffinityMask::Reset => width_mask(num_cpus),
            AffinityMask::Cpus(bits) => bits & width_mask(num_cpus),
        }
    }

    /// Number of eligible CPUs within `[0, num_cpus)`.
    pub fn popcount(self, num_cpus: usize) -> usize {
        self.eligible_bits(num_cpus).count_ones() as usize
    }

    /// Eligible CPU ids in ascending order.
    pub fn cpus(self, num_cpus: usize) -> impl Iterator<Item = usize> {
        let bits = self.eligible_bits(num_cpus);
        (0..MAX_MASK_CPUS).filter(move |cpu| bits & (1 << cpu) != 0)
    }

    /// The `n`-th eligible CPU (0-indexed, scanning upward from CPU 0).
    pub fn nth_cpu(self, n: usize, num_cpus: usize) -> Option<usize> {
        self.cpus(num_cpus).nth(n)
    }
}

fn width_mask(num_cpus: usize) -> u64 {
    if num_cpus >= MAX_MASK_CPUS {
        u64::MAX
    } else {
        (1u64 << num_cpus) - 1
    }
}

impl From<i64> for AffinityMask {
    fn from(raw: i64) -> Self {
        AffinityMask::from_raw(raw)
    }
}

impl From<AffinityMask> for i64 {
    fn from(mask: AffinityMask) -> Self {
        mask.raw()
    }
}

impl fmt::Display for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AffinityMask::Unconstrained => f.write_str("none"),
            AffinityMask::Reset => f.write_str("all"),
            AffinityMask::Cpus(bits) => write!(f, "{bits:#b}"),
        }
    }
}

impl FromStr for AffinityMask {
    type Err = Error;

    /// Accepts `-1`, decimal, `0x` hexadecimal or `0b` binary.
    fn from_str(s: &str) -> Result<Self> {
        parse_integer(s).map(AffinityMask::from_raw)
    }
}

/// Parse an integer written in decimal, `0x` hexadecimal or `0b` binary,
/// with an optional leading minus sign.
pub(crate) fn parse_integer(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2)
    } else {
        digits.parse::<u64>()
    }
    .map_err(|_| Error::InvalidConfig(format!("'{s}' is not an integer")))?;

    if negative {
        i64::try_from(parsed)
            .map(|value| -value)
            .map_err(|_| Error::InvalidConfig(format!("'{s}' is out of range")))
    } else {
        // Hex and binary masks may use bit 63.
        Ok(parsed as i64)
    }
}

/// Worker count for one phase invocation.
///
/// An explicit override wins; the reset mask yields `num_cpus`; otherwise the
/// number of mask bits within `[0, num_cpus)`. The unconstrained mask yields
/// zero, and callers substitute their own default for it.
pub fn resolve_thread_count(explicit_override: usize, mask: AffinityMask, num_cpus: usize) -> usize {
    if explicit_override != 0 {
        return explicit_override;
    }
    match mask {
        AffinityMask::Reset => num_cpus,
        mask => mask.popcount(num_cpus),
    }
}

/// How workers of one region share the eligible CPU set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindMode {
    /// Every worker may run on any eligible CPU.
    #[default]
    WholeSet,
    /// Worker `i` is pinned to the `i`-th eligible CPU.
    Pin,
}

impl fmt::Display for BindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindMode::WholeSet => f.write_str("set"),
            BindMode::Pin => f.write_str("pin"),
        }
    }
}

impl FromStr for BindMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "set" | "whole-set" | "whole_set" => Ok(BindMode::WholeSet),
            "pin" => Ok(BindMode::Pin),
            other => Err(Error::InvalidConfig(format!("unknown bind mode '{other}'"))),
        }
    }
}

/// Thread a binding applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindTarget {
    /// The thread driving the phase sequence.
    Orchestrator,
    /// Worker `n` of a parallel region.
    Worker(usize),
}

impl BindTarget {
    fn index(self) -> usize {
        match self {
            BindTarget::Orchestrator => 0,
            BindTarget::Worker(index) => index,
        }
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindTarget::Orchestrator => f.write_str("orchestrator thread"),
            BindTarget::Worker(index) => write!(f, "worker {index}"),
        }
    }
}

/// Concrete affinity change for one thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindAction {
    Skip,
    /// Eligible set becomes every CPU in `0..num_cpus`.
    Reset { num_cpus: usize },
    /// Eligible set becomes exactly these CPU bits.
    Set(u64),
    /// Thread runs only on this CPU.
    Pin(usize),
}

impl BindAction {
    /// CPU ids the action leaves eligible; empty for `Skip`.
    pub fn cpus(self) -> Vec<usize> {
        match self {
            BindAction::Skip => Vec::new(),
            BindAction::Reset { num_cpus } => (0..num_cpus).collect(),
            BindAction::Set(bits) => AffinityMask::Cpus(bits).cpus(MAX_MASK_CPUS).collect(),
            BindAction::Pin(cpu) => vec![cpu],
        }
    }
}

impl fmt::Display for BindAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindAction::Skip => f.write_str("skip"),
            BindAction::Reset { num_cpus } => write!(f, "reset(0..{num_cpus})"),
            BindAction::Set(bits) => write!(f, "set({bits:#b})"),
            BindAction::Pin(cpu) => write!(f, "pin({cpu})"),
        }
    }
}

/// Decide the affinity change for `worker_index` under `mask`.
///
/// A concrete mask with no bits inside `[0, num_cpus)` is treated like the
/// unconstrained mask. Pin mode with an index past the last eligible CPU is
/// an error.
pub fn plan_binding(mask: AffinityMask, num_cpus: usize, mode: BindMode, worker_index: usize) -> Result<BindAction> {
    match mask {
        AffinityMask::Unconstrained => Ok(BindAction::Skip),
        AffinityMask::Reset => Ok(BindAction::Reset { num_cpus }),
        AffinityMask::Cpus(raw) => {
            let bits = mask.eligible_bits(num_cpus);
            if bits == 0 {
                tracing::warn!(
                    mask = format_args!("{raw:#x}"),
                    num_cpus,
                    "affinity mask has no CPUs below num_cpus; leaving affinity unchanged"
                );
                return Ok(BindAction::Skip);
            }
            match mode {
                BindMode::WholeSet => Ok(BindAction::Set(bits)),
                BindMode::Pin => mask
                    .nth_cpu(worker_index, num_cpus)
                    .map(BindAction::Pin)
                    .ok_or(Error::WorkerOutsideMask {
                        worker: worker_index,
                        available: bits.count_ones() as usize,
                    }),
            }
        }
    }
}

/// Applies affinity actions to the calling thread.
pub trait AffinitySink: Send + Sync {
    fn apply(&self, target: BindTarget, action: BindAction) -> Result<()>;
}

/// Binds through the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsAffinity;

impl OsAffinity {
    /// CPUs the calling thread may currently run on.
    #[cfg(target_os = "linux")]
    pub fn current() -> Result<Vec<usize>> {
        let set = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
                return Err(Error::Affinity {
                    target: "calling thread".to_string(),
                    source: std::io::Error::last_os_error(),
                });
            }
            set
        };
        Ok((0..libc::CPU_SETSIZE as usize)
            .filter(|cpu| unsafe { libc::CPU_ISSET(*cpu, &set) })
            .collect())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn current() -> Result<Vec<usize>> {
        Err(Error::AffinityUnsupported)
    }
}

#[cfg(target_os = "linux")]
fn set_current_thread_affinity(cpus: &[usize]) -> std::io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for &cpu in cpus.iter().filter(|cpu| **cpu < libc::CPU_SETSIZE as usize) {
            libc::CPU_SET(cpu, &mut set);
        }
        // pid 0 addresses the calling thread
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

impl AffinitySink for OsAffinity {
    #[cfg(target_os = "linux")]
    fn apply(&self, target: BindTarget, action: BindAction) -> Result<()> {
        if action == BindAction::Skip {
            return Ok(());
        }
        set_current_thread_affinity(&action.cpus()).map_err(|source| Error::Affinity {
            target: target.to_string(),
            source,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn apply(&self, _target: BindTarget, action: BindAction) -> Result<()> {
        match action {
            BindAction::Skip => Ok(()),
            _ => Err(Error::AffinityUnsupported),
        }
    }
}

/// Ignores every action; used when binding is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAffinity;

impl AffinitySink for NoAffinity {
    fn apply(&self, _target: BindTarget, _action: BindAction) -> Result<()> {
        Ok(())
    }
}

/// One applied action, as seen by [`RecordingAffinity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindRecord {
    pub target: BindTarget,
    pub action: BindAction,
}

/// Records actions instead of applying them.
///
/// Optionally fails for one target, which lets tests drive the fatal
/// binding path without touching the OS.
#[derive(Debug, Default)]
pub struct RecordingAffinity {
    records: Mutex<Vec<BindRecord>>,
    fail_for: Option<BindTarget>,
}

impl RecordingAffinity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(target: BindTarget) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_for: Some(target),
        }
    }

    pub fn records(&self) -> Vec<BindRecord> {
        self.records.lock().clone()
    }

    /// Actions applied to workers, ordered by worker index.
    pub fn worker_actions(&self) -> Vec<(usize, BindAction)> {
        let mut actions: Vec<_> = self
            .records
            .lock()
            .iter()
            .filter_map(|record| match record.target {
                BindTarget::Worker(index) => Some((index, record.action)),
                BindTarget::Orchestrator => None,
            })
            .collect();
        actions.sort_by_key(|(index, _)| *index);
        actions
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl AffinitySink for RecordingAffinity {
    fn apply(&self, target: BindTarget, action: BindAction) -> Result<()> {
        if self.fail_for == Some(target) {
            return Err(Error::Affinity {
                target: target.to_string(),
                source: std::io::Error::from_raw_os_error(libc::EINVAL),
            });
        }
        self.records.lock().push(BindRecord { target, action });
        Ok(())
    }
}

/// Applies phase masks to threads through an [`AffinitySink`].
#[derive(Clone)]
pub struct AffinityBinder {
    sink: Arc<dyn AffinitySink>,
    num_cpus: usize,
    mode: BindMode,
}

impl AffinityBinder {
    pub fn new(sink: Arc<dyn AffinitySink>, num_cpus: usize, mode: BindMode) -> Self {
        Self { sink, num_cpus, mode }
    }

    /// Binder backed by the operating system.
    pub fn os(num_cpus: usize, mode: BindMode) -> Self {
        Self::new(Arc::new(OsAffinity), num_cpus, mode)
    }

    /// Binder that plans actions but never applies them.
    pub fn disabled(num_cpus: usize) -> Self {
        Self::new(Arc::new(NoAffinity), num_cpus, BindMode::WholeSet)
    }

    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    pub fn mode(&self) -> BindMode {
        self.mode
    }

    /// Bind the calling thread using the binder's configured mode.
    pub fn bind(&self, mask: AffinityMask, target: BindTarget) -> Result<BindAction> {
        self.bind_with(mask, self.mode, target)
    }

    /// Bind the calling thread with an explicit mode.
    ///
    /// Pin mode selects the eligible CPU matching the target's worker index;
    /// the orchestrator thread counts as index 0.
    pub fn bind_with(&self, mask: AffinityMask, mode: BindMode, target: BindTarget) -> Result<BindAction> {
        let action = plan_binding(mask, self.num_cpus, mode, target.index())?;
        meabo_tracing::performance::record_binding(target.index(), &action.to_string());
        self.sink.apply(target, action)?;
        Ok(action)
    }
}

impl fmt::Debug for AffinityBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityBinder")
            .field("num_cpus", &self.num_cpus)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
