//! Fork-join parallel regions with per-worker affinity binding.
//!
//! A [`Region`] owns a dedicated rayon pool with exactly as many threads as
//! the phase resolved. [`Region::run`] broadcasts the kernel body to every
//! pool thread: each worker binds itself, waits on a start barrier, then
//! invokes the body once per iteration. The broadcast returns only after
//! every worker finished, so callers never observe a partially run region.
//!
//! Kernel bodies write through [`Partitioned`] slices, which hand each
//! worker a disjoint contiguous range of an output buffer.
//!
//! A panic inside a parallel body aborts the process.

use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;

use parking_lot::{Mutex, MutexGuard};

use crate::affinity::{AffinityBinder, AffinityMask, BindTarget};
use crate::error::{Error, Result};
use crate::phase::PhaseId;

/// Parameters of one parallel region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Launch {
    pub phase: PhaseId,
    pub threads: usize,
    pub iterations: usize,
    pub mask: AffinityMask,
}

/// Creates parallel regions whose workers bind through one binder.
#[derive(Clone, Debug)]
pub struct KernelRunner {
    binder: AffinityBinder,
}

impl KernelRunner {
    pub fn new(binder: AffinityBinder) -> Self {
        Self { binder }
    }

    pub fn binder(&self) -> &AffinityBinder {
        &self.binder
    }

    /// Build the worker pool for a region.
    ///
    /// Thread creation happens here so that it stays outside the timed
    /// [`Region::run`] call.
    pub fn launch(&self, launch: Launch) -> Result<Region<'_>> {
        if launch.threads == 0 {
            return Err(Error::InvalidConfig(format!(
                "phase {} resolved to zero workers",
                launch.phase
            )));
        }

        let phase = launch.phase.number();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(launch.threads)
            .thread_name(move |index| format!("meabo-p{phase}-w{index}"))
            .build()?;

        tracing::debug!(
            phase = %launch.phase,
            threads = launch.threads,
            iterations = launch.iterations,
            mask = %launch.mask,
            bind_mode = %self.binder.mode(),
            "launching parallel region"
        );

        Ok(Region {
            pool: Some(pool),
            binder: Some(&self.binder),
            mask: launch.mask,
            workers: launch.threads,
            iterations: launch.iterations,
        })
    }
}

/// A fork-join region ready to execute a kernel body.
pub struct Region<'a> {
    pool: Option<rayon::ThreadPool>,
    binder: Option<&'a AffinityBinder>,
    mask: AffinityMask,
    workers: usize,
    iterations: usize,
}

impl Region<'static> {
    /// Single-worker region that runs inline on the calling thread without
    /// binding. Serial reference executions use this.
    pub fn serial(iterations: usize) -> Self {
        Region {
            pool: None,
            binder: None,
            mask: AffinityMask::Unconstrained,
            workers: 1,
            iterations,
        }
    }
}

impl Region<'_> {
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn is_serial(&self) -> bool {
        self.pool.is_none()
    }

    /// Execute `body` `iterations` times on every worker.
    ///
    /// Every worker binds before any worker starts iterating. If a binding
    /// fails, all workers leave without running the body and the first
    /// binding error is returned.
    pub fn run<F>(&self, body: F) -> Result<()>
    where
        F: Fn(&WorkerContext<'_>) + Sync,
    {
        let Some(pool) = &self.pool else {
            let barrier = Barrier::new(1);
            for iteration in 0..self.iterations {
                body(&WorkerContext::new(0, 1, iteration, &barrier));
            }
            return Ok(());
        };

        let start = Barrier::new(self.workers);
        let barrier = Barrier::new(self.workers);
        let bind_failed = AtomicBool::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);

        pool.broadcast(|broadcast| {
            let index = broadcast.index();
            if let Some(binder) = self.binder {
                if let Err(err) = binder.bind(self.mask, BindTarget::Worker(index)) {
                    bind_failed.store(true, Ordering::SeqCst);
                    let mut slot = first_error.lock();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            }

            start.wait();
            if bind_failed.load(Ordering::SeqCst) {
                return;
            }

            let iterations = catch_unwind(AssertUnwindSafe(|| {
                for iteration in 0..self.iterations {
                    body(&WorkerContext::new(index, self.workers, iteration, &barrier));
                }
            }));
            if iterations.is_err() {
                tracing::error!(worker = index, workers = self.workers, "worker panicked inside a parallel region");
                std::process::abort();
            }
        });

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// What one worker knows about itself during a body invocation.
pub struct WorkerContext<'r> {
    index: usize,
    workers: usize,
    iteration: usize,
    barrier: &'r Barrier,
}

impl<'r> WorkerContext<'r> {
    fn new(index: usize, workers: usize, iteration: usize, barrier: &'r Barrier) -> Self {
        Self {
            index,
            workers,
            iteration,
            barrier,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn is_leader(&self) -> bool {
        self.index == 0
    }

    /// Block until every worker of the region reaches this point.
    ///
    /// Every worker must call this the same number of times per iteration.
    pub fn barrier(&self) {
        self.barrier.wait();
    }

    /// This worker's share of `0..len` under a static schedule.
    pub fn range(&self, len: usize) -> Range<usize> {
        static_range(len, self.workers, self.index)
    }
}

/// Contiguous share of `0..len` for `worker` out of `workers`.
///
/// The first `len % workers` workers receive one extra element, so shares
/// differ by at most one and cover `0..len` without overlap.
pub fn static_range(len: usize, workers: usize, worker: usize) -> Range<usize> {
    let workers = workers.max(1);
    let base = len / workers;
    let rem = len % workers;
    let start = worker * base + worker.min(rem);
    let end = start + base + usize::from(worker < rem);
    start.min(len)..end.min(len)
}

/// Share of `0..len` split on `block`-sized boundaries.
pub fn blocked_range(len: usize, block: usize, workers: usize, worker: usize) -> Range<usize> {
    let block = block.max(1);
    let blocks = len.div_ceil(block);
    let owned = static_range(blocks, workers, worker);
    (owned.start * block).min(len)..(owned.end * block).min(len)
}

/// A worker's exclusive window into a partitioned buffer.
pub struct Part<'a, T> {
    /// Global index of `data[0]`.
    pub start: usize,
    pub data: &'a mut [T],
}

/// Mutable buffer split into one disjoint part per worker.
pub struct Partitioned<'a, T> {
    parts: Vec<Mutex<Part<'a, T>>>,
}

impl<'a, T: Send> Partitioned<'a, T> {
    /// Split with [`static_range`].
    pub fn new(data: &'a mut [T], workers: usize) -> Self {
        let len = data.len();
        Self::split(data, workers, |worker| static_range(len, workers, worker))
    }

    /// Split with [`blocked_range`].
    pub fn blocked(data: &'a mut [T], block: usize, workers: usize) -> Self {
        let len = data.len();
        Self::split(data, workers, |worker| blocked_range(len, block, workers, worker))
    }

    fn split(data: &'a mut [T], workers: usize, range_of: impl Fn(usize) -> Range<usize>) -> Self {
        let mut rest = data;
        let mut parts = Vec::with_capacity(workers.max(1));
        for worker in 0..workers.max(1) {
            let range = range_of(worker);
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
            parts.push(Mutex::new(Part {
                start: range.start,
                data: head,
            }));
            rest = tail;
        }
        Self { parts }
    }

    pub fn workers(&self) -> usize {
        self.parts.len()
    }

    /// Lock the part owned by `worker`; uncontended when each worker only
    /// touches its own index.
    pub fn lock(&self, worker: usize) -> MutexGuard<'_, Part<'a, T>> {
        self.parts[worker].lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::{BindAction, BindMode, RecordingAffinity};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn recording_runner(num_cpus: usize, mode: BindMode) -> (Arc<RecordingAffinity>, KernelRunner) {
        let sink = Arc::new(RecordingAffinity::new());
        let runner = KernelRunner::new(AffinityBinder::new(sink.clone(), num_cpus, mode));
        (sink, runner)
    }

    fn launch(threads: usize, iterations: usize, mask: AffinityMask) -> Launch {
        Launch {
            phase: PhaseId::VectorAdd,
            threads,
            iterations,
            mask,
        }
    }

    #[test]
    fn test_static_range_covers_without_overlap() {
        for len in [0, 1, 7, 16, 1023] {
            for workers in 1..=9 {
                let mut next = 0;
                for worker in 0..workers {
                    let range = static_range(len, workers, worker);
                    assert_eq!(range.start, next);
                    next = range.end;
                }
                assert_eq!(next, len);
            }
        }
    }

    #[test]
    fn test_blocked_range_respects_block_boundaries() {
        let len = 100;
        let mut next = 0;
        for worker in 0..3 {
            let range = blocked_range(len, 8, 3, worker);
            assert_eq!(range.start, next);
            assert!(range.start % 8 == 0 || range.start == len);
            next = range.end;
        }
        assert_eq!(next, len);
    }

    #[test]
    fn test_body_runs_iterations_times_per_worker() -> Result<()> {
        let (_, runner) = recording_runner(4, BindMode::WholeSet);
        let region = runner.launch(launch(3, 5, AffinityMask::Reset))?;
        let calls = AtomicUsize::new(0);
        region.run(|_| {
            calls.fetch_add(1, Ordering::Relaxed);
        })?;
        assert_eq!(calls.load(Ordering::Relaxed), 15);
        Ok(())
    }

    #[test]
    fn test_workers_pin_to_nth_set_bit() -> Result<()> {
        let (sink, runner) = recording_runner(4, BindMode::Pin);
        let mask = AffinityMask::from_raw(0b1011);
        let region = runner.launch(launch(3, 1, mask))?;
        region.run(|_| {})?;
        assert_eq!(
            sink.worker_actions(),
            vec![
                (0, BindAction::Pin(0)),
                (1, BindAction::Pin(1)),
                (2, BindAction::Pin(3)),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_binding_failure_stops_every_worker() -> Result<()> {
        let sink = Arc::new(RecordingAffinity::failing_for(BindTarget::Worker(1)));
        let runner = KernelRunner::new(AffinityBinder::new(sink, 4, BindMode::WholeSet));
        let region = runner.launch(launch(3, 10, AffinityMask::Reset))?;
        let calls = AtomicUsize::new(0);
        let result = region.run(|_| {
            calls.fetch_add(1, Ordering::Relaxed);
        });
        assert!(matches!(result, Err(Error::Affinity { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        Ok(())
    }

    #[test]
    fn test_pin_beyond_mask_is_fatal() -> Result<()> {
        let (_, runner) = recording_runner(4, BindMode::Pin);
        let region = runner.launch(launch(4, 1, AffinityMask::from_raw(0b0011)))?;
        let result = region.run(|_| {});
        assert!(matches!(result, Err(Error::WorkerOutsideMask { available: 2, .. })));
        Ok(())
    }

    #[test]
    fn test_zero_threads_rejected() {
        let (_, runner) = recording_runner(4, BindMode::WholeSet);
        assert!(matches!(
            runner.launch(launch(0, 1, AffinityMask::Reset)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_serial_region_runs_inline() -> Result<()> {
        let region = Region::serial(4);
        let caller = std::thread::current().id();
        let calls = AtomicUsize::new(0);
        region.run(|ctx| {
            assert_eq!(std::thread::current().id(), caller);
            assert_eq!(ctx.index(), 0);
            assert_eq!(ctx.workers(), 1);
            ctx.barrier();
            calls.fetch_add(1, Ordering::Relaxed);
        })?;
        assert_eq!(calls.load(Ordering::Relaxed), 4);
        Ok(())
    }

    #[test]
    fn test_partitioned_writes_are_disjoint() -> Result<()> {
        let (_, runner) = recording_runner(4, BindMode::WholeSet);
        let region = runner.launch(launch(4, 2, AffinityMask::Reset))?;
        let mut data = vec![0usize; 37];
        {
            let parts = Partitioned::new(&mut data, region.workers());
            region.run(|ctx| {
                let mut part = parts.lock(ctx.index());
                let start = part.start;
                for (offset, value) in part.data.iter_mut().enumerate() {
                    *value += start + offset;
                }
            })?;
        }
        let expected: Vec<usize> = (0..37).map(|i| 2 * i).collect();
        assert_eq!(data, expected);
        Ok(())
    }

    #[test]
    fn test_barrier_orders_phases_within_iteration() -> Result<()> {
        let (_, runner) = recording_runner(4, BindMode::WholeSet);
        let region = runner.launch(launch(4, 3, AffinityMask::Reset))?;
        let arrived = AtomicUsize::new(0);
        region.run(|ctx| {
            arrived.fetch_add(1, Ordering::SeqCst);
            ctx.barrier();
            assert!(arrived.load(Ordering::SeqCst) >= 4 * (ctx.iteration() + 1));
            ctx.barrier();
        })?;
        Ok(())
    }

    /// Set in the child process spawned by the abort test.
    const PANIC_CHILD_ENV: &str = "MEABO_RUNNER_PANIC_CHILD";

    #[test]
    fn test_worker_panic_aborts_instead_of_hanging() -> Result<()> {
        if std::env::var_os(PANIC_CHILD_ENV).is_some() {
            let (_, runner) = recording_runner(4, BindMode::WholeSet);
            let region = runner.launch(launch(4, 3, AffinityMask::Unconstrained))?;
            region.run(|ctx| {
                if ctx.index() == 1 && ctx.iteration() == 1 {
                    panic!("worker body failed");
                }
                ctx.barrier();
            })?;
            return Ok(());
        }

        let exe = std::env::current_exe().map_err(|err| Error::InvalidConfig(err.to_string()))?;
        let status = std::process::Command::new(exe)
            .args(["--exact", "runner::tests::test_worker_panic_aborts_instead_of_hanging", "--test-threads=1"])
            .env(PANIC_CHILD_ENV, "1")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|err| Error::InvalidConfig(err.to_string()))?;

        assert!(!status.success());
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            assert_eq!(status.signal(), Some(libc::SIGABRT));
        }
        Ok(())
    }
}
