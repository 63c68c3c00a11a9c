//! Fixed-size worker pool with priorities and cancel-before-start.
//!
//! Jobs wait in a priority heap (FIFO within one priority) until a worker
//! claims them. A job is claimed exactly once, either by a worker or by
//! [`JobHandle::run_if_queued`] on the caller's thread, and a claimed job can
//! no longer be cancelled.
//!
//! ```text
//! Queued ──claim──▶ Running ──▶ Done
//!    │
//!    └──try_cancel──▶ Cancelled
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::error::BuildError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling priority; earlier variants run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Someone is waiting on the result.
    Blocking,
    /// Run before everything else.
    Highest,
    /// Run soon.
    High,
    /// Default.
    #[default]
    Normal,
    /// Background work.
    Low,
    /// Run when idle.
    Lowest,
}

/// Lifecycle of one submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for a worker.
    Queued,
    /// Claimed and executing.
    Running,
    /// Finished executing.
    Done,
    /// Removed before it started.
    Cancelled,
}

impl JobState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Done => 2,
            Self::Cancelled => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Queued,
            1 => Self::Running,
            2 => Self::Done,
            _ => Self::Cancelled,
        }
    }
}

struct JobSlot {
    state: AtomicU8,
    work: Mutex<Option<Job>>,
}

impl JobSlot {
    fn new(work: Job) -> Self {
        Self {
            state: AtomicU8::new(JobState::Queued.to_u8()),
            work: Mutex::new(Some(work)),
        }
    }

    fn transition(&self, from: JobState, to: JobState) -> bool {
        self.state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Takes the work if nobody has claimed or cancelled it yet.
    fn claim(&self) -> Option<Job> {
        if self.transition(JobState::Queued, JobState::Running) {
            self.work.lock().take()
        } else {
            None
        }
    }

    fn run(&self, job: Job) {
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::error!("worker job panicked: {message}");
        }
        self.state.store(JobState::Done.to_u8(), Ordering::Release);
    }

    fn cancel(&self) -> bool {
        if self.transition(JobState::Queued, JobState::Cancelled) {
            // Dropping the closure drops whatever it captured, such as a
            // completion sender.
            self.work.lock().take();
            true
        } else {
            false
        }
    }
}

/// Handle to a submitted job.
#[derive(Clone)]
pub struct JobHandle {
    slot: Arc<JobSlot>,
}

impl JobHandle {
    /// Current state.
    pub fn state(&self) -> JobState {
        JobState::from_u8(self.slot.state.load(Ordering::Acquire))
    }

    /// True once the job ran to completion.
    pub fn is_done(&self) -> bool {
        self.state() == JobState::Done
    }

    /// Cancels the job if no worker has claimed it.
    pub fn try_cancel(&self) -> bool {
        self.slot.cancel()
    }

    /// Runs the job on the calling thread if no worker has claimed it.
    /// Returns false when it was already claimed or cancelled.
    pub fn run_if_queued(&self) -> bool {
        match self.slot.claim() {
            Some(job) => {
                self.slot.run(job);
                true
            }
            None => false,
        }
    }
}

impl core::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobHandle")
            .field("state", &self.state())
            .finish()
    }
}

struct QueuedJob {
    priority: Priority,
    seq: u64,
    slot: Arc<JobSlot>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // BinaryHeap pops the greatest: lowest priority variant, then lowest seq.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<QueuedJob>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    next_seq: AtomicU64,
}

/// Named worker threads pulling from one priority queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Spawns `num_workers` threads (at least one) named `texset-worker-{n}`.
    pub fn new(num_workers: usize) -> Result<Self, BuildError> {
        let num_workers = num_workers.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            next_seq: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("texset-worker-{i}"))
                .spawn(move || worker_loop(&shared))
                .map_err(BuildError::spawn)?;
            workers.push(handle);
        }
        tracing::debug!("worker pool: started {num_workers} threads");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            num_workers,
        })
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Jobs waiting for a worker, including cancelled ones not yet popped.
    pub fn num_queued(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    /// Queues `job`. After shutdown the job is cancelled immediately.
    pub fn submit<F>(&self, priority: Priority, job: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = Arc::new(JobSlot::new(Box::new(job)));
        let handle = JobHandle {
            slot: Arc::clone(&slot),
        };

        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            slot.cancel();
            return handle;
        }
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        queue.heap.push(QueuedJob {
            priority,
            seq,
            slot,
        });
        drop(queue);
        self.shared.available.notify_one();
        handle
    }

    /// Cancels every queued job and joins the workers. Running jobs finish.
    pub fn shutdown(&self) {
        let pending = {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
            std::mem::take(&mut queue.heap)
        };
        let cancelled = pending.into_iter().filter(|job| job.slot.cancel()).count();
        self.shared.available.notify_all();

        for worker in self.workers.lock().drain(..) {
            if worker.join().is_err() {
                tracing::error!("worker pool: a worker thread panicked");
            }
        }
        tracing::debug!("worker pool: shut down, {cancelled} queued jobs cancelled");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_workers", &self.num_workers)
            .field("num_queued", &self.num_queued())
            .finish()
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let next = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.heap.pop() {
                    break Some(job);
                }
                if queue.shutdown {
                    break None;
                }
                shared.available.wait(&mut queue);
            }
        };

        let Some(queued) = next else {
            return;
        };
        if let Some(job) = queued.slot.claim() {
            queued.slot.run(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Occupies the single worker until the returned sender fires.
    fn block_worker(pool: &WorkerPool) -> (mpsc::Sender<()>, JobHandle) {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let handle = pool.submit(Priority::Normal, move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        (release_tx, handle)
    }

    // --- ordering ---

    #[test]
    fn priority_then_fifo() {
        let pool = WorkerPool::new(1).unwrap();
        let (release, _) = block_worker(&pool);

        let (done_tx, done_rx) = crossbeam_channel::unbounded::<&'static str>();
        for (label, priority) in [
            ("low", Priority::Low),
            ("normal-1", Priority::Normal),
            ("blocking", Priority::Blocking),
            ("normal-2", Priority::Normal),
        ] {
            let done_tx = done_tx.clone();
            pool.submit(priority, move || done_tx.send(label).unwrap());
        }
        release.send(()).unwrap();

        let ran: Vec<_> = (0..4)
            .map(|_| done_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(ran, ["blocking", "normal-1", "normal-2", "low"]);
    }

    // --- cancellation ---

    #[test]
    fn cancel_before_start() {
        let pool = WorkerPool::new(1).unwrap();
        let (release, _) = block_worker(&pool);

        let (tx, rx) = crossbeam_channel::bounded::<u32>(1);
        let handle = pool.submit(Priority::Normal, move || {
            tx.send(7).unwrap();
        });
        assert_eq!(handle.state(), JobState::Queued);
        assert!(handle.try_cancel());
        assert_eq!(handle.state(), JobState::Cancelled);
        assert!(!handle.run_if_queued());

        // the captured sender was dropped with the job
        assert!(matches!(
            rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        ));
        release.send(()).unwrap();
    }

    #[test]
    fn running_job_cannot_be_cancelled() {
        let pool = WorkerPool::new(1).unwrap();
        let (release, handle) = block_worker(&pool);
        assert_eq!(handle.state(), JobState::Running);
        assert!(!handle.try_cancel());
        release.send(()).unwrap();
        pool.shutdown();
        assert!(handle.is_done());
    }

    #[test]
    fn run_if_queued_claims_once() {
        let pool = WorkerPool::new(1).unwrap();
        let (release, _) = block_worker(&pool);

        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let handle = pool.submit(Priority::Low, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.run_if_queued());
        assert!(handle.is_done());
        release.send(()).unwrap();
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    // --- shutdown ---

    #[test]
    fn submit_after_shutdown_is_cancelled() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.num_workers(), 2);
        pool.shutdown();
        let handle = pool.submit(Priority::High, || {});
        assert_eq!(handle.state(), JobState::Cancelled);
    }

    #[test]
    fn panicking_job_keeps_worker_alive() {
        let pool = WorkerPool::new(1).unwrap();
        let first = pool.submit(Priority::Normal, || panic!("boom"));
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit(Priority::Normal, move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(first.is_done());
    }
}
