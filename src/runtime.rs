//! The dependency-driven execution engine.
//!
//! This file is both a module of the compiler crate and the runtime of
//! every generated program: the emitter copies it verbatim into the
//! output package. It therefore depends on `std` only (plus `libc` when
//! the `rt-sched` feature is enabled) and knows nothing about graphs —
//! it consumes a static table of [`NodeRecord`]s and an initial job list.
//!
//! # Scheduling model
//!
//! N worker threads share one job pool guarded by exactly one mutex and
//! one condvar; there are no lock-free fast paths. The pool is a
//! fixed-capacity LIFO stack. A second fixed-capacity pool holds
//! *deferred* jobs: nodes whose parents are ready but at least one of
//! whose children has not yet consumed the node's previous output value.
//! Deferring them is what keeps a lagging reader's input buffer from
//! being overwritten.
//!
//! Every node carries an execution counter `exe_cnt` that increments
//! strictly after its kernel returns. A node is ready when every parent
//! sits at exactly `exe_cnt + 1`; a parent further ahead than that is a
//! sequencing violation and fatal. Termination is cooperative: the last
//! busy worker that drains the pool stores the `ALL_JOBS_COMPLETED`
//! sentinel in the job counter and the sentinel cascades through the
//! remaining workers. All runtime failures are fatal — a
//! location-qualified message on stderr and a nonzero exit.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};

/// Fixed per-node edge capacity of the node record.
pub const MAX_EDGES: usize = 42;

/// Capacity of the job pool and of the deferred pool.
pub const JOB_POOL_CAP: usize = 42;

/// Sentinel stored in the job counter to signal shutdown to all workers.
const ALL_JOBS_COMPLETED: u16 = u16::MAX;

macro_rules! fatal {
    ($($arg:tt)*) => {{
        eprintln!("{}:{}: {}", file!(), line!(), format_args!($($arg)*));
        std::process::exit(1);
    }};
}

/// A kernel: reads its operand buffers, writes its output buffer,
/// returns. While kernels additionally push their branch target through
/// the [`PushCtx`].
pub type Kernel = fn(&PushCtx);

/// One entry of the static nodes table.
///
/// `parents` and `children` hold *table positions*, not graph ids; only
/// the first `parents_nrof` / `children_nrof` entries are meaningful.
#[derive(Clone, Copy)]
pub struct NodeRecord {
    pub kernel: Kernel,
    pub parents: [u16; MAX_EDGES],
    pub children: [u16; MAX_EDGES],
    pub exe_cnt: u32,
    pub parents_nrof: u16,
    pub children_nrof: u16,
    pub id: u16,
}

impl NodeRecord {
    /// Build a record from edge slices, padding up to the fixed cap.
    #[must_use]
    pub const fn new(kernel: Kernel, parents: &[u16], children: &[u16], id: u16) -> Self {
        if parents.len() > MAX_EDGES || children.len() > MAX_EDGES {
            panic!("node edge list exceeds MAX_EDGES");
        }
        let mut p = [0u16; MAX_EDGES];
        let mut i = 0;
        while i < parents.len() {
            p[i] = parents[i];
            i += 1;
        }
        let mut c = [0u16; MAX_EDGES];
        let mut j = 0;
        while j < children.len() {
            c[j] = children[j];
            j += 1;
        }
        NodeRecord {
            kernel,
            parents: p,
            children: c,
            exe_cnt: 0,
            parents_nrof: parents.len() as u16,
            children_nrof: children.len() as u16,
            id,
        }
    }
}

/// A process-lifetime buffer owned by exactly one writer kernel.
///
/// The scheduler guarantees that the writing kernel never runs while a
/// reader still needs the previous value (that is what the deferred pool
/// is for), so kernels may take `&mut` through [`Slab::get`] without
/// further synchronization.
pub struct Slab<T, const N: usize> {
    cell: UnsafeCell<[T; N]>,
}

// Kernels on different workers access disjoint slabs, or the same slab
// under the writer/reader ordering enforced by exe_cnt.
unsafe impl<T: Send, const N: usize> Sync for Slab<T, N> {}

impl<T, const N: usize> Slab<T, N> {
    #[must_use]
    pub const fn new(init: [T; N]) -> Self {
        Slab { cell: UnsafeCell::new(init) }
    }

    /// Raw access for kernels. Callers uphold the single-writer rule.
    #[must_use]
    pub fn get(&self) -> *mut [T; N] {
        self.cell.get()
    }
}

struct Pool {
    records: Vec<NodeRecord>,
    jobs: [u16; JOB_POOL_CAP],
    jobs_nrof: u16,
    deferred: [u16; JOB_POOL_CAP],
    deferred_nrof: u16,
}

/// The engine: one mutex + one condvar mediating all shared state, plus
/// one atomic activity byte per worker (read lock-free for termination
/// polling; every write happens while the mutex is held).
pub struct Engine {
    pool: Mutex<Pool>,
    cond: Condvar,
    active: Vec<AtomicU8>,
}

/// Handed to kernels; `push` goes through the same ready/deferred logic
/// as every other enqueue.
pub struct PushCtx<'a> {
    engine: &'a Engine,
}

impl PushCtx<'_> {
    /// Enqueue the node at `table_pos` if it is ready, defer it if a
    /// child lags, or do nothing if a parent has not executed yet.
    pub fn push(&self, table_pos: u16) {
        let mut pool = self.engine.pool.lock().unwrap();
        push_within_mutex(&mut pool, table_pos);
    }
}

fn all_children_consumed(pool: &Pool, node: u16) -> bool {
    let n = &pool.records[node as usize];
    for child in 0..n.children_nrof as usize {
        if pool.records[n.children[child] as usize].exe_cnt < n.exe_cnt {
            return false;
        }
    }
    true
}

fn remove_deferred_within_mutex(pool: &mut Pool, node: u16) {
    for job in 0..pool.deferred_nrof as usize {
        if pool.deferred[job] == node {
            for after in job + 1..pool.deferred_nrof as usize {
                pool.deferred[after - 1] = pool.deferred[after];
            }
            pool.deferred_nrof -= 1;
            return;
        }
    }
}

fn add_deferred_within_mutex(pool: &mut Pool, node: u16) {
    for job in 0..pool.deferred_nrof as usize {
        if pool.deferred[job] == node {
            return; // already deferred
        }
    }
    if (pool.deferred_nrof as usize) < JOB_POOL_CAP {
        pool.deferred[pool.deferred_nrof as usize] = node;
        pool.deferred_nrof += 1;
    } else {
        fatal!("deferred job pool does not have enough slots");
    }
}

fn push_within_mutex(pool: &mut Pool, node: u16) {
    let n = pool.records[node as usize];
    for parent in 0..n.parents_nrof as usize {
        let parent_cnt = pool.records[n.parents[parent] as usize].exe_cnt;
        if parent_cnt > n.exe_cnt + 1 {
            fatal!(
                "parent node {} was executed without its child node {} afterwards",
                pool.records[n.parents[parent] as usize].id,
                n.id
            );
        }
        if parent_cnt != n.exe_cnt + 1 {
            return; // parent hasn't been executed yet
        }
    }

    if !all_children_consumed(pool, node) {
        // Parents are ready; we are only waiting for children to consume
        // this node's previous value.
        add_deferred_within_mutex(pool, node);
        return;
    }

    remove_deferred_within_mutex(pool, node);

    for job in 0..pool.jobs_nrof as usize {
        if pool.jobs[job] == node {
            fatal!("tried adding job node {} which was already in the pool", n.id);
        }
    }

    if (pool.jobs_nrof as usize) < JOB_POOL_CAP {
        pool.jobs[pool.jobs_nrof as usize] = node;
        pool.jobs_nrof += 1;
    } else if pool.jobs_nrof == ALL_JOBS_COMPLETED {
        fatal!("program terminated before being done, node {} missing", n.id);
    } else {
        fatal!("job pool does not have enough slots");
    }
}

fn check_deferred_jobs(pool: &mut Pool) {
    let mut job = pool.deferred_nrof as isize - 1;
    while job >= 0 {
        let node = pool.deferred[job as usize];
        if all_children_consumed(pool, node) {
            push_within_mutex(pool, node);
        }
        job -= 1;
    }
}

impl Engine {
    fn new(records: &[NodeRecord], initial: &[u16], threads_nrof: usize) -> Engine {
        if records.len() >= usize::from(ALL_JOBS_COMPLETED) {
            fatal!("nodes table exceeds the addressable range");
        }
        if initial.len() > JOB_POOL_CAP {
            fatal!("too many jobs to initialize the job pool");
        }
        let mut jobs = [0u16; JOB_POOL_CAP];
        jobs[..initial.len()].copy_from_slice(initial);
        Engine {
            pool: Mutex::new(Pool {
                records: records.to_vec(),
                jobs,
                jobs_nrof: initial.len() as u16,
                deferred: [0u16; JOB_POOL_CAP],
                deferred_nrof: 0,
            }),
            cond: Condvar::new(),
            active: (0..threads_nrof).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    fn worker(&self, me: usize) {
        #[cfg(feature = "rt-sched")]
        try_adopt_fifo();

        let mut finished: Option<u16> = None;
        loop {
            let mut pool = self.pool.lock().unwrap();
            let old_jobs_nrof = pool.jobs_nrof;

            if let Some(job) = finished.take() {
                pool.records[job as usize].exe_cnt += 1;
                let n = pool.records[job as usize];
                for child in 0..n.children_nrof as usize {
                    push_within_mutex(&mut pool, n.children[child]);
                }
                check_deferred_jobs(&mut pool);

                if pool.jobs_nrof == 0 {
                    // Any other thread still working, or are we out of work?
                    let still_working = self
                        .active
                        .iter()
                        .enumerate()
                        .any(|(t, a)| t != me && a.load(Ordering::SeqCst) != 0);
                    if !still_working {
                        if pool.deferred_nrof > 0 {
                            fatal!("deferred job pool still has jobs");
                        }
                        pool.jobs_nrof = ALL_JOBS_COMPLETED;
                        drop(pool);
                        self.cond.notify_one();
                        return;
                    }
                }
            }

            while pool.jobs_nrof == 0 {
                self.active[me].store(0, Ordering::SeqCst);
                pool = self.cond.wait(pool).unwrap();
            }

            if pool.jobs_nrof == ALL_JOBS_COMPLETED {
                drop(pool);
                self.cond.notify_one();
                return;
            }

            pool.jobs_nrof -= 1;
            let job = pool.jobs[pool.jobs_nrof as usize];
            self.active[me].store(1, Ordering::SeqCst);
            let kernel = pool.records[job as usize].kernel;

            let signal_jobs_available = old_jobs_nrof == 0 && pool.jobs_nrof > 0;
            drop(pool);
            if signal_jobs_available {
                self.cond.notify_one(); // wake a sleeping consumer
            }

            kernel(&PushCtx { engine: self });
            finished = Some(job);
        }
    }
}

/// Run the table to completion on `threads_nrof` workers.
///
/// `initial` seeds the job pool; the caller is expected to pass the
/// emitter's initial-pool descriptor. Returns when every worker has
/// observed the completion sentinel.
pub fn run(records: &[NodeRecord], initial: &[u16], threads_nrof: usize) {
    if threads_nrof == 0 {
        fatal!("at least one worker thread is required");
    }
    let engine = Engine::new(records, initial, threads_nrof);
    std::thread::scope(|scope| {
        for me in 0..threads_nrof {
            let engine = &engine;
            scope.spawn(move || engine.worker(me));
        }
    });
}

/// Try to adopt FIFO real-time scheduling at maximum priority for the
/// calling worker. Without CAP_SYS_NICE the kernel answers EPERM and we
/// stay on the default scheduler — a runtime choice, not a correctness
/// issue.
#[cfg(feature = "rt-sched")]
fn try_adopt_fifo() {
    use std::sync::Once;
    static FALLBACK_NOTICE: Once = Once::new();

    // SAFETY: plain libc calls against the calling thread.
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if param.sched_priority < 0 {
            fatal!("sched_get_priority_max failed");
        }
        let rc = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if rc == libc::EPERM {
            FALLBACK_NOTICE.call_once(|| {
                eprintln!("no CAP_SYS_NICE capability, defaulting to standard thread attributes");
            });
        } else if rc != 0 {
            fatal!("pthread_setschedparam failed with {rc}");
        }
    }
}
