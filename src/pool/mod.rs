//! Elastic worker pool
//!
//! Threads are started on demand, never more than `max_threads`, and retire
//! after `idle_timeout` without work as long as more than `min_threads` are
//! alive. The queue is unbounded, so `submit` never blocks and never rejects
//! work while the pool is open.
//!
//! ```text
//!   submit ──► VecDeque (FIFO) ──► worker-1 ─┐
//!                  │                worker-2 ─┼─► Work::do_work
//!                  │                   ...    ─┘
//!                  └── spawn when queued > idle && live < max
//! ```

mod work;

pub use work::{NamedWork, Work};

use std::{
    collections::{HashSet, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramOpts, HistogramVec, IntCounterVec,
};

use crate::config::PoolConfig;
use crate::core::error::{OrbError, OrbResult};

const QUEUE_WAIT_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 5000.0,
];

static WORK_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "orb_pool_work_total",
        "Work items run by worker pools",
        &[
            "pool",   // pool name
            "result", // ok, error or panic
        ]
    )
    .unwrap()
});

static QUEUE_WAIT: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "orb_pool_queue_wait",
        "Time work items spent queued, in milliseconds",
    )
    .buckets(QUEUE_WAIT_BUCKETS.to_vec());
    register_histogram_vec!(opts, &["pool"]).unwrap()
});

/// Point-in-time view of a pool.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    pub queued: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_queue_wait: Duration,
    pub avg_run_time: Duration,
}

struct QueuedWork {
    work: Box<dyn Work>,
    enqueued: Instant,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<QueuedWork>,
    live: usize,
    idle: usize,
    closing: bool,
    workers: HashSet<ThreadId>,
}

struct Shared {
    name: String,
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,

    state: Mutex<PoolState>,
    work_available: Condvar,
    worker_exited: Condvar,

    spawned: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_wait_micros: AtomicU64,
    total_run_micros: AtomicU64,

    #[cfg(test)]
    idle_deadline_hook: Mutex<Option<IdleDeadlineHook>>,
}

#[cfg(test)]
type IdleDeadlineHook = Box<dyn FnOnce(&Arc<Shared>) + Send>;

/// Thread pool bounded by a minimum and maximum number of threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool. No thread is started until work is submitted.
    pub fn new(config: &PoolConfig) -> OrbResult<Self> {
        if config.max_threads == 0 {
            return Err(OrbError::Configuration(format!(
                "pool '{}' needs at least one thread",
                config.name
            )));
        }
        if config.min_threads > config.max_threads {
            return Err(OrbError::Configuration(format!(
                "pool '{}' min_threads {} exceeds max_threads {}",
                config.name, config.min_threads, config.max_threads
            )));
        }

        info!(
            "Creating worker pool '{}' with {}..{} threads, {}ms idle timeout",
            config.name, config.min_threads, config.max_threads, config.idle_timeout_ms
        );

        Ok(Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                min_threads: config.min_threads,
                max_threads: config.max_threads,
                idle_timeout: Duration::from_millis(config.idle_timeout_ms),
                state: Mutex::new(PoolState::default()),
                work_available: Condvar::new(),
                worker_exited: Condvar::new(),
                spawned: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                total_wait_micros: AtomicU64::new(0),
                total_run_micros: AtomicU64::new(0),
                #[cfg(test)]
                idle_deadline_hook: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue `work` for execution.
    ///
    /// # Errors
    /// `PoolClosed` once `close` has been called. If a needed thread cannot be
    /// spawned the work stays queued for the existing workers and the spawn
    /// error is returned.
    pub fn submit(&self, work: Box<dyn Work>) -> OrbResult<()> {
        self.shared.submit(work)
    }

    /// Queue a closure for execution.
    pub fn execute<F>(&self, name: impl Into<String>, f: F) -> OrbResult<()>
    where
        F: FnOnce() -> OrbResult<()> + Send + 'static,
    {
        self.submit(Box::new(NamedWork::new(name, f)))
    }

    /// Stop accepting work, drain the queue and wait for every worker to exit.
    ///
    /// Idempotent. When called from one of this pool's own workers it does not
    /// wait, since that worker cannot exit while it is running.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.closing {
            state.closing = true;
            info!(
                "Closing worker pool '{}' with {} queued work items",
                self.shared.name,
                state.queue.len()
            );
        }
        self.shared.work_available.notify_all();

        if state.workers.contains(&thread::current().id()) {
            warn!(
                "Worker pool '{}' closed from its own worker, not waiting",
                self.shared.name
            );
            return;
        }

        while state.live > 0 {
            self.shared.worker_exited.wait(&mut state);
        }
        debug!("Worker pool '{}' closed", self.shared.name);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closing
    }

    pub fn live_workers(&self) -> usize {
        self.shared.state.lock().live
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn stats(&self) -> PoolStats {
        let (live, idle, queued) = {
            let state = self.shared.state.lock();
            (state.live, state.idle, state.queue.len())
        };

        let completed = self.shared.completed.load(Ordering::Relaxed);
        let failed = self.shared.failed.load(Ordering::Relaxed);
        let finished = (completed + failed).max(1);

        PoolStats {
            live,
            idle,
            busy: live.saturating_sub(idle),
            queued,
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed,
            failed,
            avg_queue_wait: Duration::from_micros(
                self.shared.total_wait_micros.load(Ordering::Relaxed) / finished,
            ),
            avg_run_time: Duration::from_micros(
                self.shared.total_run_micros.load(Ordering::Relaxed) / finished,
            ),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn submit(self: &Arc<Self>, work: Box<dyn Work>) -> OrbResult<()> {
        let spawn_worker = {
            let mut state = self.state.lock();
            if state.closing {
                return Err(OrbError::PoolClosed(self.name.clone()));
            }

            state.queue.push_back(QueuedWork {
                work,
                enqueued: Instant::now(),
            });
            self.submitted.fetch_add(1, Ordering::Relaxed);

            let spawn = state.queue.len() > state.idle && state.live < self.max_threads;
            if spawn {
                state.live += 1;
            }
            spawn
        };

        self.work_available.notify_one();

        if spawn_worker {
            self.spawn_worker()?;
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>) -> OrbResult<()> {
        let shared = Arc::clone(self);
        let index = shared.spawned.fetch_add(1, Ordering::Relaxed);

        let result = thread::Builder::new()
            .name(format!("{}-worker-{index}", shared.name))
            .spawn(move || Shared::worker_loop(shared));

        if let Err(e) = result {
            error!("Failed to spawn worker for pool '{}': {e}", self.name);
            let mut state = self.state.lock();
            state.live -= 1;
            self.worker_exited.notify_all();
            return Err(OrbError::Io(e));
        }

        debug!("Spawned worker {index} for pool '{}'", self.name);
        Ok(())
    }

    fn worker_loop(shared: Arc<Shared>) {
        let id = thread::current().id();
        let mut state = shared.state.lock();
        state.workers.insert(id);

        loop {
            if let Some(item) = state.queue.pop_front() {
                MutexGuard::unlocked(&mut state, || shared.run(item));
                continue;
            }

            if state.closing {
                break;
            }

            state.idle += 1;
            let timed_out = shared
                .work_available
                .wait_for(&mut state, shared.idle_timeout)
                .timed_out();
            if timed_out {
                shared.idle_deadline_reached(&mut state);
            }
            state.idle -= 1;

            // Whatever woke us, work queued meanwhile is picked up first
            if timed_out
                && state.queue.is_empty()
                && !state.closing
                && state.live > shared.min_threads
            {
                debug!("Idle worker of pool '{}' exiting", shared.name);
                break;
            }
        }

        state.workers.remove(&id);
        state.live -= 1;
        shared.worker_exited.notify_all();
    }

    /// Runs the installed hook, if any, with the state unlocked while this
    /// worker still counts as idle.
    #[cfg(test)]
    fn idle_deadline_reached(self: &Arc<Self>, state: &mut MutexGuard<'_, PoolState>) {
        let hook = self.idle_deadline_hook.lock().take();
        if let Some(hook) = hook {
            MutexGuard::unlocked(state, || hook(self));
        }
    }

    #[cfg(not(test))]
    fn idle_deadline_reached(self: &Arc<Self>, _state: &mut MutexGuard<'_, PoolState>) {}

    fn run(&self, item: QueuedWork) {
        let wait = item.enqueued.elapsed();
        QUEUE_WAIT
            .with_label_values(&[&self.name])
            .observe(wait.as_secs_f64() * 1000.0);

        let started = Instant::now();
        let name = item.work.name().to_string();
        let work = item.work;
        let result = panic::catch_unwind(AssertUnwindSafe(move || work.do_work()));

        let outcome = match result {
            Ok(Ok(())) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                "ok"
            }
            Ok(Err(e)) => {
                warn!("Work '{name}' failed in pool '{}': {e}", self.name);
                self.failed.fetch_add(1, Ordering::Relaxed);
                "error"
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "{}",
                    OrbError::WorkExecution(format!(
                        "'{name}' panicked in pool '{}': {message}",
                        self.name
                    ))
                );
                self.failed.fetch_add(1, Ordering::Relaxed);
                "panic"
            }
        };

        WORK_ITEMS.with_label_values(&[&self.name, outcome]).inc();
        self.total_wait_micros
            .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
        self.total_run_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Barrier};

    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn pool(min: usize, max: usize, idle_ms: u64) -> WorkerPool {
        WorkerPool::new(&PoolConfig {
            name: "test".to_string(),
            min_threads: min,
            max_threads: max,
            idle_timeout_ms: idle_ms,
        })
        .unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let config = PoolConfig {
            name: "bad".to_string(),
            min_threads: 3,
            max_threads: 2,
            idle_timeout_ms: 10,
        };
        assert!(matches!(WorkerPool::new(&config), Err(OrbError::Configuration(_))));

        let config = PoolConfig {
            max_threads: 0,
            min_threads: 0,
            ..config
        };
        assert!(WorkerPool::new(&config).is_err());
    }

    #[test]
    fn test_threads_start_lazily() {
        let pool = pool(2, 4, 1000);
        assert_eq!(pool.live_workers(), 0);

        let (tx, rx) = mpsc::channel();
        pool.execute("ping", move || {
            tx.send(()).ok();
            Ok(())
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn test_single_thread_runs_in_fifo_order() {
        init_log();
        let pool = pool(0, 1, 1000);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let order = order.clone();
            pool.execute(format!("item-{i}"), move || {
                order.lock().push(i);
                Ok(())
            })
            .unwrap();
        }
        pool.close();

        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_blocking_work_gets_its_own_threads() {
        init_log();
        const N: usize = 4;
        let pool = pool(0, N, 1000);
        let barrier = Arc::new(Barrier::new(N));
        let (tx, rx) = mpsc::channel();

        for _ in 0..N {
            let barrier = barrier.clone();
            let tx = tx.clone();
            pool.execute("rendezvous", move || {
                barrier.wait();
                tx.send(()).ok();
                Ok(())
            })
            .unwrap();
        }

        for _ in 0..N {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(pool.live_workers() <= N);
    }

    #[test]
    fn test_idle_workers_shrink_to_min() {
        init_log();
        let pool = pool(1, 4, 20);
        let barrier = Arc::new(Barrier::new(4));
        let (tx, rx) = mpsc::channel();

        for _ in 0..4 {
            let barrier = barrier.clone();
            let tx = tx.clone();
            pool.execute("burst", move || {
                barrier.wait();
                tx.send(()).ok();
                Ok(())
            })
            .unwrap();
        }
        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        assert!(wait_until(|| pool.live_workers() == 1));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn test_grows_to_max_then_shrinks_to_min() {
        init_log();
        let pool = pool(1, 2, 20);
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = mpsc::channel();

        // neither item can finish unless both run at once
        for _ in 0..2 {
            let barrier = barrier.clone();
            let tx = tx.clone();
            pool.execute("pair", move || {
                barrier.wait();
                tx.send(()).ok();
                Ok(())
            })
            .unwrap();
        }
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        assert!(wait_until(|| pool.live_workers() == 1));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.live_workers(), 1);
        assert_eq!(pool.stats().completed, 2);
    }

    #[test]
    fn test_work_submitted_at_idle_deadline_is_not_lost() {
        init_log();
        let pool = pool(0, 1, 10);
        let (tx, rx) = mpsc::channel();

        // The only worker times out while counted as idle, so this submit
        // relies on it instead of spawning a new thread.
        let late_tx = tx.clone();
        *pool.shared.idle_deadline_hook.lock() = Some(Box::new(move |shared: &Arc<Shared>| {
            let work = NamedWork::new("late", move || {
                late_tx.send("late").ok();
                Ok(())
            });
            shared.submit(Box::new(work)).unwrap();
        }));

        pool.execute("first", move || {
            tx.send("first").ok();
            Ok(())
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
        assert_eq!(pool.stats().submitted, 2);
        assert_eq!(pool.shared.spawned.load(Ordering::Relaxed), 1);
        assert!(wait_until(|| pool.live_workers() == 0));
    }

    #[test]
    fn test_failures_do_not_kill_the_worker() {
        init_log();
        let pool = pool(0, 1, 1000);
        let (tx, rx) = mpsc::channel();

        pool.execute("fails", || Err(OrbError::Internal("boom".to_string())))
            .unwrap();
        pool.execute("panics", || panic!("work panicked on purpose"))
            .unwrap();
        pool.execute("works", move || {
            tx.send(()).ok();
            Ok(())
        })
        .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(wait_until(|| pool.stats().completed == 1));

        let stats = pool.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.live, 1);
    }

    #[test]
    fn test_close_drains_queue_and_rejects_new_work() {
        let pool = pool(0, 2, 1000);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            pool.execute("count", move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        pool.close();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.live_workers(), 0);
        assert!(pool.is_closed());

        pool.close();
        let err = pool.execute("late", || Ok(())).unwrap_err();
        assert!(matches!(err, OrbError::PoolClosed(name) if name == "test"));
    }

    #[test]
    fn test_worker_threads_are_named() {
        let pool = pool(0, 1, 1000);
        let (tx, rx) = mpsc::channel();
        pool.execute("name", move || {
            tx.send(thread::current().name().map(str::to_string)).ok();
            Ok(())
        })
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-worker-0"));
    }
}
