//! A fixed-size pool of worker threads.  Tasks go in through a shared queue;
//! their results come back in batches through a shared result buffer.
//!
//! The pool knows nothing about jobs or files, it just runs closures.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

type Task<R> = Box<dyn FnOnce() -> R + Send + 'static>;

/// A task's result, tagged with where and when it ran.
pub struct Finished<R> {
    /// Index of the worker thread that ran the task, used to put different
    /// tasks in different tracks in a performance trace.
    pub worker: usize,
    pub span: (Instant, Instant),
    pub value: R,
}

struct State<R> {
    queue: VecDeque<Task<R>>,
    results: Vec<Finished<R>>,
    /// Tasks queued whose results have not been popped yet.
    pending: usize,
    /// Workers still running their loop.
    alive: usize,
    /// Workers that died from a panicking task.
    crashed: usize,
    shutdown: bool,
}

struct Shared<R> {
    state: Mutex<State<R>>,
    new_work: Condvar,
    new_results: Condvar,
}

impl<R> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, State<R>> {
        // A panicking task never holds the lock, so poisoning can't leave the
        // state inconsistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct WorkerPool<R> {
    shared: Arc<Shared<R>>,
    workers: Vec<JoinHandle<()>>,
}

impl<R: Send + 'static> WorkerPool<R> {
    /// Start `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                results: Vec::new(),
                pending: 0,
                alive: workers,
                crashed: 0,
                shutdown: false,
            }),
            new_work: Condvar::new(),
            new_results: Condvar::new(),
        });
        let handles = (0..workers)
            .map(|worker| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("jobgraph-worker-{}", worker))
                    .spawn(move || work_loop(worker, &shared))
                    .unwrap_or_else(|err| panic!("spawn worker thread: {}", err))
            })
            .collect();
        WorkerPool {
            shared,
            workers: handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue a task.  Returns immediately.
    pub fn queue<F: FnOnce() -> R + Send + 'static>(&self, task: F) {
        let mut state = self.shared.lock();
        if state.shutdown {
            tracing::warn!("task queued after shutdown, dropping it");
            return;
        }
        state.queue.push_back(Box::new(task));
        state.pending += 1;
        drop(state);
        self.shared.new_work.notify_one();
    }

    /// Block until at least one result is available, then return every
    /// result available.  Returns an empty batch without blocking when no
    /// result can arrive: nothing is pending, the pool was shut down, or all
    /// workers died.
    pub fn pop(&self) -> Vec<Finished<R>> {
        let mut state = self.shared.lock();
        while state.results.is_empty() && state.pending > 0 && state.alive > 0 && !state.shutdown
        {
            state = self
                .shared
                .new_results
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        let results = std::mem::take(&mut state.results);
        state.pending -= results.len();
        results
    }

    /// True while there is queued, unstarted work and no worker has died.
    pub fn is_ready(&self) -> bool {
        let state = self.shared.lock();
        !state.queue.is_empty() && state.crashed == 0 && !state.shutdown
    }

    /// True if a subsequent pop() is guaranteed to return something without
    /// blocking forever.
    pub fn has_more_results(&self) -> bool {
        let state = self.shared.lock();
        !state.results.is_empty() || (state.pending > 0 && state.alive > 0 && !state.shutdown)
    }

    /// Number of workers that exited abnormally.
    pub fn crashed_workers(&self) -> usize {
        self.shared.lock().crashed
    }

    /// Ask all workers to exit once their current task is done.  Queued tasks
    /// that haven't started are discarded.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        let dropped = state.queue.len();
        state.queue.clear();
        state.pending -= dropped;
        drop(state);
        self.shared.new_work.notify_all();
        self.shared.new_results.notify_all();
    }
}

impl<R> Drop for WorkerPool<R> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.queue.clear();
        }
        self.shared.new_work.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn work_loop<R>(worker: usize, shared: &Shared<R>) {
    loop {
        let task = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    state.alive -= 1;
                    shared.new_results.notify_all();
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                state = shared
                    .new_work
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };

        let start = Instant::now();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
        let end = Instant::now();

        let mut state = shared.lock();
        match result {
            Ok(value) => {
                state.results.push(Finished {
                    worker,
                    span: (start, end),
                    value,
                });
                drop(state);
                shared.new_results.notify_all();
            }
            Err(_) => {
                tracing::error!(worker, "task panicked, worker exiting");
                state.pending -= 1;
                state.crashed += 1;
                state.alive -= 1;
                drop(state);
                shared.new_results.notify_all();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn every_task_yields_one_result() {
        let pool = WorkerPool::new(4);
        let m = 100;
        for i in 0..m {
            pool.queue(move || {
                if i % 7 == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                }
                i
            });
        }
        let mut seen = Vec::new();
        while pool.has_more_results() {
            let batch = pool.pop();
            assert!(!batch.is_empty());
            seen.extend(batch.into_iter().map(|f| f.value));
        }
        seen.sort();
        assert_eq!(seen, (0..m).collect::<Vec<_>>());
        assert!(pool.pop().is_empty());
    }

    #[test]
    fn idle_pool_does_not_block() {
        let pool: WorkerPool<()> = WorkerPool::new(2);
        assert!(!pool.has_more_results());
        assert!(!pool.is_ready());
        assert!(pool.pop().is_empty());
    }

    #[test]
    fn pop_after_shutdown_is_immediate() {
        let pool = WorkerPool::new(1);
        let started = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        {
            let started = started.clone();
            let gate = gate.clone();
            pool.queue(move || {
                started.fetch_add(1, Ordering::SeqCst);
                let (lock, cond) = &*gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cond.wait(open).unwrap();
                }
                1
            });
        }
        // Never runs: the only worker is busy, then shut down.
        pool.queue(|| 2);
        while started.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        assert!(pool.is_ready());

        pool.shutdown();
        assert!(!pool.is_ready());
        assert!(pool.pop().is_empty());

        let (lock, cond) = &*gate;
        *lock.lock().unwrap() = true;
        cond.notify_all();
    }

    #[test]
    fn panicking_task_is_reported() {
        let pool = WorkerPool::new(1);
        pool.queue(|| -> usize { panic!("boom") });
        // The pool must not hang waiting for the lost result.
        while pool.has_more_results() {
            pool.pop();
        }
        assert_eq!(pool.crashed_workers(), 1);
        pool.queue(|| 3);
        assert!(!pool.is_ready());
        assert!(!pool.has_more_results());
    }
}
