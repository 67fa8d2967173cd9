//! The cooperative task [`Scheduler`].
//!
//! Owns a fixed pool of worker threads that drain a shared FIFO task queue.
//! Tasks run to completion without suspension points from the scheduler's
//! perspective -- they are plain synchronous closures, not futures. Long
//! or blocking work has no business inside a task; the only suspension
//! points the public API tolerates are scheduler entry/exit, redo-log
//! fsync, and wire I/O, all internal to those components. `submit_async`
//! is the one place a host gets back something awaitable, via a
//! `tokio::sync::oneshot` channel, so callers already
//! inside an async context can bridge into scheduler-land without the
//! scheduler itself depending on a running Tokio reactor.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A unit of work submitted to the scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct DelayedEntry {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for DelayedEntry {}
impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct Shared {
    sender: mpsc::Sender<Task>,
    delayed: Mutex<BinaryHeap<Reverse<DelayedEntry>>>,
    delayed_cond: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
}

/// A fixed worker-thread pool plus a delayed-task min-heap keyed by absolute
/// deadline.
///
/// Cloning a `Scheduler` is cheap; clones share the same pool and queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Handles {
    workers: Vec<JoinHandle<()>>,
    timer: JoinHandle<()>,
}

/// Owns the scheduler's background threads. Dropping this (or calling
/// [`Scheduler::shutdown`] explicitly) stops the pool.
pub struct SchedulerGuard {
    scheduler: Scheduler,
    handles: Option<Handles>,
}

impl Scheduler {
    /// Builds a scheduler with `workers` worker threads (minimum 1).
    /// Defaults to available hardware concurrency when `workers == 0`.
    pub fn start(workers: usize) -> SchedulerGuard {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            workers
        };

        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let shared = Arc::new(Shared {
            sender,
            delayed: Mutex::new(BinaryHeap::new()),
            delayed_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });
        let scheduler = Scheduler {
            shared: shared.clone(),
        };

        let mut worker_handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let receiver = receiver.clone();
            worker_handles.push(
                std::thread::Builder::new()
                    .name(format!("dsa-sched-{idx}"))
                    .spawn(move || loop {
                        let task = {
                            let rx = receiver.lock().unwrap_or_else(|e| e.into_inner());
                            rx.recv()
                        };
                        match task {
                            Ok(task) => {
                                task();
                            }
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn scheduler worker thread"),
            );
        }

        let timer_shared = shared.clone();
        let timer_handle = std::thread::Builder::new()
            .name("dsa-sched-timer".to_owned())
            .spawn(move || timer_loop(timer_shared))
            .expect("failed to spawn scheduler timer thread");

        SchedulerGuard {
            scheduler,
            handles: Some(Handles {
                workers: worker_handles,
                timer: timer_handle,
            }),
        }
    }

    /// Enqueues `task` for immediate execution on the next free worker.
    /// Tasks submitted with zero delay from the same caller execute in
    /// FIFO order with respect to each other.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            tracing::warn!("task submitted after scheduler shutdown; dropping");
            return;
        }
        let _ = self.shared.sender.send(Box::new(task));
    }

    /// Enqueues `task` to run no earlier than `delay` from now. Held in a
    /// min-heap keyed by absolute deadline until due.
    pub fn submit_delayed(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            tracing::warn!("delayed task submitted after scheduler shutdown; dropping");
            return;
        }
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let entry = DelayedEntry {
            deadline: Instant::now() + delay,
            seq,
            task: Box::new(task),
        };
        let mut heap = self.shared.delayed.lock().unwrap_or_else(|e| e.into_inner());
        heap.push(Reverse(entry));
        self.shared.delayed_cond.notify_all();
    }

    /// Bridges into async code: runs `f` on a worker thread and resolves
    /// the returned future with its result via a oneshot channel.
    pub fn submit_async<F, T>(&self, f: F) -> tokio::sync::oneshot::Receiver<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.submit(move || {
            let _ = tx.send(f());
        });
        rx
    }
}

fn timer_loop(shared: Arc<Shared>) {
    loop {
        let mut heap = shared.delayed.lock().unwrap_or_else(|e| e.into_inner());
        if shared.shutdown.load(Ordering::Acquire) {
            heap.clear();
            return;
        }
        match heap.peek() {
            None => {
                let (guard, _) = shared
                    .delayed_cond
                    .wait_timeout(heap, Duration::from_millis(250))
                    .unwrap_or_else(|e| e.into_inner());
                drop(guard);
            }
            Some(Reverse(entry)) => {
                let now = Instant::now();
                if entry.deadline <= now {
                    let Reverse(entry) = heap.pop().expect("peeked entry must exist");
                    drop(heap);
                    if shared.shutdown.load(Ordering::Acquire) {
                        continue;
                    }
                    let _ = shared.sender.send(entry.task);
                } else {
                    let wait = entry.deadline - now;
                    let (guard, _) = shared
                        .delayed_cond
                        .wait_timeout(heap, wait)
                        .unwrap_or_else(|e| e.into_inner());
                    drop(guard);
                }
            }
        }
    }
}

impl SchedulerGuard {
    /// A cheaply-cloneable handle for submitting work.
    pub fn handle(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Shuts the scheduler down: stops accepting new delayed tasks
    /// (discarding those still pending), drains in-flight worker threads,
    /// and joins all background threads. Cancellation is not individual --
    /// shutdown drains then discards pending delayed tasks.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(handles) = self.handles.take() else {
            return;
        };
        self.scheduler
            .shared
            .shutdown
            .store(true, Ordering::Release);
        self.scheduler.shared.delayed_cond.notify_all();
        drop(self.scheduler.shared.sender.clone());
        // Dropping all Sender clones (the original plus this temp clone)
        // closes the channel once workers finish draining what's queued;
        // each worker's `recv()` then returns Err and the loop exits.
        for worker in handles.workers {
            let _ = worker.join();
        }
        let _ = handles.timer.join();
    }
}

impl Drop for SchedulerGuard {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::channel;

    #[test]
    fn submit_runs_task() {
        let guard = Scheduler::start(2);
        let sched = guard.handle();
        let (tx, rx) = channel();
        sched.submit(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 42);
        guard.shutdown();
    }

    #[test]
    fn fifo_order_preserved_for_single_submitter() {
        let guard = Scheduler::start(1);
        let sched = guard.handle();
        let (tx, rx) = channel();
        for i in 0..10 {
            let tx = tx.clone();
            sched.submit(move || tx.send(i).unwrap());
        }
        let results: Vec<i32> = (0..10).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(results, (0..10).collect::<Vec<_>>());
        guard.shutdown();
    }

    #[test]
    fn delayed_task_runs_after_deadline_not_before() {
        let guard = Scheduler::start(1);
        let sched = guard.handle();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        sched.submit_delayed(Duration::from_millis(50), move || {
            ran2.store(true, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(10));
        assert!(!ran.load(Ordering::SeqCst));
        std::thread::sleep(Duration::from_millis(100));
        assert!(ran.load(Ordering::SeqCst));
        guard.shutdown();
    }

    #[test]
    fn shutdown_discards_pending_delayed_tasks() {
        let guard = Scheduler::start(1);
        let sched = guard.handle();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        sched.submit_delayed(Duration::from_secs(5), move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        guard.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn submit_async_resolves_future() {
        let guard = Scheduler::start(1);
        let sched = guard.handle();
        let rx = sched.submit_async(|| 7 + 5);
        let value = rx.await.unwrap();
        assert_eq!(value, 12);
        guard.shutdown();
    }
}
