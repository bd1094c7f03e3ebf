//! Fixed-size worker pool for CPU-bound tasks.
//!
//! The delta engine hashes blocks and computes deltas on these workers so
//! file I/O and digest work overlap. Tasks run in FIFO submission order;
//! the pool drains its queue before the workers join on shutdown.

#![deny(unsafe_code)]

use std::sync::{Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle returned by [`ThreadPool::spawn`].
///
/// Dropping the handle detaches the task; [`TaskHandle::wait`] blocks until
/// the task has finished running.
pub struct TaskHandle {
    done: Receiver<()>,
}

impl TaskHandle {
    /// Blocks until the task completes.
    ///
    /// Returns `false` if the task panicked or the pool shut down before
    /// the task could signal completion.
    pub fn wait(self) -> bool {
        self.done.recv().is_ok()
    }
}

/// Fixed-size FIFO worker pool.
pub struct ThreadPool {
    queue: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Creates a pool with `threads` workers (minimum one).
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();

        let workers = (0..threads)
            .map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("sentinel-worker-{index}"))
                    .spawn(move || worker_loop(&receiver))
                    .expect("spawn pool worker")
            })
            .collect();

        Self {
            queue: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Creates a pool sized to the machine's available parallelism.
    #[must_use]
    pub fn with_default_size() -> Self {
        let threads = thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self::new(threads)
    }

    /// Shared pool used by the delta engine.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<ThreadPool> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_default_size)
    }

    /// Enqueues a task for execution, returning a completion handle.
    ///
    /// Tasks submitted after [`shutdown`](Self::shutdown) are dropped and
    /// their handles resolve immediately with `false`.
    pub fn spawn<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let wrapped: Task = Box::new(move || {
            task();
            let _ = done_tx.send(());
        });

        let queue = self.queue.lock().expect("pool queue poisoned");
        if let Some(sender) = queue.as_ref() {
            if sender.send(wrapped).is_err() {
                tracing::warn!("worker pool queue closed, task dropped");
            }
        } else {
            tracing::warn!("task submitted after pool shutdown, dropped");
        }

        TaskHandle { done: done_rx }
    }

    /// Drains the queue and joins every worker. Idempotent.
    pub fn shutdown(&self) {
        let sender = self.queue.lock().expect("pool queue poisoned").take();
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().expect("pool workers poisoned"));
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tasks_run_and_handles_resolve() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.wait());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = ThreadPool::new(2);
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn queued_tasks_drain_before_join() {
        let pool = ThreadPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn spawn_after_shutdown_resolves_false() {
        let pool = ThreadPool::new(1);
        pool.shutdown();
        let handle = pool.spawn(|| {});
        assert!(!handle.wait());
    }

    #[test]
    fn zero_thread_request_still_executes() {
        let pool = ThreadPool::new(0);
        assert!(pool.spawn(|| {}).wait());
    }
}
