use super::Process;
use super::queue::WorkQueue;
use super::worker::Worker;
use crate::error::{Error, Result};

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// A task refused by [`WorkerPool::submit`] because the queue is full.
///
/// The task is handed back so that the caller can apply backpressure
/// (defer it or run it itself) instead of dropping it.
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    /// Returns the refused task.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

/// A fixed-size pool of worker threads fed by a bounded [`WorkQueue`].
///
/// The pool is responsible for:
/// - spawning the worker threads,
/// - enforcing the queue capacity on submission,
/// - orderly shutdown and thread joining.
pub struct WorkerPool<T: Process> {
    /// Queue shared with all workers.
    queue: Arc<WorkQueue<T>>,

    /// Maximum number of queued (not yet running) tasks.
    capacity: usize,

    /// Join handles for worker threads.
    handles: Vec<JoinHandle<()>>,

    /// Number of tasks that ran to completion.
    completed: Arc<AtomicUsize>,
}

impl<T: Process> WorkerPool<T> {
    /// Spawns `workers` threads sharing a queue bounded to `capacity` tasks.
    ///
    /// Zero workers or a zero capacity is a construction error.
    pub fn new(workers: usize, capacity: usize) -> Result<Self> {
        Self::with_spawner(workers, capacity, |name, worker| {
            thread::Builder::new().name(name).spawn(move || worker.run())
        })
    }

    /// Like [`new`](Self::new), with thread creation delegated to `spawn`.
    ///
    /// If a spawn fails, the workers already started are stopped and
    /// joined before the error is returned.
    fn with_spawner<S>(workers: usize, capacity: usize, mut spawn: S) -> Result<Self>
    where
        S: FnMut(String, Worker<T>) -> io::Result<JoinHandle<()>>,
    {
        if workers == 0 {
            return Err(Error::invalid("worker pool needs at least one thread"));
        }
        if capacity == 0 {
            return Err(Error::invalid("worker queue capacity must be > 0"));
        }

        let queue = Arc::new(WorkQueue::new());
        let completed = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let worker = Worker::new(id, queue.clone(), completed.clone());

            match spawn(format!("beacon-worker-{id}"), worker) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    queue.close();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(Error::io("failed to spawn worker thread", e));
                }
            }
        }

        Ok(Self {
            queue,
            capacity,
            handles,
            completed,
        })
    }

    /// Queues a task for the workers.
    ///
    /// Fails, handing the task back, when `capacity` tasks are already
    /// waiting or the pool is shutting down.
    pub fn submit(&self, task: T) -> std::result::Result<(), QueueFull<T>> {
        if self.queue.is_closed() {
            return Err(QueueFull(task));
        }

        self.queue
            .push_bounded(task, self.capacity)
            .map_err(QueueFull)
    }

    /// Number of tasks queued but not yet picked up.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of tasks that finished running.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stops the pool and waits for all workers.
    ///
    /// Tasks still queued are run before the workers exit.
    pub fn shutdown(&mut self) {
        self.queue.close();

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl<T: Process> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::mpsc::{self, Sender};
    use std::time::Duration;

    struct Record {
        id: usize,
        out: Arc<Mutex<Vec<usize>>>,
    }

    impl Process for Record {
        fn process(self) {
            self.out.lock().unwrap().push(self.id);
        }
    }

    struct Gate {
        release: Arc<(Mutex<bool>, std::sync::Condvar)>,
        started: Sender<()>,
    }

    impl Process for Gate {
        fn process(self) {
            let _ = self.started.send(());
            let (lock, cvar) = &*self.release;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
        }
    }

    #[test]
    fn rejects_invalid_sizes() {
        assert!(matches!(
            WorkerPool::<Record>::new(0, 8),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            WorkerPool::<Record>::new(2, 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn runs_every_submitted_task() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut pool = WorkerPool::new(4, 1024).unwrap();

        for id in 0..100 {
            pool.submit(Record {
                id,
                out: out.clone(),
            })
            .unwrap();
        }

        pool.shutdown();

        let mut ids = out.lock().unwrap().clone();
        ids.sort_unstable();
        assert_eq!(ids, (0..100).collect::<Vec<_>>());
        assert_eq!(pool.completed(), 100);
    }

    #[test]
    fn submit_fails_when_queue_is_full() {
        let release = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
        let (started_tx, started_rx) = mpsc::channel();
        let pool = WorkerPool::new(1, 1).unwrap();

        let gate = |release: &Arc<_>| Gate {
            release: Arc::clone(release),
            started: started_tx.clone(),
        };

        // Occupy the only worker, then fill the single queue slot.
        pool.submit(gate(&release)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.submit(gate(&release)).unwrap();

        let refused = pool.submit(gate(&release));
        assert!(refused.is_err());
        assert_eq!(pool.pending(), 1);

        let (lock, cvar) = &*release;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    #[test]
    fn failed_spawn_stops_started_workers() {
        let exited = Arc::new(AtomicUsize::new(0));

        let result = WorkerPool::<Record>::with_spawner(4, 8, |name, worker| {
            if name.ends_with('2') {
                return Err(io::Error::other("no more threads"));
            }
            let exited = exited.clone();
            thread::Builder::new().name(name).spawn(move || {
                worker.run();
                exited.fetch_add(1, Ordering::SeqCst);
            })
        });

        assert!(matches!(result, Err(Error::Io { .. })));
        assert_eq!(exited.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shutdown_with_idle_workers_returns() {
        let mut pool: WorkerPool<Record> = WorkerPool::new(8, 16).unwrap();
        assert_eq!(pool.workers(), 8);

        pool.shutdown();
        assert_eq!(pool.workers(), 0);
    }
}
