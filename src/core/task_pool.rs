//! Execution pool with timeout-bounded task handles.
//!
//! Worker threads block on a crossbeam channel of boxed jobs, so an idle pool
//! costs nothing and dropping the sender ends every worker. Each submitted
//! closure reports through its own one-shot channel, which is what a
//! [`TaskHandle`] waits on.
//!
//! A pool is either fixed ([`TaskPool::new`]) or cached ([`TaskPool::cached`]).
//! A cached pool starts a thread whenever a task arrives and no worker is
//! free, up to its thread cap, and retires workers that stay idle for the
//! keep-alive period.
//!
//! A task that outlives its wait bound is not cancelled once running: it
//! keeps its worker until it returns. A task whose waiter timed out before
//! the task started is skipped.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::QueueError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one submitted unit of work.
#[derive(Debug)]
pub struct TaskHandle<R> {
    rx: Receiver<Result<R, QueueError>>,
    abandoned: Arc<AtomicBool>,
}

impl<R> TaskHandle<R> {
    /// Wait up to `timeout` for the task's result.
    ///
    /// Timing out abandons the task: if it has not started yet, it never will.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Timeout`] if the task has not finished in time
    /// - [`QueueError::Execution`] if the task panicked or was dropped unrun
    pub fn wait_timeout(&self, timeout: Duration) -> Result<R, QueueError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.abandoned.store(true, Ordering::Release);
                Err(QueueError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(QueueError::Execution("task dropped before completion".into()))
            }
        }
    }
}

/// Worker bookkeeping, always changed under one lock so a submitter and a
/// worker going idle never both miss each other.
#[derive(Debug, Default)]
struct Slots {
    /// Workers alive, counting ones being spawned.
    live: usize,
    /// Workers waiting for a job no submitter has claimed yet.
    idle: usize,
    /// Jobs queued while no worker was free and the pool was at its cap.
    backlog: usize,
    next_id: usize,
}

/// Pool of named worker threads, fixed or growing on demand.
pub struct TaskPool {
    name: String,
    job_tx: Mutex<Option<Sender<Job>>>,
    job_rx: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    slots: Arc<Mutex<Slots>>,
    max_threads: usize,
    keep_alive: Option<Duration>,
    shutdown: AtomicBool,
}

impl TaskPool {
    /// Spawn `threads` workers named `<name>-<index>` that live until shutdown.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidConfig`] if `threads` is 0
    /// - [`QueueError::Spawn`] if the OS refuses a thread
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self, QueueError> {
        let pool = Self::assemble(name.into(), threads, None)?;
        for _ in 0..threads {
            pool.slots.lock().live += 1;
            if let Err(e) = pool.spawn_worker(false) {
                pool.shutdown(Duration::ZERO);
                return Err(e);
            }
        }
        debug!(pool = %pool.name, threads, "task pool started");
        Ok(pool)
    }

    /// Create a pool with no threads that grows to at most `max_threads`.
    ///
    /// A worker idle for `keep_alive` exits.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConfig`] if `max_threads` is 0.
    pub fn cached(
        name: impl Into<String>,
        max_threads: usize,
        keep_alive: Duration,
    ) -> Result<Self, QueueError> {
        let pool = Self::assemble(name.into(), max_threads, Some(keep_alive))?;
        debug!(pool = %pool.name, max_threads, ?keep_alive, "cached task pool created");
        Ok(pool)
    }

    fn assemble(
        name: String,
        max_threads: usize,
        keep_alive: Option<Duration>,
    ) -> Result<Self, QueueError> {
        if max_threads == 0 {
            return Err(QueueError::InvalidConfig(
                "task pool needs at least one thread".into(),
            ));
        }

        let (job_tx, job_rx) = unbounded::<Job>();
        Ok(Self {
            name,
            job_tx: Mutex::new(Some(job_tx)),
            job_rx,
            workers: Mutex::new(Vec::new()),
            slots: Arc::new(Mutex::new(Slots::default())),
            max_threads,
            keep_alive,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Queue `task` for execution and return a handle to its result.
    ///
    /// A panic inside `task` resolves the handle with [`QueueError::Execution`].
    ///
    /// # Errors
    ///
    /// - [`QueueError::Shutdown`] if the pool has been shut down
    /// - [`QueueError::Spawn`] if no worker exists and none can be started
    pub fn submit<F, R>(&self, task: F) -> Result<TaskHandle<R>, QueueError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        let abandoned = Arc::new(AtomicBool::new(false));
        let skip = Arc::clone(&abandoned);
        let pool_name = self.name.clone();
        let job: Job = Box::new(move || {
            if skip.load(Ordering::Acquire) {
                debug!(pool = %pool_name, "skipping task abandoned by its waiter");
                return;
            }
            let outcome = catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| QueueError::Execution(panic_message(payload.as_ref())));
            // the waiter may have given up already
            let _ = result_tx.send(outcome);
        });

        let job_tx = self.job_tx.lock();
        let Some(job_tx) = job_tx.as_ref() else {
            return Err(QueueError::Shutdown);
        };

        let spawn = {
            let mut slots = self.slots.lock();
            if slots.idle > 0 {
                slots.idle -= 1;
                false
            } else if slots.live < self.max_threads {
                slots.live += 1;
                true
            } else {
                slots.backlog += 1;
                false
            }
        };

        if spawn {
            if let Err(e) = self.spawn_worker(true) {
                let mut slots = self.slots.lock();
                if slots.live == 0 {
                    return Err(e);
                }
                // another worker picks the job up when it frees
                slots.backlog += 1;
                warn!(pool = %self.name, error = %e, "could not grow task pool");
            }
        }

        job_tx.send(job).map_err(|_| QueueError::Shutdown)?;
        Ok(TaskHandle {
            rx: result_rx,
            abandoned,
        })
    }

    /// Number of worker threads alive right now.
    pub fn thread_count(&self) -> usize {
        self.slots.lock().live
    }

    /// Start one worker. The caller has already counted it in `live`.
    fn spawn_worker(&self, reserved: bool) -> Result<(), QueueError> {
        let worker_id = {
            let mut slots = self.slots.lock();
            slots.next_id += 1;
            slots.next_id - 1
        };
        let job_rx = self.job_rx.clone();
        let slots = Arc::clone(&self.slots);
        let keep_alive = self.keep_alive;

        let spawned = thread::Builder::new()
            .name(format!("{}-{worker_id}", self.name))
            .spawn(move || run_worker(&job_rx, &slots, keep_alive, reserved));

        match spawned {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|worker| !worker.is_finished());
                workers.push(handle);
                Ok(())
            }
            Err(e) => {
                self.slots.lock().live -= 1;
                Err(QueueError::Spawn(e.to_string()))
            }
        }
    }

    /// Stop accepting tasks and join the workers, waiting up to `join_timeout`
    /// for each before detaching it.
    pub fn shutdown(&self, join_timeout: Duration) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // dropping the sender ends every worker's recv loop once queued jobs ran
        self.job_tx.lock().take();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let worker_count = workers.len();
        join_with_timeout(&self.name, workers, join_timeout);

        info!(pool = %self.name, worker_count, "task pool shut down");
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // workers are detached, not joined, so drop never blocks on a stuck task
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.job_tx.lock().take();
            debug!(pool = %self.name, "task pool dropped without explicit shutdown");
        }
    }
}

/// Worker loop. `reserved` means a job is already on its way to this worker.
fn run_worker(
    job_rx: &Receiver<Job>,
    slots: &Mutex<Slots>,
    keep_alive: Option<Duration>,
    mut reserved: bool,
) {
    loop {
        if !reserved {
            let mut slots = slots.lock();
            if slots.backlog > 0 {
                slots.backlog -= 1;
                reserved = true;
            } else {
                slots.idle += 1;
            }
        }

        let job = loop {
            let received = match keep_alive {
                Some(keep_alive) => job_rx.recv_timeout(keep_alive),
                None => job_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(job) => break Some(job),
                Err(RecvTimeoutError::Disconnected) => break None,
                Err(RecvTimeoutError::Timeout) => {
                    let mut slots = slots.lock();
                    // a claimed idle slot means a job is in flight to some worker
                    if !reserved && slots.idle > 0 {
                        slots.idle -= 1;
                        break None;
                    }
                }
            }
        };

        let Some(job) = job else { break };
        reserved = false;
        job();
    }

    slots.lock().live -= 1;
}

/// Join each handle, giving up on (detaching) any that take longer than `timeout`.
pub(crate) fn join_with_timeout(owner: &str, handles: Vec<JoinHandle<()>>, timeout: Duration) {
    for (idx, handle) in handles.into_iter().enumerate() {
        let (tx, rx) = bounded(1);
        let joiner = thread::spawn(move || {
            let joined = handle.join();
            let _ = tx.send(joined.is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => {
                debug!(owner = %owner, thread = idx, "thread joined");
                let _ = joiner.join();
            }
            Ok(false) => {
                error!(owner = %owner, thread = idx, "thread panicked");
                let _ = joiner.join();
            }
            Err(_) => {
                warn!(owner = %owner, thread = idx, "thread did not exit within timeout - detaching");
            }
        }
    }
}

/// Render a panic payload for logs and [`QueueError::Execution`].
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_string()
    }
}
