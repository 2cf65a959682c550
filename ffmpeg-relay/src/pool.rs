use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    jobs: VecDeque<Job>,
    stopping: bool,
    idle: usize,
    workers: usize,
}

struct Shared {
    state: Mutex<PoolState>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Blocking worker pool for side work that must stay off the frame thread,
/// such as encoding snapshots. Starts with `threads` workers and grows up to
/// `max_threads` while every worker is busy.
pub struct WorkerPool {
    name: String,
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    max_threads: usize,
}

impl WorkerPool {
    pub fn start(name: &str, threads: usize, max_threads: usize) -> anyhow::Result<Self> {
        let threads = threads.max(1);
        let pool = Self {
            name: name.to_string(),
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    jobs: VecDeque::new(),
                    stopping: false,
                    idle: 0,
                    workers: 0,
                }),
                available: Condvar::new(),
            }),
            handles: Mutex::new(Vec::with_capacity(threads)),
            max_threads: max_threads.max(threads),
        };
        for _ in 0..threads {
            let mut state = pool.shared.lock();
            pool.spawn_worker(&mut state)?;
        }
        log::debug!("worker pool {} started with {} threads", pool.name, threads);
        Ok(pool)
    }

    fn spawn_worker(&self, state: &mut PoolState) -> anyhow::Result<()> {
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-{}", self.name, state.workers))
            .spawn(move || worker_loop(shared))?;
        state.workers += 1;
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        Ok(())
    }

    /// Queues `task` and returns a receiver resolving to its result. The
    /// receiver errors if the task panicked.
    pub fn submit<F, T>(&self, task: F) -> anyhow::Result<oneshot::Receiver<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(task());
        });

        let mut state = self.shared.lock();
        if state.stopping {
            anyhow::bail!("worker pool {} is stopped", self.name);
        }
        state.jobs.push_back(job);
        if state.idle == 0 && state.workers < self.max_threads {
            if let Err(e) = self.spawn_worker(&mut state) {
                log::warn!("worker pool {} can't grow: {:#}", self.name, e);
            }
        }
        drop(state);
        self.shared.available.notify_one();
        Ok(rx)
    }

    pub fn is_running(&self) -> bool {
        !self.shared.lock().stopping
    }

    pub fn thread_count(&self) -> usize {
        self.shared.lock().workers
    }

    /// Refuses new tasks, runs the ones already queued and joins every worker.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            if state.stopping && state.workers == 0 {
                return;
            }
            state.stopping = true;
        }
        self.shared.available.notify_all();

        let handles: Vec<_> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for handle in handles {
            if handle.join().is_err() {
                log::error!("worker of pool {} panicked", self.name);
            }
        }
        self.shared.lock().workers = 0;
        log::debug!("worker pool {} stopped", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break Some(job);
                }
                if state.stopping {
                    break None;
                }
                state.idle += 1;
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
                state.idle -= 1;
            }
        };
        match job {
            Some(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("worker pool task panicked");
                }
            }
            None => return,
        }
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
