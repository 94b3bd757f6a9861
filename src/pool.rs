//! Fixed-size worker pool.
//!
//! Workers pull nullary tasks from a bounded FIFO queue. `submit` blocks
//! while the queue is full, so under heavy read load the reactor thread
//! stalls and TCP backpressure propagates to the peers instead of the
//! queue growing without bound. Panicking tasks are caught and logged;
//! a panic never takes a worker down.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct State {
    queue: VecDeque<Task>,
    stopped: bool,
}

struct PoolInner {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` threads (coerced to at least 1) sharing a queue of
    /// at most `capacity` pending tasks.
    pub fn new(workers: usize, capacity: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);
        info!(workers, capacity, "creating worker pool");

        let inner = Arc::new(PoolInner {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || worker_loop(&inner))?;
            handles.push(handle);
        }

        Ok(Self {
            inner,
            workers: Mutex::new(handles),
        })
    }

    /// Enqueue a task, blocking while the queue is full. Returns false
    /// (dropping the task) if the pool has been shut down.
    pub fn submit(&self, task: Task) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        while state.queue.len() >= self.inner.capacity && !state.stopped {
            state = self.inner.not_full.wait(state).unwrap();
        }
        if state.stopped {
            warn!("task submitted to stopped pool, dropping");
            return false;
        }
        state.queue.push_back(task);
        drop(state);
        self.inner.not_empty.notify_one();
        true
    }

    /// Number of tasks waiting in the queue.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    /// Stop accepting tasks, let workers drain the queue, and join them.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();

        for handle in self.workers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut state = inner.state.lock().unwrap();
            while state.queue.is_empty() && !state.stopped {
                state = inner.not_empty.wait(state).unwrap();
            }
            match state.queue.pop_front() {
                Some(task) => task,
                // Queue empty and stopped: drain complete.
                None => return,
            }
        };
        inner.not_full.notify_one();

        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("panic in worker task");
        }
    }
}
