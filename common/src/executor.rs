//! Execution Contexts
//!
//! Serial task queues used to pin per-UE work to one context at a time.
//! Submission never blocks: a full queue rejects the task and the caller
//! decides what to log.

use crate::types::DuUeIndex;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Unit of work submitted to an execution context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A serial execution context
pub trait TaskExecutor: Send + Sync {
    /// Enqueue a task. Returns false if the task was rejected (queue full or
    /// context stopped); the task is dropped in that case.
    fn execute(&self, task: Task) -> bool;

    /// Human readable context name, used in logs
    fn name(&self) -> &str;
}

/// Execution context backed by a tokio task draining a bounded queue
pub struct WorkerExecutor {
    name: String,
    tx: mpsc::Sender<Task>,
}

impl WorkerExecutor {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The worker stops once every handle to the executor is dropped and the
    /// queue is drained.
    pub fn spawn(name: impl Into<String>, queue_size: usize) -> (Self, JoinHandle<()>) {
        let name = name.into();
        let (tx, mut rx) = mpsc::channel::<Task>(queue_size.max(1));

        let worker_name = name.clone();
        let handle = tokio::spawn(async move {
            debug!("Worker {} started", worker_name);
            while let Some(task) = rx.recv().await {
                task();
            }
            debug!("Worker {} stopped", worker_name);
        });

        (Self { name, tx }, handle)
    }
}

impl TaskExecutor for WorkerExecutor {
    fn execute(&self, task: Task) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => {
                warn!("Worker {} is stopped, task dropped", self.name);
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Execution context whose queue is drained explicitly by the owner
pub struct ManualExecutor {
    name: String,
    capacity: usize,
    queue: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the oldest queued task. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The lock is released before running so the task can enqueue more work
        let task = self.queue.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks enqueued while
    /// running. Returns the number of tasks executed.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }
}

impl TaskExecutor for ManualExecutor {
    fn execute(&self, task: Task) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(task);
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Runs every task on the caller's thread
#[derive(Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Task) -> bool {
        task();
        true
    }

    fn name(&self) -> &str {
        "inline"
    }
}

/// Resolves the execution context bound to a UE
pub trait UeExecutorMapper: Send + Sync {
    /// Context for `ue_index`. Invalid indexes (identities without a UE yet)
    /// map to a default context.
    fn executor(&self, ue_index: DuUeIndex) -> &dyn TaskExecutor;
}

/// Distributes UEs over a fixed set of workers by UE index
pub struct RoundRobinUeExecutorMapper {
    workers: Vec<Arc<dyn TaskExecutor>>,
}

impl RoundRobinUeExecutorMapper {
    pub fn new(workers: Vec<Arc<dyn TaskExecutor>>) -> Self {
        assert!(!workers.is_empty(), "at least one UE worker is required");
        Self { workers }
    }
}

impl UeExecutorMapper for RoundRobinUeExecutorMapper {
    fn executor(&self, ue_index: DuUeIndex) -> &dyn TaskExecutor {
        let worker = if ue_index.is_valid() {
            ue_index.as_usize() % self.workers.len()
        } else {
            0
        };
        self.workers[worker].as_ref()
    }
}
