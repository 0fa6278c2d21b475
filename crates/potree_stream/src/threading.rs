//! Fixed-size worker pool for fetch and decode jobs.
//!
//! Wraps a dedicated rayon thread pool. Jobs are injected with
//! `spawn_fifo`, so a job waits in submission order until a worker frees up,
//! and each job runs on exactly one worker. Results come back through a
//! per-job channel that the frame loop polls without blocking.
//!
//! # Usage
//!
//! ```ignore
//! let pool = WorkerPool::new(4)?;
//!
//! // Queue work (non-blocking)
//! let mut handle = pool.run(move || decode(bytes));
//!
//! // Poll for the result each frame
//! if let Some(result) = handle.poll() {
//!     // Ok(value) or Err(WorkerFailure) if the job panicked
//! }
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{self as channel, Receiver, TryRecvError};

use crate::error::WorkerFailure;

/// Bounded pool of decode workers.
pub struct WorkerPool {
  pool: rayon::ThreadPool,
  size: usize,
  /// Jobs submitted but not yet claimed by a worker.
  queued: Arc<AtomicUsize>,
  /// Jobs currently running.
  active: Arc<AtomicUsize>,
}

impl WorkerPool {
  /// Create a pool with `size` workers, clamped to the available hardware
  /// parallelism (and at least one).
  pub fn new(size: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
    let hardware = std::thread::available_parallelism().map_or(1, |n| n.get());
    let size = size.clamp(1, hardware);
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(size)
      .thread_name(|i| format!("potree-worker-{i}"))
      .build()?;

    tracing::debug!(size, "worker pool started");
    Ok(Self {
      pool,
      size,
      queued: Arc::new(AtomicUsize::new(0)),
      active: Arc::new(AtomicUsize::new(0)),
    })
  }

  /// Pool sized to the machine.
  pub fn with_available_parallelism() -> Result<Self, rayon::ThreadPoolBuildError> {
    Self::new(usize::MAX)
  }

  /// Enqueue a job (non-blocking).
  ///
  /// A panic inside `job` is caught and delivered as [`WorkerFailure`]; the
  /// worker stays in the pool.
  pub fn run<F, T>(&self, job: F) -> TaskHandle<T>
  where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
  {
    let (sender, receiver) = channel::bounded(1);
    let queued = Arc::clone(&self.queued);
    let active = Arc::clone(&self.active);
    queued.fetch_add(1, Ordering::SeqCst);

    self.pool.spawn_fifo(move || {
      queued.fetch_sub(1, Ordering::SeqCst);
      active.fetch_add(1, Ordering::SeqCst);

      let result = panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
        let failure = WorkerFailure {
          message: panic_message(payload.as_ref()),
        };
        tracing::warn!(error = %failure, "worker job panicked");
        failure
      });

      active.fetch_sub(1, Ordering::SeqCst);
      // Receiver may be gone if the caller dropped the handle.
      let _ = sender.send(result);
    });

    TaskHandle {
      receiver: Some(receiver),
    }
  }

  /// Number of worker threads.
  pub fn size(&self) -> usize {
    self.size
  }

  /// Jobs waiting for a free worker.
  pub fn queued(&self) -> usize {
    self.queued.load(Ordering::SeqCst)
  }

  /// Jobs currently executing.
  pub fn active(&self) -> usize {
    self.active.load(Ordering::SeqCst)
  }

  /// True when nothing is queued or running.
  pub fn is_idle(&self) -> bool {
    self.queued() == 0 && self.active() == 0
  }
}

impl std::fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerPool")
      .field("size", &self.size)
      .field("queued", &self.queued())
      .field("active", &self.active())
      .finish()
  }
}

/// Completion handle for one job.
#[derive(Debug)]
pub struct TaskHandle<T> {
  receiver: Option<Receiver<Result<T, WorkerFailure>>>,
}

impl<T> TaskHandle<T> {
  /// Poll for the result (non-blocking).
  ///
  /// Returns `Some` exactly once; later calls return `None`.
  pub fn poll(&mut self) -> Option<Result<T, WorkerFailure>> {
    let receiver = self.receiver.as_ref()?;
    let result = match receiver.try_recv() {
      Ok(result) => result,
      Err(TryRecvError::Empty) => return None,
      Err(TryRecvError::Disconnected) => Err(WorkerFailure {
        message: "job dropped without a result".to_string(),
      }),
    };
    self.receiver = None;
    Some(result)
  }

  /// Block until the job finishes. Never call this from the frame loop.
  pub fn wait(mut self) -> Result<T, WorkerFailure> {
    let receiver = self.receiver.take().ok_or_else(|| WorkerFailure {
      message: "result already taken".to_string(),
    })?;
    receiver.recv().unwrap_or_else(|_| {
      Err(WorkerFailure {
        message: "job dropped without a result".to_string(),
      })
    })
  }

  /// True when the result is available or already taken.
  pub fn is_ready(&self) -> bool {
    self.receiver.as_ref().map_or(true, |r| !r.is_empty())
  }

  /// True once the result has been taken.
  pub fn is_finished(&self) -> bool {
    self.receiver.is_none()
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
