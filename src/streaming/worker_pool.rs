//! Bounded generation worker pool
//!
//! A dedicated rayon pool with at most one queued-or-running task per thread.
//! Dispatch never blocks: when every worker is busy, [`GeneratorPool::try_spawn`]
//! refuses and hands the task input back so the caller can retry it later.

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::core::error::Error;
use crate::core::types::Result;

struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn count(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the in-flight count when a task finishes, panicking or not
struct TaskGuard(Arc<InFlight>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut count = self.0.count();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

pub struct GeneratorPool {
    pool: rayon::ThreadPool,
    in_flight: Arc<InFlight>,
    limit: usize,
}

impl GeneratorPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("chunk-gen-{}", i))
            .panic_handler(|payload| {
                log::error!("Chunk generation task panicked: {}", panic_message(payload.as_ref()));
            })
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        Ok(Self {
            pool,
            in_flight: Arc::new(InFlight {
                count: Mutex::new(0),
                idle: Condvar::new(),
            }),
            limit: threads,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Tasks queued or running
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count()
    }

    /// Whether a spawn would be accepted right now
    pub fn has_capacity(&self) -> bool {
        self.in_flight() < self.limit
    }

    /// Queue `task(input)` unless every worker already has a task.
    ///
    /// When saturated nothing runs and `input` is returned untouched.
    pub fn try_spawn<T, F>(&self, input: T, task: F) -> std::result::Result<(), T>
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        {
            let mut count = self.in_flight.count();
            if *count >= self.limit {
                return Err(input);
            }
            *count += 1;
        }

        let guard = TaskGuard(Arc::clone(&self.in_flight));
        self.pool.spawn(move || {
            let _guard = guard;
            task(input);
        });
        Ok(())
    }

    /// Block until no task is queued or running
    pub fn wait_idle(&self) {
        let mut count = self.in_flight.count();
        while *count > 0 {
            count = self
                .in_flight
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Index of the calling worker thread, `None` off the pool
    pub fn current_worker() -> Option<usize> {
        rayon::current_thread_index()
    }
}

impl Drop for GeneratorPool {
    fn drop(&mut self) {
        self.wait_idle();
    }
}
