//! Worker threads for running several contexts at once.
//!
//! Each thread of the pool takes one role: the first threads each own a main
//! context, the others help with whatever is queued until every main is done.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::context::ContextId;
use crate::controller::EvalController;
use crate::error::{EvalError, Result};
use crate::types::SuccessType;

/// Counts a main worker out when dropped, panics included. The last one out
/// releases the helpers.
struct MainExit<'a> {
    remaining: &'a AtomicUsize,
    release: &'a AtomicBool,
}

impl Drop for MainExit<'_> {
    fn drop(&mut self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.release.store(true, Ordering::Release);
        }
    }
}

pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    /// Builds a pool of `nb_threads` workers (0 lets rayon pick one per core).
    pub fn new(nb_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(nb_threads)
            .thread_name(|i| format!("mads-eval-{i}"))
            .build()
            .map_err(|e| EvalError::ThreadPool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn nb_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs every context of `mains` on its own worker, the remaining workers
    /// acting as helpers. Returns the success type of each main, in order.
    ///
    /// Fails with [`EvalError::InvalidArgs`] when there are more mains than
    /// workers, and with the first worker error otherwise.
    pub fn run(&self, controller: &EvalController, mains: &[ContextId]) -> Result<Vec<SuccessType>> {
        if mains.is_empty() {
            return Ok(Vec::new());
        }
        let nb_threads = self.nb_threads();
        if mains.len() > nb_threads {
            return Err(EvalError::InvalidArgs(format!(
                "{} main contexts for {} worker threads",
                mains.len(),
                nb_threads
            )));
        }
        for &id in mains {
            controller.context(id)?;
        }
        debug!(
            "running {} main contexts with {} helpers",
            mains.len(),
            nb_threads - mains.len()
        );

        let remaining = AtomicUsize::new(mains.len());
        let release = AtomicBool::new(false);

        let results = self.pool.broadcast(|ctx| -> Result<Option<SuccessType>> {
            match mains.get(ctx.index()) {
                Some(&id) => {
                    let _exit = MainExit {
                        remaining: &remaining,
                        release: &release,
                    };
                    controller.run(id).map(Some)
                }
                None => controller.run_helper_until(Some(&release)).map(|_| None),
            }
        });

        let mut successes = Vec::with_capacity(mains.len());
        for result in results {
            if let Some(success) = result? {
                successes.push(success);
            }
        }
        Ok(successes)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("nb_threads", &self.nb_threads())
            .finish()
    }
}
