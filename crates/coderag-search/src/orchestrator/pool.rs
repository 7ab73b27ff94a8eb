use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

/// Runs the two per-query index calls, on a bounded rayon pool when parallel
/// fan-out is enabled, inline otherwise.
#[derive(Debug)]
pub(crate) struct FanoutPool {
    pool: Option<ThreadPool>,
}

impl FanoutPool {
    pub(crate) fn new(enable_parallel: bool, max_workers: usize) -> Self {
        if !enable_parallel {
            return Self::sequential();
        }
        ThreadPoolBuilder::new()
            .num_threads(max_workers.max(1))
            .thread_name(|i| format!("coderag-fanout-{i}"))
            .build()
            .map_or_else(
                |e| {
                    warn!("failed to start fan-out pool, querying sources sequentially: {e}");
                    Self::sequential()
                },
                |pool| Self { pool: Some(pool) },
            )
    }

    pub(crate) const fn sequential() -> Self {
        Self { pool: None }
    }

    pub(crate) const fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    pub(crate) fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        if let Some(pool) = &self.pool {
            return pool.join(a, b);
        }
        (a(), b())
    }
}
