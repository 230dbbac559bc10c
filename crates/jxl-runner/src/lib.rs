//! Worker pool handle shared between the decoder facade and codec sessions.
//!
//! A [`ParallelRunner`] either wraps a rayon-core thread pool or runs jobs
//! inline on the calling thread. It is the only place worker threads are
//! introduced; everything above it is single-threaded.

#[derive(Debug, Clone)]
pub struct ParallelRunner(RunnerImpl);

#[derive(Debug, Clone)]
enum RunnerImpl {
    #[cfg(feature = "rayon")]
    Rayon(std::sync::Arc<rayon_core::ThreadPool>),
    Sequential,
}

impl Default for ParallelRunner {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ParallelRunner {
    /// Creates a runner with `num_threads` workers.
    ///
    /// `0` picks a default based on the available parallelism, and `1` runs
    /// everything inline without spawning any threads.
    pub fn new(num_threads: usize) -> Self {
        #[cfg(feature = "rayon")]
        {
            if num_threads == 1 {
                return Self::sequential();
            }

            let num_threads = if num_threads > 0 {
                num_threads
            } else {
                match std::thread::available_parallelism() {
                    Ok(num_threads) => num_threads.into(),
                    Err(e) => {
                        tracing::warn!(%e, "Failed to query available parallelism; falling back to single-threaded");
                        return Self::sequential();
                    }
                }
            };

            let pool = rayon_core::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build();
            match pool {
                Ok(pool) => {
                    tracing::debug!(num_threads, "Initialized worker pool");
                    Self(RunnerImpl::Rayon(std::sync::Arc::new(pool)))
                }
                Err(e) => {
                    tracing::warn!(%e, "Failed to initialize worker pool; falling back to single-threaded");
                    Self::sequential()
                }
            }
        }

        #[cfg(not(feature = "rayon"))]
        {
            let _ = num_threads;
            tracing::debug!("Not built with multithread support");
            Self::sequential()
        }
    }

    /// Creates a runner that runs every job inline on the calling thread.
    pub const fn sequential() -> Self {
        Self(RunnerImpl::Sequential)
    }

    /// Wraps a caller-provided rayon-core pool.
    #[cfg(feature = "rayon")]
    pub fn with_pool(pool: std::sync::Arc<rayon_core::ThreadPool>) -> Self {
        Self(RunnerImpl::Rayon(pool))
    }

    pub fn is_parallel(&self) -> bool {
        match self.0 {
            #[cfg(feature = "rayon")]
            RunnerImpl::Rayon(_) => true,
            RunnerImpl::Sequential => false,
        }
    }

    /// Runs `op` on the pool, blocking until it returns.
    pub fn run<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.0 {
            #[cfg(feature = "rayon")]
            RunnerImpl::Rayon(pool) => pool.install(op),
            RunnerImpl::Sequential => op(),
        }
    }

    /// Runs a scoped fork-join region. Jobs spawned on the scope may spawn
    /// further jobs; the call returns once every job has finished.
    pub fn scope<'scope, R: Send>(
        &'scope self,
        op: impl for<'r> FnOnce(RunnerScope<'r, 'scope>) -> R + Send,
    ) -> R {
        match &self.0 {
            #[cfg(feature = "rayon")]
            RunnerImpl::Rayon(pool) => pool.scope(|scope| {
                let scope = RunnerScope(ScopeImpl::Rayon(scope));
                op(scope)
            }),
            RunnerImpl::Sequential => op(RunnerScope(ScopeImpl::Sequential(Default::default()))),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct RunnerScope<'r, 'scope>(ScopeImpl<'r, 'scope>);

#[derive(Debug, Copy, Clone)]
enum ScopeImpl<'r, 'scope> {
    #[cfg(feature = "rayon")]
    Rayon(&'r rayon_core::Scope<'scope>),
    Sequential(std::marker::PhantomData<&'r &'scope ()>),
}

impl<'scope> RunnerScope<'_, 'scope> {
    pub fn spawn(&self, op: impl for<'r> FnOnce(RunnerScope<'r, 'scope>) + Send + 'scope) {
        match self.0 {
            #[cfg(feature = "rayon")]
            ScopeImpl::Rayon(scope) => scope.spawn(|scope| {
                let scope = RunnerScope(ScopeImpl::Rayon(scope));
                op(scope)
            }),
            ScopeImpl::Sequential(_) => op(RunnerScope(ScopeImpl::Sequential(Default::default()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_runs_inline() {
        let runner = ParallelRunner::sequential();
        assert!(!runner.is_parallel());
        assert_eq!(runner.run(|| 6 * 7), 42);
    }

    #[test]
    fn scope_joins_all_jobs() {
        let runner = ParallelRunner::new(0);
        let counter = std::sync::atomic::AtomicUsize::new(0);
        runner.scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|_| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                });
            }
        });
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 16);
    }
}
