//! Deduplicating async executor.
//!
//! [`CheckExecutor`] ensures at most one in-flight task exists per key
//! unless the caller explicitly asks for a resubmit, and keeps a small FIFO
//! of finished-but-unpicked results per key.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("no active or finished state for key '{0}'")]
    NoSuchKey(String),
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorStatistics {
    pub active: usize,
    pub finished_unpicked: usize,
    pub submitted_total: u64,
    pub errored_total: u64,
}

enum KeyState<T> {
    Active(JoinHandle<T>),
    Finished(VecDeque<T>),
}

struct Counters {
    submitted_total: std::sync::atomic::AtomicU64,
    errored_total: std::sync::atomic::AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            submitted_total: std::sync::atomic::AtomicU64::new(0),
            errored_total: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

/// Per-key result, either the computed value or the error it produced.
pub type ExecResult<T> = Result<T, String>;

/// Deduplicating executor: `submit` dedups on `key` unless `resubmit` is
/// set; `result` pops a finished value off that key's FIFO (or reports
/// still-running / no-such-key).
pub struct CheckExecutor<T: Send + 'static> {
    states: Arc<DashMap<String, Mutex<KeyState<ExecResult<T>>>>>,
    counters: Arc<Counters>,
}

impl<T: Send + 'static> Default for CheckExecutor<T> {
    fn default() -> Self {
        Self { states: Arc::new(DashMap::new()), counters: Arc::new(Counters::default()) }
    }
}

impl<T: Send + 'static> CheckExecutor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits `fut` under `key`. If `resubmit` is false and a state
    /// already exists for `key` (active or finished-unpicked), the existing
    /// state is left untouched and no new task is spawned.
    pub fn submit<F>(&self, key: &str, fut: F, resubmit: bool)
    where
        F: Future<Output = ExecResult<T>> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;

        // `entry()` holds the shard lock across the occupied-check and the
        // insert, so concurrent submitters for the same key can't both
        // observe "vacant" and both spawn a task.
        match self.states.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !resubmit => {
                let _ = occupied.get_mut();
            }
            Entry::Occupied(mut occupied) => {
                self.counters.submitted_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                *occupied.get_mut() = Mutex::new(KeyState::Active(tokio::spawn(fut)));
            }
            Entry::Vacant(vacant) => {
                self.counters.submitted_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                vacant.insert(Mutex::new(KeyState::Active(tokio::spawn(fut))));
            }
        }
    }

    /// Picks up the result for `key`:
    /// - `Err(NoSuchKey)` if nothing was ever submitted (or it was already
    ///   picked up and not resubmitted),
    /// - `Ok(None)` if the task is still running,
    /// - `Ok(Some(value))` popped from the finished FIFO otherwise.
    pub async fn result(&self, key: &str) -> Result<Option<ExecResult<T>>, ExecutorError> {
        let Some(entry) = self.states.get(key) else {
            return Err(ExecutorError::NoSuchKey(key.to_string()));
        };

        // Taking the handle out of the lock before awaiting it avoids
        // holding a synchronous lock across an await point.
        let completed_handle = {
            let mut state = entry.lock();
            match &mut *state {
                KeyState::Active(handle) if handle.is_finished() => {
                    let KeyState::Active(handle) =
                        std::mem::replace(&mut *state, KeyState::Finished(VecDeque::new()))
                    else {
                        unreachable!()
                    };
                    Some(handle)
                }
                _ => None,
            }
        };

        let finished_value = if let Some(handle) = completed_handle {
            let outcome = match handle.await {
                Ok(value) => value,
                Err(join_err) => Err(join_err.to_string()),
            };
            if outcome.is_err() {
                self.counters.errored_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Some(outcome)
        } else {
            match &mut *entry.lock() {
                KeyState::Active(_) => None,
                KeyState::Finished(queue) => queue.pop_front(),
            }
        };
        drop(entry);

        if let Some(value) = finished_value {
            // Remove the key entirely once drained, so a second pickup with
            // no intervening submit is a NoSuchKey error, matching the
            // finished-state-is-one-shot semantics.
            if let Some(state) = self.states.get(key) {
                let is_drained = matches!(&*state.lock(), KeyState::Finished(q) if q.is_empty());
                drop(state);
                if is_drained {
                    self.states.remove(key);
                }
            }
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    pub fn statistics(&self) -> ExecutorStatistics {
        let mut active = 0;
        let mut finished_unpicked = 0;
        for entry in self.states.iter() {
            match &*entry.value().lock() {
                KeyState::Active(_) => active += 1,
                KeyState::Finished(queue) => finished_unpicked += queue.len(),
            }
        }
        ExecutorStatistics {
            active,
            finished_unpicked,
            submitted_total: self.counters.submitted_total.load(std::sync::atomic::Ordering::Relaxed),
            errored_total: self.counters.errored_total.load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    /// Keys whose finished-but-unpicked state is an error.
    pub fn errored(&self) -> Vec<String>
    where
        T: Clone,
    {
        let mut keys = Vec::new();
        for entry in self.states.iter() {
            if let KeyState::Finished(queue) = &*entry.value().lock() {
                if queue.iter().any(|outcome| outcome.is_err()) {
                    keys.push(entry.key().clone());
                }
            }
        }
        keys
    }
}

/// A variant that waits for all currently-active tasks to settle before
/// picking up a result, giving callers (the CLI, tests) a deterministic
/// synchronous view of the executor's state.
pub struct BlockingCheckExecutor<T: Send + 'static> {
    inner: CheckExecutor<T>,
}

impl<T: Send + 'static> Default for BlockingCheckExecutor<T> {
    fn default() -> Self {
        Self { inner: CheckExecutor::default() }
    }
}

impl<T: Send + 'static> BlockingCheckExecutor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit<F>(&self, key: &str, fut: F, resubmit: bool)
    where
        F: Future<Output = ExecResult<T>> + Send + 'static,
    {
        self.inner.submit(key, fut, resubmit);
    }

    pub async fn result(&self, key: &str) -> Result<Option<ExecResult<T>>, ExecutorError> {
        // Poll the handle's own completion, not just the `Active` variant:
        // only `CheckExecutor::result` itself transitions a finished handle
        // out of `Active`, so checking the variant alone would spin forever.
        loop {
            let still_running = match self.inner.states.get(key) {
                None => false,
                Some(entry) => matches!(&*entry.lock(), KeyState::Active(handle) if !handle.is_finished()),
            };
            if !still_running {
                break;
            }
            tokio::task::yield_now().await;
        }
        self.inner.result(key).await
    }

    pub fn statistics(&self) -> ExecutorStatistics {
        self.inner.statistics()
    }

    pub fn errored(&self) -> Vec<String>
    where
        T: Clone,
    {
        self.inner.errored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_then_result_returns_value() {
        let executor: CheckExecutor<u32> = CheckExecutor::new();
        executor.submit("k", async { Ok(42) }, false);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let result = executor.result("k").await.unwrap();
        assert_eq!(result, Some(Ok(42)));
    }

    #[tokio::test]
    async fn result_without_submit_is_no_such_key() {
        let executor: CheckExecutor<u32> = CheckExecutor::new();
        let result = executor.result("missing").await;
        assert!(matches!(result, Err(ExecutorError::NoSuchKey(_))));
    }

    #[tokio::test]
    async fn double_pickup_without_resubmit_errors() {
        let executor: CheckExecutor<u32> = CheckExecutor::new();
        executor.submit("k", async { Ok(1) }, false);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(executor.result("k").await.unwrap().is_some());
        assert!(executor.result("k").await.is_err());
    }

    #[tokio::test]
    async fn submit_without_resubmit_does_not_replace_active_task() {
        let executor: CheckExecutor<u32> = CheckExecutor::new();
        executor.submit("k", async { Ok(1) }, false);
        executor.submit("k", async { Ok(2) }, false);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let result = executor.result("k").await.unwrap();
        assert_eq!(result, Some(Ok(1)));
    }

    #[tokio::test]
    async fn blocking_executor_waits_for_completion() {
        let executor: BlockingCheckExecutor<u32> = BlockingCheckExecutor::new();
        executor.submit(
            "k",
            async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(99)
            },
            false,
        );
        let result = executor.result("k").await.unwrap();
        assert_eq!(result, Some(Ok(99)));
    }
}
