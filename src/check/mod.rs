//! Check objects: a name, a function, the environments it targets, and the
//! scheduling/caching/hostname policy attached to it.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::datasource::DatasourceUnavailable;
use crate::hostname::HostnameStrategy;
use crate::result::{normalize_check_function_result, CheckDefinition, CheckResult, RawCheckOutput};
use crate::scheduling::SchedulingStrategy;

/// Context handed to a check function at invocation time.
pub struct CheckContext {
    pub environment_name: String,
    pub hostname: String,
}

/// What a check function body returns: the raw result set, or a
/// distinguished signal that one of its datasources could not be resolved.
pub type CheckFunctionOutcome = Result<RawCheckOutput, DatasourceUnavailable>;

type SyncFn = dyn Fn(&CheckContext) -> CheckFunctionOutcome + Send + Sync;
type AsyncFn =
    dyn Fn(&CheckContext) -> Pin<Box<dyn Future<Output = CheckFunctionOutcome> + Send>> + Send + Sync;

/// The body of a check: either a plain synchronous function (run on a
/// worker thread) or an async function (run on the executor's dedicated
/// event loop).
pub enum CheckFunction {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl CheckFunction {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&CheckContext) -> CheckFunctionOutcome + Send + Sync + 'static,
    {
        CheckFunction::Sync(Arc::new(f))
    }

    pub fn r#async<F, Fut>(f: F) -> Self
    where
        F: Fn(&CheckContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CheckFunctionOutcome> + Send + 'static,
    {
        CheckFunction::Async(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, CheckFunction::Async(_))
    }
}

/// A declared health check: a name, its body, the environments it may run
/// against, and the policy governing scheduling, caching, and hostname
/// resolution.
pub struct Check {
    pub name: String,
    pub function: CheckFunction,
    pub environments: BTreeSet<String>,
    pub scheduling_strategies: Vec<Arc<dyn SchedulingStrategy>>,
    pub cache_ttl: Option<Duration>,
    pub hostname_strategy: Option<Arc<dyn HostnameStrategy>>,
    pub service_labels: BTreeMap<String, String>,
    pub check_definition: Option<CheckDefinition>,
}

impl Check {
    pub fn new(name: impl Into<String>, function: CheckFunction, environments: BTreeSet<String>) -> Self {
        Self {
            name: name.into(),
            function,
            environments,
            scheduling_strategies: Vec::new(),
            cache_ttl: None,
            hostname_strategy: None,
            service_labels: BTreeMap::new(),
            check_definition: None,
        }
    }

    pub fn with_scheduling_strategies(mut self, strategies: Vec<Arc<dyn SchedulingStrategy>>) -> Self {
        self.scheduling_strategies = strategies;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_hostname(mut self, strategy: Arc<dyn HostnameStrategy>) -> Self {
        self.hostname_strategy = Some(strategy);
        self
    }

    pub fn with_service_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.service_labels = labels;
        self
    }

    pub fn with_check_definition(mut self, definition: CheckDefinition) -> Self {
        self.check_definition = Some(definition);
        self
    }

    pub fn is_async(&self) -> bool {
        self.function.is_async()
    }

    /// Runs the check function synchronously, blocking the calling thread
    /// if the body is itself synchronous; async bodies are driven to
    /// completion on the current Tokio runtime. Must not be called from
    /// within an async task on a single-threaded runtime.
    pub fn run_sync(&self, ctx: &CheckContext) -> Result<Vec<CheckResult>, DatasourceUnavailable> {
        let outcome = match &self.function {
            CheckFunction::Sync(f) => f(ctx),
            CheckFunction::Async(f) => tokio::runtime::Handle::current().block_on(f(ctx)),
        };
        outcome.map(|raw| normalize_check_function_result(raw, None))
    }

    pub async fn run_async(&self, ctx: &CheckContext) -> Result<Vec<CheckResult>, DatasourceUnavailable> {
        let outcome = match &self.function {
            CheckFunction::Async(f) => f(ctx).await,
            CheckFunction::Sync(f) => {
                let f = f.clone();
                let ctx_env = ctx.environment_name.clone();
                let ctx_host = ctx.hostname.clone();
                tokio::task::spawn_blocking(move || {
                    let ctx = CheckContext { environment_name: ctx_env, hostname: ctx_host };
                    f(&ctx)
                })
                .await
                .unwrap_or_else(|_| Ok(RawCheckOutput::Many(vec![CheckResult::crit("check task panicked")])))
            }
        };
        outcome.map(|raw| normalize_check_function_result(raw, None))
    }
}

impl std::hash::Hash for Check {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialEq for Check {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Check {}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::CheckResult;

    #[tokio::test]
    async fn sync_check_runs_on_worker_pool() {
        let check = Check::new(
            "disk_space",
            CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("fine")))),
            BTreeSet::from(["prod".to_string()]),
        );
        let ctx = CheckContext { environment_name: "prod".into(), hostname: "host".into() };
        let results = check.run_async(&ctx).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn async_check_runs() {
        let check = Check::new(
            "ping",
            CheckFunction::r#async(|_ctx| async { Ok(RawCheckOutput::Single(CheckResult::ok("pong"))) }),
            BTreeSet::from(["prod".to_string()]),
        );
        let ctx = CheckContext { environment_name: "prod".into(), hostname: "host".into() };
        let results = check.run_async(&ctx).await.unwrap();
        assert_eq!(results[0].message, "pong");
    }

    #[tokio::test]
    async fn unavailable_datasource_short_circuits_run() {
        let check = Check::new(
            "db_check",
            CheckFunction::sync(|_ctx| Err(DatasourceUnavailable("db down".into()))),
            BTreeSet::from(["prod".to_string()]),
        );
        let ctx = CheckContext { environment_name: "prod".into(), hostname: "host".into() };
        let result = check.run_async(&ctx).await;
        assert!(result.is_err());
    }

    #[test]
    fn checks_are_equal_by_name() {
        let a = Check::new(
            "x",
            CheckFunction::sync(|_| Ok(RawCheckOutput::Many(vec![]))),
            BTreeSet::new(),
        );
        let b = Check::new(
            "x",
            CheckFunction::sync(|_| Ok(RawCheckOutput::Many(vec![]))),
            BTreeSet::new(),
        );
        assert_eq!(a, b);
    }
}
