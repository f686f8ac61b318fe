//! Application core: ties the datasource registry, scheduling strategies,
//! cache, executor and hostname pipeline together into the per-(check,
//! environment) run loop and the Checkmk agent-output stream.

pub mod environment;

pub use environment::{Environment, EnvironmentRegistry};

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::{Cache, CacheKey};
use crate::check::{Check, CheckContext};
use crate::datasource::{DatasourceRegistry, DatasourceUnavailable};
use crate::executor::{BlockingCheckExecutor, ExecResult};
use crate::hostname::{resolve_hostname, HostnameContext};
use crate::result::{CheckResult, CheckState, ExecutionResult};
use crate::scheduling::{
    aggregate, DetectImpossibleCombination, SchedulingContext, SchedulingDecision,
};

/// The Watchpost application: owns registrations and the long-lived
/// machinery (cache, executor, datasources) that `run_check` threads
/// through on every invocation.
pub struct Watchpost {
    pub agent_os: String,
    pub datasources: DatasourceRegistry,
    pub cache: Cache,
    pub executor: BlockingCheckExecutor<Result<Vec<CheckResult>, DatasourceUnavailable>>,
    pub environments: RwLock<EnvironmentRegistry>,
    pub checks: RwLock<Vec<Arc<Check>>>,
    pub default_hostname: Option<Arc<dyn crate::hostname::HostnameStrategy>>,
    pub execution_environment: String,
    /// Whether a check whose hostname resolves to nothing at every declared
    /// level falls back to the `"{service_name}-{environment.name}"`
    /// template instead of erroring out.
    pub fallback_to_default_hostname_generation: bool,
    /// Whether a resolved hostname that fails RFC1123 validation is coerced
    /// into a valid one instead of erroring out.
    pub coerce_into_valid_hostname: bool,
}

impl Watchpost {
    pub fn new(agent_os: impl Into<String>, cache: Cache, execution_environment: impl Into<String>) -> Self {
        Self {
            agent_os: agent_os.into(),
            datasources: DatasourceRegistry::new(),
            cache,
            executor: BlockingCheckExecutor::new(),
            environments: RwLock::new(EnvironmentRegistry::new()),
            checks: RwLock::new(Vec::new()),
            default_hostname: None,
            execution_environment: execution_environment.into(),
            fallback_to_default_hostname_generation: true,
            coerce_into_valid_hostname: true,
        }
    }

    pub fn with_fallback_to_default_hostname_generation(mut self, enabled: bool) -> Self {
        self.fallback_to_default_hostname_generation = enabled;
        self
    }

    pub fn with_coerce_into_valid_hostname(mut self, enabled: bool) -> Self {
        self.coerce_into_valid_hostname = enabled;
        self
    }

    pub fn register_check(&self, check: Check) {
        self.checks.write().push(Arc::new(check));
    }

    pub fn register_environment(&self, environment: Environment) {
        self.environments.write().add(environment);
    }

    /// Dry-run scheduling evaluation across every registered environment,
    /// used by the CLI's configuration-verification command.
    pub fn verify_check_scheduling(&self, check: &Check) -> Vec<(String, SchedulingDecision)> {
        let environments = self.environments.read();
        environments
            .iter()
            .map(|env| {
                let decision = self.resolve_check_scheduling_decision(check, &env.name);
                (env.name.clone(), decision)
            })
            .collect()
    }

    fn resolve_check_scheduling_decision(&self, check: &Check, environment_name: &str) -> SchedulingDecision {
        let ctx = SchedulingContext {
            check_environments: check.environments.clone(),
            execution_environment: self.execution_environment.clone(),
            target_environment: environment_name.to_string(),
        };

        let others: Vec<&dyn crate::scheduling::SchedulingStrategy> =
            check.scheduling_strategies.iter().map(|s| s.as_ref()).collect();

        let validator = DetectImpossibleCombination;
        if let Err(err) = validator.evaluate(&ctx, &others) {
            tracing::warn!(check = %check.name, error = %err, "impossible scheduling combination");
            return SchedulingDecision::DontSchedule;
        }

        let decisions: Vec<SchedulingDecision> =
            check.scheduling_strategies.iter().map(|s| s.schedule(&ctx)).collect();
        aggregate(&decisions)
    }

    /// The full per-(check, environment) state machine: scheduling decision
    /// → hostname resolution → cache lookup → executor submission → result.
    ///
    /// Returns `None` for `DONT_SCHEDULE` — the outer loop yields nothing
    /// for this (check, environment) pair, not a synthetic result.
    pub async fn run_check(&self, check: &Arc<Check>, environment_name: &str) -> Option<ExecutionResult> {
        let decision = self.resolve_check_scheduling_decision(check, environment_name);

        metrics::counter!(
            crate::telemetry::SCHEDULING_DECISIONS_TOTAL,
            "check" => check.name.clone(),
            "environment" => environment_name.to_string(),
            "decision" => decision_metric_label(decision),
        )
        .increment(1);

        if decision == SchedulingDecision::DontSchedule {
            return None;
        }

        let hostname = self.resolve_hostname_for(check, environment_name);
        let cache_key = CacheKey::new(format!("{}:{}", check.name, environment_name));

        if decision == SchedulingDecision::Skip {
            let result = match self.cache.get_allow_expired::<Vec<CheckResult>>(&cache_key).unwrap_or(None) {
                Some(cached) => combine_results(cached),
                None => CheckResult::unknown(
                    "Check is temporarily unschedulable and no prior results are available",
                ),
            };
            return Some(self.build_execution_result(check, &hostname, environment_name, result));
        }

        if let Ok(Some(cached)) = self.cache.get::<Vec<CheckResult>>(&cache_key) {
            metrics::counter!(crate::telemetry::CACHE_HITS_TOTAL, "check" => check.name.clone()).increment(1);
            let combined = combine_results(cached);
            return Some(self.build_execution_result(check, &hostname, environment_name, combined));
        }
        metrics::counter!(crate::telemetry::CACHE_MISSES_TOTAL, "check" => check.name.clone()).increment(1);

        let key = format!("{}:{}", check.name, environment_name);
        let check_name = check.name.clone();
        let ctx = CheckContext { environment_name: environment_name.to_string(), hostname: hostname.clone() };

        // Submitted through the deduplicating executor (keyed by
        // check+environment) rather than awaited directly, so two
        // concurrent `run_check` calls for the same (check, environment)
        // share one in-flight execution. The executor's own `ExecResult`
        // layer only ever carries join/panic failures here; a resolved
        // `DatasourceUnavailable` is a normal (business-level) outcome.
        let owned_check = check.clone();
        self.executor.submit(&key, async move { Ok(owned_check.run_async(&ctx).await) }, false);
        metrics::counter!(
            crate::telemetry::CHECK_SUBMISSIONS_TOTAL,
            "check" => check_name.clone(),
            "environment" => environment_name.to_string(),
        )
        .increment(1);

        let started_at = std::time::Instant::now();
        let outcome: ExecResult<Result<Vec<CheckResult>, DatasourceUnavailable>> =
            match self.executor.result(&key).await {
                Ok(Some(outcome)) => outcome,
                Ok(None) => unreachable!("BlockingCheckExecutor waits for completion"),
                Err(err) => Err(err.to_string()),
            };
        metrics::histogram!(
            crate::telemetry::CHECK_DURATION_SECONDS,
            "check" => check_name.clone(),
            "environment" => environment_name.to_string(),
        )
        .record(started_at.elapsed().as_secs_f64());

        let result = match outcome {
            Ok(Ok(results)) => {
                let _ = self.cache.store(&cache_key, &results, check.cache_ttl);
                combine_results(results)
            }
            Ok(Err(datasource_err)) => {
                metrics::counter!(
                    crate::telemetry::DATASOURCE_UNAVAILABLE_TOTAL,
                    "check" => check_name.clone(),
                    "environment" => environment_name.to_string(),
                )
                .increment(1);
                match self.cache.get_allow_expired::<Vec<CheckResult>>(&cache_key).unwrap_or(None) {
                    Some(cached) => combine_results(append_datasource_exception(cached, &datasource_err)),
                    None => CheckResult::new(
                        CheckState::Unknown,
                        datasource_err.0.clone(),
                        Some(format_datasource_unavailable_details(&datasource_err).into()),
                        Vec::new(),
                    ),
                }
            }
            Err(message) => {
                metrics::counter!(
                    crate::telemetry::CHECK_ERRORS_TOTAL,
                    "check" => check.name.clone(),
                    "environment" => environment_name.to_string(),
                    "outcome" => "error",
                )
                .increment(1);
                CheckResult::crit(message)
            }
        };

        Some(self.build_execution_result(check, &hostname, environment_name, result))
    }

    fn build_execution_result(
        &self,
        check: &Check,
        hostname: &str,
        environment_name: &str,
        result: CheckResult,
    ) -> ExecutionResult {
        ExecutionResult::new(
            hostname,
            check.name.clone(),
            check.service_labels.clone(),
            environment_name,
            result,
            check.check_definition.clone(),
        )
    }

    fn resolve_hostname_for(&self, check: &Check, environment_name: &str) -> String {
        let environments = self.environments.read();
        let environment = environments.get(environment_name);

        let ctx = HostnameContext {
            check_name: check.name.clone(),
            environment_name: environment_name.to_string(),
            environment_metadata: environment
                .as_ref()
                .map(|env| env.metadata.clone())
                .unwrap_or_default(),
        };

        let environment_strategy = environment.as_ref().and_then(|env| env.hostname_strategy.clone());

        resolve_hostname(
            &ctx,
            None,
            check.hostname_strategy.as_ref(),
            environment_strategy.as_ref(),
            self.default_hostname.as_ref(),
            self.fallback_to_default_hostname_generation,
            self.coerce_into_valid_hostname,
        )
        .unwrap_or_else(|err| {
            tracing::warn!(check = %check.name, environment = %environment_name, error = %err, "hostname resolution failed, using environment name");
            environment_name.to_string()
        })
    }

    /// Runs every registered check against every environment it declares,
    /// collecting the full agent output in memory. Intended for the CLI and
    /// tests; `run_checks` (HTTP layer) should stream instead.
    pub async fn run_checks_once(&self) -> Vec<u8> {
        let checks = self.checks.read().clone();
        let mut results = Vec::new();
        for check in checks {
            let target_environments: BTreeSet<String> = check.environments.clone();
            for environment_name in target_environments {
                if let Some(result) = self.run_check(&check, &environment_name).await {
                    results.push(result);
                }
            }
        }
        crate::result::generate_checkmk_output(&results, &self.agent_os, &self.execution_environment)
    }
}

/// Formats a `DatasourceUnavailable` exception the way it's appended to
/// cached result details or used as a synthetic UNKNOWN summary/details,
/// including the exception type name for operators grepping agent output.
fn format_datasource_unavailable_details(err: &DatasourceUnavailable) -> String {
    format!("DatasourceUnavailable: {}", err.0)
}

/// Appends a `DatasourceUnavailable` exception to each cached result's
/// details, for the stale-cache fallback path.
fn append_datasource_exception(cached: Vec<CheckResult>, err: &DatasourceUnavailable) -> Vec<CheckResult> {
    let detail = format_datasource_unavailable_details(err);
    cached
        .into_iter()
        .map(|mut result| {
            result.details = Some(match result.details.take() {
                Some(existing) => format!("{existing}\n{detail}"),
                None => detail.clone(),
            });
            result
        })
        .collect()
}

fn decision_metric_label(decision: SchedulingDecision) -> &'static str {
    match decision {
        SchedulingDecision::Schedule => "schedule",
        SchedulingDecision::Skip => "skip",
        SchedulingDecision::DontSchedule => "dont_schedule",
    }
}

fn combine_results(results: Vec<CheckResult>) -> CheckResult {
    let mut ongoing = crate::result::OngoingCheckResult::new();
    for result in results {
        ongoing.add(result.state, result.message, result.details.map(Into::into), result.metrics);
    }
    ongoing.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryStorage;
    use crate::check::CheckFunction;
    use crate::result::RawCheckOutput;
    use crate::scheduling::{
        MustRunAgainstGivenTargetEnvironment, SchedulingContext as RawSchedulingContext,
        SchedulingStrategy,
    };

    fn app() -> Watchpost {
        Watchpost::new("linux", Cache::new(Arc::new(InMemoryStorage::new())), "prod")
    }

    /// Always skips — no built-in strategy produces `Skip` (they all fail
    /// closed to `DontSchedule`), so exercising the skip branch needs a
    /// custom strategy.
    struct AlwaysSkip;

    impl SchedulingStrategy for AlwaysSkip {
        fn schedule(&self, _ctx: &RawSchedulingContext) -> SchedulingDecision {
            SchedulingDecision::Skip
        }
    }

    #[tokio::test]
    async fn schedule_runs_and_caches_the_check() {
        let app = app();
        app.register_environment(Environment::new("prod"));
        let check = Arc::new(Check::new(
            "ping",
            CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("pong")))),
            BTreeSet::from(["prod".to_string()]),
        ));
        let result = app.run_check(&check, "prod").await.unwrap();
        assert_eq!(result.state, CheckState::Ok);
        assert_eq!(result.summary, "pong");
    }

    #[tokio::test]
    async fn dont_schedule_decision_yields_no_result() {
        let app = app();
        app.register_environment(Environment::new("staging"));
        let check = Arc::new(
            Check::new(
                "prod_only",
                CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("ran")))),
                BTreeSet::from(["prod".to_string()]),
            )
            .with_scheduling_strategies(vec![Arc::new(MustRunAgainstGivenTargetEnvironment {
                target_environments: BTreeSet::from(["prod".to_string()]),
            })]),
        );

        assert!(app.run_check(&check, "staging").await.is_none());
    }

    #[tokio::test]
    async fn skip_decision_without_cache_produces_synthetic_unknown() {
        let app = app();
        app.register_environment(Environment::new("staging"));
        let check = Arc::new(
            Check::new(
                "flaky",
                CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("ran")))),
                BTreeSet::from(["staging".to_string()]),
            )
            .with_scheduling_strategies(vec![Arc::new(AlwaysSkip)]),
        );

        let result = app.run_check(&check, "staging").await.unwrap();
        assert_eq!(result.state, CheckState::Unknown);
        assert_eq!(result.summary, "Check is temporarily unschedulable and no prior results are available");
    }

    #[tokio::test]
    async fn skip_decision_with_cache_reemits_cached_result() {
        let app = app();
        app.register_environment(Environment::new("staging"));
        let check = Arc::new(
            Check::new(
                "flaky",
                CheckFunction::sync(|_ctx| Ok(RawCheckOutput::Single(CheckResult::ok("ran")))),
                BTreeSet::from(["staging".to_string()]),
            )
            .with_scheduling_strategies(vec![Arc::new(AlwaysSkip)]),
        );
        let cache_key = CacheKey::new(format!("{}:{}", check.name, "staging"));
        app.cache.store(&cache_key, &vec![CheckResult::warn("stale but known")], None).unwrap();

        let result = app.run_check(&check, "staging").await.unwrap();
        assert_eq!(result.state, CheckState::Warn);
        assert_eq!(result.summary, "stale but known");
    }

    #[tokio::test]
    async fn datasource_unavailable_without_cache_becomes_unknown() {
        let app = app();
        app.register_environment(Environment::new("prod"));
        let check = Arc::new(Check::new(
            "db_check",
            CheckFunction::sync(|_ctx| {
                Err(crate::datasource::DatasourceUnavailable("connection refused".into()))
            }),
            BTreeSet::from(["prod".to_string()]),
        ));
        let result = app.run_check(&check, "prod").await.unwrap();
        assert_eq!(result.state, CheckState::Unknown);
        assert_eq!(result.summary, "connection refused");
        assert!(result.details.unwrap().contains("DatasourceUnavailable"));
    }

    #[tokio::test]
    async fn datasource_unavailable_with_cache_reuses_cached_result_and_appends_exception() {
        let app = app();
        app.register_environment(Environment::new("prod"));
        let check = Arc::new(Check::new(
            "db_check",
            CheckFunction::sync(|_ctx| {
                Err(crate::datasource::DatasourceUnavailable("connection refused".into()))
            }),
            BTreeSet::from(["prod".to_string()]),
        ));
        let cache_key = CacheKey::new(format!("{}:{}", check.name, "prod"));
        app.cache.store(&cache_key, &vec![CheckResult::ok("last good run")], None).unwrap();

        let result = app.run_check(&check, "prod").await.unwrap();
        assert_eq!(result.state, CheckState::Ok);
        assert_eq!(result.summary, "last good run");
        let details = result.details.unwrap();
        assert!(details.contains("DatasourceUnavailable"));
        assert!(details.contains("connection refused"));
    }

    #[tokio::test]
    async fn second_run_reuses_cached_result() {
        let app = app();
        app.register_environment(Environment::new("prod"));
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter_clone = counter.clone();
        let check = Arc::new(
            Check::new(
                "counted",
                CheckFunction::sync(move |_ctx| {
                    counter_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(RawCheckOutput::Single(CheckResult::ok("ok")))
                }),
                BTreeSet::from(["prod".to_string()]),
            )
            .with_cache_ttl(std::time::Duration::from_secs(60)),
        );

        app.run_check(&check, "prod").await.unwrap();
        app.run_check(&check, "prod").await.unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
