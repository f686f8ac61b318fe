//! Scheduling strategies decide whether a check should run for a given
//! environment, independent of whether its datasources can be resolved.

use std::collections::BTreeSet;

/// The outcome of evaluating a check's scheduling strategies for one
/// environment.
///
/// Numeric values matter: aggregation picks the numerically-largest (most
/// restrictive) decision across all strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SchedulingDecision {
    Schedule = 0,
    Skip = 1,
    DontSchedule = 2,
}

/// Aggregates a set of decisions by taking the most restrictive one.
/// An empty input schedules by default.
pub fn aggregate(decisions: &[SchedulingDecision]) -> SchedulingDecision {
    decisions
        .iter()
        .copied()
        .max()
        .unwrap_or(SchedulingDecision::Schedule)
}

#[derive(Debug, thiserror::Error)]
#[error("invalid check configuration: {0}")]
pub struct InvalidCheckConfiguration(pub String);

/// Context a [`SchedulingStrategy`] evaluates against.
#[derive(Debug, Clone, Default)]
pub struct SchedulingContext {
    pub check_environments: BTreeSet<String>,
    pub execution_environment: String,
    pub target_environment: String,
}

/// A pluggable rule contributing to a check's scheduling decision.
///
/// Implementations also expose the execution/target environment sets they
/// constrain, so [`DetectImpossibleCombination`] can reason about the
/// aggregate of all strategies attached to a check.
pub trait SchedulingStrategy: Send + Sync {
    fn schedule(&self, ctx: &SchedulingContext) -> SchedulingDecision;

    /// Environments this strategy requires execution to happen from, if any.
    fn execution_environments(&self) -> Option<BTreeSet<String>> {
        None
    }

    /// Environments this strategy requires as the check's target, if any.
    fn target_environments(&self) -> Option<BTreeSet<String>> {
        None
    }

    /// Whether this strategy requires execution and target environment to
    /// be the same environment.
    fn requires_same_environment(&self) -> bool {
        false
    }
}

/// Only schedules when the current execution environment is one of
/// `execution_environments` — e.g. "this datasource is only reachable from
/// the prod cluster's own pods". Fails closed: a mismatch means the check
/// must never run here, not merely be skipped this round.
pub struct MustRunInGivenExecutionEnvironment {
    pub execution_environments: BTreeSet<String>,
}

impl SchedulingStrategy for MustRunInGivenExecutionEnvironment {
    fn schedule(&self, ctx: &SchedulingContext) -> SchedulingDecision {
        if self.execution_environments.contains(&ctx.execution_environment) {
            SchedulingDecision::Schedule
        } else {
            SchedulingDecision::DontSchedule
        }
    }

    fn execution_environments(&self) -> Option<BTreeSet<String>> {
        Some(self.execution_environments.clone())
    }
}

/// Only schedules when the check is being executed from the same
/// environment it targets (e.g. an in-cluster probe). Parameterless: it
/// compares the context's own execution/target environments rather than
/// declaring a set, so it contributes no environment set of its own to
/// [`DetectImpossibleCombination`] beyond the same-environment requirement.
pub struct MustRunInTargetEnvironment;

impl SchedulingStrategy for MustRunInTargetEnvironment {
    fn schedule(&self, ctx: &SchedulingContext) -> SchedulingDecision {
        if ctx.execution_environment == ctx.target_environment {
            SchedulingDecision::Schedule
        } else {
            SchedulingDecision::DontSchedule
        }
    }

    fn requires_same_environment(&self) -> bool {
        true
    }
}

/// Only schedules when the target environment is one of
/// `target_environments`.
pub struct MustRunAgainstGivenTargetEnvironment {
    pub target_environments: BTreeSet<String>,
}

impl SchedulingStrategy for MustRunAgainstGivenTargetEnvironment {
    fn schedule(&self, ctx: &SchedulingContext) -> SchedulingDecision {
        if self.target_environments.contains(&ctx.target_environment) {
            SchedulingDecision::Schedule
        } else {
            SchedulingDecision::DontSchedule
        }
    }

    fn target_environments(&self) -> Option<BTreeSet<String>> {
        Some(self.target_environments.clone())
    }
}

/// A validator strategy that inspects the other resolved strategies for
/// logically-impossible combinations. Always present on every check (the
/// application wires it in by default) and never itself causes a schedule,
/// only a `DontSchedule` veto or a pass-through `Schedule`.
pub struct DetectImpossibleCombination;

impl DetectImpossibleCombination {
    pub fn evaluate(
        &self,
        ctx: &SchedulingContext,
        others: &[&dyn SchedulingStrategy],
    ) -> Result<SchedulingDecision, InvalidCheckConfiguration> {
        let execution_sets: Vec<BTreeSet<String>> =
            others.iter().filter_map(|s| s.execution_environments()).collect();
        let target_sets: Vec<BTreeSet<String>> =
            others.iter().filter_map(|s| s.target_environments()).collect();
        let requires_same = others.iter().any(|s| s.requires_same_environment());

        if execution_sets.len() > 1 {
            let intersection = intersect_all(&execution_sets);
            if intersection.is_empty() {
                return Err(InvalidCheckConfiguration(
                    "execution environment constraints have empty intersection".to_string(),
                ));
            }
        }

        if !target_sets.is_empty() {
            let intersection = intersect_all(&target_sets);
            if !intersection.is_superset(&ctx.check_environments) {
                return Err(InvalidCheckConfiguration(
                    "target environment constraints do not cover all declared check environments"
                        .to_string(),
                ));
            }
        }

        if requires_same && !execution_sets.is_empty() && !target_sets.is_empty() {
            let execution_intersection = intersect_all(&execution_sets);
            let target_intersection = intersect_all(&target_sets);
            if execution_intersection.is_disjoint(&target_intersection) {
                return Err(InvalidCheckConfiguration(
                    "same-environment constraint conflicts with disjoint execution/target environments"
                        .to_string(),
                ));
            }
        }

        Ok(SchedulingDecision::Schedule)
    }
}

impl SchedulingStrategy for DetectImpossibleCombination {
    fn schedule(&self, _ctx: &SchedulingContext) -> SchedulingDecision {
        // The real validation needs sibling strategies and is done via
        // `evaluate`, invoked explicitly by the application core. As a bare
        // `SchedulingStrategy` this strategy always defers.
        SchedulingDecision::Schedule
    }
}

fn intersect_all(sets: &[BTreeSet<String>]) -> BTreeSet<String> {
    let mut iter = sets.iter();
    let Some(first) = iter.next() else {
        return BTreeSet::new();
    };
    let mut acc = first.clone();
    for set in iter {
        acc = acc.intersection(set).cloned().collect();
    }
    acc
}
