//! Check result model and Checkmk agent-output serialization.
//!
//! `CheckState`, `Metric`, `CheckResult` and `OngoingCheckResult` describe
//! what a single check invocation found; `ExecutionResult` is the record
//! that actually gets written to the agent output stream.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// The outcome of a check, using Checkmk's local-check wire discriminants.
///
/// These numeric values are part of the wire format and must not change:
/// `0` = OK, `1` = WARN, `2` = CRIT, `3` = UNKNOWN. The JSON representation
/// (`"OK"`/`"WARN"`/`"CRIT"`/`"UNKNOWN"`) is a separate, independently
/// load-bearing part of the wire contract consumed by the Checkmk agent
/// plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum CheckState {
    Ok = 0,
    Warn = 1,
    Crit = 2,
    Unknown = 3,
}

impl CheckState {
    /// Severity used for worst-state-wins aggregation.
    ///
    /// This is deliberately not the wire discriminant: CRIT must win over
    /// UNKNOWN even though UNKNOWN's wire value (3) is numerically larger
    /// than CRIT's (2).
    fn severity_rank(self) -> u8 {
        match self {
            CheckState::Ok => 0,
            CheckState::Warn => 1,
            CheckState::Unknown => 2,
            CheckState::Crit => 3,
        }
    }

    /// Returns the worse of `self` and `other` under the aggregation ranking.
    pub fn worse(self, other: CheckState) -> CheckState {
        if other.severity_rank() > self.severity_rank() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckState::Ok => "OK",
            CheckState::Warn => "WARN",
            CheckState::Crit => "CRIT",
            CheckState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Warning/critical thresholds attached to a metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warn: Option<f64>,
    pub crit: Option<f64>,
}

/// A single performance metric attached to a check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub thresholds: Threshold,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Metric {
    pub fn new(name: impl AsRef<str>, value: f64) -> Self {
        Self {
            name: sanitize_metric_name(name.as_ref()),
            value,
            thresholds: Threshold::default(),
            min: None,
            max: None,
        }
    }

    pub fn with_thresholds(mut self, warn: Option<f64>, crit: Option<f64>) -> Self {
        self.thresholds = Threshold { warn, crit };
        self
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

/// Lowercases, replaces any run of non `[a-z0-9_]` characters with a single
/// `_`, and trims leading/trailing underscores. Idempotent.
fn sanitize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// A value that can be normalized into result `details`: a plain string, a
/// map of string key/value pairs, or an error's display representation.
pub enum Details {
    Text(String),
    Map(BTreeMap<String, String>),
    Error(String),
}

impl From<&str> for Details {
    fn from(value: &str) -> Self {
        Details::Text(value.to_string())
    }
}

impl From<String> for Details {
    fn from(value: String) -> Self {
        Details::Text(value)
    }
}

/// Normalizes raw `details` input into `Option<String>`.
///
/// Maps are rendered as `key: value` lines; whitespace-only strings
/// normalize to `None`. Never returns `Some("")`.
pub fn normalize_details(details: Option<Details>) -> Option<String> {
    let rendered = match details? {
        Details::Text(text) => text,
        Details::Error(text) => text,
        Details::Map(map) => map
            .into_iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

/// The fully-formed outcome of a single check invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub state: CheckState,
    pub message: String,
    pub details: Option<String>,
    pub metrics: Vec<Metric>,
}

impl CheckResult {
    pub fn new(
        state: CheckState,
        message: impl Into<String>,
        details: Option<Details>,
        metrics: Vec<Metric>,
    ) -> Self {
        Self {
            state,
            message: message.into(),
            details: normalize_details(details),
            metrics,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(CheckState::Ok, message, None, Vec::new())
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(CheckState::Warn, message, None, Vec::new())
    }

    pub fn crit(message: impl Into<String>) -> Self {
        Self::new(CheckState::Crit, message, None, Vec::new())
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(CheckState::Unknown, message, None, Vec::new())
    }
}

/// A single contribution to an [`OngoingCheckResult`] before finalization.
struct Partial {
    state: CheckState,
    message: String,
    details: Option<String>,
    metrics: Vec<Metric>,
}

/// Accumulates partial results from a check function into one final
/// [`CheckResult`], worst-state-wins, messages/details joined in order.
#[derive(Default)]
pub struct OngoingCheckResult {
    partials: Vec<Partial>,
}

impl OngoingCheckResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        state: CheckState,
        message: impl Into<String>,
        details: Option<Details>,
        metrics: Vec<Metric>,
    ) -> &mut Self {
        self.partials.push(Partial {
            state,
            message: message.into(),
            details: normalize_details(details),
            metrics,
        });
        self
    }

    pub fn build(self) -> CheckResult {
        if self.partials.is_empty() {
            return CheckResult::unknown("check produced no results");
        }
        let mut state = CheckState::Ok;
        let mut messages = Vec::new();
        let mut details = Vec::new();
        let mut metrics = Vec::new();
        for partial in self.partials {
            state = state.worse(partial.state);
            messages.push(partial.message);
            if let Some(d) = partial.details {
                details.push(d);
            }
            metrics.extend(partial.metrics);
        }
        CheckResult {
            state,
            message: messages.join("; "),
            details: if details.is_empty() {
                None
            } else {
                Some(details.join("\n"))
            },
            metrics,
        }
    }
}

/// Raw output of a check function before normalization: either a single
/// result or a set of them (e.g. produced by a generator-like check).
pub enum RawCheckOutput {
    Single(CheckResult),
    Many(Vec<CheckResult>),
}

/// Normalizes a check function's raw return value.
///
/// An empty result set synthesizes a single UNKNOWN "produced no results"
/// result. `captured_output` (stdout/stderr captured while the function
/// ran), when non-empty, is folded into every result's details exactly
/// once per result, appended after any existing details.
pub fn normalize_check_function_result(
    raw: RawCheckOutput,
    captured_output: Option<&str>,
) -> Vec<CheckResult> {
    let mut results = match raw {
        RawCheckOutput::Single(result) => vec![result],
        RawCheckOutput::Many(results) => results,
    };
    if results.is_empty() {
        results.push(CheckResult::unknown("check produced no results"));
    }
    if let Some(output) = captured_output {
        let trimmed = output.trim();
        if !trimmed.is_empty() {
            for result in &mut results {
                result.details = Some(match result.details.take() {
                    Some(existing) => format!("{existing}\n{trimmed}"),
                    None => trimmed.to_string(),
                });
            }
        }
    }
    results
}

/// Where a check was defined, for operators tracing an agent-output line
/// back to the source that produced it. `None` when a check carries no
/// recorded definition site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub relative_path: String,
    pub line_number: u32,
}

/// A record ready to be serialized into Checkmk agent output.
///
/// `hostname` (the piggyback host) is framing-only: it selects which
/// `<<<<{hostname}>>>>` block a result is written under and is not part of
/// the inner JSON payload itself.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    #[serde(skip)]
    pub hostname: String,
    pub service_name: String,
    pub service_labels: BTreeMap<String, String>,
    #[serde(rename = "environment")]
    pub environment_name: String,
    #[serde(rename = "check_state")]
    pub state: CheckState,
    pub summary: String,
    pub details: Option<String>,
    pub metrics: Vec<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_definition: Option<CheckDefinition>,
}

impl ExecutionResult {
    pub fn new(
        hostname: impl Into<String>,
        service_name: impl Into<String>,
        service_labels: BTreeMap<String, String>,
        environment_name: impl Into<String>,
        result: CheckResult,
        check_definition: Option<CheckDefinition>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            service_name: service_name.into(),
            service_labels,
            environment_name: environment_name.into(),
            state: result.state,
            summary: result.message,
            details: result.details,
            metrics: result.metrics,
            check_definition,
        }
    }
}

/// Renders the Checkmk local-check agent output for a batch of results,
/// grouped by host, appending a synthetic `"Run checks"` OK status line for
/// the default host when the run did not already emit one.
///
/// The exact framing (one block per result):
/// ```text
/// <<<check_mk>>>
/// Version: {pkg_version}
/// AgentOS: {agent_os}
/// <<<<{hostname}>>>>
/// <<<watchpost>>>
/// {base64(json(result))}
/// <<<<>>>>
/// ```
pub fn generate_checkmk_output(
    results: &[ExecutionResult],
    agent_os: &str,
    default_hostname: &str,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"<<<check_mk>>>\n");
    out.extend_from_slice(format!("Version: {}\n", crate::version::PKG_VERSION).as_bytes());
    out.extend_from_slice(format!("AgentOS: {agent_os}\n").as_bytes());

    let has_run_checks_line = results.iter().any(|r| r.service_name == "Run checks");

    let mut grouped: Vec<(&str, Vec<&ExecutionResult>)> = Vec::new();
    for result in results {
        match grouped.iter_mut().find(|(host, _)| *host == result.hostname) {
            Some((_, entries)) => entries.push(result),
            None => grouped.push((result.hostname.as_str(), vec![result])),
        }
    }

    for (hostname, entries) in &grouped {
        out.extend_from_slice(format!("<<<<{hostname}>>>>\n").as_bytes());
        out.extend_from_slice(b"<<<watchpost>>>\n");
        for entry in entries {
            write_result_line(&mut out, entry);
        }
        out.extend_from_slice(b"<<<<>>>>\n");
    }

    if !has_run_checks_line {
        let synthetic = ExecutionResult::new(
            default_hostname,
            "Run checks",
            BTreeMap::new(),
            default_hostname,
            CheckResult::ok("all checks completed"),
            None,
        );
        out.extend_from_slice(format!("<<<<{default_hostname}>>>>\n").as_bytes());
        out.extend_from_slice(b"<<<watchpost>>>\n");
        write_result_line(&mut out, &synthetic);
        out.extend_from_slice(b"<<<<>>>>\n");
    }

    out
}

fn write_result_line(out: &mut Vec<u8>, result: &ExecutionResult) {
    let json = serde_json::to_vec(result).expect("ExecutionResult is always serializable");
    let encoded = base64::engine::general_purpose::STANDARD.encode(json);
    out.extend_from_slice(encoded.as_bytes());
    out.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crit_beats_unknown_in_aggregation() {
        let mut ongoing = OngoingCheckResult::new();
        ongoing.add(CheckState::Unknown, "unknown first", None, vec![]);
        ongoing.add(CheckState::Crit, "then crit", None, vec![]);
        let result = ongoing.build();
        assert_eq!(result.state, CheckState::Crit);
        assert_eq!(result.message, "unknown first; then crit");
    }

    #[test]
    fn warn_does_not_override_crit() {
        let mut ongoing = OngoingCheckResult::new();
        ongoing.add(CheckState::Crit, "bad", None, vec![]);
        ongoing.add(CheckState::Warn, "meh", None, vec![]);
        assert_eq!(ongoing.build().state, CheckState::Crit);
    }

    #[test]
    fn empty_ongoing_result_is_unknown() {
        let result = OngoingCheckResult::new().build();
        assert_eq!(result.state, CheckState::Unknown);
        assert_eq!(result.message, "check produced no results");
    }

    #[test]
    fn normalize_details_whitespace_only_is_none() {
        assert_eq!(normalize_details(Some(Details::Text("   \n\t".into()))), None);
    }

    #[test]
    fn normalize_details_never_empty_string() {
        assert_ne!(normalize_details(Some(Details::Text("x".into()))), Some(String::new()));
    }

    #[test]
    fn metric_name_sanitization_is_idempotent() {
        let once = sanitize_metric_name("Response Time (ms)!!");
        let twice = sanitize_metric_name(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "response_time_ms");
    }

    #[test]
    fn normalize_empty_raw_result_synthesizes_unknown() {
        let results = normalize_check_function_result(RawCheckOutput::Many(vec![]), None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, CheckState::Unknown);
    }

    #[test]
    fn captured_output_is_appended_once_per_result() {
        let results = normalize_check_function_result(
            RawCheckOutput::Many(vec![CheckResult::ok("a"), CheckResult::ok("b")]),
            Some("stray stdout"),
        );
        assert_eq!(results[0].details.as_deref(), Some("stray stdout"));
        assert_eq!(results[1].details.as_deref(), Some("stray stdout"));
    }

    #[test]
    fn checkmk_output_has_trailing_run_checks_block_when_absent() {
        let results = vec![ExecutionResult::new(
            "host-a",
            "disk space",
            BTreeMap::new(),
            "prod",
            CheckResult::ok("fine"),
            None,
        )];
        let rendered = generate_checkmk_output(&results, "linux", "localhost");
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.starts_with("<<<check_mk>>>\n"));
        assert!(text.contains("<<<<host-a>>>>\n"));
        assert!(text.contains("<<<<localhost>>>>\n"));
    }

    #[test]
    fn checkmk_output_does_not_duplicate_run_checks_block() {
        let results = vec![ExecutionResult::new(
            "host-a",
            "Run checks",
            BTreeMap::new(),
            "prod",
            CheckResult::ok("all good"),
            None,
        )];
        let rendered = generate_checkmk_output(&results, "linux", "localhost");
        let text = String::from_utf8(rendered).unwrap();
        assert_eq!(text.matches("<<<<host-a>>>>").count(), 1);
        assert!(!text.contains("<<<<localhost>>>>"));
    }

    #[test]
    fn execution_result_json_matches_checkmk_wire_contract() {
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "platform".to_string());
        let result = ExecutionResult::new(
            "host-a",
            "disk space",
            labels,
            "prod",
            CheckResult::warn("78% used"),
            Some(CheckDefinition { relative_path: "checks/disk.rs".into(), line_number: 12 }),
        );
        let value: serde_json::Value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["check_state"], "WARN");
        assert_eq!(value["environment"], "prod");
        assert_eq!(value["service_name"], "disk space");
        assert_eq!(value["service_labels"]["team"], "platform");
        assert_eq!(value["check_definition"]["relative_path"], "checks/disk.rs");
        assert!(value.get("hostname").is_none());
        assert!(value.get("state").is_none());
    }

    #[test]
    fn execution_result_omits_check_definition_when_absent() {
        let result = ExecutionResult::new(
            "host-a",
            "disk space",
            BTreeMap::new(),
            "prod",
            CheckResult::ok("fine"),
            None,
        );
        let value: serde_json::Value = serde_json::to_value(&result).unwrap();
        assert!(!value.as_object().unwrap().contains_key("check_definition"));
    }
}
