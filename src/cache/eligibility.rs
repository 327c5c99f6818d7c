//! Per-request cacheability decision.

use axum::http::Method;
use percent_encoding::percent_decode_str;

use super::config::CacheConfig;

/// Who is asking. Set as a request extension by the viewer classifier;
/// requests without one are treated as anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Viewer {
    #[default]
    Anonymous,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    Disabled,
    Method,
    QueryString,
    Authenticated,
    BypassPath,
    UndecodablePath,
}

impl BypassReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BypassReason::Disabled => "disabled",
            BypassReason::Method => "method",
            BypassReason::QueryString => "query-string",
            BypassReason::Authenticated => "authenticated",
            BypassReason::BypassPath => "bypass-path",
            BypassReason::UndecodablePath => "undecodable-path",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NotEligible(BypassReason),
}

/// The parts of a request the decision looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestFacts<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub viewer: Viewer,
}

/// Checks run in a fixed order so the reported reason is deterministic.
pub fn evaluate(config: &CacheConfig, facts: &RequestFacts<'_>) -> Eligibility {
    use Eligibility::NotEligible;

    if !config.enabled {
        return NotEligible(BypassReason::Disabled);
    }
    if facts.method != Method::GET && facts.method != Method::HEAD {
        return NotEligible(BypassReason::Method);
    }
    if facts.query.is_some_and(|query| !query.is_empty()) {
        return NotEligible(BypassReason::QueryString);
    }
    if facts.viewer == Viewer::Authenticated {
        return NotEligible(BypassReason::Authenticated);
    }
    if config.is_bypassed(facts.path) {
        return NotEligible(BypassReason::BypassPath);
    }

    Eligibility::Eligible
}

/// Cache key for a request path: the percent-decoded path, so `/tour/silk%2Droad`
/// and `/tour/silk-road` share one entry and match the same invalidation
/// prefixes. `None` when the decoded bytes are not UTF-8.
pub fn normalized_path(raw: &str) -> Option<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(|path| path.into_owned())
}
