//! Isolation-aware route gate.
//!
//! A static table mapping path patterns to the response headers that opt a
//! page into cross-origin isolation. The same table answers
//! [`RouteGate::is_isolated_path`] for the UI layer, so the header-emitting
//! middleware and the ad/feature decisions cannot disagree.
//!
//! # Pattern syntax
//!
//! - `*` matches any run of characters inside a single path segment
//! - `**` as a whole segment matches zero or more segments
//! - everything else is literal; leading/trailing slashes are ignored
//!
//! ```text
//! /tools/image-resizer        exact tool page
//! /*/tools/image-resizer      the same page under a locale prefix
//! /ffmpeg/**                  engine assets
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::IsolationConfig;
use crate::error::ConfigError;

/// `Cross-Origin-Opener-Policy` header name.
pub const COOP_HEADER: &str = "cross-origin-opener-policy";
/// `Cross-Origin-Embedder-Policy` header name.
pub const COEP_HEADER: &str = "cross-origin-embedder-policy";
/// `Cross-Origin-Resource-Policy` header name.
pub const CORP_HEADER: &str = "cross-origin-resource-policy";

/// Tool slugs whose pages run the media engine and therefore need isolation.
pub const MEDIA_TOOL_SLUGS: &[&str] = &[
    "image-resizer",
    "image-converter",
    "image-compressor",
    "video-to-gif",
    "video-compressor",
    "audio-converter",
];

/// Path prefix under which the engine artifacts are served.
pub const ENGINE_ASSET_PREFIX: &str = "/ffmpeg";

const ISOLATED_HEADERS: &[(&str, &str)] = &[
    (COOP_HEADER, "same-origin"),
    (COEP_HEADER, "require-corp"),
];

const ENGINE_ASSET_HEADERS: &[(&str, &str)] = &[
    (COEP_HEADER, "require-corp"),
    (CORP_HEADER, "cross-origin"),
];

/// The header set a rule attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderPolicy {
    /// Opener + embedder policy: the page becomes cross-origin isolated.
    CrossOriginIsolated,
    /// Embedder + resource policy for the engine's own static assets.
    EngineAssets,
}

impl HeaderPolicy {
    /// Headers emitted for this policy. Both headers are always applied together.
    pub fn headers(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::CrossOriginIsolated => ISOLATED_HEADERS,
            Self::EngineAssets => ENGINE_ASSET_HEADERS,
        }
    }
}

/// A `{ pattern, headers }` pair of the gate table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationRule {
    pattern: String,
    segments: Vec<String>,
    policy: HeaderPolicy,
}

impl IsolationRule {
    /// Compile a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is empty or does not start with `/`.
    pub fn new(pattern: &str, policy: HeaderPolicy) -> Result<Self, ConfigError> {
        if pattern.trim().is_empty() {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern is empty",
            });
        }
        if !pattern.starts_with('/') {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "must start with '/'",
            });
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments: split_segments(pattern).map(str::to_string).collect(),
            policy,
        })
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The header policy applied on match.
    pub fn policy(&self) -> HeaderPolicy {
        self.policy
    }

    /// Check whether a request path matches this rule.
    pub fn matches(&self, path: &str) -> bool {
        let path: Vec<&str> = split_segments(strip_query(path)).collect();
        let pattern: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        match_segments(&pattern, &path)
    }
}

/// The route gate table.
#[derive(Debug, Clone)]
pub struct RouteGate {
    rules: Vec<IsolationRule>,
}

impl RouteGate {
    /// Build a gate from pre-compiled rules. The first matching rule wins.
    pub fn new(rules: Vec<IsolationRule>) -> Self {
        Self { rules }
    }

    /// Build the gate from configuration.
    ///
    /// Isolated page patterns are checked before engine asset patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern is invalid.
    pub fn from_config(config: &IsolationConfig) -> Result<Self, ConfigError> {
        let isolated = config
            .isolated_paths
            .iter()
            .map(|p| IsolationRule::new(p, HeaderPolicy::CrossOriginIsolated));
        let assets = config
            .engine_asset_paths
            .iter()
            .map(|p| IsolationRule::new(p, HeaderPolicy::EngineAssets));

        let rules = isolated.chain(assets).collect::<Result<Vec<_>, _>>()?;
        debug!(rules = rules.len(), "Route gate table compiled");
        Ok(Self::new(rules))
    }

    /// All rules, in match order.
    pub fn rules(&self) -> &[IsolationRule] {
        &self.rules
    }

    /// The first rule matching `path`.
    pub fn rule_for(&self, path: &str) -> Option<&IsolationRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Headers to attach to the response for `path`. Empty for ungated routes.
    pub fn headers_for(&self, path: &str) -> &'static [(&'static str, &'static str)] {
        match self.rule_for(path) {
            Some(rule) => rule.policy.headers(),
            None => &[],
        }
    }

    /// Whether the page at `path` is served cross-origin isolated.
    ///
    /// Derived from the same lookup as [`Self::headers_for`].
    pub fn is_isolated_path(&self, path: &str) -> bool {
        self.rule_for(path)
            .is_some_and(|rule| rule.policy == HeaderPolicy::CrossOriginIsolated)
    }
}

impl Default for RouteGate {
    fn default() -> Self {
        // The default table only contains literal patterns known to be valid.
        Self::from_config(&IsolationConfig::default()).unwrap_or_else(|_| Self::new(Vec::new()))
    }
}

/// Default isolated page patterns: every media tool, with and without locale prefix.
pub fn default_isolated_paths() -> Vec<String> {
    MEDIA_TOOL_SLUGS
        .iter()
        .flat_map(|slug| [format!("/tools/{slug}"), format!("/*/tools/{slug}")])
        .collect()
}

/// Default engine asset patterns.
pub fn default_engine_asset_paths() -> Vec<String> {
    vec![format!("{ENGINE_ASSET_PREFIX}/**")]
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((segment, rest)) => match path.split_first() {
            Some((head, tail)) => match_wildcard(segment, head) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Match a single segment where `*` stands for any run of characters.
fn match_wildcard(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}
