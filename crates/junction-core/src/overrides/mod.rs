//! Declarative method overrides.
//!
//! An override rule matches an incoming request by exact method name plus
//! structural matchers on `params`, and synthesizes a response from a literal
//! template without contacting any backend. Rules are consulted in config
//! order before routing; the first match wins. Matching is pure: the same
//! `(method, params)` pair always produces the same outcome.
//!
//! # Matcher paths
//!
//! A path addresses a location inside `params`, which may be a positional
//! array or a named object:
//!
//! - `params[0].to` — first positional parameter, key `to` (the `eth_call`
//!   call object hook)
//! - `params.filter.address` — named parameter, nested key
//!
//! The leading `params` is optional; `[0].to` and `params[0].to` are the same
//! path. Paths are parsed at config load, so a malformed path is a startup
//! error rather than a silent never-matching rule.
//!
//! # Hex comparison
//!
//! When both the matcher value and the addressed value are `0x`-prefixed
//! strings, comparison is case-insensitive (`0xAbCd…` equals `0xabcd…`),
//! which covers addresses and quantities such as `eth_call`'s `to` and
//! `value`. Everything else compares as exact JSON values. Both sides are
//! compared with `eq_ignore_ascii_case` rather than lowercased copies, so the
//! hot path allocates nothing.

use crate::{config::OverrideRuleConfig, types::RpcRequest};
use serde_json::Value;
use thiserror::Error;

/// Error parsing a matcher path.
#[derive(Debug, Error)]
pub enum PathParseError {
    #[error("empty path")]
    Empty,
    #[error("empty key segment at byte {0}")]
    EmptyKey(usize),
    #[error("invalid index segment: {0}")]
    BadIndex(String),
    #[error("unterminated '[' at byte {0}")]
    UnterminatedIndex(usize),
}

/// One step into the `params` structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Positional array element.
    Index(usize),
    /// Object key.
    Key(String),
}

/// A parsed, validated matcher path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherPath {
    segments: Vec<PathSegment>,
}

impl MatcherPath {
    /// Parses a path like `params[0].to` or `params.filter.address`.
    ///
    /// # Errors
    ///
    /// Returns [`PathParseError`] for empty paths, empty key segments,
    /// non-numeric indices, or an unterminated `[`.
    pub fn parse(raw: &str) -> Result<Self, PathParseError> {
        let rest = raw.strip_prefix("params").unwrap_or(raw);
        let rest = rest.strip_prefix('.').unwrap_or(rest);
        if rest.is_empty() {
            return Err(PathParseError::Empty);
        }

        let mut segments = Vec::new();
        let bytes = rest.as_bytes();
        let mut pos = 0;

        while pos < bytes.len() {
            if bytes[pos] == b'[' {
                let close = rest[pos..]
                    .find(']')
                    .map(|off| pos + off)
                    .ok_or(PathParseError::UnterminatedIndex(pos))?;
                let digits = &rest[pos + 1..close];
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| PathParseError::BadIndex(digits.to_string()))?;
                segments.push(PathSegment::Index(index));
                pos = close + 1;
                if pos < bytes.len() && bytes[pos] == b'.' {
                    pos += 1;
                }
            } else {
                let end = rest[pos..]
                    .find(['.', '['])
                    .map_or(bytes.len(), |off| pos + off);
                if end == pos {
                    return Err(PathParseError::EmptyKey(pos));
                }
                segments.push(PathSegment::Key(rest[pos..end].to_string()));
                pos = end;
                if pos < bytes.len() && bytes[pos] == b'.' {
                    pos += 1;
                }
            }
        }

        if segments.is_empty() {
            return Err(PathParseError::Empty);
        }
        Ok(Self { segments })
    }

    /// Resolves this path inside a `params` value. An absent step yields
    /// `None` — an absent path never matches.
    #[must_use]
    pub fn resolve<'a>(&self, params: &'a Value) -> Option<&'a Value> {
        let mut current = params;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Index(i) => current.as_array()?.get(*i)?,
                PathSegment::Key(k) => current.as_object()?.get(k)?,
            };
        }
        Some(current)
    }
}

/// A compiled override rule: exact method, matchers, response template.
#[derive(Debug, Clone)]
pub struct OverrideRule {
    method: String,
    matchers: Vec<(MatcherPath, Value)>,
    response: Value,
}

impl OverrideRule {
    /// Returns `true` when the rule matches the request.
    fn matches(&self, request: &RpcRequest) -> bool {
        if request.method != self.method {
            return false;
        }
        let params = request.params.as_ref().unwrap_or(&Value::Null);
        self.matchers.iter().all(|(path, expected)| {
            path.resolve(params).is_some_and(|actual| values_equal(expected, actual))
        })
    }
}

/// Case-insensitive comparison for `0x`-prefixed strings, exact otherwise.
fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::String(e), Value::String(a)) if is_hex_string(e) && is_hex_string(a) => {
            e.eq_ignore_ascii_case(a)
        }
        _ => expected == actual,
    }
}

fn is_hex_string(s: &str) -> bool {
    s.len() >= 2 && s.as_bytes()[0] == b'0' && (s.as_bytes()[1] | 0x20) == b'x'
}

/// Ordered set of override rules, immutable after startup.
#[derive(Debug, Default)]
pub struct OverrideEngine {
    rules: Vec<OverrideRule>,
}

impl OverrideEngine {
    /// Compiles rules from config, preserving document order.
    ///
    /// # Errors
    ///
    /// Returns [`PathParseError`] for a malformed matcher path. Config
    /// validation runs the same parse, so reaching this from a validated
    /// [`crate::config::AppConfig`] is impossible.
    pub fn from_config(rules: &[OverrideRuleConfig]) -> Result<Self, PathParseError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                let matchers = rule
                    .matchers
                    .iter()
                    .map(|(path, value)| Ok((MatcherPath::parse(path)?, value.clone())))
                    .collect::<Result<Vec<_>, PathParseError>>()?;
                Ok(OverrideRule {
                    method: rule.method.clone(),
                    matchers,
                    response: rule.response.clone(),
                })
            })
            .collect::<Result<Vec<_>, PathParseError>>()?;
        Ok(Self { rules: compiled })
    }

    /// Returns the response template of the first matching rule, if any.
    ///
    /// No backend is contacted and no backend counters are charged on a hit;
    /// the caller wraps the template into a response echoing the request id.
    #[must_use]
    pub fn match_request(&self, request: &RpcRequest) -> Option<&Value> {
        self.rules.iter().find(|rule| rule.matches(request)).map(|rule| &rule.response)
    }

    /// Number of loaded rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` when no rules are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
