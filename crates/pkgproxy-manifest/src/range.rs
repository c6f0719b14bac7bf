//! npm-style version ranges
//!
//! npm writes ranges differently from Cargo: comparators are separated by
//! whitespace, alternatives by `||`, a bare version is an exact pin and
//! `A - B` denotes an inclusive hyphen range. Each `||` alternative is
//! translated into a [`semver::VersionReq`], which shares npm's caret, tilde,
//! partial-version and pre-release semantics once those differences are
//! accounted for.

use crate::error::{ManifestError, Result};
use semver::{Version, VersionReq};
use std::fmt;

/// A parsed npm version range: a union of comparator sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    sets: Vec<VersionReq>,
}

const OPERATORS: [&str; 8] = [">=", "<=", "~>", ">", "<", "=", "~", "^"];

impl VersionRange {
    /// Parse a range string as found in a `dependencies` map
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let spec = trimmed.strip_prefix("workspace:").unwrap_or(trimmed);

        if spec.contains(':') || spec.contains('/') {
            return Err(ManifestError::InvalidRange(
                raw.to_string(),
                "not a semver range".to_string(),
            ));
        }

        let sets = spec
            .split("||")
            .map(|set| parse_set(set).map_err(|e| ManifestError::InvalidRange(raw.to_string(), e)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            sets,
        })
    }

    /// Check whether `version` satisfies any comparator set of the range
    pub fn matches(&self, version: &Version) -> bool {
        self.sets.iter().any(|req| req.matches(version))
    }

    /// The range as originally written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Translated comparator sets, one per `||` alternative
    pub fn comparator_sets(&self) -> &[VersionReq] {
        &self.sets
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl std::str::FromStr for VersionRange {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Translate one whitespace-separated comparator set
fn parse_set(set: &str) -> std::result::Result<VersionReq, String> {
    let tokens = join_detached_operators(set.split_whitespace());
    let mut comparators = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        if tokens.get(i + 1).map(String::as_str) == Some("-") {
            let upper = tokens
                .get(i + 2)
                .ok_or_else(|| "hyphen range without upper bound".to_string())?;
            if let Some(lower) = operand(&tokens[i])? {
                comparators.push(format!(">={}", lower));
            }
            if let Some(upper) = operand(upper)? {
                comparators.push(format!("<={}", upper));
            }
            i += 3;
            continue;
        }

        if let Some(comparator) = comparator(&tokens[i])? {
            comparators.push(comparator);
        }
        i += 1;
    }

    if comparators.is_empty() {
        return Ok(VersionReq::STAR);
    }

    VersionReq::parse(&comparators.join(", ")).map_err(|e| e.to_string())
}

/// `>= 1.2.3` is written with a space in the wild; glue the operator back on
fn join_detached_operators<'a>(tokens: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut joined: Vec<String> = Vec::new();
    let mut pending: Option<&str> = None;

    for token in tokens {
        if OPERATORS.contains(&token) {
            pending = Some(token);
            continue;
        }
        match pending.take() {
            Some(op) => joined.push(format!("{}{}", op, token)),
            None => joined.push(token.to_string()),
        }
    }

    if let Some(op) = pending {
        joined.push(op.to_string());
    }
    joined
}

/// Translate a single comparator token; `None` means "any version"
fn comparator(token: &str) -> std::result::Result<Option<String>, String> {
    let (op, rest) = split_operator(token);
    let op = match op {
        "~>" => "~",
        // A bare version is an exact pin in npm but a caret requirement in Cargo.
        "" => "=",
        other => other,
    };

    Ok(operand(rest)?.map(|version| format!("{}{}", op, version)))
}

fn split_operator(token: &str) -> (&str, &str) {
    for op in OPERATORS {
        if let Some(rest) = token.strip_prefix(op) {
            return (op, rest);
        }
    }
    ("", token)
}

/// Normalize a (possibly partial) version operand
///
/// Wildcard components truncate the version (`1.x` becomes `1`), build
/// metadata is dropped, and an operand that is entirely wildcard yields
/// `None`.
fn operand(raw: &str) -> std::result::Result<Option<String>, String> {
    let raw = raw.trim_start_matches('=');
    let raw = raw.strip_prefix('v').unwrap_or(raw);
    let raw = raw.split('+').next().unwrap_or_default();

    if raw.is_empty() {
        return Err("missing version after operator".to_string());
    }

    let (core, pre) = match raw.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (raw, None),
    };

    let mut parts = Vec::new();
    for part in core.split('.') {
        if matches!(part, "x" | "X" | "*") {
            break;
        }
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid version component '{}'", part));
        }
        parts.push(part);
    }

    if parts.is_empty() {
        return Ok(None);
    }
    if parts.len() > 3 {
        return Err(format!("too many version components in '{}'", raw));
    }

    let mut version = parts.join(".");
    if let Some(pre) = pre {
        if parts.len() != 3 {
            return Err("pre-release requires a full version".to_string());
        }
        version.push('-');
        version.push_str(pre);
    }
    Ok(Some(version))
}
