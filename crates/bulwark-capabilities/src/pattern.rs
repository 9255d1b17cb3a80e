//! Capability patterns.
//!
//! A capability is written `class:action:scope`:
//! - `fs:read:/workspace/**` - read anything under `/workspace`
//! - `fs:*:/tmp/scratch/*` - any action on direct children of `/tmp/scratch`
//! - `kv:write:session/notes` - write one key-value scope
//! - `net:connect:api.example.com` - connect to one host
//!
//! The text is parsed once into a closed representation. Matching never
//! looks at the original string again, so there is no way for an odd
//! character sequence to widen what a pattern grants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, CapabilityResult};

/// Maximum number of scope segments in one pattern.
pub const MAX_SEGMENTS: usize = 64;

/// Actions that never mutate the resource they name.
const READ_ONLY_ACTIONS: &[&str] = &["read", "list", "get", "stat", "query", "connect"];

/// The class of resource a capability applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    /// Filesystem paths.
    Fs,
    /// Key-value state scopes.
    Kv,
    /// Network endpoints.
    Net,
    /// Program execution.
    Exec,
    /// Environment variables.
    Env,
    /// Named tools exposed to actions.
    Tool,
}

impl ResourceClass {
    /// All classes, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Fs,
        Self::Kv,
        Self::Net,
        Self::Exec,
        Self::Env,
        Self::Tool,
    ];

    /// The textual prefix used in patterns.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fs => "fs",
            Self::Kv => "kv",
            Self::Net => "net",
            Self::Exec => "exec",
            Self::Env => "env",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|c| c.as_str() == s).ok_or(())
    }
}

/// The action part of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionMatcher {
    /// Exactly this action.
    Literal(String),
    /// Any action (`*`).
    Any,
}

impl ActionMatcher {
    fn covers(&self, required: &Self) -> bool {
        match (self, required) {
            (Self::Any, _) => true,
            (Self::Literal(held), Self::Literal(req)) => held == req,
            (Self::Literal(_), Self::Any) => false,
        }
    }

    /// Whether an action matched by this may change state.
    #[must_use]
    pub fn may_mutate(&self) -> bool {
        match self {
            Self::Any => true,
            Self::Literal(name) => !READ_ONLY_ACTIONS.contains(&name.as_str()),
        }
    }
}

impl fmt::Display for ActionMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(name) => f.write_str(name),
            Self::Any => f.write_str("*"),
        }
    }
}

/// One `/`-separated segment of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Exactly this segment.
    Literal(String),
    /// Exactly one segment of any name (`*`).
    Any,
    /// Zero or more segments (`**`).
    Recursive,
}

impl Segment {
    fn is_wildcard(&self) -> bool {
        !matches!(self, Self::Literal(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::Any => f.write_str("*"),
            Self::Recursive => f.write_str("**"),
        }
    }
}

/// The scope part of a capability: a path of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopePattern {
    absolute: bool,
    segments: Vec<Segment>,
}

impl ScopePattern {
    fn parse(full: &str, raw: &str) -> CapabilityResult<Self> {
        if raw.is_empty() {
            return Err(CapabilityError::pattern(full, "empty scope"));
        }

        let (absolute, rest) = match raw.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        if rest.is_empty() {
            // "/" alone: the root itself.
            return Ok(Self {
                absolute,
                segments: Vec::new(),
            });
        }

        let mut segments = Vec::new();
        for part in rest.split('/') {
            if segments.len() >= MAX_SEGMENTS {
                return Err(CapabilityError::pattern(
                    full,
                    format!("more than {MAX_SEGMENTS} scope segments"),
                ));
            }
            let segment = match part {
                "" => return Err(CapabilityError::pattern(full, "empty scope segment")),
                "." | ".." => {
                    return Err(CapabilityError::pattern(
                        full,
                        "relative path segments are not allowed",
                    ));
                },
                "*" => Segment::Any,
                "**" => Segment::Recursive,
                other if other.contains('*') => {
                    return Err(CapabilityError::pattern(
                        full,
                        format!("wildcards must span a whole segment: '{other}'"),
                    ));
                },
                other => Segment::Literal(other.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self { absolute, segments })
    }

    /// Whether the scope starts at the root (`/`).
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// The parsed segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Literal segments before the first wildcard.
    #[must_use]
    pub fn literal_prefix(&self) -> Vec<&str> {
        self.segments
            .iter()
            .map_while(|s| match s {
                Segment::Literal(name) => Some(name.as_str()),
                Segment::Any | Segment::Recursive => None,
            })
            .collect()
    }

    /// Whether the scope contains no wildcards.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        !self.segments.iter().any(Segment::is_wildcard)
    }

    fn covers(&self, required: &Self) -> bool {
        self.absolute == required.absolute && segments_cover(&self.segments, &required.segments)
    }
}

impl fmt::Display for ScopePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Decide whether every path matched by `required` is matched by `held`.
///
/// `table[i][j]` holds whether `held[i..]` covers `required[j..]`. A held
/// `*` never covers a required `**`, since the latter also matches zero or
/// several segments. The rule is conservative: a pair it rejects may still
/// be contained in rare cases, never the other way round.
fn segments_cover(held: &[Segment], required: &[Segment]) -> bool {
    let h = held.len();
    let r = required.len();
    let width = r.saturating_add(1);
    let at = |i: usize, j: usize| i.saturating_mul(width).saturating_add(j);

    let mut table = vec![false; h.saturating_add(1).saturating_mul(width)];
    table[at(h, r)] = true;

    for i in (0..h).rev() {
        let next_i = i.saturating_add(1);
        for j in (0..=r).rev() {
            let next_j = j.saturating_add(1);
            table[at(i, j)] = match &held[i] {
                Segment::Recursive => {
                    table[at(next_i, j)] || (j < r && table[at(i, next_j)])
                },
                Segment::Any => {
                    j < r
                        && !matches!(required[j], Segment::Recursive)
                        && table[at(next_i, next_j)]
                },
                Segment::Literal(name) => {
                    j < r
                        && matches!(&required[j], Segment::Literal(other) if other == name)
                        && table[at(next_i, next_j)]
                },
            };
        }
    }

    table[at(0, 0)]
}

/// A parsed capability pattern.
///
/// Serializes as its canonical `class:action:scope` text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability {
    class: ResourceClass,
    action: ActionMatcher,
    scope: ScopePattern,
}

impl Capability {
    /// Parse a capability from text.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidPattern`] if a part is empty, the
    /// class is unknown, the scope contains `.`/`..` or partial wildcards,
    /// the text contains control characters or whitespace, or the scope
    /// has more than [`MAX_SEGMENTS`] segments.
    pub fn parse(text: &str) -> CapabilityResult<Self> {
        if text
            .chars()
            .any(|c| c.is_control() || c.is_whitespace())
        {
            return Err(CapabilityError::pattern(
                text,
                "control characters and whitespace are not allowed",
            ));
        }

        let mut parts = text.splitn(3, ':');
        let (Some(class), Some(action), Some(scope)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CapabilityError::pattern(
                text,
                "expected class:action:scope",
            ));
        };

        let class = class
            .parse::<ResourceClass>()
            .map_err(|()| CapabilityError::pattern(text, format!("unknown class '{class}'")))?;

        let action = match action {
            "" => return Err(CapabilityError::pattern(text, "empty action")),
            "*" => ActionMatcher::Any,
            name if name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                ActionMatcher::Literal(name.to_string())
            },
            name => {
                return Err(CapabilityError::pattern(
                    text,
                    format!("invalid action '{name}'"),
                ));
            },
        };

        let scope = ScopePattern::parse(text, scope)?;

        Ok(Self {
            class,
            action,
            scope,
        })
    }

    /// The resource class.
    #[must_use]
    pub fn class(&self) -> ResourceClass {
        self.class
    }

    /// The action matcher.
    #[must_use]
    pub fn action(&self) -> &ActionMatcher {
        &self.action
    }

    /// The scope pattern.
    #[must_use]
    pub fn scope(&self) -> &ScopePattern {
        &self.scope
    }

    /// Whether this pattern names exactly one resource and action.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        matches!(self.action, ActionMatcher::Literal(_)) && self.scope.is_concrete()
    }

    /// Whether holding `self` implies holding `required`: every
    /// (action, resource) pair matched by `required` is also matched by
    /// `self`. Matching is case-sensitive and purely structural.
    #[must_use]
    pub fn covers(&self, required: &Self) -> bool {
        self.class == required.class
            && self.action.covers(&required.action)
            && self.scope.covers(&required.scope)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.class, self.action, self.scope)
    }
}

impl FromStr for Capability {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Capability {
    type Error = CapabilityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.to_string()
    }
}
