//! Domain types for the fleet runtime
//!
//! Strongly-typed values for tenant, path, and inventory identifiers so that
//! validation happens once, at the boundary, instead of being re-checked by
//! every caller.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque tenant identifier. Never empty; used verbatim in the owner key.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 64),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct TenantKey(String);

impl Default for TenantKey {
    fn default() -> Self {
        Self::try_new("demo").expect("\"demo\" satisfies TenantKey constraints")
    }
}

/// A single, non-empty, percent-decoded path segment.
///
/// Matches `[A-Za-z0-9 _-]{1,32}`; this is the same character class used for
/// both child names and the segments making up an `AgentPath`.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 32, regex = r"^[A-Za-z0-9 _-]{1,32}$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct PathSegment(String);

/// A hierarchical location within a tenant: an ordered list of segments.
///
/// The empty list is root. Canonical string form is `/` for root and
/// `/a/b/c` otherwise; a trailing slash on input is ignored so `/a/b` and
/// `/a/b/` canonicalize to the same path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct AgentPath(Vec<PathSegment>);

/// Error returned when a raw path string fails to canonicalize.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid path segment {segment:?}: {reason}")]
pub struct PathParseError {
    /// The offending raw segment.
    pub segment: String,
    /// Human-readable reason it was rejected.
    pub reason: String,
}

impl AgentPath {
    /// The root path (empty segment list).
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a canonical or raw path string, splitting on `/` and validating
    /// each non-empty segment. A leading/trailing slash is tolerated.
    ///
    /// # Errors
    ///
    /// Returns a [`PathParseError`] if any segment fails validation.
    pub fn parse(raw: &str) -> Result<Self, PathParseError> {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                PathSegment::try_new(s).map_err(|e| PathParseError {
                    segment: s.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }

    /// Append a child segment, returning the resulting path.
    #[must_use]
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// The parent path, or `None` if this path is already root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// The last segment (this path's own name within its parent), or `None`
    /// at root.
    #[must_use]
    pub fn last_segment(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// `true` if this path has no segments.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the segment list.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for AgentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AgentPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical `(tenant, path)` pair: the Router guarantees at most one live
/// Agent per `OwnerKey`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    /// The owning tenant.
    pub tenant: TenantKey,
    /// The owned path.
    pub path: AgentPath,
}

impl OwnerKey {
    /// Build an owner key from a tenant and path.
    #[must_use]
    pub fn new(tenant: TenantKey, path: AgentPath) -> Self {
        Self { tenant, path }
    }

    /// Canonical string form `<tenant>:<canonical-path>`, used as the
    /// registry key and as the storage file stem.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.tenant, self.path)
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// The kind of node an Agent represents within the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// A coordinating, non-leaf node (the default).
    Orchestrator,
    /// A warehouse location.
    Warehouse,
    /// A retail location.
    Retail,
    /// A fulfillment location.
    Fulfillment,
}

impl Default for AgentType {
    fn default() -> Self {
        Self::Orchestrator
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Orchestrator => "orchestrator",
            Self::Warehouse => "warehouse",
            Self::Retail => "retail",
            Self::Fulfillment => "fulfillment",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "orchestrator" => Ok(Self::Orchestrator),
            "warehouse" => Ok(Self::Warehouse),
            "retail" => Ok(Self::Retail),
            "fulfillment" => Ok(Self::Fulfillment),
            other => Err(format!("unknown agent type {other:?}")),
        }
    }
}

/// A stock-keeping unit identifier, `1..=50` characters.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 50),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef)
)]
pub struct Sku(String);

/// A unique message identifier.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a new random message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// The kind of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Addressed to a single child.
    Direct,
    /// Fanned out to all children.
    Broadcast,
    /// System-generated notice (e.g. partial cascade failure).
    System,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::Broadcast => "broadcast",
            Self::System => "system",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "broadcast" => Ok(Self::Broadcast),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message type {other:?}")),
        }
    }
}

/// The operation carried by an `InventoryUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockOperation {
    /// Replace the current stock with `quantity`.
    Set,
    /// Add `quantity` to the current stock.
    Increment,
    /// Subtract `quantity` from the current stock, clamped at zero.
    Decrement,
}

impl fmt::Display for StockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Set => "set",
            Self::Increment => "increment",
            Self::Decrement => "decrement",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StockOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(Self::Set),
            "increment" => Ok(Self::Increment),
            "decrement" => Ok(Self::Decrement),
            other => Err(format!("unknown stock operation {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_canonicalizes_trailing_slash() {
        let a = AgentPath::parse("/a/b").unwrap();
        let b = AgentPath::parse("/a/b/").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "/a/b");
    }

    #[test]
    fn root_displays_as_slash() {
        assert_eq!(AgentPath::root().to_string(), "/");
    }

    #[test]
    fn segment_length_boundary() {
        let ok = "a".repeat(32);
        let too_long = "a".repeat(33);
        assert!(PathSegment::try_new(ok).is_ok());
        assert!(PathSegment::try_new(too_long).is_err());
    }

    #[test]
    fn segment_rejects_dot_and_slash() {
        assert!(PathSegment::try_new("a.b").is_err());
        assert!(PathSegment::try_new("a/b").is_err());
    }

    #[test]
    fn owner_key_canonical_form() {
        let key = OwnerKey::new(
            TenantKey::try_new("acme").unwrap(),
            AgentPath::parse("/wh/a").unwrap(),
        );
        assert_eq!(key.canonical(), "acme:/wh/a");
    }

    #[test]
    fn tenant_key_default_is_demo() {
        assert_eq!(TenantKey::default().to_string(), "demo");
    }
}
