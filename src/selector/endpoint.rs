use std::{
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

/// Port value used by primaries whose real port is negotiated elsewhere
/// (e.g. behind a security layer). Such endpoints are ambiguous on their own.
pub const EPHEMERAL_PORT: u16 = 0;

/// Canonical identity of a logical target.
///
/// Either an explicit id, or the resolved address list of the target rendered
/// as `kind://host:port` entries joined by `,` in list order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetIdentity(String);

impl TargetIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the identity from the target's full address list.
    pub fn from_endpoints(endpoints: &[Endpoint]) -> Self {
        let id = endpoints
            .iter()
            .map(Endpoint::contact_string)
            .collect::<Vec<_>>()
            .join(",");
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One reachable transport address of a target.
///
/// Two endpoints are the same contact when kind, host and port match. When the
/// port is [`EPHEMERAL_PORT`] that triple says nothing about which target it
/// belongs to, so the owning identities must match as well.
#[derive(Clone, Debug)]
pub struct Endpoint {
    kind: String,
    host: String,
    port: u16,
    owner: TargetIdentity,
}

impl Endpoint {
    pub fn new(
        kind: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        owner: TargetIdentity,
    ) -> Self {
        Self {
            kind: kind.into(),
            host: host.into(),
            port,
            owner,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn owner(&self) -> &TargetIdentity {
        &self.owner
    }

    pub fn is_ephemeral(&self) -> bool {
        self.port == EPHEMERAL_PORT
    }

    /// Same endpoint re-owned by another target.
    pub fn with_owner(&self, owner: TargetIdentity) -> Self {
        Self {
            owner,
            ..self.clone()
        }
    }

    pub fn contact_string(&self) -> String {
        format!("{}://{}:{}", self.kind, self.host, self.port)
    }

    /// Value equality used to find an endpoint inside a freshly resolved list.
    pub fn same_contact(&self, other: &Endpoint) -> bool {
        if self.kind != other.kind || self.host != other.host || self.port != other.port {
            return false;
        }
        !self.is_ephemeral() || self.owner == other.owner
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.same_contact(other)
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.host.hash(state);
        self.port.hash(state);
        if self.is_ephemeral() {
            self.owner.hash(state);
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.kind, self.host, self.port)
    }
}

/// Reference to a remote object: who it is, where it primarily lives and which
/// servant it names there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    identity: TargetIdentity,
    primary: Endpoint,
    object_key: String,
}

impl ObjectRef {
    pub fn new(
        identity: TargetIdentity,
        object_key: impl Into<String>,
        kind: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        let primary = Endpoint::new(kind, host, port, identity.clone());
        Self {
            identity,
            primary,
            object_key: object_key.into(),
        }
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.identity
    }

    pub fn primary(&self) -> &Endpoint {
        &self.primary
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.identity, self.object_key, self.primary)
    }
}

/// Key of the sticky map.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StickyKey {
    Endpoint(Endpoint),
    Target(TargetIdentity),
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn endpoint(port: u16, owner: &str) -> Endpoint {
        Endpoint::new("iiop", "10.0.0.1", port, TargetIdentity::new(owner))
    }

    #[test]
    fn test_equality_ignores_owner_for_concrete_ports() {
        assert_eq!(endpoint(3700, "a"), endpoint(3700, "b"));
        assert_ne!(endpoint(3700, "a"), endpoint(3701, "a"));
        assert_ne!(
            endpoint(3700, "a"),
            Endpoint::new("ssl", "10.0.0.1", 3700, TargetIdentity::new("a"))
        );
    }

    #[test]
    fn test_equality_uses_owner_for_ephemeral_ports() {
        assert_eq!(endpoint(0, "a"), endpoint(0, "a"));
        assert_ne!(endpoint(0, "a"), endpoint(0, "b"));

        let set: HashSet<Endpoint> = [endpoint(0, "a"), endpoint(0, "b"), endpoint(0, "a")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_target_identity_from_endpoints() {
        let owner = TargetIdentity::new("ignored");
        let endpoints = vec![
            Endpoint::new("clear", "h1", 3700, owner.clone()),
            Endpoint::new("ssl", "h2", 3820, owner),
        ];
        let identity = TargetIdentity::from_endpoints(&endpoints);
        assert_eq!(identity.as_str(), "clear://h1:3700,ssl://h2:3820");
    }

    #[test]
    fn test_object_ref_primary_is_owned_by_target() {
        let target = ObjectRef::new("cluster-a".into(), "Hello", "iiop", "h1", 0);
        assert_eq!(target.primary().owner(), target.identity());
        assert!(target.primary().is_ephemeral());
        assert_eq!(target.to_string(), "cluster-a#Hello@iiop://h1:0");
    }
}
