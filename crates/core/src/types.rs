//! Identity types for replicated domains and replicas
//!
//! - [`DomainId`]: base identifier of a replicated naming context
//! - [`ReplicaId`]: identifier of one server replicating a domain

use serde::{Deserialize, Serialize};

/// Identifier of a replicated naming context ("domain")
///
/// A domain is identified by its base name, e.g. `dc=example,dc=com`.
/// Domains are ordered lexicographically by that name so that every
/// ordered collection keyed by domain iterates deterministically.
///
/// # Examples
///
/// ```
/// use changelog_core::DomainId;
///
/// let domain = DomainId::new("dc=example,dc=com");
/// assert_eq!(domain.as_str(), "dc=example,dc=com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(String);

impl DomainId {
    /// Create a domain identifier from its base name
    pub fn new(base: impl Into<String>) -> Self {
        DomainId(base.into())
    }

    /// Base name of the domain
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DomainId {
    fn from(base: &str) -> Self {
        DomainId::new(base)
    }
}

impl From<String> for DomainId {
    fn from(base: String) -> Self {
        DomainId(base)
    }
}

/// Identifier of a replica participating in the replication of a domain
///
/// Replica ids are 16 bits wide, matching the width they occupy inside a
/// [`Csn`](crate::Csn).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ReplicaId(pub u16);

impl ReplicaId {
    /// Raw numeric value
    #[inline]
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ReplicaId {
    fn from(id: u16) -> Self {
        ReplicaId(id)
    }
}
