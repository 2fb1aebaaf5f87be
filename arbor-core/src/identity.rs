//! Identity types for tenants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant identifier.
///
/// A thin newtype over [`Uuid`] so tenant ids cannot be confused with other
/// UUID-keyed entities at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Wrap an existing UUID.
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// The nil tenant id.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<TenantId> for Uuid {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tenant_id_parse_and_display() {
        let raw = "215927cd-95b9-4e21-b29f-ef9bdaff9cbf";
        let id: TenantId = raw.parse().expect("valid uuid should parse");
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn test_tenant_id_rejects_garbage() {
        assert!("not-a-tenant".parse::<TenantId>().is_err());
    }

    #[test]
    fn test_tenant_id_serializes_as_plain_string() {
        let id = TenantId::nil();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }

    proptest! {
        /// Property: ordering of tenant ids follows the wrapped UUID.
        #[test]
        fn prop_ordering_matches_uuid(a in any::<u128>(), b in any::<u128>()) {
            let (ua, ub) = (Uuid::from_u128(a), Uuid::from_u128(b));
            prop_assert_eq!(TenantId::from(ua).cmp(&TenantId::from(ub)), ua.cmp(&ub));
        }
    }
}
