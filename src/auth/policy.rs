//! Allow-list authorization.
//!
//! # Rules
//!
//! | Lists configured | Outcome |
//! |------------------|---------|
//! | none | every verified identity is allowed (default-open) |
//! | any | allowed iff username ∈ `allowed_users` **or** a group ∈ `allowed_groups` **or** a role ∈ `allowed_roles` |
//!
//! The three criteria are OR-ed, not AND-ed: listing a role does not narrow
//! who a listed user is. Matching is exact and case-sensitive.
//!
//! Evaluated after token verification and before a session exists.

use std::collections::BTreeSet;

use tracing::debug;

use super::Identity;

/// The configured allow-lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationPolicy {
    allowed_users: BTreeSet<String>,
    allowed_groups: BTreeSet<String>,
    allowed_roles: BTreeSet<String>,
}

impl AuthorizationPolicy {
    /// Build from the three allow-lists.
    #[must_use]
    pub fn new(
        allowed_users: impl IntoIterator<Item = String>,
        allowed_groups: impl IntoIterator<Item = String>,
        allowed_roles: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            allowed_users: allowed_users.into_iter().collect(),
            allowed_groups: allowed_groups.into_iter().collect(),
            allowed_roles: allowed_roles.into_iter().collect(),
        }
    }

    /// `true` when no list is configured.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.allowed_users.is_empty() && self.allowed_groups.is_empty() && self.allowed_roles.is_empty()
    }

    /// Decide whether `identity` may use the dashboard.
    #[must_use]
    pub fn authorize(&self, identity: &Identity) -> bool {
        let allowed = authorize(identity, &self.allowed_users, &self.allowed_groups, &self.allowed_roles);
        debug!(username = %identity.username, allowed, "Allow-list evaluated");
        allowed
    }
}

/// Free-standing form of [`AuthorizationPolicy::authorize`].
#[must_use]
pub fn authorize(
    identity: &Identity,
    allowed_users: &BTreeSet<String>,
    allowed_groups: &BTreeSet<String>,
    allowed_roles: &BTreeSet<String>,
) -> bool {
    if allowed_users.is_empty() && allowed_groups.is_empty() && allowed_roles.is_empty() {
        return true;
    }

    allowed_users.contains(&identity.username)
        || !identity.groups.is_disjoint(allowed_groups)
        || !identity.roles.is_disjoint(allowed_roles)
}
