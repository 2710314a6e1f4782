//! Who may see what.
//!
//! [`Audience::admits`] is the single visibility predicate. The broadcast
//! router uses it to pick event recipients and the store uses it to filter
//! listings, so a viewer is told about exactly the records it can list.

use crate::{ScopeId, VersionedRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Role of a reader or subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Portal administrators. Sees everything addressed to admins.
    Admin,
    /// A single agency tenant.
    Agency,
    /// An individual user account within an agency.
    User,
}

impl Role {
    /// Broad roles ignore target-id restrictions.
    pub fn is_broad(self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agency => "agency",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`Role`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "agency" => Ok(Role::Agency),
            "user" => Ok(Role::User),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A role plus the tenant it acts for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<ScopeId>,
}

impl Viewer {
    /// An administrator, not tied to any tenant.
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            scope_id: None,
        }
    }

    /// An agency acting for itself.
    pub fn agency(scope_id: impl Into<ScopeId>) -> Self {
        Self {
            role: Role::Agency,
            scope_id: Some(scope_id.into()),
        }
    }

    pub fn new(role: Role, scope_id: Option<ScopeId>) -> Self {
        Self { role, scope_id }
    }
}

/// The set of viewers an event or record is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    pub roles: BTreeSet<Role>,
    /// Further restricts narrow roles to these tenants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ids: Option<BTreeSet<ScopeId>>,
}

impl Audience {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
            target_ids: None,
        }
    }

    /// Restrict narrow roles to the given tenants.
    pub fn targeting(mut self, ids: impl IntoIterator<Item = impl Into<ScopeId>>) -> Self {
        self.target_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Whether `viewer` may see something addressed to this audience.
    pub fn admits(&self, viewer: &Viewer) -> bool {
        if !self.roles.contains(&viewer.role) {
            return false;
        }
        if viewer.role.is_broad() {
            return true;
        }
        match (&self.target_ids, &viewer.scope_id) {
            (None, _) => true,
            (Some(ids), Some(scope)) => ids.contains(scope),
            (Some(_), None) => false,
        }
    }
}

/// Decides the audience of a record's change events and listings.
pub trait AudiencePolicy: Send + Sync + fmt::Debug {
    fn audience(&self, record: &VersionedRecord) -> Audience;
}

/// Admins and the owning agency see a record.
///
/// The default roles are `Admin` and `Agency`; `User` viewers are admitted
/// only when a policy built with [`OwnerScoped::new`] lists them. Records
/// without an owner are addressed to the listed roles unrestricted.
#[derive(Debug, Clone)]
pub struct OwnerScoped {
    roles: BTreeSet<Role>,
}

impl Default for OwnerScoped {
    fn default() -> Self {
        Self::new([Role::Admin, Role::Agency])
    }
}

impl OwnerScoped {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }
}

impl AudiencePolicy for OwnerScoped {
    fn audience(&self, record: &VersionedRecord) -> Audience {
        let audience = Audience {
            roles: self.roles.clone(),
            target_ids: None,
        };
        match &record.owner {
            Some(owner) => audience.targeting([owner.clone()]),
            None => audience,
        }
    }
}
