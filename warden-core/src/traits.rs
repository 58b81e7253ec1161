//! Collaborator seams consumed by the grant engines

use crate::error::WardenResult;
use crate::types::*;
use async_trait::async_trait;

/// Turns an object reference back into a live object
#[async_trait]
pub trait ObjectResolver: Send + Sync {
    type Object: Send;

    /// Fetch the object behind `object`, `None` when it no longer exists
    async fn resolve(&self, object: &ObjectRef) -> WardenResult<Option<Self::Object>>;
}

/// Read-only view of group membership
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Groups the user currently belongs to
    async fn groups_of(&self, user: &UserId) -> WardenResult<Vec<GroupId>>;

    async fn is_member(&self, user: &UserId, group: &GroupId) -> WardenResult<bool> {
        Ok(self.groups_of(user).await?.contains(group))
    }
}

/// A defined permission as enumerated by a catalog source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDefinition {
    pub target_type: TargetType,
    pub codename: String,
    pub description: String,
}

/// Enumerates the permissions the catalog is populated from
pub trait CatalogSource {
    fn definitions(&self) -> WardenResult<Vec<PermissionDefinition>>;
}
