//! Grant storage backends
//!
//! One store contract, instantiated once per principal kind. Backends:
//! in-memory (default) and SQLite.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryGrantStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SqliteGrantStore};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;
use warden_core::{
    DuplicatePolicy, GrantRecord, GroupId, ObjectRef, Permission, PrincipalId, UserId,
    WardenError, WardenResult,
};

/// Optional filters for [`GrantStore::find`]
#[derive(Debug, Clone, Default)]
pub struct GrantFilter {
    pub permission: Option<Permission>,
    pub object: Option<ObjectRef>,
}

impl GrantFilter {
    /// No filter: every grant of the principal
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn on_object(mut self, object: ObjectRef) -> Self {
        self.object = Some(object);
        self
    }

    pub(crate) fn accepts<P>(&self, record: &GrantRecord<P>) -> bool {
        self.permission
            .as_ref()
            .map_or(true, |p| p.id == record.permission.id)
            && self.object.as_ref().map_or(true, |o| *o == record.object)
    }
}

/// Storage of grant records for one principal kind
///
/// `(principal, permission, object)` is unique within a store. Every insert
/// checks type consistency before uniqueness, and both before anything is
/// written.
#[async_trait]
pub trait GrantStore<P: PrincipalId>: Send + Sync {
    /// Store a grant; duplicate handling follows the store's [`DuplicatePolicy`]
    async fn insert(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<GrantRecord<P>>;

    /// Remove one grant, returning whether it existed
    async fn delete(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool>;

    /// Grants of one principal, optionally narrowed by permission and object
    async fn find(&self, principal: &P, filter: &GrantFilter) -> WardenResult<Vec<GrantRecord<P>>>;

    async fn exists(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool>;

    /// Whether any of `principals` holds `permission` on `object`
    async fn exists_any(
        &self,
        principals: &[P],
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool>;

    /// Objects on which any of `principals` holds `permission`
    async fn objects_with(
        &self,
        principals: &[P],
        permission: &Permission,
    ) -> WardenResult<HashSet<ObjectRef>>;

    /// Codenames any of `principals` holds on `object`
    async fn codenames_on(&self, principals: &[P], object: &ObjectRef)
        -> WardenResult<HashSet<String>>;

    /// Delete the grants of `principals` for any of `permissions`, on one
    /// object or on all objects when `object` is `None`
    async fn delete_matching(
        &self,
        principals: &[P],
        permissions: &[Permission],
        object: Option<&ObjectRef>,
    ) -> WardenResult<u64>;

    /// Every grant attached to one object
    async fn grants_on(&self, object: &ObjectRef) -> WardenResult<Vec<GrantRecord<P>>>;

    /// Delete every grant attached to one object
    async fn delete_for_object(&self, object: &ObjectRef) -> WardenResult<u64>;

    /// Every grant in the store
    async fn all(&self) -> WardenResult<Vec<GrantRecord<P>>>;

    async fn count(&self) -> WardenResult<u64>;

    /// Health check for the storage backend
    async fn health_check(&self) -> WardenResult<()>;
}

/// Reject a grant on a malformed target type, or whose permission was defined
/// for another type than the object
pub fn validate_grant(permission: &Permission, object: &ObjectRef) -> WardenResult<()> {
    object
        .target_type
        .validate()
        .inspect_err(|e| warn!(object = %object, "Rejected grant: {}", e))?;
    if permission.target_type != object.target_type {
        warn!(
            permission = %permission,
            object = %object,
            "Rejected grant with mismatched target type"
        );
        return Err(WardenError::type_mismatch(
            &permission.target_type.to_string(),
            &object.target_type.to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn duplicate_grant<P: PrincipalId>(
    principal: &P,
    permission: &Permission,
    object: &ObjectRef,
) -> WardenError {
    WardenError::DuplicateGrant {
        principal: format!("{}:{}", P::KIND, principal),
        permission: permission.codename.clone(),
        object: object.to_string(),
        context: warden_core::ErrorContext::new("grant_store")
            .with_operation("insert")
            .with_metadata("principal_kind", &P::KIND.to_string())
            .with_suggestion("Check for the grant before inserting, or use the idempotent policy"),
    }
}

/// The user store and the group store used together by the engines
#[derive(Clone)]
pub struct GrantStores {
    pub users: Arc<dyn GrantStore<UserId>>,
    pub groups: Arc<dyn GrantStore<GroupId>>,
}

impl GrantStores {
    pub fn new(users: Arc<dyn GrantStore<UserId>>, groups: Arc<dyn GrantStore<GroupId>>) -> Self {
        Self { users, groups }
    }

    /// In-memory stores for both principal kinds
    pub fn memory(policy: DuplicatePolicy) -> Self {
        Self::new(
            Arc::new(MemoryGrantStore::new(policy)),
            Arc::new(MemoryGrantStore::new(policy)),
        )
    }

    /// SQLite stores for both principal kinds sharing one pool
    #[cfg(feature = "sqlite")]
    pub fn sqlite(backend: &SqliteBackend, policy: DuplicatePolicy) -> Self {
        Self::new(
            Arc::new(backend.grant_store::<UserId>(policy)),
            Arc::new(backend.grant_store::<GroupId>(policy)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::TargetType;

    fn permission(target: TargetType) -> Permission {
        Permission {
            id: 1,
            target_type: target,
            codename: "view".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_validate_grant() {
        let document = TargetType::new("docs", "document");
        let folder = TargetType::new("docs", "folder");
        let object = ObjectRef::new(document.clone(), "1");

        assert!(validate_grant(&permission(document), &object).is_ok());
        assert!(matches!(
            validate_grant(&permission(folder), &object),
            Err(WardenError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_filter_accepts() {
        let document = TargetType::new("docs", "document");
        let record = GrantRecord::new(
            UserId::new("alice"),
            permission(document.clone()),
            ObjectRef::new(document.clone(), "1"),
        );

        assert!(GrantFilter::any().accepts(&record));
        assert!(GrantFilter::any()
            .on_object(ObjectRef::new(document.clone(), "1"))
            .accepts(&record));
        assert!(!GrantFilter::any()
            .on_object(ObjectRef::new(document, "2"))
            .accepts(&record));
    }
}
