//! Query engine: answering authorization questions
//!
//! Permission names are resolved against the catalog the same way the
//! assignment engine resolves them, but an unknown name is not an error here:
//! it is simply a permission nobody holds.

use crate::catalog::PermissionCatalog;
use crate::store::GrantStores;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use warden_core::{
    GrantRecord, GroupDirectory, GroupId, ObjectRef, ObjectResolver, Permission, Principal,
    Target, TargetType, UserId, WardenResult,
};

/// Multi-permission object query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectQuery {
    pub permissions: Vec<String>,
    /// Match objects holding any of the permissions instead of all of them
    pub any_perm: bool,
    /// Include grants inherited through group membership
    pub use_groups: bool,
}

impl ObjectQuery {
    pub fn all_of<S: AsRef<str>>(permissions: &[S]) -> Self {
        Self {
            permissions: permissions.iter().map(|p| p.as_ref().to_string()).collect(),
            any_perm: false,
            use_groups: true,
        }
    }

    pub fn any_of<S: AsRef<str>>(permissions: &[S]) -> Self {
        Self {
            any_perm: true,
            ..Self::all_of(permissions)
        }
    }

    pub fn without_groups(mut self) -> Self {
        self.use_groups = false;
        self
    }
}

/// Every grant on one object, by principal kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectGrants {
    pub users: Vec<GrantRecord<UserId>>,
    pub groups: Vec<GrantRecord<GroupId>>,
}

impl ObjectGrants {
    pub fn len(&self) -> usize {
        self.users.len() + self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct QueryEngine {
    catalog: Arc<PermissionCatalog>,
    stores: GrantStores,
    directory: Arc<dyn GroupDirectory>,
}

impl QueryEngine {
    pub fn new(
        catalog: Arc<PermissionCatalog>,
        stores: GrantStores,
        directory: Arc<dyn GroupDirectory>,
    ) -> Self {
        Self {
            catalog,
            stores,
            directory,
        }
    }

    /// Whether `principal` holds `permission_name` on `target`, directly or
    /// through one of its groups
    pub async fn has_permission<T>(
        &self,
        principal: &Principal,
        permission_name: &str,
        target: &T,
    ) -> WardenResult<bool>
    where
        T: Target + Sync + ?Sized,
    {
        let object = target.object_ref();
        let Some(permission) = self.resolve_for(permission_name, &object.target_type).await else {
            return Ok(false);
        };

        let granted = match principal {
            Principal::User(user) => {
                if self.stores.users.exists(user, &permission, &object).await? {
                    true
                } else {
                    let groups = self.directory.groups_of(user).await?;
                    !groups.is_empty()
                        && self
                            .stores
                            .groups
                            .exists_any(&groups, &permission, &object)
                            .await?
                }
            }
            Principal::Group(group) => {
                self.stores
                    .groups
                    .exists(group, &permission, &object)
                    .await?
            }
        };

        debug!(
            principal = %principal,
            permission = %permission,
            object = %object,
            granted,
            "Checked permission"
        );
        Ok(granted)
    }

    /// Objects of `target_type` on which `principal` holds `permission_name`
    pub async fn objects_with_permission(
        &self,
        principal: &Principal,
        permission_name: &str,
        target_type: &TargetType,
    ) -> WardenResult<HashSet<ObjectRef>> {
        self.objects_for(principal, &ObjectQuery::all_of(&[permission_name]), target_type)
            .await
    }

    /// Objects of `target_type` matching a multi-permission query
    pub async fn objects_for(
        &self,
        principal: &Principal,
        query: &ObjectQuery,
        target_type: &TargetType,
    ) -> WardenResult<HashSet<ObjectRef>> {
        let mut permissions = Vec::with_capacity(query.permissions.len());
        for name in &query.permissions {
            match self.resolve_for(name, target_type).await {
                Some(permission) => permissions.push(permission),
                None if query.any_perm => continue,
                None => return Ok(HashSet::new()),
            }
        }
        if permissions.is_empty() {
            return Ok(HashSet::new());
        }

        let groups = self.groups_for(principal, query.use_groups).await?;
        let mut matched: Option<HashSet<ObjectRef>> = None;
        for permission in &permissions {
            let objects = self.objects_with(principal, &groups, permission).await?;
            let combined = match matched {
                None => objects,
                Some(acc) if query.any_perm => acc.union(&objects).cloned().collect(),
                Some(acc) => acc.intersection(&objects).cloned().collect(),
            };
            if combined.is_empty() && !query.any_perm {
                return Ok(HashSet::new());
            }
            matched = Some(combined);
        }

        let matched = matched.unwrap_or_default();
        debug!(
            principal = %principal,
            target_type = %target_type,
            count = matched.len(),
            "Listed objects"
        );
        Ok(matched)
    }

    /// Codenames `principal` holds on `target`, direct and inherited
    pub async fn permissions_for<T>(
        &self,
        principal: &Principal,
        target: &T,
    ) -> WardenResult<HashSet<String>>
    where
        T: Target + Sync + ?Sized,
    {
        let object = target.object_ref();
        let groups = self.groups_for(principal, true).await?;

        let direct = async {
            match principal {
                Principal::User(user) => {
                    self.stores
                        .users
                        .codenames_on(std::slice::from_ref(user), &object)
                        .await
                }
                Principal::Group(group) => {
                    self.stores
                        .groups
                        .codenames_on(std::slice::from_ref(group), &object)
                        .await
                }
            }
        };
        let inherited = self.stores.groups.codenames_on(&groups, &object);

        let (mut codenames, inherited) = futures::try_join!(direct, inherited)?;
        codenames.extend(inherited);
        Ok(codenames)
    }

    /// Live objects on which `principal` holds `permission_name`, in
    /// reference order; references that no longer resolve are dropped
    pub async fn resolved_objects_with_permission<R>(
        &self,
        principal: &Principal,
        permission_name: &str,
        target_type: &TargetType,
        resolver: &R,
    ) -> WardenResult<Vec<R::Object>>
    where
        R: ObjectResolver + ?Sized,
    {
        let mut references: Vec<ObjectRef> = self
            .objects_with_permission(principal, permission_name, target_type)
            .await?
            .into_iter()
            .collect();
        references.sort();

        let resolved = try_join_all(references.iter().map(|r| resolver.resolve(r))).await?;
        let total = resolved.len();
        let objects: Vec<R::Object> = resolved.into_iter().flatten().collect();
        if objects.len() < total {
            debug!("Dropped {} dangling references", total - objects.len());
        }
        Ok(objects)
    }

    /// Every grant attached to `target`
    pub async fn grants_on<T>(&self, target: &T) -> WardenResult<ObjectGrants>
    where
        T: Target + Sync + ?Sized,
    {
        let object = target.object_ref();
        let (users, groups) = futures::try_join!(
            self.stores.users.grants_on(&object),
            self.stores.groups.grants_on(&object)
        )?;
        Ok(ObjectGrants { users, groups })
    }

    /// Group ids whose grants count for `principal`
    async fn groups_for(&self, principal: &Principal, use_groups: bool) -> WardenResult<Vec<GroupId>> {
        match principal {
            Principal::User(user) if use_groups => self.directory.groups_of(user).await,
            _ => Ok(Vec::new()),
        }
    }

    async fn objects_with(
        &self,
        principal: &Principal,
        groups: &[GroupId],
        permission: &Permission,
    ) -> WardenResult<HashSet<ObjectRef>> {
        let direct = async {
            match principal {
                Principal::User(user) => {
                    self.stores
                        .users
                        .objects_with(std::slice::from_ref(user), permission)
                        .await
                }
                Principal::Group(group) => {
                    self.stores
                        .groups
                        .objects_with(std::slice::from_ref(group), permission)
                        .await
                }
            }
        };
        let inherited = self.stores.groups.objects_with(groups, permission);

        let (mut objects, inherited) = futures::try_join!(direct, inherited)?;
        objects.extend(inherited);
        Ok(objects)
    }

    /// Resolve a name for one type; names that do not define a permission of
    /// that type resolve to nothing
    async fn resolve_for(&self, permission_name: &str, target_type: &TargetType) -> Option<Permission> {
        match self.catalog.resolve(permission_name, target_type).await {
            Ok(permission) if permission.target_type == *target_type => Some(permission),
            Ok(permission) => {
                debug!("Permission {} does not apply to {}", permission, target_type);
                None
            }
            Err(e) => {
                debug!("Unresolved permission in query: {}", e);
                None
            }
        }
    }
}
