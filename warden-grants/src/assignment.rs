//! Assignment engine: creating and revoking grants

use crate::catalog::PermissionCatalog;
use crate::store::{validate_grant, GrantStores};
use std::sync::Arc;
use tracing::{info, warn};
use warden_core::{
    log_operation_error, log_operation_start, log_operation_success, Grant, GroupId, ObjectRef,
    Permission, Principal, Target, UserId, WardenResult,
};

pub struct AssignmentEngine {
    catalog: Arc<PermissionCatalog>,
    stores: GrantStores,
}

impl AssignmentEngine {
    pub fn new(catalog: Arc<PermissionCatalog>, stores: GrantStores) -> Self {
        Self { catalog, stores }
    }

    /// Grant `permission_name` on `target` to one principal
    pub async fn assign<T>(
        &self,
        permission_name: &str,
        principal: &Principal,
        target: &T,
    ) -> WardenResult<Grant>
    where
        T: Target + Sync + ?Sized,
    {
        log_operation_start!("assign", permission = permission_name, principal = %principal);

        let (permission, object) = self.prepare(permission_name, target).await?;
        let grant = self
            .insert(principal, &permission, &object)
            .await
            .inspect_err(|e| {
                log_operation_error!("assign", e);
            })?;

        info!("Granted {} on {} to {}", permission.codename, object, principal);
        Ok(grant)
    }

    /// Grant one permission on one object to a sequence of principals
    ///
    /// The name and the target are validated once before any write. A storage
    /// failure stops the sequence and leaves the earlier grants in place.
    pub async fn assign_many<T>(
        &self,
        permission_name: &str,
        principals: &[Principal],
        target: &T,
    ) -> WardenResult<Vec<Grant>>
    where
        T: Target + Sync + ?Sized,
    {
        log_operation_start!("assign_many", permission = permission_name, principals = principals.len());

        let (permission, object) = self.prepare(permission_name, target).await?;
        let mut grants = Vec::with_capacity(principals.len());
        for principal in principals {
            let grant = self
                .insert(principal, &permission, &object)
                .await
                .inspect_err(|e| {
                    log_operation_error!("assign_many", e, applied = grants.len());
                })?;
            grants.push(grant);
        }

        log_operation_success!("assign_many", permission = %permission, object = %object, count = grants.len());
        Ok(grants)
    }

    /// Revoke `permission_name` from one principal
    ///
    /// Without a target the permission is revoked on every object. Returns
    /// the number of grants removed.
    pub async fn remove(
        &self,
        permission_name: &str,
        principal: &Principal,
        target: Option<&(dyn Target + Sync)>,
    ) -> WardenResult<u64> {
        self.remove_many(permission_name, std::slice::from_ref(principal), target)
            .await
    }

    /// Revoke `permission_name` from a sequence of principals
    pub async fn remove_many(
        &self,
        permission_name: &str,
        principals: &[Principal],
        target: Option<&(dyn Target + Sync)>,
    ) -> WardenResult<u64> {
        log_operation_start!("remove", permission = permission_name, principals = principals.len());

        let (permissions, object) = match target {
            Some(target) => {
                let object = target.object_ref();
                let permission = self.resolve(permission_name, &object).await?;
                (vec![permission], Some(object))
            }
            None => (
                self.catalog
                    .matching(permission_name)
                    .await
                    .inspect_err(|e| warn!("Cannot revoke unknown permission: {}", e))?,
                None,
            ),
        };

        let (users, groups) = split_principals(principals);
        let mut removed = 0u64;
        if !users.is_empty() {
            removed += self
                .stores
                .users
                .delete_matching(&users, &permissions, object.as_ref())
                .await?;
        }
        if !groups.is_empty() {
            removed += self
                .stores
                .groups
                .delete_matching(&groups, &permissions, object.as_ref())
                .await?;
        }

        match &object {
            Some(object) => info!("Revoked {} on {}: {} grants", permission_name, object, removed),
            None => info!("Revoked {} on all objects: {} grants", permission_name, removed),
        }
        Ok(removed)
    }

    async fn resolve(&self, permission_name: &str, object: &ObjectRef) -> WardenResult<Permission> {
        self.catalog
            .resolve(permission_name, &object.target_type)
            .await
            .inspect_err(|e| warn!("Rejected grant for {}: {}", object, e))
    }

    async fn prepare<T>(
        &self,
        permission_name: &str,
        target: &T,
    ) -> WardenResult<(Permission, ObjectRef)>
    where
        T: Target + Sync + ?Sized,
    {
        let object = target.object_ref();
        let permission = self.resolve(permission_name, &object).await?;
        validate_grant(&permission, &object)?;
        Ok((permission, object))
    }

    async fn insert(
        &self,
        principal: &Principal,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<Grant> {
        match principal {
            Principal::User(id) => self
                .stores
                .users
                .insert(id, permission, object)
                .await
                .map(Grant::User),
            Principal::Group(id) => self
                .stores
                .groups
                .insert(id, permission, object)
                .await
                .map(Grant::Group),
        }
    }
}

fn split_principals(principals: &[Principal]) -> (Vec<UserId>, Vec<GroupId>) {
    let mut users = Vec::new();
    let mut groups = Vec::new();
    for principal in principals {
        match principal {
            Principal::User(id) => users.push(id.clone()),
            Principal::Group(id) => groups.push(id.clone()),
        }
    }
    (users, groups)
}
