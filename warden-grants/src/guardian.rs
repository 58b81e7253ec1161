//! Guardian service
//!
//! Owns the catalog, both grant stores and the group directory, and exposes
//! the assignment and query engines over them as one handle.

use crate::assignment::AssignmentEngine;
use crate::catalog::PermissionCatalog;
use crate::checker::ObjectPermissionChecker;
use crate::directory::MemoryGroupDirectory;
use crate::query::{ObjectGrants, ObjectQuery, QueryEngine};
use crate::store::GrantStores;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use warden_core::{
    log_operation_start, log_operation_success, DeletePolicy, Grant, GroupDirectory, ObjectRef,
    ObjectResolver, PolicyConfig, Principal, StoreBackend, Target, TargetType, WardenConfig,
    WardenResult,
};

pub struct Guardian {
    catalog: Arc<PermissionCatalog>,
    stores: GrantStores,
    policy: PolicyConfig,
    assignments: AssignmentEngine,
    queries: Arc<QueryEngine>,
}

impl Guardian {
    pub fn new(
        catalog: Arc<PermissionCatalog>,
        stores: GrantStores,
        directory: Arc<dyn GroupDirectory>,
        policy: PolicyConfig,
    ) -> Self {
        let assignments = AssignmentEngine::new(Arc::clone(&catalog), stores.clone());
        let queries = Arc::new(QueryEngine::new(
            Arc::clone(&catalog),
            stores.clone(),
            directory,
        ));
        Self {
            catalog,
            stores,
            policy,
            assignments,
            queries,
        }
    }

    /// Build the catalog, stores and directory the configuration describes
    pub async fn from_config(config: &WardenConfig) -> WardenResult<Self> {
        let directory: Arc<dyn GroupDirectory> =
            Arc::new(MemoryGroupDirectory::from_groups(&config.groups));
        Self::from_config_with_directory(config, directory).await
    }

    /// Like [`Guardian::from_config`], with membership supplied by the caller
    pub async fn from_config_with_directory(
        config: &WardenConfig,
        directory: Arc<dyn GroupDirectory>,
    ) -> WardenResult<Self> {
        config.validate()?;
        let policy = config.policy;
        let (catalog, stores) = match config.store.backend {
            StoreBackend::Memory => (
                PermissionCatalog::from_source(config).await?,
                GrantStores::memory(policy.duplicate_grants),
            ),
            #[cfg(feature = "sqlite")]
            StoreBackend::Sqlite => {
                let backend = crate::store::SqliteBackend::connect(&config.store.database_url).await?;
                backend.migrate().await?;
                let catalog = backend.load_catalog(config).await?;
                (catalog, GrantStores::sqlite(&backend, policy.duplicate_grants))
            }
            #[cfg(not(feature = "sqlite"))]
            StoreBackend::Sqlite => {
                return Err(warden_core::config_error!(
                    "SQLite backend requested but the 'sqlite' feature is disabled",
                    "guardian"
                ));
            }
        };

        info!(
            "Guardian ready: {:?} store, {} permissions",
            config.store.backend,
            catalog.len().await
        );
        Ok(Self::new(Arc::new(catalog), stores, directory, policy))
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn stores(&self) -> &GrantStores {
        &self.stores
    }

    pub fn policy(&self) -> PolicyConfig {
        self.policy
    }

    pub fn assignments(&self) -> &AssignmentEngine {
        &self.assignments
    }

    pub fn queries(&self) -> &QueryEngine {
        &self.queries
    }

    pub async fn assign<T>(
        &self,
        permission_name: &str,
        principal: &Principal,
        target: &T,
    ) -> WardenResult<Grant>
    where
        T: Target + Sync + ?Sized,
    {
        self.assignments
            .assign(permission_name, principal, target)
            .await
    }

    pub async fn assign_many<T>(
        &self,
        permission_name: &str,
        principals: &[Principal],
        target: &T,
    ) -> WardenResult<Vec<Grant>>
    where
        T: Target + Sync + ?Sized,
    {
        self.assignments
            .assign_many(permission_name, principals, target)
            .await
    }

    pub async fn remove(
        &self,
        permission_name: &str,
        principal: &Principal,
        target: Option<&(dyn Target + Sync)>,
    ) -> WardenResult<u64> {
        self.assignments
            .remove(permission_name, principal, target)
            .await
    }

    pub async fn remove_many(
        &self,
        permission_name: &str,
        principals: &[Principal],
        target: Option<&(dyn Target + Sync)>,
    ) -> WardenResult<u64> {
        self.assignments
            .remove_many(permission_name, principals, target)
            .await
    }

    pub async fn has_permission<T>(
        &self,
        principal: &Principal,
        permission_name: &str,
        target: &T,
    ) -> WardenResult<bool>
    where
        T: Target + Sync + ?Sized,
    {
        self.queries
            .has_permission(principal, permission_name, target)
            .await
    }

    pub async fn objects_with_permission(
        &self,
        principal: &Principal,
        permission_name: &str,
        target_type: &TargetType,
    ) -> WardenResult<HashSet<ObjectRef>> {
        self.queries
            .objects_with_permission(principal, permission_name, target_type)
            .await
    }

    pub async fn objects_for(
        &self,
        principal: &Principal,
        query: &ObjectQuery,
        target_type: &TargetType,
    ) -> WardenResult<HashSet<ObjectRef>> {
        self.queries.objects_for(principal, query, target_type).await
    }

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
        self.queries
            .resolved_objects_with_permission(principal, permission_name, target_type, resolver)
            .await
    }

    pub async fn permissions_for<T>(
        &self,
        principal: &Principal,
        target: &T,
    ) -> WardenResult<HashSet<String>>
    where
        T: Target + Sync + ?Sized,
    {
        self.queries.permissions_for(principal, target).await
    }

    pub async fn grants_on<T>(&self, target: &T) -> WardenResult<ObjectGrants>
    where
        T: Target + Sync + ?Sized,
    {
        self.queries.grants_on(target).await
    }

    /// Cached checker bound to one principal
    pub fn checker(&self, principal: Principal) -> ObjectPermissionChecker {
        ObjectPermissionChecker::new(principal, Arc::clone(&self.queries))
    }

    /// Apply the delete policy for an object that no longer exists
    ///
    /// Returns the number of grants deleted, always 0 under `retain`.
    pub async fn object_deleted<T>(&self, target: &T) -> WardenResult<u64>
    where
        T: Target + Sync + ?Sized,
    {
        let object = target.object_ref();
        match self.policy.on_target_delete {
            DeletePolicy::Retain => {
                debug!("Retaining grants on deleted object {}", object);
                Ok(0)
            }
            DeletePolicy::Cascade => {
                let removed = self.delete_grants_on(&object).await?;
                info!("Cascaded delete of {}: {} grants", object, removed);
                Ok(removed)
            }
        }
    }

    /// Delete grants on objects of `target_type` that `resolver` can no
    /// longer find
    pub async fn clean_orphans<R>(&self, target_type: &TargetType, resolver: &R) -> WardenResult<u64>
    where
        R: ObjectResolver + ?Sized,
    {
        log_operation_start!("clean_orphans", target_type = %target_type);

        let (users, groups) =
            futures::try_join!(self.stores.users.all(), self.stores.groups.all())?;
        let mut objects: Vec<ObjectRef> = users
            .into_iter()
            .map(|record| record.object)
            .chain(groups.into_iter().map(|record| record.object))
            .filter(|object| object.target_type == *target_type)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        objects.sort();

        let mut removed = 0u64;
        for object in &objects {
            if resolver.resolve(object).await?.is_none() {
                removed += self.delete_grants_on(object).await?;
            }
        }

        log_operation_success!("clean_orphans", target_type = %target_type, removed = removed);
        Ok(removed)
    }

    pub async fn health_check(&self) -> WardenResult<()> {
        futures::try_join!(
            self.stores.users.health_check(),
            self.stores.groups.health_check()
        )?;
        Ok(())
    }

    async fn delete_grants_on(&self, object: &ObjectRef) -> WardenResult<u64> {
        let (users, groups) = futures::try_join!(
            self.stores.users.delete_for_object(object),
            self.stores.groups.delete_for_object(object)
        )?;
        Ok(users + groups)
    }
}
