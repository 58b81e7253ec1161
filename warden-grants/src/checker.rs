//! Per-principal permission checker with an object cache

use crate::query::QueryEngine;
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use warden_core::{ObjectRef, Principal, Target, WardenResult};

/// Answers repeated checks for one principal from cached `permissions_for`
/// results
///
/// The cache is never invalidated by grant changes; call [`clear`] after
/// assigning or revoking through another handle.
///
/// [`clear`]: ObjectPermissionChecker::clear
pub struct ObjectPermissionChecker {
    principal: Principal,
    queries: Arc<QueryEngine>,
    cache: RwLock<HashMap<ObjectRef, HashSet<String>>>,
}

impl ObjectPermissionChecker {
    pub fn new(principal: Principal, queries: Arc<QueryEngine>) -> Self {
        Self {
            principal,
            queries,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Whether the principal holds `permission_name` on `target`
    ///
    /// A qualified name only matches objects of its own namespace.
    pub async fn has_perm<T>(&self, permission_name: &str, target: &T) -> WardenResult<bool>
    where
        T: Target + Sync + ?Sized,
    {
        let object = target.object_ref();
        let codename = match permission_name.split_once('.') {
            Some((namespace, codename)) if namespace == object.target_type.namespace => codename,
            Some(_) => return Ok(false),
            None => permission_name,
        };
        Ok(self.perms_on(&object).await?.contains(codename))
    }

    /// Codenames held on `target`, fetched once per object
    pub async fn get_perms<T>(&self, target: &T) -> WardenResult<HashSet<String>>
    where
        T: Target + Sync + ?Sized,
    {
        self.perms_on(&target.object_ref()).await
    }

    /// Fill the cache for every target not already cached
    pub async fn prefetch(&self, targets: &[ObjectRef]) -> WardenResult<usize> {
        let missing: Vec<&ObjectRef> = {
            let cache = self.cache.read().await;
            let unique: HashSet<&ObjectRef> = targets
                .iter()
                .filter(|object| !cache.contains_key(*object))
                .collect();
            unique.into_iter().collect()
        };

        let fetched = try_join_all(
            missing
                .iter()
                .map(|object| self.queries.permissions_for(&self.principal, *object)),
        )
        .await?;

        let mut cache = self.cache.write().await;
        for (object, codenames) in missing.iter().zip(fetched) {
            cache.insert((*object).clone(), codenames);
        }
        debug!("Prefetched permissions for {} objects", missing.len());
        Ok(missing.len())
    }

    /// Drop every cached entry
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    pub async fn cached_objects(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn perms_on(&self, object: &ObjectRef) -> WardenResult<HashSet<String>> {
        if let Some(codenames) = self.cache.read().await.get(object) {
            return Ok(codenames.clone());
        }

        let codenames = self.queries.permissions_for(&self.principal, object).await?;
        self.cache
            .write()
            .await
            .insert(object.clone(), codenames.clone());
        Ok(codenames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PermissionCatalog;
    use crate::directory::MemoryGroupDirectory;
    use crate::store::GrantStores;
    use warden_core::{DuplicatePolicy, TargetType, UserId};

    fn document(id: &str) -> ObjectRef {
        ObjectRef::new(TargetType::new("docs", "document"), id)
    }

    async fn setup() -> (ObjectPermissionChecker, GrantStores, Arc<PermissionCatalog>) {
        let catalog = Arc::new(PermissionCatalog::new());
        catalog
            .register_model_defaults(&TargetType::new("docs", "document"))
            .await
            .unwrap();
        let stores = GrantStores::memory(DuplicatePolicy::Idempotent);
        let queries = Arc::new(QueryEngine::new(
            Arc::clone(&catalog),
            stores.clone(),
            Arc::new(MemoryGroupDirectory::new()),
        ));
        (
            ObjectPermissionChecker::new(Principal::user("alice"), queries),
            stores,
            catalog,
        )
    }

    #[tokio::test]
    async fn test_cache_serves_repeated_checks() {
        let (checker, stores, catalog) = setup().await;
        let view = catalog
            .lookup(&TargetType::new("docs", "document"), "view_document")
            .await
            .unwrap();
        stores
            .users
            .insert(&UserId::new("alice"), &view, &document("1"))
            .await
            .unwrap();

        assert!(checker.has_perm("view_document", &document("1")).await.unwrap());
        assert!(checker.has_perm("docs.view_document", &document("1")).await.unwrap());
        assert!(!checker.has_perm("crm.view_document", &document("1")).await.unwrap());
        assert_eq!(checker.cached_objects().await, 1);

        // Revocations are not seen until the cache is cleared
        stores
            .users
            .delete(&UserId::new("alice"), &view, &document("1"))
            .await
            .unwrap();
        assert!(checker.has_perm("view_document", &document("1")).await.unwrap());
        checker.clear().await;
        assert!(!checker.has_perm("view_document", &document("1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_prefetch_skips_cached_objects() {
        let (checker, _, _) = setup().await;
        let targets = vec![document("1"), document("2"), document("2")];

        assert_eq!(checker.prefetch(&targets).await.unwrap(), 2);
        assert_eq!(checker.prefetch(&targets).await.unwrap(), 0);
        assert_eq!(checker.cached_objects().await, 2);
        assert!(checker.get_perms(&document("1")).await.unwrap().is_empty());
    }
}
