//! In-memory grant store
//!
//! Grants are indexed by principal, so every principal-scoped query only
//! touches that principal's own grants.

use super::{duplicate_grant, validate_grant, GrantFilter, GrantStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use warden_core::{DuplicatePolicy, GrantRecord, ObjectRef, Permission, PrincipalId, WardenResult};

/// Unique key of a grant within one principal's bucket
type GrantKey = (i64, ObjectRef);

type Buckets<P> = HashMap<P, HashMap<GrantKey, GrantRecord<P>>>;

pub struct MemoryGrantStore<P: PrincipalId> {
    policy: DuplicatePolicy,
    grants: Arc<RwLock<Buckets<P>>>,
}

impl<P: PrincipalId> MemoryGrantStore<P> {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            grants: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<P: PrincipalId> Default for MemoryGrantStore<P> {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

fn key(permission: &Permission, object: &ObjectRef) -> GrantKey {
    (permission.id, object.clone())
}

#[async_trait]
impl<P: PrincipalId> GrantStore<P> for MemoryGrantStore<P> {
    async fn insert(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<GrantRecord<P>> {
        validate_grant(permission, object)?;

        // Check and write under one lock so racing inserts leave one record
        let mut grants = self.grants.write().await;
        let bucket = grants.entry(principal.clone()).or_default();
        let key = key(permission, object);

        if let Some(existing) = bucket.get(&key) {
            return match self.policy {
                DuplicatePolicy::Idempotent => {
                    debug!("Grant {} already stored", existing);
                    Ok(existing.clone())
                }
                DuplicatePolicy::Strict => Err(duplicate_grant(principal, permission, object)),
            };
        }

        let record = GrantRecord::new(principal.clone(), permission.clone(), object.clone());
        bucket.insert(key, record.clone());
        debug!("Stored {} grant {}", P::KIND, record);
        Ok(record)
    }

    async fn delete(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool> {
        let mut grants = self.grants.write().await;
        let Some(bucket) = grants.get_mut(principal) else {
            return Ok(false);
        };
        let removed = bucket.remove(&key(permission, object)).is_some();
        if bucket.is_empty() {
            grants.remove(principal);
        }
        Ok(removed)
    }

    async fn find(&self, principal: &P, filter: &GrantFilter) -> WardenResult<Vec<GrantRecord<P>>> {
        let grants = self.grants.read().await;
        let mut records: Vec<GrantRecord<P>> = grants
            .get(principal)
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|record| filter.accepts(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn exists(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool> {
        let grants = self.grants.read().await;
        Ok(grants
            .get(principal)
            .map_or(false, |bucket| bucket.contains_key(&key(permission, object))))
    }

    async fn exists_any(
        &self,
        principals: &[P],
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool> {
        let grants = self.grants.read().await;
        let key = key(permission, object);
        Ok(principals.iter().any(|principal| {
            grants
                .get(principal)
                .map_or(false, |bucket| bucket.contains_key(&key))
        }))
    }

    async fn objects_with(
        &self,
        principals: &[P],
        permission: &Permission,
    ) -> WardenResult<HashSet<ObjectRef>> {
        let grants = self.grants.read().await;
        Ok(principals
            .iter()
            .filter_map(|principal| grants.get(principal))
            .flat_map(|bucket| bucket.keys())
            .filter(|(permission_id, _)| *permission_id == permission.id)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn codenames_on(
        &self,
        principals: &[P],
        object: &ObjectRef,
    ) -> WardenResult<HashSet<String>> {
        let grants = self.grants.read().await;
        Ok(principals
            .iter()
            .filter_map(|principal| grants.get(principal))
            .flat_map(|bucket| bucket.values())
            .filter(|record| record.object == *object)
            .map(|record| record.permission.codename.clone())
            .collect())
    }

    async fn delete_matching(
        &self,
        principals: &[P],
        permissions: &[Permission],
        object: Option<&ObjectRef>,
    ) -> WardenResult<u64> {
        let permission_ids: HashSet<i64> = permissions.iter().map(|p| p.id).collect();
        let mut grants = self.grants.write().await;
        let mut removed = 0u64;

        for principal in principals {
            let Some(bucket) = grants.get_mut(principal) else {
                continue;
            };
            let before = bucket.len();
            bucket.retain(|(permission_id, grant_object), _| {
                !(permission_ids.contains(permission_id)
                    && object.map_or(true, |o| o == grant_object))
            });
            removed += (before - bucket.len()) as u64;
            if bucket.is_empty() {
                grants.remove(principal);
            }
        }

        Ok(removed)
    }

    async fn grants_on(&self, object: &ObjectRef) -> WardenResult<Vec<GrantRecord<P>>> {
        let grants = self.grants.read().await;
        let mut records: Vec<GrantRecord<P>> = grants
            .values()
            .flat_map(|bucket| bucket.values())
            .filter(|record| record.object == *object)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.principal.cmp(&b.principal));
        Ok(records)
    }

    async fn delete_for_object(&self, object: &ObjectRef) -> WardenResult<u64> {
        let mut grants = self.grants.write().await;
        let mut removed = 0u64;
        for bucket in grants.values_mut() {
            let before = bucket.len();
            bucket.retain(|(_, grant_object), _| grant_object != object);
            removed += (before - bucket.len()) as u64;
        }
        grants.retain(|_, bucket| !bucket.is_empty());
        Ok(removed)
    }

    async fn all(&self) -> WardenResult<Vec<GrantRecord<P>>> {
        let grants = self.grants.read().await;
        Ok(grants
            .values()
            .flat_map(|bucket| bucket.values())
            .cloned()
            .collect())
    }

    async fn count(&self) -> WardenResult<u64> {
        let grants = self.grants.read().await;
        Ok(grants.values().map(|bucket| bucket.len() as u64).sum())
    }

    async fn health_check(&self) -> WardenResult<()> {
        Ok(())
    }
}
