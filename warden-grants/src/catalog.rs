//! Permission Catalog
//!
//! The closed set of `(target type, codename)` definitions grants are
//! validated against. Populated once at startup from a [`CatalogSource`] and
//! read-mostly afterwards.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use warden_core::{
    CatalogSource, Permission, PermissionDefinition, TargetType, WardenError, WardenResult,
    DEFAULT_MODEL_ACTIONS,
};

/// Durable home of catalog definitions
///
/// A catalog bound to a store registers every new definition through it and
/// adopts the id the store assigns, so grants never reference a permission the
/// store does not know.
#[async_trait]
pub trait CatalogStore: fmt::Debug + Send + Sync {
    /// Persist a definition, returning the stored permission with its id
    async fn save_permission(&self, definition: &PermissionDefinition) -> WardenResult<Permission>;
}

#[derive(Debug, Default)]
struct CatalogInner {
    next_id: i64,
    by_key: HashMap<(TargetType, String), Permission>,
}

/// Registry of permission definitions
#[derive(Debug, Default)]
pub struct PermissionCatalog {
    inner: RwLock<CatalogInner>,
    store: Option<Arc<dyn CatalogStore>>,
}

impl PermissionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty catalog whose registrations are written through to `store`
    pub fn with_store(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            inner: RwLock::default(),
            store: Some(store),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Build a catalog from every definition the source enumerates
    pub async fn from_source<S: CatalogSource + ?Sized>(source: &S) -> WardenResult<Self> {
        let catalog = Self::new();
        let definitions = source.definitions()?;
        let count = definitions.len();
        for definition in definitions {
            catalog.register_definition(definition).await?;
        }
        info!("Permission catalog loaded with {} definitions", count);
        Ok(catalog)
    }

    /// Register a permission; re-registering the same key returns the existing entry
    pub async fn register(
        &self,
        target_type: TargetType,
        codename: &str,
        description: &str,
    ) -> WardenResult<Permission> {
        if codename.trim().is_empty() || codename.contains('.') {
            return Err(warden_core::validation_error!(
                format!("Invalid codename '{}'", codename),
                "codename",
                "catalog"
            ));
        }

        target_type.validate()?;

        // Held across the store write so one key is never persisted twice
        let mut inner = self.inner.write().await;
        let key = (target_type.clone(), codename.to_string());
        if let Some(existing) = inner.by_key.get(&key) {
            return Ok(existing.clone());
        }

        let permission = match &self.store {
            Some(store) => {
                let definition = PermissionDefinition {
                    target_type,
                    codename: codename.to_string(),
                    description: description.to_string(),
                };
                let permission = store.save_permission(&definition).await?;
                inner.next_id = inner.next_id.max(permission.id);
                permission
            }
            None => {
                inner.next_id += 1;
                Permission {
                    id: inner.next_id,
                    target_type,
                    codename: codename.to_string(),
                    description: description.to_string(),
                }
            }
        };
        inner.by_key.insert(key, permission.clone());
        debug!("Registered permission {}", permission);
        Ok(permission)
    }

    /// Adopt a permission whose id was assigned by a persistent backend
    pub(crate) async fn insert_loaded(&self, permission: Permission) {
        let mut inner = self.inner.write().await;
        inner.next_id = inner.next_id.max(permission.id);
        inner.by_key.insert(
            (permission.target_type.clone(), permission.codename.clone()),
            permission,
        );
    }

    async fn register_definition(
        &self,
        definition: PermissionDefinition,
    ) -> WardenResult<Permission> {
        self.register(
            definition.target_type,
            &definition.codename,
            &definition.description,
        )
        .await
    }

    /// Register `add_<model>`, `change_<model>`, `delete_<model>` and `view_<model>`
    pub async fn register_model_defaults(
        &self,
        target_type: &TargetType,
    ) -> WardenResult<Vec<Permission>> {
        let mut permissions = Vec::with_capacity(DEFAULT_MODEL_ACTIONS.len());
        for action in DEFAULT_MODEL_ACTIONS {
            let codename = format!("{}_{}", action, target_type.model);
            let description = format!("Can {} {}", action, target_type.model);
            permissions.push(
                self.register(target_type.clone(), &codename, &description)
                    .await?,
            );
        }
        Ok(permissions)
    }

    /// Exact lookup by target type and bare codename
    pub async fn lookup(&self, target_type: &TargetType, codename: &str) -> WardenResult<Permission> {
        let inner = self.inner.read().await;
        inner
            .by_key
            .get(&(target_type.clone(), codename.to_string()))
            .cloned()
            .ok_or_else(|| WardenError::permission_not_found(codename, &target_type.to_string()))
    }

    /// Resolve a permission name against the type of the object it will be used on
    ///
    /// A bare codename is scoped to `target_type`. A qualified
    /// `namespace.codename` is looked up within the namespace, preferring the
    /// definition for `target_type`; a definition for another type of the same
    /// namespace is returned as is and rejected later by the grant store.
    pub async fn resolve(&self, name: &str, target_type: &TargetType) -> WardenResult<Permission> {
        let Some((namespace, codename)) = name.split_once('.') else {
            return self.lookup(target_type, name).await;
        };

        if namespace == target_type.namespace {
            if let Ok(permission) = self.lookup(target_type, codename).await {
                return Ok(permission);
            }
        }

        let inner = self.inner.read().await;
        inner
            .by_key
            .values()
            .filter(|p| p.target_type.namespace == namespace && p.codename == codename)
            .min_by_key(|p| p.id)
            .cloned()
            .ok_or_else(|| WardenError::permission_not_found(name, &target_type.to_string()))
    }

    /// Every permission a name may refer to when no object is given
    ///
    /// A bare codename matches that codename on every type; a qualified name
    /// matches within its namespace.
    pub async fn matching(&self, name: &str) -> WardenResult<Vec<Permission>> {
        let (namespace, codename) = match name.split_once('.') {
            Some((namespace, codename)) => (Some(namespace), codename),
            None => (None, name),
        };

        let inner = self.inner.read().await;
        let mut permissions: Vec<Permission> = inner
            .by_key
            .values()
            .filter(|p| p.codename == codename)
            .filter(|p| namespace.map_or(true, |ns| p.target_type.namespace == ns))
            .cloned()
            .collect();

        if permissions.is_empty() {
            return Err(WardenError::permission_not_found(name, "*"));
        }
        permissions.sort_by_key(|p| p.id);
        Ok(permissions)
    }

    /// All permissions defined for one target type
    pub async fn for_type(&self, target_type: &TargetType) -> Vec<Permission> {
        let inner = self.inner.read().await;
        let mut permissions: Vec<Permission> = inner
            .by_key
            .values()
            .filter(|p| p.target_type == *target_type)
            .cloned()
            .collect();
        permissions.sort_by_key(|p| p.id);
        permissions
    }

    /// All permissions in registration order
    pub async fn all(&self) -> Vec<Permission> {
        let inner = self.inner.read().await;
        let mut permissions: Vec<Permission> = inner.by_key.values().cloned().collect();
        permissions.sort_by_key(|p| p.id);
        permissions
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_key.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> TargetType {
        TargetType::new("docs", "document")
    }

    fn folder() -> TargetType {
        TargetType::new("docs", "folder")
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let catalog = PermissionCatalog::new();
        let first = catalog.register(document(), "view", "Can view").await.unwrap();
        let second = catalog.register(document(), "view", "Other text").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(catalog.len().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_is_scoped_to_type() {
        let catalog = PermissionCatalog::new();
        catalog.register(document(), "view", "").await.unwrap();

        assert!(catalog.lookup(&document(), "view").await.is_ok());
        assert!(matches!(
            catalog.lookup(&folder(), "view").await,
            Err(WardenError::PermissionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_qualified_prefers_target_type() {
        let catalog = PermissionCatalog::new();
        let folder_share = catalog.register(folder(), "share", "").await.unwrap();
        let doc_share = catalog.register(document(), "share", "").await.unwrap();

        let resolved = catalog.resolve("docs.share", &document()).await.unwrap();
        assert_eq!(resolved, doc_share);

        let resolved = catalog.resolve("docs.share", &folder()).await.unwrap();
        assert_eq!(resolved, folder_share);
    }

    #[tokio::test]
    async fn test_resolve_qualified_returns_foreign_type_definition() {
        let catalog = PermissionCatalog::new();
        let folder_only = catalog.register(folder(), "archive", "").await.unwrap();

        let resolved = catalog.resolve("docs.archive", &document()).await.unwrap();
        assert_eq!(resolved, folder_only);
        assert!(catalog.resolve("other.archive", &document()).await.is_err());
    }

    #[tokio::test]
    async fn test_matching_across_types() {
        let catalog = PermissionCatalog::new();
        catalog.register(folder(), "view", "").await.unwrap();
        catalog.register(document(), "view", "").await.unwrap();
        catalog
            .register(TargetType::new("crm", "lead"), "view", "")
            .await
            .unwrap();

        assert_eq!(catalog.matching("view").await.unwrap().len(), 3);
        assert_eq!(catalog.matching("docs.view").await.unwrap().len(), 2);
        assert!(catalog.matching("edit").await.is_err());
    }

    #[tokio::test]
    async fn test_model_defaults() {
        let catalog = PermissionCatalog::new();
        let permissions = catalog.register_model_defaults(&document()).await.unwrap();

        let codenames: Vec<&str> = permissions.iter().map(|p| p.codename.as_str()).collect();
        assert_eq!(
            codenames,
            vec!["add_document", "change_document", "delete_document", "view_document"]
        );
        assert_eq!(catalog.for_type(&document()).await.len(), 4);
    }

    #[tokio::test]
    async fn test_register_rejects_dotted_codename() {
        let catalog = PermissionCatalog::new();
        assert!(catalog.register(document(), "docs.view", "").await.is_err());
        assert!(catalog.register(document(), " ", "").await.is_err());
        assert!(catalog.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_target_type() {
        let catalog = PermissionCatalog::new();
        let result = catalog
            .register(TargetType::new("acme.docs", "report"), "view_report", "")
            .await;

        assert!(matches!(result, Err(WardenError::Validation { .. })));
        assert!(catalog.is_empty().await);
    }

    /// Hands out ids from 100 and records what it was asked to persist
    #[derive(Debug, Default)]
    struct RecordingStore {
        saved: std::sync::Mutex<Vec<PermissionDefinition>>,
    }

    #[async_trait]
    impl CatalogStore for RecordingStore {
        async fn save_permission(
            &self,
            definition: &PermissionDefinition,
        ) -> WardenResult<Permission> {
            let mut saved = self.saved.lock().unwrap();
            saved.push(definition.clone());
            Ok(Permission {
                id: 100 + saved.len() as i64,
                target_type: definition.target_type.clone(),
                codename: definition.codename.clone(),
                description: definition.description.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_register_writes_through_to_store() {
        let store = Arc::new(RecordingStore::default());
        let catalog = PermissionCatalog::with_store(store.clone());
        assert!(catalog.is_persistent());

        let first = catalog.register(document(), "publish", "Can publish").await.unwrap();
        let again = catalog.register(document(), "publish", "").await.unwrap();
        let second = catalog.register(folder(), "archive", "").await.unwrap();

        assert_eq!(first.id, 101);
        assert_eq!(again, first);
        assert_eq!(second.id, 102);
        assert_eq!(store.saved.lock().unwrap().len(), 2);
        assert_eq!(catalog.lookup(&document(), "publish").await.unwrap().id, 101);
    }
}
