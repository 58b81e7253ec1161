//! In-memory object registry implementing [`ObjectResolver`]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use warden_core::{ObjectResolver, ObjectRef, Target, WardenResult};

/// Live objects keyed by their reference
#[derive(Debug)]
pub struct MemoryObjectRegistry<T> {
    objects: Arc<RwLock<HashMap<ObjectRef, T>>>,
}

impl<T> Default for MemoryObjectRegistry<T> {
    fn default() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<T> Clone for MemoryObjectRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
        }
    }
}

impl<T: Target + Clone + Send + Sync> MemoryObjectRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object under the reference it derives
    pub async fn insert(&self, object: T) -> ObjectRef {
        let object_ref = object.object_ref();
        self.objects.write().await.insert(object_ref.clone(), object);
        object_ref
    }

    /// Forget an object; existing references to it become dangling
    pub async fn remove(&self, object_ref: &ObjectRef) -> Option<T> {
        self.objects.write().await.remove(object_ref)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<T: Target + Clone + Send + Sync> ObjectResolver for MemoryObjectRegistry<T> {
    type Object = T;

    async fn resolve(&self, object: &ObjectRef) -> WardenResult<Option<T>> {
        Ok(self.objects.read().await.get(object).cloned())
    }
}
