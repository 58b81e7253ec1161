//! Shared fixtures for warden-grants integration tests

#![allow(dead_code)]

use std::sync::Arc;
use warden_core::{DuplicatePolicy, PolicyConfig, Target, TargetType};
use warden_grants::{Guardian, GrantStores, MemoryGroupDirectory, PermissionCatalog};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: u32,
    pub title: String,
}

impl Document {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            title: format!("Document {}", id),
        }
    }
}

impl Target for Document {
    fn target_type(&self) -> TargetType {
        document_type()
    }

    fn object_pk(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Folder {
    pub id: u32,
}

impl Target for Folder {
    fn target_type(&self) -> TargetType {
        TargetType::new("docs", "folder")
    }

    fn object_pk(&self) -> String {
        self.id.to_string()
    }
}

pub fn document_type() -> TargetType {
    TargetType::new("docs", "document")
}

/// Catalog with the default document and folder permissions
pub async fn test_catalog() -> Arc<PermissionCatalog> {
    let catalog = PermissionCatalog::new();
    catalog
        .register_model_defaults(&document_type())
        .await
        .unwrap();
    catalog
        .register_model_defaults(&TargetType::new("docs", "folder"))
        .await
        .unwrap();
    Arc::new(catalog)
}

/// In-memory guardian plus a handle on its group directory
pub async fn memory_guardian(duplicate_grants: DuplicatePolicy) -> (Guardian, MemoryGroupDirectory) {
    let directory = MemoryGroupDirectory::new();
    let policy = PolicyConfig {
        duplicate_grants,
        ..PolicyConfig::default()
    };
    let guardian = Guardian::new(
        test_catalog().await,
        GrantStores::memory(duplicate_grants),
        Arc::new(directory.clone()),
        policy,
    );
    (guardian, directory)
}
