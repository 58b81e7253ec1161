//! SQLite grant store tests against in-memory and file databases

#![cfg(feature = "sqlite")]

mod common;

use common::{document_type, Document, Folder};
use std::collections::HashSet;
use std::sync::Arc;
use warden_core::{
    CatalogEntry, CatalogModel, DeletePolicy, DuplicatePolicy, GroupId, PolicyConfig, Principal,
    StoreBackend, Target, UserId, WardenConfig, WardenError,
};
use warden_grants::{
    GrantFilter, GrantStores, Guardian, MemoryGroupDirectory, MemoryObjectRegistry, SqliteBackend,
};

fn catalog_config() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.catalog_models.push(CatalogModel {
        target: "docs.document".to_string(),
    });
    config.catalog_models.push(CatalogModel {
        target: "docs.folder".to_string(),
    });
    config.catalog.push(CatalogEntry {
        target: "docs.document".to_string(),
        codename: "publish_document".to_string(),
        description: "Can publish document".to_string(),
    });
    config
}

async fn sqlite_guardian_with(policy: PolicyConfig) -> (Guardian, MemoryGroupDirectory) {
    let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();
    backend.migrate().await.unwrap();
    let catalog = backend.load_catalog(&catalog_config()).await.unwrap();

    let directory = MemoryGroupDirectory::new();
    let guardian = Guardian::new(
        Arc::new(catalog),
        GrantStores::sqlite(&backend, policy.duplicate_grants),
        Arc::new(directory.clone()),
        policy,
    );
    (guardian, directory)
}

async fn sqlite_guardian(duplicate_grants: DuplicatePolicy) -> (Guardian, MemoryGroupDirectory) {
    sqlite_guardian_with(PolicyConfig {
        duplicate_grants,
        ..PolicyConfig::default()
    })
    .await
}

#[tokio::test]
async fn test_catalog_ids_come_from_database() {
    let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();
    backend.migrate().await.unwrap();

    let first = backend.load_catalog(&catalog_config()).await.unwrap();
    let second = backend.load_catalog(&catalog_config()).await.unwrap();

    assert_eq!(first.len().await, 9);
    assert_eq!(first.all().await, second.all().await);
    let publish = second
        .lookup(&document_type(), "publish_document")
        .await
        .unwrap();
    assert_eq!(publish.description, "Can publish document");
}

#[tokio::test]
async fn test_sqlite_assign_check_remove() {
    let (guardian, _) = sqlite_guardian(DuplicatePolicy::Idempotent).await;
    let alice = Principal::user("alice");
    let doc = Document::new(1);

    let first = guardian.assign("view_document", &alice, &doc).await.unwrap();
    let second = guardian.assign("view_document", &alice, &doc).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(guardian.stores().users.count().await.unwrap(), 1);

    assert!(guardian
        .has_permission(&alice, "view_document", &doc)
        .await
        .unwrap());
    assert_eq!(
        guardian
            .remove("view_document", &alice, Some(&doc))
            .await
            .unwrap(),
        1
    );
    assert!(!guardian
        .has_permission(&alice, "view_document", &doc)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_sqlite_strict_duplicate() {
    let (guardian, _) = sqlite_guardian(DuplicatePolicy::Strict).await;
    let alice = Principal::user("alice");
    let doc = Document::new(1);

    guardian.assign("view_document", &alice, &doc).await.unwrap();
    let result = guardian.assign("view_document", &alice, &doc).await;

    assert!(matches!(result, Err(WardenError::DuplicateGrant { .. })));
    assert_eq!(guardian.stores().users.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_sqlite_type_mismatch_writes_nothing() {
    let (guardian, _) = sqlite_guardian(DuplicatePolicy::Idempotent).await;
    let result = guardian
        .assign("docs.view_document", &Principal::user("alice"), &Folder { id: 1 })
        .await;

    assert!(matches!(result, Err(WardenError::TypeMismatch { .. })));
    assert_eq!(guardian.stores().users.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_sqlite_set_queries_with_groups() {
    let (guardian, directory) = sqlite_guardian(DuplicatePolicy::Idempotent).await;
    let alice = Principal::user("alice");
    directory
        .add_member(&UserId::new("alice"), &GroupId::new("editors"))
        .await;

    guardian
        .assign("view_document", &alice, &Document::new(1))
        .await
        .unwrap();
    guardian
        .assign("view_document", &Principal::group("editors"), &Document::new(3))
        .await
        .unwrap();
    guardian
        .assign("change_document", &Principal::group("editors"), &Document::new(1))
        .await
        .unwrap();

    let objects = guardian
        .objects_with_permission(&alice, "view_document", &document_type())
        .await
        .unwrap();
    assert_eq!(
        objects,
        HashSet::from([Document::new(1).object_ref(), Document::new(3).object_ref()])
    );

    let codenames = guardian
        .permissions_for(&alice, &Document::new(1))
        .await
        .unwrap();
    assert_eq!(
        codenames,
        HashSet::from(["view_document".to_string(), "change_document".to_string()])
    );

    let grants = guardian.grants_on(&Document::new(1)).await.unwrap();
    assert_eq!(grants.users.len(), 1);
    assert_eq!(grants.groups.len(), 1);
    assert_eq!(grants.groups[0].principal, GroupId::new("editors"));
}

#[tokio::test]
async fn test_sqlite_bulk_remove_without_target() {
    let (guardian, _) = sqlite_guardian(DuplicatePolicy::Idempotent).await;
    let principals = vec![Principal::user("alice"), Principal::user("bob")];
    for id in 1..=2 {
        guardian
            .assign_many("view_document", &principals, &Document::new(id))
            .await
            .unwrap();
    }
    guardian
        .assign("publish_document", &principals[0], &Document::new(1))
        .await
        .unwrap();

    let removed = guardian
        .remove_many("view_document", &principals, None)
        .await
        .unwrap();

    assert_eq!(removed, 4);
    let remaining = guardian
        .stores()
        .users
        .find(&UserId::new("alice"), &GrantFilter::any())
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].permission.codename, "publish_document");
}

#[tokio::test]
async fn test_sqlite_concurrent_duplicate_assigns() {
    let (guardian, _) = sqlite_guardian(DuplicatePolicy::Idempotent).await;
    let guardian = Arc::new(guardian);
    let target = Document::new(5).object_ref();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let guardian = Arc::clone(&guardian);
            let target = target.clone();
            tokio::spawn(async move {
                guardian
                    .assign("view_document", &Principal::user("alice"), &target)
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().is_ok());
    }
    assert_eq!(guardian.stores().users.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_guardian_from_sqlite_config_persists() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("grants.db");

    let mut config = catalog_config();
    config.store.backend = StoreBackend::Sqlite;
    config.store.database_url = format!("sqlite://{}", db_path.display());

    let doc = Document::new(11);
    {
        let guardian = Guardian::from_config(&config).await.unwrap();
        guardian
            .assign("publish_document", &Principal::user("carol"), &doc)
            .await
            .unwrap();
    }

    let reopened = Guardian::from_config(&config).await.unwrap();
    assert!(reopened
        .has_permission(&Principal::user("carol"), "publish_document", &doc)
        .await
        .unwrap());
    assert!(reopened.health_check().await.is_ok());
}

#[tokio::test]
async fn test_sqlite_runtime_registration_is_assignable() {
    let (guardian, _) = sqlite_guardian(DuplicatePolicy::Idempotent).await;
    let bob = Principal::user("bob");
    let doc = Document::new(4);

    guardian
        .catalog()
        .register(document_type(), "archive_document", "Can archive document")
        .await
        .unwrap();
    guardian.assign("archive_document", &bob, &doc).await.unwrap();

    assert!(guardian
        .has_permission(&bob, "archive_document", &doc)
        .await
        .unwrap());
    let grants = guardian.grants_on(&doc).await.unwrap();
    assert_eq!(grants.users[0].permission.description, "Can archive document");
}

#[tokio::test]
async fn test_sqlite_cascade_delete_and_orphan_cleanup() {
    let (guardian, _) = sqlite_guardian_with(PolicyConfig {
        on_target_delete: DeletePolicy::Cascade,
        ..PolicyConfig::default()
    })
    .await;
    let alice = Principal::user("alice");
    let editors = Principal::group("editors");
    let registry = MemoryObjectRegistry::new();
    let (kept, cascaded, orphaned) = (Document::new(1), Document::new(2), Document::new(3));
    registry.insert(kept.clone()).await;
    for doc in [&kept, &cascaded, &orphaned] {
        guardian
            .assign_many("view_document", &[alice.clone(), editors.clone()], doc)
            .await
            .unwrap();
    }

    assert_eq!(guardian.object_deleted(&cascaded).await.unwrap(), 2);
    assert!(guardian.grants_on(&cascaded).await.unwrap().is_empty());

    // The third document was never registered, so it is an orphan
    assert_eq!(
        guardian
            .clean_orphans(&document_type(), &registry)
            .await
            .unwrap(),
        2
    );
    let objects = guardian
        .objects_with_permission(&alice, "view_document", &document_type())
        .await
        .unwrap();
    assert_eq!(objects, HashSet::from([kept.object_ref()]));
    assert_eq!(guardian.stores().groups.count().await.unwrap(), 1);
}
