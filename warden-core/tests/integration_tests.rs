//! Integration tests for warden-core infrastructure

use warden_core::{
    config_error, init_logging, storage_error, validation_error, CatalogSource, DeletePolicy,
    DuplicatePolicy, LogFormat, LoggingConfig, StoreBackend, TargetType, WardenConfig,
    WardenError,
};

#[test]
fn test_error_macros() {
    let storage_err = storage_error!("Connection refused", "sqlite_store");
    match &storage_err {
        WardenError::Storage {
            message,
            source,
            context,
        } => {
            assert_eq!(message, "Connection refused");
            assert!(source.is_none());
            assert_eq!(context.component, "sqlite_store");
            assert!(!context.error_id.is_empty());
        }
        _ => panic!("Expected Storage error"),
    }
    assert!(storage_err.is_recoverable());
    storage_err.log();

    let validation_err = validation_error!("Empty codename", "codename", "catalog");
    match validation_err {
        WardenError::Validation {
            message,
            field,
            context,
        } => {
            assert_eq!(message, "Empty codename");
            assert_eq!(field, Some("codename".to_string()));
            assert_eq!(context.component, "catalog");
            assert!(!context.recovery_suggestions.is_empty());
        }
        _ => panic!("Expected Validation error"),
    }

    let cfg_err = config_error!("Missing store section", "config");
    assert!(!cfg_err.is_recoverable());
    assert!(!cfg_err.is_validation());
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = WardenConfig::default();
    config.store.backend = StoreBackend::Sqlite;
    config.store.database_url = "sqlite://grants.db".to_string();
    config.policy.duplicate_grants = DuplicatePolicy::Strict;
    config.policy.on_target_delete = DeletePolicy::Cascade;
    config
        .groups
        .insert("editors".to_string(), vec!["alice".to_string()]);
    config.save_to_file(&path).unwrap();

    let loaded = WardenConfig::from_file(&path).unwrap();
    assert_eq!(loaded.store.backend, StoreBackend::Sqlite);
    assert_eq!(loaded.store.database_url, "sqlite://grants.db");
    assert_eq!(loaded.policy.duplicate_grants, DuplicatePolicy::Strict);
    assert_eq!(loaded.policy.on_target_delete, DeletePolicy::Cascade);
    assert_eq!(loaded.groups["editors"], vec!["alice".to_string()]);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_config_from_missing_file() {
    let result = WardenConfig::from_file("/nonexistent/warden/config.toml");
    match result {
        Err(WardenError::Config { context, .. }) => {
            assert_eq!(context.operation.as_deref(), Some("read_file"));
        }
        other => panic!("Expected Config error, got {:?}", other),
    }
}

#[test]
fn test_config_catalog_source() {
    let config: WardenConfig = toml::from_str(
        r#"
        [[catalog_models]]
        target = "docs.document"

        [[catalog]]
        target = "docs.document"
        codename = "publish_document"
        description = "Can publish document"
        "#,
    )
    .unwrap();

    let definitions = config.definitions().unwrap();
    assert_eq!(definitions.len(), 5);
    assert!(definitions
        .iter()
        .all(|d| d.target_type == TargetType::new("docs", "document")));
    assert!(definitions
        .iter()
        .any(|d| d.codename == "publish_document" && d.description == "Can publish document"));
}

#[test]
fn test_logging_initialization() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Compact,
        filter_directives: vec!["warden_core=debug".to_string()],
        ..LoggingConfig::default()
    };

    // The global subscriber can only be set once per process
    let _ = init_logging(&config);
    assert!(init_logging(&config).is_err());
}

#[test]
fn test_logging_requires_file_path() {
    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(init_logging(&config).is_err());
}
