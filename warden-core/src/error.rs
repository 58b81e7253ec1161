//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type WardenResult<T> = Result<T, WardenError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the Warden system
#[derive(Error, Debug)]
pub enum WardenError {
    /// The catalog has no permission with this name for the target type
    #[error("Permission not found: {permission} (target type {target_type})")]
    PermissionNotFound {
        permission: String,
        target_type: String,
        context: ErrorContext,
    },

    /// The permission was defined for a different type than the object
    #[error(
        "Cannot persist permission not designed for this type \
         (permission's type is {permission_type}, object's type is {object_type})"
    )]
    TypeMismatch {
        permission_type: String,
        object_type: String,
        context: ErrorContext,
    },

    /// Only produced under the strict duplicate policy
    #[error("Grant already exists: {principal} | {permission} | {object}")]
    DuplicateGrant {
        principal: String,
        permission: String,
        object: String,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WardenError {
    /// Create a permission-not-found error
    pub fn permission_not_found(permission: &str, target_type: &str) -> Self {
        Self::PermissionNotFound {
            permission: permission.to_string(),
            target_type: target_type.to_string(),
            context: ErrorContext::new("catalog")
                .with_operation("lookup")
                .with_suggestion("Register the permission in the catalog before granting it"),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(permission_type: &str, object_type: &str) -> Self {
        Self::TypeMismatch {
            permission_type: permission_type.to_string(),
            object_type: object_type.to_string(),
            context: ErrorContext::new("grant_store")
                .with_operation("insert")
                .with_suggestion("Use a permission defined for the object's type"),
        }
    }

    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            WardenError::PermissionNotFound { context, .. } => Some(context),
            WardenError::TypeMismatch { context, .. } => Some(context),
            WardenError::DuplicateGrant { context, .. } => Some(context),
            WardenError::Storage { context, .. } => Some(context),
            WardenError::Config { context, .. } => Some(context),
            WardenError::Validation { context, .. } => Some(context),
            WardenError::Io(_) | WardenError::Serialization(_) => None,
        }
    }

    /// Whether the error was caused by the caller's input rather than the backend
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WardenError::PermissionNotFound { .. }
                | WardenError::TypeMismatch { .. }
                | WardenError::DuplicateGrant { .. }
                | WardenError::Validation { .. }
        )
    }

    /// Check if retrying the same call can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WardenError::Storage { .. } | WardenError::Io(_))
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        let error_id = self.context().map(|c| c.error_id.as_str());
        if self.is_validation() {
            warn!(error_id = ?error_id, error = %self, "Grant rejected");
        } else if let WardenError::Config { .. } = self {
            error!(error_id = ?error_id, error = %self, "Configuration error");
        } else {
            error!(error_id = ?error_id, error = %self, "Error occurred");
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::WardenError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::WardenError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::WardenError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'warden init' to create a default config"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::WardenError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(WardenError::type_mismatch("docs.document", "docs.folder").is_validation());
        assert!(WardenError::permission_not_found("view", "docs.document").is_validation());
        assert!(!storage_error!("disk full", "test").is_validation());
        assert!(storage_error!("disk full", "test").is_recoverable());
    }

    #[test]
    fn test_type_mismatch_message_names_both_types() {
        let err = WardenError::type_mismatch("docs.document", "docs.folder");
        let message = err.to_string();
        assert!(message.contains("docs.document"));
        assert!(message.contains("docs.folder"));
        assert_eq!(err.context().unwrap().component, "grant_store");
    }
}
