//! Core data type definitions

use crate::error::{WardenError, WardenResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Declared type of a target object, rendered as `namespace.model`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetType {
    /// Namespace used by qualified permission names (`namespace.codename`)
    pub namespace: String,
    /// Model name, lowercase
    pub model: String,
}

impl TargetType {
    pub fn new(namespace: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            model: model.into().to_lowercase(),
        }
    }

    /// Reject a namespace or model that is empty or contains `.`
    ///
    /// Only validated types round-trip through their `namespace.model` form.
    pub fn validate(&self) -> WardenResult<()> {
        for (field, value) in [("namespace", &self.namespace), ("model", &self.model)] {
            if value.trim().is_empty() || value.contains('.') {
                return Err(crate::validation_error!(
                    format!("Invalid target type {} '{}' in '{}'", field, value, self),
                    field,
                    "types"
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.model)
    }
}

impl FromStr for TargetType {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            crate::validation_error!(
                format!("Invalid target type '{}', expected 'namespace.model'", s),
                "target_type",
                "types"
            )
        };
        let (namespace, model) = s.split_once('.').ok_or_else(invalid)?;
        let target_type = TargetType::new(namespace, model);
        target_type.validate().map_err(|_| invalid())?;
        Ok(target_type)
    }
}

/// Type-erased handle on one concrete object
///
/// A reference whose object has been deleted stays a valid value; it simply
/// no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub target_type: TargetType,
    /// Stringified primary key of the object
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(target_type: TargetType, object_id: impl Into<String>) -> Self {
        Self {
            target_type,
            object_id: object_id.into(),
        }
    }

    /// Dereference through a resolver; `Ok(None)` for a dangling reference
    pub async fn resolve<R>(&self, resolver: &R) -> WardenResult<Option<R::Object>>
    where
        R: crate::traits::ObjectResolver + ?Sized,
    {
        resolver.resolve(self).await
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_type, self.object_id)
    }
}

/// An object that permissions can be granted on
pub trait Target {
    /// Declared type of the object
    fn target_type(&self) -> TargetType;

    /// Primary key in string form
    fn object_pk(&self) -> String;

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.target_type(), self.object_pk())
    }
}

impl Target for ObjectRef {
    fn target_type(&self) -> TargetType {
        self.target_type.clone()
    }

    fn object_pk(&self) -> String {
        self.object_id.clone()
    }

    fn object_ref(&self) -> ObjectRef {
        self.clone()
    }
}

/// Actions every model gets a permission for, codename `<action>_<model>`
pub const DEFAULT_MODEL_ACTIONS: [&str; 4] = ["add", "change", "delete", "view"];

/// Catalog entry: one action on one target type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Catalog-assigned identifier
    pub id: i64,
    pub target_type: TargetType,
    pub codename: String,
    pub description: String,
}

impl Permission {
    /// Fully qualified name, `namespace.codename`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.target_type.namespace, self.codename)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.target_type, self.codename)
    }
}

/// The two disjoint kinds of principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Group,
}

impl PrincipalKind {
    /// Name of the grant relation for this kind
    pub fn grant_table(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user_grants",
            PrincipalKind::Group => "group_grants",
        }
    }

    /// Name of the principal column in the grant relation
    pub fn principal_column(&self) -> &'static str {
        match self {
            PrincipalKind::User => "user_id",
            PrincipalKind::Group => "group_id",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalKind::User => write!(f, "user"),
            PrincipalKind::Group => write!(f, "group"),
        }
    }
}

/// Identifier of one principal kind; grant stores are generic over it
pub trait PrincipalId:
    Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    const KIND: PrincipalKind;

    fn as_str(&self) -> &str;

    fn from_stored(value: String) -> Self;
}

macro_rules! principal_id {
    ($name:ident, $kind:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl PrincipalId for $name {
            const KIND: PrincipalKind = $kind;

            fn as_str(&self) -> &str {
                &self.0
            }

            fn from_stored(value: String) -> Self {
                Self(value)
            }
        }
    };
}

principal_id!(UserId, PrincipalKind::User);
principal_id!(GroupId, PrincipalKind::Group);

/// A principal of either kind, as accepted by the engines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Principal {
    User(UserId),
    Group(GroupId),
}

impl Principal {
    pub fn user(id: impl Into<String>) -> Self {
        Principal::User(UserId::new(id))
    }

    pub fn group(id: impl Into<String>) -> Self {
        Principal::Group(GroupId::new(id))
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(id) => write!(f, "user:{}", id),
            Principal::Group(id) => write!(f, "group:{}", id),
        }
    }
}

impl From<UserId> for Principal {
    fn from(id: UserId) -> Self {
        Principal::User(id)
    }
}

impl From<GroupId> for Principal {
    fn from(id: GroupId) -> Self {
        Principal::Group(id)
    }
}

/// One stored fact: `principal` holds `permission` on `object`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord<P> {
    pub principal: P,
    pub permission: Permission,
    pub object: ObjectRef,
    pub created_at: DateTime<Utc>,
}

impl<P: PrincipalId> GrantRecord<P> {
    pub fn new(principal: P, permission: Permission, object: ObjectRef) -> Self {
        Self {
            principal,
            permission,
            object,
            created_at: Utc::now(),
        }
    }
}

impl<P: fmt::Display> fmt::Display for GrantRecord<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {}",
            self.object, self.principal, self.permission.codename
        )
    }
}

/// A grant record of either kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Grant {
    User(GrantRecord<UserId>),
    Group(GrantRecord<GroupId>),
}

impl Grant {
    pub fn principal(&self) -> Principal {
        match self {
            Grant::User(record) => Principal::User(record.principal.clone()),
            Grant::Group(record) => Principal::Group(record.principal.clone()),
        }
    }

    pub fn permission(&self) -> &Permission {
        match self {
            Grant::User(record) => &record.permission,
            Grant::Group(record) => &record.permission,
        }
    }

    pub fn object(&self) -> &ObjectRef {
        match self {
            Grant::User(record) => &record.object,
            Grant::Group(record) => &record.object,
        }
    }
}
