//! SQLite grant store
//!
//! Persists the three relations `permissions`, `user_grants` and
//! `group_grants`. Each grant relation carries a UNIQUE constraint on its full
//! key, which is what settles concurrent duplicate inserts. Set-based queries
//! (`IN` lists over principals, `DISTINCT` projections) run in the database.

use super::{duplicate_grant, validate_grant, GrantFilter, GrantStore};
use crate::catalog::{CatalogStore, PermissionCatalog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};
use warden_core::{
    CatalogSource, DuplicatePolicy, ErrorContext, GroupId, GrantRecord, ObjectRef, Permission,
    PermissionDefinition, PrincipalId, TargetType, UserId, WardenError, WardenResult,
};

const UPSERT_PERMISSION: &str = r#"
    INSERT INTO permissions (namespace, model, codename, description)
    VALUES (?, ?, ?, ?)
    ON CONFLICT (namespace, model, codename)
    DO UPDATE SET description = excluded.description
"#;

const SELECT_PERMISSIONS: &str =
    "SELECT id, namespace, model, codename, description FROM permissions";

fn db_error(operation: &'static str) -> impl Fn(sqlx::Error) -> WardenError {
    move |e| {
        error!("SQLite {} failed: {}", operation, e);
        WardenError::Storage {
            message: format!("SQLite {} failed: {}", operation, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("sqlite_store").with_operation(operation),
        }
    }
}

/// Connection pool plus schema management shared by the grant stores
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect from a database URL, creating the file if missing
    ///
    /// In-memory databases get a single long-lived connection, since every
    /// connection to `sqlite::memory:` opens its own empty database.
    pub async fn connect(database_url: &str) -> WardenResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_error("connect"))?
            .create_if_missing(true);

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(db_error("connect"))?;

        info!("Connected to SQLite grant database at {}", database_url);
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the tables and indexes if they do not exist
    pub async fn migrate(&self) -> WardenResult<()> {
        let mut statements = vec![r#"
            CREATE TABLE IF NOT EXISTS permissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace TEXT NOT NULL,
                model TEXT NOT NULL,
                codename TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                UNIQUE (namespace, model, codename)
            )
            "#
        .to_string()];

        for (table, column) in [
            (UserId::KIND.grant_table(), UserId::KIND.principal_column()),
            (GroupId::KIND.grant_table(), GroupId::KIND.principal_column()),
        ] {
            statements.push(format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    {column} TEXT NOT NULL,
                    permission_id INTEGER NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
                    target_type TEXT NOT NULL,
                    object_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE ({column}, permission_id, target_type, object_id)
                )
                "#
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_object ON {table}(target_type, object_id)"
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_lookup ON {table}({column}, permission_id, target_type)"
            ));
        }

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error("migrate"))?;
        }

        info!("Grant tables created successfully");
        Ok(())
    }

    /// Upsert the source's definitions into `permissions` and build a catalog
    /// carrying the database ids
    ///
    /// Later registrations on the returned catalog are written to the same
    /// table.
    pub async fn load_catalog<S: CatalogSource + ?Sized>(
        &self,
        source: &S,
    ) -> WardenResult<PermissionCatalog> {
        let definitions = source.definitions()?;
        for definition in &definitions {
            definition.target_type.validate()?;
        }
        let mut tx = self.pool.begin().await.map_err(db_error("load_catalog"))?;

        for definition in &definitions {
            sqlx::query(UPSERT_PERMISSION)
                .bind(&definition.target_type.namespace)
                .bind(&definition.target_type.model)
                .bind(&definition.codename)
                .bind(&definition.description)
                .execute(&mut *tx)
                .await
                .map_err(db_error("load_catalog"))?;
        }

        let sql = format!("{} ORDER BY id", SELECT_PERMISSIONS);
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error("load_catalog"))?;

        tx.commit().await.map_err(db_error("load_catalog"))?;

        let catalog = PermissionCatalog::with_store(Arc::new(self.clone()));
        for row in &rows {
            catalog.insert_loaded(row_to_permission(row, "id")?).await;
        }

        info!(
            "Loaded {} permissions from SQLite ({} from source)",
            rows.len(),
            definitions.len()
        );
        Ok(catalog)
    }

    /// Grant store for one principal kind on this pool
    pub fn grant_store<P: PrincipalId>(&self, policy: DuplicatePolicy) -> SqliteGrantStore<P> {
        SqliteGrantStore::new(self.pool.clone(), policy)
    }
}

#[async_trait]
impl CatalogStore for SqliteBackend {
    async fn save_permission(&self, definition: &PermissionDefinition) -> WardenResult<Permission> {
        sqlx::query(UPSERT_PERMISSION)
            .bind(&definition.target_type.namespace)
            .bind(&definition.target_type.model)
            .bind(&definition.codename)
            .bind(&definition.description)
            .execute(&self.pool)
            .await
            .map_err(db_error("save_permission"))?;

        let sql = format!(
            "{} WHERE namespace = ? AND model = ? AND codename = ?",
            SELECT_PERMISSIONS
        );
        let row = sqlx::query(&sql)
            .bind(&definition.target_type.namespace)
            .bind(&definition.target_type.model)
            .bind(&definition.codename)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("save_permission"))?;

        let permission = row_to_permission(&row, "id")?;
        debug!("Persisted permission {} with id {}", permission, permission.id);
        Ok(permission)
    }
}

fn row_to_permission(row: &SqliteRow, id_column: &str) -> WardenResult<Permission> {
    let get = |column: &str| -> WardenResult<String> {
        row.try_get::<String, _>(column)
            .map_err(db_error("decode_row"))
    };

    Ok(Permission {
        id: row
            .try_get::<i64, _>(id_column)
            .map_err(db_error("decode_row"))?,
        target_type: TargetType::new(get("namespace")?, get("model")?),
        codename: get("codename")?,
        description: get("description")?,
    })
}

/// SQLite-backed [`GrantStore`] for principal kind `P`
pub struct SqliteGrantStore<P: PrincipalId> {
    pool: SqlitePool,
    policy: DuplicatePolicy,
    _kind: PhantomData<P>,
}

impl<P: PrincipalId> SqliteGrantStore<P> {
    pub fn new(pool: SqlitePool, policy: DuplicatePolicy) -> Self {
        Self {
            pool,
            policy,
            _kind: PhantomData,
        }
    }

    fn table(&self) -> &'static str {
        P::KIND.grant_table()
    }

    fn column(&self) -> &'static str {
        P::KIND.principal_column()
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT g.{column} AS principal_id, g.permission_id, p.namespace, p.model, \
             p.codename, p.description, g.object_id, g.created_at \
             FROM {table} g JOIN permissions p ON p.id = g.permission_id",
            column = self.column(),
            table = self.table()
        )
    }

    fn row_to_record(row: &SqliteRow) -> WardenResult<GrantRecord<P>> {
        let get = |column: &str| -> WardenResult<String> {
            row.try_get::<String, _>(column)
                .map_err(db_error("decode_row"))
        };

        let created_at = get("created_at")?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| {
                warden_core::storage_error!(
                    format!("Invalid created_at '{}'", created_at),
                    "sqlite_store",
                    e
                )
            })?;

        // Inserts require the permission's type to be the object's type
        let permission = row_to_permission(row, "permission_id")?;
        let object = ObjectRef::new(permission.target_type.clone(), get("object_id")?);

        Ok(GrantRecord {
            principal: P::from_stored(get("principal_id")?),
            permission,
            object,
            created_at,
        })
    }

    fn push_principals(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, principals: &[P]) {
        qb.push(format!("{} IN (", column));
        let mut separated = qb.separated(", ");
        for principal in principals {
            separated.push_bind(principal.as_str().to_string());
        }
        separated.push_unseparated(")");
    }

    async fn fetch(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<Option<GrantRecord<P>>> {
        let sql = format!(
            "{} WHERE g.{} = ? AND g.permission_id = ? AND g.target_type = ? AND g.object_id = ?",
            self.select_sql(),
            self.column()
        );
        let row = sqlx::query(&sql)
            .bind(principal.as_str())
            .bind(permission.id)
            .bind(object.target_type.to_string())
            .bind(&object.object_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("fetch"))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }
}

#[async_trait]
impl<P: PrincipalId> GrantStore<P> for SqliteGrantStore<P> {
    async fn insert(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<GrantRecord<P>> {
        validate_grant(permission, object)?;

        let created_at = Utc::now();
        let sql = format!(
            "INSERT INTO {table} ({column}, permission_id, target_type, object_id, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT ({column}, permission_id, target_type, object_id) DO NOTHING",
            table = self.table(),
            column = self.column()
        );

        let result = sqlx::query(&sql)
            .bind(principal.as_str())
            .bind(permission.id)
            .bind(object.target_type.to_string())
            .bind(&object.object_id)
            .bind(created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(db_error("insert"))?;

        if result.rows_affected() == 0 {
            if self.policy == DuplicatePolicy::Strict {
                return Err(duplicate_grant(principal, permission, object));
            }
            debug!("{} grant already stored for {}", P::KIND, principal);
            return self.fetch(principal, permission, object).await?.ok_or_else(|| {
                warden_core::storage_error!(
                    "Grant disappeared between insert and read back",
                    "sqlite_store"
                )
            });
        }

        let record = GrantRecord {
            principal: principal.clone(),
            permission: permission.clone(),
            object: object.clone(),
            created_at,
        };
        debug!("Stored {} grant {}", P::KIND, record);
        Ok(record)
    }

    async fn delete(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND permission_id = ? AND target_type = ? AND object_id = ?",
            self.table(),
            self.column()
        );
        let result = sqlx::query(&sql)
            .bind(principal.as_str())
            .bind(permission.id)
            .bind(object.target_type.to_string())
            .bind(&object.object_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, principal: &P, filter: &GrantFilter) -> WardenResult<Vec<GrantRecord<P>>> {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(self.select_sql());
        qb.push(format!(" WHERE g.{} = ", self.column()));
        qb.push_bind(principal.as_str().to_string());

        if let Some(permission) = &filter.permission {
            qb.push(" AND g.permission_id = ");
            qb.push_bind(permission.id);
        }
        if let Some(object) = &filter.object {
            qb.push(" AND g.target_type = ");
            qb.push_bind(object.target_type.to_string());
            qb.push(" AND g.object_id = ");
            qb.push_bind(object.object_id.clone());
        }
        qb.push(" ORDER BY g.id");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("find"))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn exists(
        &self,
        principal: &P,
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool> {
        self.exists_any(std::slice::from_ref(principal), permission, object)
            .await
    }

    async fn exists_any(
        &self,
        principals: &[P],
        permission: &Permission,
        object: &ObjectRef,
    ) -> WardenResult<bool> {
        if principals.is_empty() {
            return Ok(false);
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT 1 FROM {} WHERE ", self.table()));
        Self::push_principals(&mut qb, self.column(), principals);
        qb.push(" AND permission_id = ");
        qb.push_bind(permission.id);
        qb.push(" AND target_type = ");
        qb.push_bind(object.target_type.to_string());
        qb.push(" AND object_id = ");
        qb.push_bind(object.object_id.clone());
        qb.push(" LIMIT 1");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("exists"))?;
        Ok(row.is_some())
    }

    async fn objects_with(
        &self,
        principals: &[P],
        permission: &Permission,
    ) -> WardenResult<HashSet<ObjectRef>> {
        if principals.is_empty() {
            return Ok(HashSet::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT DISTINCT object_id FROM {} WHERE ", self.table()));
        Self::push_principals(&mut qb, self.column(), principals);
        qb.push(" AND permission_id = ");
        qb.push_bind(permission.id);
        qb.push(" AND target_type = ");
        qb.push_bind(permission.target_type.to_string());

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("objects_with"))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("object_id")
                    .map(|id| ObjectRef::new(permission.target_type.clone(), id))
                    .map_err(db_error("decode_row"))
            })
            .collect()
    }

    async fn codenames_on(
        &self,
        principals: &[P],
        object: &ObjectRef,
    ) -> WardenResult<HashSet<String>> {
        if principals.is_empty() {
            return Ok(HashSet::new());
        }

        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT DISTINCT p.codename FROM {} g JOIN permissions p ON p.id = g.permission_id WHERE ",
            self.table()
        ));
        Self::push_principals(&mut qb, &format!("g.{}", self.column()), principals);
        qb.push(" AND g.target_type = ");
        qb.push_bind(object.target_type.to_string());
        qb.push(" AND g.object_id = ");
        qb.push_bind(object.object_id.clone());

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("codenames_on"))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("codename")
                    .map_err(db_error("decode_row"))
            })
            .collect()
    }

    async fn delete_matching(
        &self,
        principals: &[P],
        permissions: &[Permission],
        object: Option<&ObjectRef>,
    ) -> WardenResult<u64> {
        if principals.is_empty() || permissions.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("DELETE FROM {} WHERE ", self.table()));
        Self::push_principals(&mut qb, self.column(), principals);
        qb.push(" AND permission_id IN (");
        let mut separated = qb.separated(", ");
        for permission in permissions {
            separated.push_bind(permission.id);
        }
        separated.push_unseparated(")");

        if let Some(object) = object {
            qb.push(" AND target_type = ");
            qb.push_bind(object.target_type.to_string());
            qb.push(" AND object_id = ");
            qb.push_bind(object.object_id.clone());
        }

        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(db_error("delete_matching"))?;
        Ok(result.rows_affected())
    }

    async fn grants_on(&self, object: &ObjectRef) -> WardenResult<Vec<GrantRecord<P>>> {
        let sql = format!(
            "{} WHERE g.target_type = ? AND g.object_id = ? ORDER BY g.{}, g.id",
            self.select_sql(),
            self.column()
        );
        let rows = sqlx::query(&sql)
            .bind(object.target_type.to_string())
            .bind(&object.object_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("grants_on"))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn delete_for_object(&self, object: &ObjectRef) -> WardenResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE target_type = ? AND object_id = ?",
            self.table()
        );
        let result = sqlx::query(&sql)
            .bind(object.target_type.to_string())
            .bind(&object.object_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete_for_object"))?;
        Ok(result.rows_affected())
    }

    async fn all(&self) -> WardenResult<Vec<GrantRecord<P>>> {
        let sql = format!("{} ORDER BY g.id", self.select_sql());
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("all"))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count(&self) -> WardenResult<u64> {
        let sql = format!("SELECT COUNT(*) AS count FROM {}", self.table());
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("count"))?;

        let count: i64 = row.try_get("count").map_err(db_error("decode_row"))?;
        Ok(count.max(0) as u64)
    }

    async fn health_check(&self) -> WardenResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("health_check"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::WardenConfig;

    async fn backend() -> SqliteBackend {
        let backend = SqliteBackend::connect("sqlite::memory:").await.unwrap();
        backend.migrate().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_insert_rejects_malformed_target_type() {
        let backend = backend().await;
        let store = backend.grant_store::<UserId>(DuplicatePolicy::Idempotent);
        let report = TargetType::new("acme.docs", "report");
        let permission = Permission {
            id: 1,
            target_type: report.clone(),
            codename: "view_report".to_string(),
            description: String::new(),
        };

        let result = store
            .insert(&UserId::new("alice"), &permission, &ObjectRef::new(report, "7"))
            .await;

        assert!(matches!(result, Err(WardenError::Validation { .. })));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_records_take_type_from_permission_row() {
        let backend = backend().await;
        let permission_id: i64 = sqlx::query(
            "INSERT INTO permissions (namespace, model, codename) \
             VALUES ('acme.docs', 'report', 'view_report') RETURNING id",
        )
        .fetch_one(backend.pool())
        .await
        .unwrap()
        .get("id");
        sqlx::query(
            "INSERT INTO user_grants (user_id, permission_id, target_type, object_id, created_at) \
             VALUES ('alice', ?, 'acme.docs.report', '7', ?)",
        )
        .bind(permission_id)
        .bind(Utc::now().to_rfc3339())
        .execute(backend.pool())
        .await
        .unwrap();

        let store = backend.grant_store::<UserId>(DuplicatePolicy::Idempotent);
        let records = store
            .find(&UserId::new("alice"), &GrantFilter::any())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].object,
            ObjectRef::new(TargetType::new("acme.docs", "report"), "7")
        );
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_registration_persists_permission_row() {
        let backend = backend().await;
        let catalog = backend.load_catalog(&WardenConfig::default()).await.unwrap();
        assert!(catalog.is_persistent());

        let document = TargetType::new("docs", "document");
        let registered = catalog
            .register(document.clone(), "publish_document", "Can publish")
            .await
            .unwrap();

        let reloaded = backend.load_catalog(&WardenConfig::default()).await.unwrap();
        assert_eq!(
            reloaded.lookup(&document, "publish_document").await.unwrap(),
            registered
        );
    }
}
