//! Tenant persistence
//!
//! [`TenantStore`] is the only way the provisioner reads or writes tenant
//! records. [`PgTenantStore`] works against the existing `organizations` and
//! `restaurants` tables and touches only the columns provisioning needs.
//! [`MemoryTenantStore`] has the same semantics and backs tests and offline
//! runs.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::tenant::{
    DomainStatus, NewTenant, OrganizationRef, Tenant, TenantKey, TenantKind, TenantScope, Version,
};
use crate::Error;

/// Default page size for listings
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Largest page size a listing accepts
pub const MAX_LIST_LIMIT: i64 = 200;

/// Postgres SQLSTATE for unique constraint violations
const UNIQUE_VIOLATION: &str = "23505";

/// A staged status change produced by a reconcile pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusMutation {
    /// Tenant to update
    pub key: TenantKey,
    /// Status the pass observed before classification
    pub from: DomainStatus,
    /// Status to persist
    pub to: DomainStatus,
}

/// Listing filter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListFilter {
    /// Rows to skip
    pub offset: i64,
    /// Page size, 1..=200
    pub limit: i64,
    /// Only this organization, or only its restaurants
    pub organization_id: Option<i64>,
    /// Case-insensitive substring of the name
    pub name_contains: Option<String>,
    /// Only these statuses; empty means any
    pub status_in: Vec<DomainStatus>,
    /// Include soft-deleted rows
    pub include_deleted: bool,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIST_LIMIT,
            organization_id: None,
            name_contains: None,
            status_in: Vec::new(),
            include_deleted: false,
        }
    }
}

impl ListFilter {
    /// Reject out-of-range paging
    pub fn validate(&self) -> Result<(), Error> {
        if self.offset < 0 {
            return Err(Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "offset",
                "offset must not be negative",
            ));
        }
        if !(1..=MAX_LIST_LIMIT).contains(&self.limit) {
            return Err(Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "limit",
                format!("limit must be between 1 and {}", MAX_LIST_LIMIT),
            ));
        }
        Ok(())
    }

    fn matches(&self, tenant: &Tenant) -> bool {
        if !self.include_deleted && tenant.is_deleted {
            return false;
        }
        if let Some(org_id) = self.organization_id {
            match &tenant.scope {
                TenantScope::Restaurant { organization } if organization.id == org_id => {}
                TenantScope::Restaurant { .. } => return false,
                TenantScope::Organization if tenant.id == org_id => {}
                TenantScope::Organization => return false,
            }
        }
        if let Some(needle) = &self.name_contains {
            if !tenant.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        self.status_in.is_empty() || self.status_in.contains(&tenant.status)
    }
}

/// Persistence seam for tenant records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// List tenants of one kind, ordered by id
    async fn list(&self, kind: TenantKind, filter: &ListFilter) -> Result<Vec<Tenant>, Error>;

    /// Fetch one tenant, including soft-deleted rows
    async fn get(&self, key: TenantKey) -> Result<Option<Tenant>, Error>;

    /// Insert a tenant; a live sibling with the same name is a conflict
    async fn insert(&self, tenant: NewTenant) -> Result<Tenant, Error>;

    /// Set a new declared version together with a status
    async fn update_version(
        &self,
        key: TenantKey,
        version: &Version,
        status: DomainStatus,
    ) -> Result<Tenant, Error>;

    /// Persist a single status
    async fn set_status(&self, key: TenantKey, status: DomainStatus) -> Result<(), Error>;

    /// Persist a batch of statuses atomically, returning rows updated
    async fn commit_statuses(&self, mutations: &[StatusMutation]) -> Result<usize, Error>;

    /// Soft-delete a tenant. Returns false when it was already deleted.
    async fn mark_deleted(&self, key: TenantKey) -> Result<bool, Error>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

const ORGANIZATION_SELECT: &str = "SELECT o.id::bigint AS id, o.name, o.version, \
     o.status::text AS status, o.is_deleted, o.created_at, o.created_at AS updated_at, \
     NULL::bigint AS organization_id, NULL::text AS organization_name \
     FROM organizations o";

const RESTAURANT_SELECT: &str = "SELECT r.id::bigint AS id, r.name, r.version, \
     r.status::text AS status, r.is_deleted, r.created_at, r.updated_at, \
     o.id::bigint AS organization_id, o.name AS organization_name \
     FROM restaurants r JOIN organizations o ON o.id = r.organization_id";

/// Table-specific SQL fragments
struct TableSql {
    select: &'static str,
    alias: &'static str,
    table: &'static str,
    status_type: &'static str,
    owner_column: &'static str,
    touch: &'static str,
}

fn table_sql(kind: TenantKind) -> TableSql {
    match kind {
        TenantKind::Organization => TableSql {
            select: ORGANIZATION_SELECT,
            alias: "o",
            table: "organizations",
            status_type: "org_status_enum",
            owner_column: "o.id",
            touch: "",
        },
        TenantKind::Restaurant => TableSql {
            select: RESTAURANT_SELECT,
            alias: "r",
            table: "restaurants",
            status_type: "restaurant_status_enum",
            owner_column: "r.organization_id",
            touch: ", updated_at = now()",
        },
    }
}

#[derive(FromRow)]
struct TenantRow {
    id: i64,
    name: String,
    version: String,
    status: String,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    organization_id: Option<i64>,
    organization_name: Option<String>,
}

impl TenantRow {
    fn into_tenant(self, kind: TenantKind) -> Result<Tenant, Error> {
        let scope = match kind {
            TenantKind::Organization => TenantScope::Organization,
            TenantKind::Restaurant => match (self.organization_id, self.organization_name) {
                (Some(id), Some(name)) => TenantScope::Restaurant {
                    organization: OrganizationRef { id, name },
                },
                _ => {
                    return Err(Error::internal_with_context(
                        "store",
                        format!("restaurant {} has no organization", self.id),
                    ))
                }
            },
        };
        let version = Version::parse(&self.version).map_err(|e| {
            Error::internal_with_context("store", format!("{} {}: {}", kind, self.id, e))
        })?;
        let status = self.status.parse::<DomainStatus>().map_err(|e| {
            Error::internal_with_context("store", format!("{} {}: {}", kind, self.id, e))
        })?;

        Ok(Tenant {
            id: self.id,
            name: self.name,
            scope,
            version,
            status,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

/// [`TenantStore`] over PostgreSQL
#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and verify the connection
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn require(&self, key: TenantKey) -> Result<Tenant, Error> {
        self.get(key)
            .await?
            .ok_or_else(|| Error::not_found(key.kind.as_str(), key.id))
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn list(&self, kind: TenantKind, filter: &ListFilter) -> Result<Vec<Tenant>, Error> {
        filter.validate()?;
        let sql = table_sql(kind);
        let query = format!(
            "{select} WHERE ($1 OR {a}.is_deleted = false) \
             AND ($2::bigint IS NULL OR {owner} = $2) \
             AND ($3::text IS NULL OR {a}.name ILIKE '%' || $3 || '%') \
             AND (cardinality($4::text[]) = 0 OR {a}.status::text = ANY($4)) \
             ORDER BY {a}.id OFFSET $5 LIMIT $6",
            select = sql.select,
            a = sql.alias,
            owner = sql.owner_column,
        );
        let statuses: Vec<String> = filter
            .status_in
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let rows = sqlx::query_as::<_, TenantRow>(&query)
            .bind(filter.include_deleted)
            .bind(filter.organization_id)
            .bind(filter.name_contains.as_deref())
            .bind(statuses)
            .bind(filter.offset)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_tenant(kind)).collect()
    }

    async fn get(&self, key: TenantKey) -> Result<Option<Tenant>, Error> {
        let sql = table_sql(key.kind);
        let query = format!("{} WHERE {}.id = $1", sql.select, sql.alias);
        let row = sqlx::query_as::<_, TenantRow>(&query)
            .bind(key.id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.into_tenant(key.kind)).transpose()
    }

    async fn insert(&self, tenant: NewTenant) -> Result<Tenant, Error> {
        let result = match &tenant.scope {
            TenantScope::Organization => {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO organizations (name, version, status, is_deleted) \
                     VALUES ($1, $2, $3::org_status_enum, false) RETURNING id::bigint",
                )
                .bind(&tenant.name)
                .bind(tenant.version.as_str())
                .bind(tenant.status.as_str())
                .fetch_one(&self.pool)
                .await
            }
            TenantScope::Restaurant { organization } => {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO restaurants (organization_id, name, version, status, is_deleted) \
                     VALUES ($1::integer, $2, $3, $4::restaurant_status_enum, false) \
                     RETURNING id::bigint",
                )
                .bind(organization.id)
                .bind(&tenant.name)
                .bind(tenant.version.as_str())
                .bind(tenant.status.as_str())
                .fetch_one(&self.pool)
                .await
            }
        };

        let id = match result {
            Ok(id) => id,
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::conflict(
                    &tenant.name,
                    match tenant.scope {
                        TenantScope::Organization => {
                            "an organization with this name already exists".to_string()
                        }
                        TenantScope::Restaurant { organization } => format!(
                            "a restaurant with this name already exists in organization {}",
                            organization.name
                        ),
                    },
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let kind = match tenant.scope {
            TenantScope::Organization => TenantKind::Organization,
            TenantScope::Restaurant { .. } => TenantKind::Restaurant,
        };
        debug!(kind = %kind, id, name = %tenant.name, "Inserted tenant");
        self.require(TenantKey { kind, id }).await
    }

    async fn update_version(
        &self,
        key: TenantKey,
        version: &Version,
        status: DomainStatus,
    ) -> Result<Tenant, Error> {
        let sql = table_sql(key.kind);
        let query = format!(
            "UPDATE {} SET version = $1, status = $2::{}{} WHERE id = $3 AND is_deleted = false",
            sql.table, sql.status_type, sql.touch
        );
        let result = sqlx::query(&query)
            .bind(version.as_str())
            .bind(status.as_str())
            .bind(key.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(key.kind.as_str(), key.id));
        }
        self.require(key).await
    }

    async fn set_status(&self, key: TenantKey, status: DomainStatus) -> Result<(), Error> {
        let sql = table_sql(key.kind);
        let query = format!(
            "UPDATE {} SET status = $1::{}{} WHERE id = $2",
            sql.table, sql.status_type, sql.touch
        );
        let result = sqlx::query(&query)
            .bind(status.as_str())
            .bind(key.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(key.kind.as_str(), key.id));
        }
        Ok(())
    }

    async fn commit_statuses(&self, mutations: &[StatusMutation]) -> Result<usize, Error> {
        if mutations.is_empty() {
            return Ok(0);
        }

        let mut transaction = self.pool.begin().await?;
        let mut updated = 0u64;
        for mutation in mutations {
            let sql = table_sql(mutation.key.kind);
            let query = format!(
                "UPDATE {} SET status = $1::{}{} WHERE id = $2 AND is_deleted = false",
                sql.table, sql.status_type, sql.touch
            );
            updated += sqlx::query(&query)
                .bind(mutation.to.as_str())
                .bind(mutation.key.id)
                .execute(&mut *transaction)
                .await?
                .rows_affected();
        }
        transaction.commit().await?;

        debug!(staged = mutations.len(), updated, "Committed status batch");
        Ok(updated as usize)
    }

    async fn mark_deleted(&self, key: TenantKey) -> Result<bool, Error> {
        let sql = table_sql(key.kind);
        let query = format!(
            "UPDATE {} SET is_deleted = true, status = 'deleted'::{}{} \
             WHERE id = $1 AND is_deleted = false",
            sql.table, sql.status_type, sql.touch
        );
        let result = sqlx::query(&query).bind(key.id).execute(&self.pool).await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get(key).await? {
            Some(_) => Ok(false),
            None => Err(Error::not_found(key.kind.as_str(), key.id)),
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryState {
    tenants: BTreeMap<TenantKey, Tenant>,
    next_organization_id: i64,
    next_restaurant_id: i64,
}

impl MemoryState {
    fn next_id(&mut self, kind: TenantKind) -> i64 {
        let counter = match kind {
            TenantKind::Organization => &mut self.next_organization_id,
            TenantKind::Restaurant => &mut self.next_restaurant_id,
        };
        *counter += 1;
        *counter
    }

    fn live_mut(&mut self, key: TenantKey) -> Result<&mut Tenant, Error> {
        match self.tenants.get_mut(&key) {
            Some(t) if !t.is_deleted => Ok(t),
            _ => Err(Error::not_found(key.kind.as_str(), key.id)),
        }
    }
}

/// [`TenantStore`] kept in process memory
#[derive(Default)]
pub struct MemoryTenantStore {
    state: RwLock<MemoryState>,
}

impl MemoryTenantStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn list(&self, kind: TenantKind, filter: &ListFilter) -> Result<Vec<Tenant>, Error> {
        filter.validate()?;
        let state = self.state.read().await;
        Ok(state
            .tenants
            .values()
            .filter(|t| t.kind() == kind && filter.matches(t))
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, key: TenantKey) -> Result<Option<Tenant>, Error> {
        Ok(self.state.read().await.tenants.get(&key).cloned())
    }

    async fn insert(&self, tenant: NewTenant) -> Result<Tenant, Error> {
        let mut state = self.state.write().await;

        let duplicate = state
            .tenants
            .values()
            .any(|t| !t.is_deleted && t.name == tenant.name && t.scope == tenant.scope);
        if duplicate {
            return Err(Error::conflict(
                &tenant.name,
                "a tenant with this name already exists in the same scope",
            ));
        }

        let kind = match tenant.scope {
            TenantScope::Organization => TenantKind::Organization,
            TenantScope::Restaurant { .. } => TenantKind::Restaurant,
        };
        let now = Utc::now();
        let record = Tenant {
            id: state.next_id(kind),
            name: tenant.name,
            scope: tenant.scope,
            version: tenant.version,
            status: tenant.status,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        state.tenants.insert(record.key(), record.clone());
        Ok(record)
    }

    async fn update_version(
        &self,
        key: TenantKey,
        version: &Version,
        status: DomainStatus,
    ) -> Result<Tenant, Error> {
        let mut state = self.state.write().await;
        let tenant = state.live_mut(key)?;
        tenant.version = version.clone();
        tenant.status = status;
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }

    async fn set_status(&self, key: TenantKey, status: DomainStatus) -> Result<(), Error> {
        let mut state = self.state.write().await;
        let tenant = state
            .tenants
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(key.kind.as_str(), key.id))?;
        tenant.status = status;
        tenant.updated_at = Utc::now();
        Ok(())
    }

    async fn commit_statuses(&self, mutations: &[StatusMutation]) -> Result<usize, Error> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut updated = 0;
        for mutation in mutations {
            if let Some(tenant) = state.tenants.get_mut(&mutation.key) {
                if !tenant.is_deleted {
                    tenant.status = mutation.to;
                    tenant.updated_at = now;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn mark_deleted(&self, key: TenantKey) -> Result<bool, Error> {
        let mut state = self.state.write().await;
        let tenant = state
            .tenants
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(key.kind.as_str(), key.id))?;
        if tenant.is_deleted {
            return Ok(false);
        }
        tenant.is_deleted = true;
        tenant.status = DomainStatus::Deleted;
        tenant.updated_at = Utc::now();
        Ok(true)
    }
}
