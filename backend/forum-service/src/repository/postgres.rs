use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{AttitudeStore, ContentStore, Database, IdentityProvider, UnitOfWork};
use crate::domain::attitude::{Counters, StoredAttitude};
use crate::domain::models::{
    AttitudeRecord, ContentItem, ContentKind, Identity, Page, PageRequest, SortKey,
};
use crate::error::{ServiceError, ServiceResult};

const ITEM_COLUMNS: &str = "id, kind, container_id, owner_id, owner_name, title, body, \
                            likes, dislikes, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ContentItemRow {
    id: Uuid,
    kind: String,
    container_id: Uuid,
    owner_id: Uuid,
    owner_name: String,
    title: Option<String>,
    body: String,
    likes: i64,
    dislikes: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContentItemRow> for ContentItem {
    type Error = ServiceError;

    fn try_from(row: ContentItemRow) -> Result<Self, Self::Error> {
        Ok(ContentItem {
            id: row.id,
            kind: row.kind.parse().map_err(ServiceError::Internal)?,
            container_id: row.container_id,
            owner_id: row.owner_id,
            owner_name: row.owner_name,
            title: row.title,
            body: row.body,
            likes: row.likes,
            dislikes: row.dislikes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn order_clause(sort: SortKey) -> &'static str {
    match sort {
        SortKey::Oldest => "created_at ASC, id ASC",
        SortKey::Newest => "created_at DESC, id DESC",
        SortKey::MostLiked => "likes DESC, created_at ASC, id ASC",
    }
}

/// PostgreSQL-backed unit-of-work factory
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connectivity check for the health endpoint
    pub async fn ping(&self) -> ServiceResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> ServiceResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// One PostgreSQL transaction. sqlx rolls back a dropped transaction.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    async fn fetch_item(
        &mut self,
        item_id: Uuid,
        for_update: bool,
    ) -> ServiceResult<Option<ContentItem>> {
        let query = format!(
            "SELECT {} FROM content_items WHERE id = $1{}",
            ITEM_COLUMNS,
            if for_update { " FOR UPDATE" } else { "" }
        );

        let row = sqlx::query_as::<_, ContentItemRow>(&query)
            .bind(item_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(ContentItem::try_from).transpose()
    }
}

#[async_trait]
impl ContentStore for PgUnitOfWork {
    async fn find_item(&mut self, item_id: Uuid) -> ServiceResult<Option<ContentItem>> {
        self.fetch_item(item_id, false).await
    }

    async fn lock_item(&mut self, item_id: Uuid) -> ServiceResult<Option<ContentItem>> {
        self.fetch_item(item_id, true).await
    }

    async fn insert_item(&mut self, item: &ContentItem) -> ServiceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO content_items
                (id, kind, container_id, owner_id, owner_name, title, body,
                 likes, dislikes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(item.id)
        .bind(item.kind.as_str())
        .bind(item.container_id)
        .bind(item.owner_id)
        .bind(&item.owner_name)
        .bind(&item.title)
        .bind(&item.body)
        .bind(item.likes)
        .bind(item.dislikes)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_counters(
        &mut self,
        item_id: Uuid,
        counters: Counters,
    ) -> ServiceResult<ContentItem> {
        let query = format!(
            r#"
            UPDATE content_items
            SET likes = $2, dislikes = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );

        let row = sqlx::query_as::<_, ContentItemRow>(&query)
            .bind(item_id)
            .bind(counters.likes)
            .bind(counters.dislikes)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(ContentItem::try_from)
            .transpose()?
            .ok_or_else(|| ServiceError::NotFound(format!("content item {}", item_id)))
    }

    async fn delete_item(&mut self, item_id: Uuid) -> ServiceResult<bool> {
        let result = sqlx::query("DELETE FROM content_items WHERE id = $1")
            .bind(item_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_page(
        &mut self,
        kind: ContentKind,
        container_id: Uuid,
        request: &PageRequest,
    ) -> ServiceResult<Page<ContentItem>> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM content_items
            WHERE kind = $1 AND container_id = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(container_id)
        .fetch_one(&mut *self.tx)
        .await?;

        let query = format!(
            r#"
            SELECT {}
            FROM content_items
            WHERE kind = $1 AND container_id = $2
            ORDER BY {}
            LIMIT $3 OFFSET $4
            "#,
            ITEM_COLUMNS,
            order_clause(request.sort)
        );

        let rows = sqlx::query_as::<_, ContentItemRow>(&query)
            .bind(kind.as_str())
            .bind(container_id)
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&mut *self.tx)
            .await?;

        let items = rows
            .into_iter()
            .map(ContentItem::try_from)
            .collect::<ServiceResult<Vec<_>>>()?;

        Ok(Page {
            items,
            page: request.page,
            size: request.limit() as u32,
            total,
        })
    }
}

#[async_trait]
impl AttitudeStore for PgUnitOfWork {
    async fn find_attitude(
        &mut self,
        owner_id: Uuid,
        item_id: Uuid,
    ) -> ServiceResult<Option<StoredAttitude>> {
        let value: Option<String> = sqlx::query_scalar(
            r#"
            SELECT value FROM attitudes
            WHERE owner_id = $1 AND item_id = $2
            "#,
        )
        .bind(owner_id)
        .bind(item_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        value
            .map(|v| v.parse().map_err(ServiceError::Internal))
            .transpose()
    }

    async fn upsert_attitude(&mut self, record: &AttitudeRecord) -> ServiceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO attitudes (owner_id, item_id, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner_id, item_id) DO UPDATE
            SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(record.owner_id)
        .bind(record.item_id)
        .bind(record.value.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_attitude(&mut self, owner_id: Uuid, item_id: Uuid) -> ServiceResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM attitudes
            WHERE owner_id = $1 AND item_id = $2
            "#,
        )
        .bind(owner_id)
        .bind(item_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_attitudes_for_item(&mut self, item_id: Uuid) -> ServiceResult<u64> {
        let result = sqlx::query("DELETE FROM attitudes WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> ServiceResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ServiceResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Reads identities from the tables owned by the identity layer
#[derive(Clone)]
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn resolve_session(&self, token: &str) -> ServiceResult<Option<Identity>> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT u.id, u.display_name
            FROM user_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = $1 AND s.expires_at > NOW()
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, display_name)| Identity { id, display_name }))
    }

    async fn find_user(&self, user_id: Uuid) -> ServiceResult<Option<Identity>> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT id, display_name
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, display_name)| Identity { id, display_name }))
    }
}
