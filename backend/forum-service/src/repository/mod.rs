//! Storage seams of the forum service.
//!
//! Every read and write goes through a [`UnitOfWork`] obtained from a
//! [`Database`]. A unit is committed explicitly; dropping it without a
//! commit rolls everything back.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::attitude::{Counters, StoredAttitude};
use crate::domain::models::{AttitudeRecord, ContentItem, ContentKind, Identity, Page, PageRequest};
use crate::error::ServiceResult;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryDatabase, MemoryIdentityProvider};
pub use postgres::{PgDatabase, PgIdentityProvider};

/// Posts and comments with their counters
#[async_trait]
pub trait ContentStore: Send {
    async fn find_item(&mut self, item_id: Uuid) -> ServiceResult<Option<ContentItem>>;

    /// Like `find_item`, but holds the item row until the unit ends so
    /// counter updates on the same item are serialized
    async fn lock_item(&mut self, item_id: Uuid) -> ServiceResult<Option<ContentItem>>;

    async fn insert_item(&mut self, item: &ContentItem) -> ServiceResult<()>;

    /// Overwrite the counters; fails with `NotFound` if the item is gone
    async fn update_counters(
        &mut self,
        item_id: Uuid,
        counters: Counters,
    ) -> ServiceResult<ContentItem>;

    /// Returns true if a row was removed
    async fn delete_item(&mut self, item_id: Uuid) -> ServiceResult<bool>;

    /// One page of a container, ordered by `request.sort` with id as tiebreaker
    async fn find_page(
        &mut self,
        kind: ContentKind,
        container_id: Uuid,
        request: &PageRequest,
    ) -> ServiceResult<Page<ContentItem>>;
}

/// At most one attitude per (owner, item); absence means NEUTRAL
#[async_trait]
pub trait AttitudeStore: Send {
    async fn find_attitude(
        &mut self,
        owner_id: Uuid,
        item_id: Uuid,
    ) -> ServiceResult<Option<StoredAttitude>>;

    /// Insert or overwrite the record for (owner, item)
    async fn upsert_attitude(&mut self, record: &AttitudeRecord) -> ServiceResult<()>;

    async fn delete_attitude(&mut self, owner_id: Uuid, item_id: Uuid) -> ServiceResult<bool>;

    /// Cascade step of item deletion; returns the number of removed records
    async fn delete_attitudes_for_item(&mut self, item_id: Uuid) -> ServiceResult<u64>;
}

#[async_trait]
pub trait UnitOfWork: ContentStore + AttitudeStore {
    async fn commit(self: Box<Self>) -> ServiceResult<()>;

    async fn rollback(self: Box<Self>) -> ServiceResult<()>;
}

/// Factory for units of work
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> ServiceResult<Box<dyn UnitOfWork>>;
}

/// Resolves callers to identities; credentials never reach this service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Identity behind an opaque session token, if the session is live
    async fn resolve_session(&self, token: &str) -> ServiceResult<Option<Identity>>;

    async fn find_user(&self, user_id: Uuid) -> ServiceResult<Option<Identity>>;
}
