//! In-process store used by tests and local runs.
//!
//! A unit of work holds the store mutex for its whole lifetime and edits a
//! private copy of the state, so units are fully serialized and a unit that
//! is dropped or rolled back leaves no trace.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{AttitudeStore, ContentStore, Database, IdentityProvider, UnitOfWork};
use crate::domain::attitude::{Counters, StoredAttitude};
use crate::domain::models::{
    AttitudeRecord, ContentItem, ContentKind, Identity, Page, PageRequest, SortKey,
};
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    items: HashMap<Uuid, ContentItem>,
    attitudes: HashMap<(Uuid, Uuid), StoredAttitude>,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    /// Number of upcoming attitude writes that fail with `Conflict`
    injected_conflicts: Arc<AtomicU32>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` attitude upserts fail as if another unit had
    /// inserted the same (owner, item) key first
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Committed state of an item
    pub async fn item(&self, item_id: Uuid) -> Option<ContentItem> {
        self.state.lock().await.items.get(&item_id).cloned()
    }

    /// Committed attitude of `owner_id` toward `item_id`
    pub async fn attitude(&self, owner_id: Uuid, item_id: Uuid) -> Option<StoredAttitude> {
        self.state
            .lock()
            .await
            .attitudes
            .get(&(owner_id, item_id))
            .copied()
    }

    /// Committed attitude records referencing `item_id`, tallied by value
    pub async fn tally(&self, item_id: Uuid) -> Counters {
        let state = self.state.lock().await;
        state
            .attitudes
            .iter()
            .filter(|((_, item), _)| *item == item_id)
            .fold(Counters::default(), |mut acc, (_, value)| {
                match value {
                    StoredAttitude::Like => acc.likes += 1,
                    StoredAttitude::Dislike => acc.dislikes += 1,
                }
                acc
            })
    }

    pub async fn item_count(&self) -> usize {
        self.state.lock().await.items.len()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> ServiceResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            injected_conflicts: self.injected_conflicts.clone(),
        }))
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    injected_conflicts: Arc<AtomicU32>,
}

impl MemoryUnitOfWork {
    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn compare_items(sort: SortKey, a: &ContentItem, b: &ContentItem) -> std::cmp::Ordering {
    match sort {
        SortKey::Oldest => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
        SortKey::Newest => b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)),
        SortKey::MostLiked => b
            .likes
            .cmp(&a.likes)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id)),
    }
}

#[async_trait]
impl ContentStore for MemoryUnitOfWork {
    async fn find_item(&mut self, item_id: Uuid) -> ServiceResult<Option<ContentItem>> {
        Ok(self.working.items.get(&item_id).cloned())
    }

    async fn lock_item(&mut self, item_id: Uuid) -> ServiceResult<Option<ContentItem>> {
        // The whole store is already held by this unit
        self.find_item(item_id).await
    }

    async fn insert_item(&mut self, item: &ContentItem) -> ServiceResult<()> {
        if self.working.items.contains_key(&item.id) {
            return Err(ServiceError::Conflict(format!(
                "content item {} already exists",
                item.id
            )));
        }
        self.working.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_counters(
        &mut self,
        item_id: Uuid,
        counters: Counters,
    ) -> ServiceResult<ContentItem> {
        let item = self
            .working
            .items
            .get_mut(&item_id)
            .ok_or_else(|| ServiceError::NotFound(format!("content item {}", item_id)))?;
        item.set_counters(counters);
        item.updated_at = chrono::Utc::now();
        Ok(item.clone())
    }

    async fn delete_item(&mut self, item_id: Uuid) -> ServiceResult<bool> {
        Ok(self.working.items.remove(&item_id).is_some())
    }

    async fn find_page(
        &mut self,
        kind: ContentKind,
        container_id: Uuid,
        request: &PageRequest,
    ) -> ServiceResult<Page<ContentItem>> {
        let mut matching: Vec<&ContentItem> = self
            .working
            .items
            .values()
            .filter(|item| item.kind == kind && item.container_id == container_id)
            .collect();
        matching.sort_by(|a, b| compare_items(request.sort, a, b));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit() as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page: request.page,
            size: request.limit() as u32,
            total,
        })
    }
}

#[async_trait]
impl AttitudeStore for MemoryUnitOfWork {
    async fn find_attitude(
        &mut self,
        owner_id: Uuid,
        item_id: Uuid,
    ) -> ServiceResult<Option<StoredAttitude>> {
        Ok(self.working.attitudes.get(&(owner_id, item_id)).copied())
    }

    async fn upsert_attitude(&mut self, record: &AttitudeRecord) -> ServiceResult<()> {
        if self.take_injected_conflict() {
            return Err(ServiceError::Conflict(format!(
                "duplicate attitude for ({}, {})",
                record.owner_id, record.item_id
            )));
        }
        self.working
            .attitudes
            .insert((record.owner_id, record.item_id), record.value);
        Ok(())
    }

    async fn delete_attitude(&mut self, owner_id: Uuid, item_id: Uuid) -> ServiceResult<bool> {
        Ok(self.working.attitudes.remove(&(owner_id, item_id)).is_some())
    }

    async fn delete_attitudes_for_item(&mut self, item_id: Uuid) -> ServiceResult<u64> {
        let before = self.working.attitudes.len();
        self.working.attitudes.retain(|(_, item), _| *item != item_id);
        Ok((before - self.working.attitudes.len()) as u64)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> ServiceResult<()> {
        let MemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> ServiceResult<()> {
        Ok(())
    }
}

/// Fixed set of users and sessions
#[derive(Clone, Default)]
pub struct MemoryIdentityProvider {
    users: Arc<RwLock<HashMap<Uuid, Identity>>>,
    sessions: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, identity: Identity) {
        self.users.write().await.insert(identity.id, identity);
    }

    pub async fn add_session(&self, token: impl Into<String>, user_id: Uuid) {
        self.sessions.write().await.insert(token.into(), user_id);
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn resolve_session(&self, token: &str) -> ServiceResult<Option<Identity>> {
        let user_id = match self.sessions.read().await.get(token) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.find_user(user_id).await
    }

    async fn find_user(&self, user_id: Uuid) -> ServiceResult<Option<Identity>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NewContent;
    use chrono::{Duration, Utc};

    fn comment(post_id: Uuid, owner: &Identity, minutes_ago: i64) -> ContentItem {
        NewContent::comment(post_id, "body")
            .into_item(owner, Utc::now() - Duration::minutes(minutes_ago))
    }

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() {
        let db = MemoryDatabase::new();
        let owner = Identity::new(Uuid::new_v4(), "alice");
        let item = comment(Uuid::new_v4(), &owner, 0);

        {
            let mut uow = db.begin().await.unwrap();
            uow.insert_item(&item).await.unwrap();
        }
        assert!(db.item(item.id).await.is_none());

        let mut uow = db.begin().await.unwrap();
        uow.insert_item(&item).await.unwrap();
        uow.commit().await.unwrap();
        assert!(db.item(item.id).await.is_some());
    }

    #[tokio::test]
    async fn test_find_page_orders_and_counts() {
        let db = MemoryDatabase::new();
        let owner = Identity::new(Uuid::new_v4(), "alice");
        let post_id = Uuid::new_v4();
        let oldest = comment(post_id, &owner, 30);
        let middle = comment(post_id, &owner, 20);
        let newest = comment(post_id, &owner, 10);
        let elsewhere = comment(Uuid::new_v4(), &owner, 5);

        let mut uow = db.begin().await.unwrap();
        for item in [&newest, &oldest, &elsewhere, &middle] {
            uow.insert_item(item).await.unwrap();
        }

        let page = uow
            .find_page(ContentKind::Comment, post_id, &PageRequest::new(0, 2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(
            page.items.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![oldest.id, middle.id]
        );
        assert!(page.has_next());

        let newest_first = uow
            .find_page(
                ContentKind::Comment,
                post_id,
                &PageRequest::new(0, 10).sorted_by(SortKey::Newest),
            )
            .await
            .unwrap();
        assert_eq!(newest_first.items[0].id, newest.id);
    }

    #[tokio::test]
    async fn test_injected_conflict_fires_once() {
        let db = MemoryDatabase::new();
        db.inject_conflicts(1);
        let record = AttitudeRecord {
            owner_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            value: StoredAttitude::Like,
        };

        let mut uow = db.begin().await.unwrap();
        assert!(uow.upsert_attitude(&record).await.unwrap_err().is_conflict());
        assert!(uow.upsert_attitude(&record).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_resolution() {
        let identities = MemoryIdentityProvider::new();
        let alice = Identity::new(Uuid::new_v4(), "alice");
        identities.add_user(alice.clone()).await;
        identities.add_session("token-a", alice.id).await;

        assert_eq!(
            identities.resolve_session("token-a").await.unwrap(),
            Some(alice)
        );
        assert_eq!(identities.resolve_session("nope").await.unwrap(), None);
    }
}
