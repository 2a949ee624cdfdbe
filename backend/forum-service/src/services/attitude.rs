use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::projection;
use crate::domain::attitude::{self, EffectiveAttitude, StoredAttitude};
use crate::domain::models::{
    AttitudeProjection, AttitudeRecord, AuthenticatedUser, ContentKind, Identity, NewContent,
    Page, PageRequest, Viewer,
};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::repository::{AttitudeStore, ContentStore, Database, IdentityProvider, UnitOfWork};

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Replays of a unit of work that failed with `Conflict`
    pub conflict_retries: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            conflict_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttitudeChange {
    Set(StoredAttitude),
    Withdraw,
}

impl AttitudeChange {
    fn label(&self) -> &'static str {
        match self {
            AttitudeChange::Set(StoredAttitude::Like) => "like",
            AttitudeChange::Set(StoredAttitude::Dislike) => "dislike",
            AttitudeChange::Withdraw => "withdraw",
        }
    }
}

/// Likes, dislikes and ownership of posts and comments
#[derive(Clone)]
pub struct AttitudeService {
    db: Arc<dyn Database>,
    identities: Arc<dyn IdentityProvider>,
    settings: ServiceSettings,
}

impl AttitudeService {
    pub fn new(
        db: Arc<dyn Database>,
        identities: Arc<dyn IdentityProvider>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            db,
            identities,
            settings,
        }
    }

    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn like(
        &self,
        item_id: Uuid,
        actor: &AuthenticatedUser,
    ) -> ServiceResult<AttitudeProjection> {
        self.change_attitude(item_id, actor, AttitudeChange::Set(StoredAttitude::Like))
            .await
    }

    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn dislike(
        &self,
        item_id: Uuid,
        actor: &AuthenticatedUser,
    ) -> ServiceResult<AttitudeProjection> {
        self.change_attitude(item_id, actor, AttitudeChange::Set(StoredAttitude::Dislike))
            .await
    }

    /// Return to NEUTRAL by removing the actor's attitude record
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn clear_attitude(
        &self,
        item_id: Uuid,
        actor: &AuthenticatedUser,
    ) -> ServiceResult<AttitudeProjection> {
        self.change_attitude(item_id, actor, AttitudeChange::Withdraw)
            .await
    }

    #[instrument(skip(self, content), fields(kind = %content.kind, container = %content.container_id))]
    pub async fn create_content(
        &self,
        content: NewContent,
        actor: Option<&AuthenticatedUser>,
    ) -> ServiceResult<AttitudeProjection> {
        let actor =
            actor.ok_or_else(|| ServiceError::Validation("User is required".to_string()))?;
        validate_new_content(&content)?;
        let identity = self.resolve_actor(actor).await?;

        let mut uow = self.db.begin().await?;
        let result = async {
            if content.kind == ContentKind::Comment {
                // Held until commit so the post cannot be deleted underneath
                match uow.lock_item(content.container_id).await? {
                    Some(parent) if parent.kind == ContentKind::Post => {}
                    _ => {
                        return Err(ServiceError::NotFound(format!(
                            "post {}",
                            content.container_id
                        )))
                    }
                }
            }

            let item = content.into_item(&identity, Utc::now());
            uow.insert_item(&item).await?;
            Ok::<_, ServiceError>(item)
        }
        .await;
        let item = finish(uow, result).await;

        metrics::record_content_operation("create", outcome(&item));
        let item = item?;
        info!(item_id = %item.id, owner = %identity.id, "Content created");

        Ok(AttitudeProjection::for_identity(
            &identity,
            EffectiveAttitude::Neutral,
            item,
        ))
    }

    /// Delete an item and, in the same unit of work, every attitude on it
    #[instrument(skip(self), fields(actor = %actor.id))]
    pub async fn delete_content(
        &self,
        item_id: Uuid,
        actor: &AuthenticatedUser,
    ) -> ServiceResult<()> {
        let mut uow = self.db.begin().await?;
        let result = async {
            let item = uow
                .lock_item(item_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("content item {}", item_id)))?;

            if item.owner_id != actor.id {
                return Err(ServiceError::Authorization(
                    "User is not the owner".to_string(),
                ));
            }

            let removed = uow.delete_attitudes_for_item(item_id).await?;
            uow.delete_item(item_id).await?;
            Ok::<_, ServiceError>(removed)
        }
        .await;
        let removed = finish(uow, result).await;

        metrics::record_content_operation("delete", outcome(&removed));
        let removed = removed?;
        info!(%item_id, attitudes_removed = removed, "Content deleted");
        Ok(())
    }

    /// One page of a forum's posts or a post's comments, joined with the
    /// viewer's own attitude
    #[instrument(skip(self, viewer))]
    pub async fn list_by_container(
        &self,
        kind: ContentKind,
        container_id: Uuid,
        viewer: &Viewer,
        request: PageRequest,
    ) -> ServiceResult<Page<AttitudeProjection>> {
        let mut uow = self.db.begin().await?;
        let result = async {
            let page = uow.find_page(kind, container_id, &request).await?;
            projection::project_page(&mut *uow, viewer, page).await
        }
        .await;
        finish(uow, result).await
    }

    #[instrument(skip(self, viewer))]
    pub async fn find_content(
        &self,
        item_id: Uuid,
        viewer: &Viewer,
    ) -> ServiceResult<AttitudeProjection> {
        let mut uow = self.db.begin().await?;
        let result = async {
            let item = uow
                .find_item(item_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("content item {}", item_id)))?;
            projection::project_item(&mut *uow, viewer, item).await
        }
        .await;
        finish(uow, result).await
    }

    /// Viewer for an opaque session token; unknown or expired tokens read
    /// as anonymous
    pub async fn viewer_for_session(&self, token: Option<&str>) -> ServiceResult<Viewer> {
        match token {
            Some(token) => Ok(self.identities.resolve_session(token).await?.into()),
            None => Ok(Viewer::Anonymous),
        }
    }

    async fn resolve_actor(&self, actor: &AuthenticatedUser) -> ServiceResult<Identity> {
        self.identities
            .find_user(actor.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", actor.id)))
    }

    async fn change_attitude(
        &self,
        item_id: Uuid,
        actor: &AuthenticatedUser,
        change: AttitudeChange,
    ) -> ServiceResult<AttitudeProjection> {
        let identity = self.resolve_actor(actor).await?;

        let mut attempt = 0;
        loop {
            let mut uow = self.db.begin().await?;
            let result = apply_change(&mut *uow, item_id, &identity, change).await;

            match finish(uow, result).await {
                Err(err) if err.is_conflict() && attempt < self.settings.conflict_retries => {
                    attempt += 1;
                    metrics::record_conflict_retry(change.label());
                    warn!(
                        %item_id,
                        attempt,
                        max_retries = self.settings.conflict_retries,
                        error = %err,
                        "Attitude write conflicted, retrying"
                    );
                }
                other => return other,
            }
        }
    }
}

/// Read, transition and write inside one unit of work
async fn apply_change(
    uow: &mut dyn UnitOfWork,
    item_id: Uuid,
    identity: &Identity,
    change: AttitudeChange,
) -> ServiceResult<AttitudeProjection> {
    let mut item = uow
        .lock_item(item_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("content item {}", item_id)))?;
    let previous = uow.find_attitude(identity.id, item_id).await?;

    let (counters, resulting, changed) = match change {
        AttitudeChange::Set(target) => {
            let t = attitude::transition(previous, target, item.counters())?;
            if t.changed {
                uow.upsert_attitude(&AttitudeRecord {
                    owner_id: identity.id,
                    item_id,
                    value: t.record,
                })
                .await?;
            }
            (t.counters, EffectiveAttitude::from(t.record), t.changed)
        }
        AttitudeChange::Withdraw => {
            let w = attitude::withdraw(previous, item.counters())?;
            if w.changed {
                uow.delete_attitude(identity.id, item_id).await?;
            }
            (w.counters, EffectiveAttitude::Neutral, w.changed)
        }
    };

    if changed {
        item = uow.update_counters(item_id, counters).await?;
        info!(
            %item_id,
            previous = ?previous,
            attitude = ?resulting,
            likes = item.likes,
            dislikes = item.dislikes,
            "Attitude changed"
        );
    } else {
        debug!(%item_id, attitude = ?resulting, "Attitude unchanged");
    }
    metrics::record_transition(item.kind.as_str(), change.label(), changed);

    Ok(AttitudeProjection::for_identity(identity, resulting, item))
}

/// Commit on success, roll back on failure. The operation's error wins over
/// a rollback error.
async fn finish<T>(uow: Box<dyn UnitOfWork>, result: ServiceResult<T>) -> ServiceResult<T> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

fn outcome<T>(result: &ServiceResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    }
}

fn validate_new_content(content: &NewContent) -> ServiceResult<()> {
    if content.body.trim().is_empty() {
        return Err(ServiceError::Validation("Body is required".to_string()));
    }
    if content.kind == ContentKind::Post
        && content
            .title
            .as_deref()
            .map(str::trim)
            .map_or(true, str::is_empty)
    {
        return Err(ServiceError::Validation(
            "Post title is required".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryDatabase, MockIdentityProvider};
    use mockall::predicate::eq;

    fn service_with(identities: MockIdentityProvider) -> (AttitudeService, MemoryDatabase) {
        let db = MemoryDatabase::new();
        let service = AttitudeService::new(
            Arc::new(db.clone()),
            Arc::new(identities),
            ServiceSettings::default(),
        );
        (service, db)
    }

    #[test]
    fn test_validate_new_content() {
        let forum = Uuid::new_v4();
        assert!(validate_new_content(&NewContent::post(forum, "title", "body")).is_ok());
        assert!(validate_new_content(&NewContent::post(forum, "  ", "body")).is_err());
        assert!(validate_new_content(&NewContent::comment(forum, "\n")).is_err());
    }

    #[tokio::test]
    async fn test_unknown_actor_is_not_found() {
        let ghost = Uuid::new_v4();
        let mut identities = MockIdentityProvider::new();
        identities
            .expect_find_user()
            .with(eq(ghost))
            .times(1)
            .returning(|_| Ok(None));
        let (service, db) = service_with(identities);

        let err = service
            .create_content(
                NewContent::post(Uuid::new_v4(), "t", "b"),
                Some(&AuthenticatedUser::new(ghost)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(db.item_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_actor_never_reaches_identity_provider() {
        let mut identities = MockIdentityProvider::new();
        identities.expect_find_user().never();
        let (service, db) = service_with(identities);

        let err = service
            .create_content(NewContent::post(Uuid::new_v4(), "t", "b"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(db.item_count().await, 0);
    }

    #[tokio::test]
    async fn test_viewer_for_session() {
        let alice = Identity::new(Uuid::new_v4(), "alice");
        let resolved = alice.clone();
        let mut identities = MockIdentityProvider::new();
        identities
            .expect_resolve_session()
            .returning(move |token| {
                Ok((token == "live").then(|| resolved.clone()))
            });
        let (service, _) = service_with(identities);

        assert_eq!(
            service.viewer_for_session(Some("live")).await.unwrap(),
            Viewer::Identified(alice)
        );
        assert_eq!(
            service.viewer_for_session(Some("expired")).await.unwrap(),
            Viewer::Anonymous
        );
        assert_eq!(
            service.viewer_for_session(None).await.unwrap(),
            Viewer::Anonymous
        );
    }
}
