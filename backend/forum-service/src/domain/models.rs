use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::attitude::{Counters, EffectiveAttitude, StoredAttitude};

/// Kind of content item. Posts live in a forum, comments live under a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Post,
    Comment,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Comment => "comment",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(ContentKind::Post),
            "comment" => Ok(ContentKind::Comment),
            other => Err(format!("unknown content kind: {}", other)),
        }
    }
}

/// Post or comment with its aggregate attitude counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub kind: ContentKind,
    /// Forum id for posts, post id for comments
    pub container_id: Uuid,
    pub owner_id: Uuid,
    /// Owner display name at creation time
    pub owner_name: String,
    pub title: Option<String>,
    pub body: String,
    pub likes: i64,
    pub dislikes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn counters(&self) -> Counters {
        Counters::new(self.likes, self.dislikes)
    }

    pub fn set_counters(&mut self, counters: Counters) {
        self.likes = counters.likes;
        self.dislikes = counters.dislikes;
    }
}

/// Caller-supplied fields of a new post or comment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContent {
    pub kind: ContentKind,
    pub container_id: Uuid,
    pub title: Option<String>,
    pub body: String,
}

impl NewContent {
    pub fn post(forum_id: Uuid, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Post,
            container_id: forum_id,
            title: Some(title.into()),
            body: body.into(),
        }
    }

    pub fn comment(post_id: Uuid, body: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Comment,
            container_id: post_id,
            title: None,
            body: body.into(),
        }
    }

    /// Build the stored item: owner stamped, counters at zero
    pub fn into_item(self, owner: &Identity, now: DateTime<Utc>) -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            kind: self.kind,
            container_id: self.container_id,
            owner_id: owner.id,
            owner_name: owner.display_name.clone(),
            title: self.title,
            body: self.body,
            likes: 0,
            dislikes: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stored attitude of one user toward one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttitudeRecord {
    pub owner_id: Uuid,
    pub item_id: Uuid,
    pub value: StoredAttitude,
}

/// Resolved user identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Caller as established by the authentication layer. The display name is
/// re-read from the identity provider, so only the id is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
}

impl AuthenticatedUser {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}

impl From<&Identity> for AuthenticatedUser {
    fn from(identity: &Identity) -> Self {
        Self { id: identity.id }
    }
}

/// Who is reading a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Identified(Identity),
}

impl From<Option<Identity>> for Viewer {
    fn from(identity: Option<Identity>) -> Self {
        match identity {
            Some(identity) => Viewer::Identified(identity),
            None => Viewer::Anonymous,
        }
    }
}

/// Content item joined with one viewer's effective attitude
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttitudeProjection {
    pub viewer_id: Option<Uuid>,
    pub viewer_name: Option<String>,
    pub attitude: EffectiveAttitude,
    pub item: ContentItem,
}

impl AttitudeProjection {
    pub fn anonymous(item: ContentItem) -> Self {
        Self {
            viewer_id: None,
            viewer_name: None,
            attitude: EffectiveAttitude::Neutral,
            item,
        }
    }

    pub fn for_identity(
        identity: &Identity,
        attitude: impl Into<EffectiveAttitude>,
        item: ContentItem,
    ) -> Self {
        Self {
            viewer_id: Some(identity.id),
            viewer_name: Some(identity.display_name.clone()),
            attitude: attitude.into(),
            item,
        }
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Sort order of a container listing. Ties always break on item id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Container order: oldest first
    #[default]
    Oldest,
    Newest,
    MostLiked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based page index
    pub page: u32,
    pub size: u32,
    #[serde(default)]
    pub sort: SortKey,
}

impl PageRequest {
    pub const DEFAULT_SIZE: u32 = 20;
    pub const MAX_SIZE: u32 = 100;

    /// Page size is clamped to 1..=MAX_SIZE
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.clamp(1, Self::MAX_SIZE),
            sort: SortKey::default(),
        }
    }

    pub fn sorted_by(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size.clamp(1, Self::MAX_SIZE))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * self.limit()
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    /// Total number of items in the container
    pub total: i64,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        (i64::from(self.page) + 1) * i64::from(self.size) < self.total
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps_size() {
        assert_eq!(PageRequest::new(0, 0).size, 1);
        assert_eq!(PageRequest::new(0, 500).size, PageRequest::MAX_SIZE);
        assert_eq!(PageRequest::new(3, 10).offset(), 30);
    }

    #[test]
    fn test_page_has_next() {
        let page = Page::<u8> {
            items: vec![],
            page: 0,
            size: 2,
            total: 3,
        };
        assert!(page.has_next());

        let last = Page::<u8> { page: 1, ..page };
        assert!(!last.has_next());
    }

    #[test]
    fn test_new_content_starts_at_zero() {
        let owner = Identity::new(Uuid::new_v4(), "alice");
        let item = NewContent::comment(Uuid::new_v4(), "hello").into_item(&owner, Utc::now());

        assert_eq!(item.owner_id, owner.id);
        assert_eq!(item.owner_name, "alice");
        assert_eq!(item.counters(), Counters::default());
    }

    #[test]
    fn test_viewer_from_identity() {
        assert_eq!(Viewer::from(None), Viewer::Anonymous);
        let identity = Identity::new(Uuid::new_v4(), "bob");
        assert_eq!(
            Viewer::from(Some(identity.clone())),
            Viewer::Identified(identity)
        );
    }
}
