//! Joins content items with one viewer's attitude.

use crate::domain::models::{AttitudeProjection, ContentItem, Page, Viewer};
use crate::error::ServiceResult;
use crate::repository::AttitudeStore;

/// Project a single item for `viewer`. One attitude lookup at most.
pub async fn project_item<S>(
    store: &mut S,
    viewer: &Viewer,
    item: ContentItem,
) -> ServiceResult<AttitudeProjection>
where
    S: AttitudeStore + ?Sized,
{
    match viewer {
        Viewer::Anonymous => Ok(AttitudeProjection::anonymous(item)),
        Viewer::Identified(identity) => {
            let stored = store.find_attitude(identity.id, item.id).await?;
            Ok(AttitudeProjection::for_identity(identity, stored, item))
        }
    }
}

/// Project a page, keeping its order and size. Anonymous viewers cost no
/// lookups; identified viewers cost one read per item.
pub async fn project_page<S>(
    store: &mut S,
    viewer: &Viewer,
    page: Page<ContentItem>,
) -> ServiceResult<Page<AttitudeProjection>>
where
    S: AttitudeStore + ?Sized,
{
    let identity = match viewer {
        Viewer::Anonymous => return Ok(page.map(AttitudeProjection::anonymous)),
        Viewer::Identified(identity) => identity,
    };

    let Page {
        items,
        page,
        size,
        total,
    } = page;

    let mut projected = Vec::with_capacity(items.len());
    for item in items {
        let stored = store.find_attitude(identity.id, item.id).await?;
        projected.push(AttitudeProjection::for_identity(identity, stored, item));
    }

    Ok(Page {
        items: projected,
        page,
        size,
        total,
    })
}
