pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod services;

pub use domain::attitude::{EffectiveAttitude, StoredAttitude};
pub use domain::models::{
    AttitudeProjection, AuthenticatedUser, ContentItem, ContentKind, Identity, NewContent, Page,
    PageRequest, SortKey, Viewer,
};
pub use error::{ServiceError, ServiceResult};
pub use services::{AttitudeService, ServiceSettings};
