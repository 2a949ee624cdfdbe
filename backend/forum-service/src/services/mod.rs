pub mod attitude;
pub mod projection;

pub use attitude::{AttitudeService, ServiceSettings};
