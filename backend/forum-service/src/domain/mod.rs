pub mod attitude;
pub mod models;
