//! HTTP access to the marketplace back end.

pub mod api;
pub mod types;

pub use api::{ApiClient, ApiError};
