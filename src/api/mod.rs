// src/api/mod.rs
// HTTP API surface

pub mod error;
pub mod http;

pub use error::{ApiError, ApiResult};
pub use http::router;
