//! HTTP surface of the caption service: configuration, routes and process bootstrap.
pub mod config;
mod error;
pub mod routes;
pub mod standalone;

pub use error::{ApiError, ApiResult};

pub mod exports {
    pub use super::standalone;
}
