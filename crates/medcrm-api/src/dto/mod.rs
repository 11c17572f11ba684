//! Data Transfer Objects (DTOs) for API requests and responses

pub mod cache;
pub mod common;

pub use cache::*;
pub use common::*;
