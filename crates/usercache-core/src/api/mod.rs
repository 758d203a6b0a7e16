//! REST API client module for the user directory service.
//!
//! This module provides the `ApiClient` for reading users, posts and
//! comments and for creating, updating and deleting users.
//!
//! Every response body is validated against the expected record shape;
//! a 2xx response with a malformed body is reported as `ApiError::InvalidData`.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
