//! Data models for the remote user directory.
//!
//! This module contains the records returned by the REST API:
//!
//! - `User` with its embedded `Address` (and `Geo`) and `Company`
//! - `Post` and `Comment`
//! - Write payloads: `NewUser` for creation, `UserPatch` for partial updates
//!
//! All records are plain values. Updates always produce a new record.

pub mod post;
pub mod user;

pub use post::{Comment, Post};
pub use user::{parse_user_slug, Address, Company, Geo, NewUser, User, UserPatch};
