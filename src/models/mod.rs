//! Core data models for CineDB.
//!
//! Movies and stored objects map onto SQLite tables via `sqlx::FromRow`
//! and serialize as JSON via `serde`. Form submissions are the decoded
//! shape of inbound request bodies.

pub mod form;
pub mod movie;
pub mod object;
