//! HTTP handlers, grouped by resource. Every handler takes the shared
//! [`MovieService`](crate::services::movie_service::MovieService) as state.

pub mod health_handlers;
pub mod link_handlers;
pub mod movie_handlers;
pub mod object_handlers;
