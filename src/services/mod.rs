//! Service layer: the catalog operations and their collaborators.

pub mod link_issuer;
pub mod movie_service;
pub mod movie_store;
pub mod multipart;
pub mod seed;
pub mod storage_service;
