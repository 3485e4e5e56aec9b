//! Axum route handlers.
//!
//! - [`uploads`]: the multipart upload endpoint, backed by the upload pipeline
//! - [`depositions`]: create, read, update and version archive depositions

pub mod depositions;
pub mod uploads;
