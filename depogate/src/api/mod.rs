//! API layer: route handlers and the request/response models they exchange.
//!
//! - **Uploads** (`/upload`): stream a file into a deposition's bucket
//! - **Depositions** (`/depositions/*`): thin pass-through to the archive's deposition API
//!
//! Every route here requires a bearer token accepted by the manuscript service.

pub mod handlers;
pub mod models;
