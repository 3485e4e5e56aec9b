//! Wire types shared by the handlers and the archive client.

pub mod depositions;
