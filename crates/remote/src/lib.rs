//! HTTP client for the EMDash record database.
//!
//! Metadata calls go through the JSON-RPC endpoint; binaries are streamed
//! through the plain `/download` and `/record/.../edit` routes.

mod client;
mod error;

pub use client::{Client, UploadRequest};
pub use error::Error;
