//! # qrcode-api
//!
//! Core of a QR code generation service: take a target string from an
//! authenticated caller, encode it as a QR code at High error correction,
//! render a 200x200 PNG, keep the PNG as an artifact, append an audit record,
//! and return the PNG. The audit trail can be listed back in append order.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use qrcode_api::{
//!     artifact::MemoryArtifactStore, audit::MemoryAuditLog, clock::SystemClock,
//!     config::ServiceConfig, GenerateRequest, Pipeline,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> qrcode_api::Result<()> {
//! let pipeline = Pipeline::new(
//!     ServiceConfig::default(),
//!     Arc::new(MemoryArtifactStore::new()),
//!     Arc::new(MemoryAuditLog::new()),
//!     Arc::new(SystemClock),
//! );
//!
//! let png = pipeline.generate(GenerateRequest::new("https://example.com/"), "123".into()).await?;
//! assert_eq!(png.dimensions(), (200, 200));
//!
//! let records = pipeline.list(None).await?;
//! assert_eq!(records[0].caller_id, "123");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`qrcode`]: QR code encoding.
//! - [`render`]: Scaling and PNG encoding.
//! - [`artifact`]: Artifact keys and storage.
//! - [`audit`]: The CSV audit trail.
//! - [`pipeline`]: Generation and listing.
//! - [`api`]: Request handlers producing status, headers and body.

#![forbid(unsafe_code)]

pub mod api;
pub mod artifact;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod qrcode;
pub mod render;

pub use error::{QrApiError, Result};
pub use pipeline::{CallerId, GenerateRequest, Pipeline};
