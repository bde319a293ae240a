//! # TickDB Core Library
//!
//! Shared library providing the data model and wire types for the TickDB
//! HTTP API and its backends.
//!
//! ## Features
//!
//! - **Points**: batch-write payload decoding and normalization
//! - **Time**: epoch precision units and RFC3339 timestamp handling
//! - **Results**: the per-statement results envelope returned to clients
//! - **Identity**: caller identity and per-database privileges
//! - **Errors**: the error taxonomy shared across services

pub mod error;
pub mod node;
pub mod point;
pub mod results;
pub mod time;
pub mod user;

// Re-export commonly used types
pub use error::{TickError, TickResult};
pub use node::DataNode;
pub use point::{normalize_batch, BatchPoints, FieldType, FieldValue, NormalizedPoint, Point};
pub use results::{Results, Row, StatementResult};
pub use time::Precision;
pub use user::{Privilege, User};

/// Version information for TickDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
