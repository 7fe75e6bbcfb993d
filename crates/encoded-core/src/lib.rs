//! encoded-core: shared types, IDs, errors, encode options and configuration.
//!
//! This crate is the foundational dependency for the other encoded-* crates,
//! providing the job identifier, a unified error type with the job-level
//! failure taxonomy, the encode option snapshot carried by every job, and the
//! application configuration sections.

pub mod config;
pub mod error;
pub mod ids;
pub mod options;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, JobError, JobErrorKind, Result};
pub use ids::JobId;
pub use options::{Container, EncodeOptions};
