//! Core domain models for perftail.
//!
//! This module contains the record types, configuration and error
//! handling shared by capture, aggregation and the live tail.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{Malformed, PerfError, Result};
pub use types::{
    DeviceClass, MetricKind, MetricRecord, MimeCategory, RequestContext, ResourceDimensions,
};
