//! perftail - browser performance beacon capture.
//!
//! perftail accepts Web-Vitals, navigation and resource-timing beacons over
//! HTTP, folds them into rolling daily aggregates and mirrors the most recent
//! records into a shared-memory ring that any local process can tail.
//!
//! # Architecture
//!
//! - `receiver`: beacon parsing, record building and the HTTP surface
//! - `capture`: per-request routing with sampling and noise filtering
//! - `storage`: composite-key aggregation with retention purges
//! - `live`: the shared-memory live tail with cursor reads
//! - `metrics`: Web-Vitals window collation and gauge export
//! - `core`: records, configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use perftail_lib::core::Config;
//! use perftail_lib::receiver::BeaconReceiver;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let receiver = BeaconReceiver::from_config(Config::default())?;
//!     receiver.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod capture;
pub mod cli;
pub mod core;
pub mod live;
pub mod metrics;
pub mod receiver;
pub mod sampling;
pub mod storage;

// Re-export core types for convenience
pub use crate::core::{Config, PerfError, Result};
