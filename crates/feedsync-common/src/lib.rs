//! Feedsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient concerns shared by the feedsync workspace members.
//!
//! - **Logging**: `tracing` subscriber configuration and initialization
//!
//! # Example
//!
//! ```no_run
//! use feedsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput, WorkerGuard};
