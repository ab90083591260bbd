//! PULU Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and wire formats for the PULU workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`PuluError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Wire time**: the millisecond timestamp format the Pulse API expects
//!
//! # Example
//!
//! ```no_run
//! use pulu_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod wire_time;

// Re-export commonly used types
pub use error::{PuluError, Result};
