//! Sheetflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the Sheetflow workspace members.
//!
//! # Overview
//!
//! - **Logging**: one place to configure `tracing` output for every binary
//! - **Environment**: typed readers for `SHEETFLOW`-style environment settings
//! - **Errors**: the error type those readers return
//!
//! # Example
//!
//! ```no_run
//! use sheetflow_common::{env, logging::{init_logging, LogConfig}};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let pacing: u64 = env::parse_or("PIPELINE_PACING_SECS", 60)?;
//!     tracing::info!(pacing, "configured");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
