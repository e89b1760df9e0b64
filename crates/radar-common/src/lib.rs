//! SSH Radar Common Library
//!
//! Shared error handling and logging setup for the SSH Radar workspace:
//!
//! - **Error Handling**: the [`RadarError`] enum and [`Result`] alias
//! - **Logging**: tracing-based logging configured from the environment

pub mod error;
pub mod logging;

pub use error::{RadarError, Result};
