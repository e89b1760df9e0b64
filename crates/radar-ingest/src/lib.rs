//! SSH Radar ingestion library
//!
//! Ingests failed authentication attempts from a host's login-failure log
//! (`lastb -F` over the btmp database) into PostgreSQL:
//!
//! - **parser**: two-tier line parser turning raw text into [`LoginAttempt`]
//!   records; unparseable lines are skipped, never errors
//! - **storage**: transactional, deduplicating writes keyed on the natural
//!   key (username, source IP, timestamp)
//! - **acquire**: obtains the raw text from the lastb command, a file, or
//!   stdin
//! - **geolocate**: enrichment of stored IPs through a pluggable provider
//! - **config**: environment-driven settings

pub mod acquire;
pub mod config;
pub mod geolocate;
pub mod parser;
pub mod storage;

pub use config::Config;
pub use parser::{LastbParser, LoginAttempt, Protocol};
pub use storage::AttemptStore;
