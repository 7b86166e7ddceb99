//! twitch-srec library crate.
//!
//! This module exposes the core functionality for integration testing.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod recorder;
pub mod scheduler;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;

pub use error::{Error, Result};
