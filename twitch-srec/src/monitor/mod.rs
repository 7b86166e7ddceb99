//! Channel status monitoring.

pub mod client;
pub mod status;

pub use client::{HelixStatusClient, StatusClient, classify_response};
pub use status::{StreamMetadata, StreamStatus};
