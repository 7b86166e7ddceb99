//! App access token handling.

pub mod provider;
pub mod shared;

pub use provider::{AccessToken, TokenProvider, TwitchTokenProvider};
pub use shared::SharedToken;
