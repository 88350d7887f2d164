//! Google OAuth2 authentication module.
//!
//! Provides the authorization-code flow with PKCE, refresh-token exchange
//! and the console prompt used to collect authorization codes.

pub mod oauth;
pub mod prompt;
pub mod token;
