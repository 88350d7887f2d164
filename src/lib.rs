//! OAuth2 login helper for Google Drive and Sheets clients.
//!
//! Restores a session from a saved refresh token, or walks the user through
//! the authorization-code flow on the console and saves the token it yields.

pub mod auth;
pub mod config;
pub mod drive;
pub mod error;
pub mod session;

pub use auth::prompt::{CodePrompt, ConsolePrompt};
pub use config::{ClientDefaults, CredentialConfig, DEFAULT_CONFIG_PATH, DEFAULT_SCOPES};
pub use error::{AppError, AuthError, ConfigError};
pub use session::{
    login_with_oauth, saved_session, ClientOrAccessToken, LegacyProxy, RefreshFailurePolicy,
    SavedSessionOptions, Session,
};
