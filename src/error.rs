//! Error types for the gdrive-login crate.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type returned by the login entry points.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Stored refresh token was rejected: {0}")]
    RefreshTokenRejected(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error(
        "Specifying a proxy object is no longer supported. \
         Set the http_proxy environment variable instead."
    )]
    ProxyUnsupported,

    #[error("User cancelled authentication")]
    UserCancelled,
}

/// Credential file errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed credential file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(
        "OAuth client_id/client_secret not configured. Pass them explicitly, \
         set GDRIVE_CLIENT_ID and GDRIVE_CLIENT_SECRET, or add them to the credential file"
    )]
    MissingClientCredentials,
}

/// Drive API errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Drive API request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,
}

impl AppError {
    /// Returns a short message suitable for printing on the console.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::OAuthFailed(_)) => "Authorization failed. Please try again.",
            Self::Auth(AuthError::InvalidAuthCode) => "The authorization code was empty or invalid.",
            Self::Auth(AuthError::RefreshTokenRejected(_)) => {
                "Saved login is no longer valid. Remove the refresh token and log in again."
            }
            Self::Auth(AuthError::ProxyUnsupported) => {
                "Proxy objects are not supported. Set http_proxy instead."
            }
            Self::Auth(AuthError::UserCancelled) => "Login was cancelled.",
            Self::Config(ConfigError::MissingClientCredentials) => {
                "OAuth client credentials are missing."
            }
            Self::Config(ConfigError::Parse { .. }) => "The credential file is not valid JSON.",
            Self::Api(ApiError::Unauthorized) => "Authentication expired. Log in again.",
            Self::Api(ApiError::Forbidden) => "Insufficient permissions for this operation.",
            Self::Api(ApiError::RateLimited) => "Too many requests. Please wait a moment.",
            Self::Network(_) => "Network error. Check your connection.",
            _ => "An error occurred. Please try again.",
        }
    }

    /// Returns true if the stored credentials must be discarded and the user re-prompted.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::Auth(AuthError::RefreshTokenRejected(_)) | Self::Api(ApiError::Unauthorized)
        )
    }
}
