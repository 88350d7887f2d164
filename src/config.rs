//! Credential file loading and persistence.
//!
//! The credential record lives in a small JSON file (by default `./.config.json`)
//! holding the OAuth client id/secret, the requested scopes and the refresh token
//! obtained from the last interactive authorization.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Credential file used when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "./.config.json";

/// File name used for the per-user credential file in the home directory.
const HOME_CONFIG_FILE: &str = ".gdrive_login.json";

/// Scopes requested when the credential file does not configure any.
pub const DEFAULT_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/drive",
    "https://spreadsheets.google.com/feeds/",
];

/// Persisted credential record.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,

    /// Empty until the first interactive authorization succeeds.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("scope", &self.scope)
            .field("refresh_token", &redacted(&self.refresh_token))
            .finish()
    }
}

/// Fallback OAuth client credentials used when the file leaves them empty.
#[derive(Clone, Default)]
pub struct ClientDefaults {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientDefaults {
    /// Read defaults from `GDRIVE_CLIENT_ID` and `GDRIVE_CLIENT_SECRET`.
    pub fn from_env() -> Self {
        Self {
            client_id: env::var("GDRIVE_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            client_secret: env::var("GDRIVE_CLIENT_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

impl fmt::Debug for ClientDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientDefaults")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_deref().map(redacted),
            )
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "[redacted]"
    }
}

impl CredentialConfig {
    /// Load the credential record from `path`.
    ///
    /// A missing file yields an empty record. Keys other than the four known
    /// fields are ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Credential file {:?} does not exist, starting empty", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded credentials from {:?}", path);
        Ok(config)
    }

    /// Write the credential record to `path` as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(path, content).map_err(io_err)?;

        // The file holds a client secret and a long-lived refresh token
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
        }

        debug!("Saved credentials to {:?}", path);
        Ok(())
    }

    /// Replace the stored client credentials with explicitly supplied ones.
    pub fn apply_client_override(&mut self, client_id: &str, client_secret: &str) {
        self.client_id = client_id.to_string();
        self.client_secret = client_secret.to_string();
    }

    /// Fill empty client credentials from `defaults`.
    pub fn fill_defaults(&mut self, defaults: &ClientDefaults) {
        if self.client_id.is_empty() {
            if let Some(id) = &defaults.client_id {
                self.client_id = id.clone();
            }
        }
        if self.client_secret.is_empty() {
            if let Some(secret) = &defaults.client_secret {
                self.client_secret = secret.clone();
            }
        }
    }

    /// Check that client credentials are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(ConfigError::MissingClientCredentials);
        }
        Ok(())
    }

    /// Configured scopes, or [`DEFAULT_SCOPES`] when none are set.
    pub fn effective_scope(&self) -> Vec<String> {
        match &self.scope {
            Some(scope) if !scope.is_empty() => scope.clone(),
            _ => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// Per-user credential file in the home directory, if one can be determined.
pub fn home_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HOME_CONFIG_FILE))
}
