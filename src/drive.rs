//! Minimal Drive API call used to confirm that a session works.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};

/// Base URL for the Drive v3 API.
pub const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";

/// Drive `about` resource, restricted to the `user` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct About {
    pub user: DriveUser,
}

/// The authenticated Drive user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveUser {
    pub display_name: Option<String>,
    pub email_address: Option<String>,
    pub permission_id: Option<String>,
    #[serde(default)]
    pub me: bool,
}

impl DriveUser {
    /// Get the best available name.
    pub fn display_name_or_email(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.email_address.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }
}

/// Send an authorized `GET {base}/about` request and decode the user.
pub(crate) async fn fetch_about(request: reqwest::RequestBuilder) -> Result<About, ApiError> {
    let response = request
        .query(&[("fields", "user")])
        .send()
        .await
        .map_err(|e| ApiError::RequestFailed(e.to_string()))?;

    match response.status().as_u16() {
        200 => response
            .json()
            .await
            .map_err(|e| ApiError::ParseFailed(e.to_string())),
        401 => Err(ApiError::Unauthorized),
        403 => Err(ApiError::Forbidden),
        429 => Err(ApiError::RateLimited),
        // Don't expose raw API error details - just log status code
        status => Err(ApiError::RequestFailed(format!("HTTP {}", status))),
    }
}
