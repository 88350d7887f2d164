//! Access token state and on-demand refresh.

use crate::auth::oauth::{OAuth2Client, TokenResponse};
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tracing::info;
use zeroize::Zeroize;

/// Seconds before the reported expiry at which a token counts as stale.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Refresh margin used by [`crate::session::Session`].
pub fn default_refresh_margin() -> Duration {
    Duration::seconds(REFRESH_MARGIN_SECS)
}

/// A short-lived bearer token.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    /// `None` when the token endpoint did not report a lifetime.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn from_response(response: &TokenResponse) -> Self {
        // Lifetimes chrono cannot represent are treated as unknown
        let expires_at = response
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));

        Self {
            token: response.access_token.clone(),
            expires_at,
        }
    }

    /// True if the token expires within `margin`.
    pub fn is_expired(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + margin >= expires_at,
            None => false,
        }
    }

    /// Remaining lifetime, `None` if unknown or already expired.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let now = Utc::now();

        if expires_at > now {
            Some(expires_at - now)
        } else {
            None
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for AccessToken {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

/// An OAuth client holding a live access token and the refresh token behind it.
#[derive(Clone)]
pub struct AuthorizedClient {
    oauth_client: OAuth2Client,
    access_token: AccessToken,
    refresh_token: Option<String>,
}

impl AuthorizedClient {
    pub fn new(
        oauth_client: OAuth2Client,
        access_token: AccessToken,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            oauth_client,
            access_token,
            refresh_token,
        }
    }

    /// Obtain a fresh access token for `refresh_token`.
    pub async fn from_refresh_token(
        oauth_client: OAuth2Client,
        refresh_token: &str,
    ) -> Result<Self, AuthError> {
        let response = oauth_client.refresh_token(refresh_token).await?;
        let refresh_token = response
            .refresh_token
            .clone()
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(Self::new(
            oauth_client,
            AccessToken::from_response(&response),
            Some(refresh_token),
        ))
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn oauth_client(&self) -> &OAuth2Client {
        &self.oauth_client
    }

    /// Refresh the access token now.
    pub async fn refresh(&mut self) -> Result<(), AuthError> {
        let refresh_token = self
            .refresh_token
            .as_deref()
            .ok_or(AuthError::MissingRefreshToken)?;

        let response = self.oauth_client.refresh_token(refresh_token).await?;
        self.access_token = AccessToken::from_response(&response);

        if let Some(new_refresh) = response.refresh_token {
            self.refresh_token.zeroize();
            self.refresh_token = Some(new_refresh);
        }

        match self.access_token.expires_at {
            Some(expires_at) => info!("Token refreshed, expires at {}", expires_at),
            None => info!("Token refreshed"),
        }
        Ok(())
    }

    /// Refresh only if the access token expires within `margin`.
    pub async fn ensure_fresh(&mut self, margin: Duration) -> Result<(), AuthError> {
        if self.access_token.is_expired(margin) {
            self.refresh().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("oauth_client", &self.oauth_client)
            .field("access_token", &self.access_token)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

impl Drop for AuthorizedClient {
    fn drop(&mut self) {
        self.refresh_token.zeroize();
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::OAuthSettings;

    fn token_expiring_in(secs: i64) -> AccessToken {
        AccessToken {
            token: "ya29.test".into(),
            expires_at: Some(Utc::now() + Duration::seconds(secs)),
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(30)), "< 1 min");
        assert_eq!(format_duration(Duration::minutes(5)), "5 min");
        assert_eq!(format_duration(Duration::minutes(45)), "45 min");
        assert_eq!(format_duration(Duration::hours(1)), "1 hour");
        assert_eq!(format_duration(Duration::hours(2)), "2 hours");
        assert_eq!(format_duration(Duration::minutes(90)), "1h 30m");
    }

    #[test]
    fn test_is_expired() {
        assert!(!token_expiring_in(3600).is_expired(default_refresh_margin()));
        assert!(token_expiring_in(60).is_expired(default_refresh_margin()));
        assert!(token_expiring_in(-60).is_expired(Duration::zero()));

        let unknown = AccessToken {
            token: "raw".into(),
            expires_at: None,
        };
        assert!(!unknown.is_expired(default_refresh_margin()));
    }

    fn response_with_lifetime(expires_in: u64) -> TokenResponse {
        TokenResponse {
            access_token: "ya29.test".into(),
            token_type: "Bearer".into(),
            expires_in: Some(expires_in),
            refresh_token: None,
            scope: String::new(),
        }
    }

    #[test]
    fn test_from_response_lifetime() {
        let token = AccessToken::from_response(&response_with_lifetime(3599));
        assert!(token.time_until_expiry().unwrap().num_minutes() >= 59);
        assert!(!token.is_expired(default_refresh_margin()));
    }

    #[test]
    fn test_from_response_out_of_range_lifetime_is_unknown() {
        for expires_in in [100_000_000_000_000_000, u64::MAX] {
            let token = AccessToken::from_response(&response_with_lifetime(expires_in));
            assert!(token.expires_at.is_none());
            assert!(!token.is_expired(default_refresh_margin()));
        }
    }

    #[test]
    fn test_time_until_expiry() {
        let remaining = token_expiring_in(3600).time_until_expiry();
        assert!(remaining.unwrap().num_minutes() > 55);

        assert!(token_expiring_in(-3600).time_until_expiry().is_none());
    }

    #[tokio::test]
    async fn test_ensure_fresh_refreshes_expiring_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "refresh_token".into(),
                "1//r".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.new","token_type":"Bearer","expires_in":3599}"#)
            .expect(1)
            .create_async()
            .await;

        let mut settings = OAuthSettings::google("id", "secret", vec![]);
        settings.token_url = format!("{}/token", server.url());
        let oauth_client = OAuth2Client::new(settings).unwrap();

        let mut client =
            AuthorizedClient::new(oauth_client, token_expiring_in(10), Some("1//r".into()));

        client.ensure_fresh(default_refresh_margin()).await.unwrap();
        assert_eq!(client.access_token().token, "ya29.new");
        // Still valid, no second request
        client.ensure_fresh(default_refresh_margin()).await.unwrap();
        // Refresh token kept when the response omits a new one
        assert_eq!(client.refresh_token(), Some("1//r"));

        mock.assert_async().await;
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let oauth_client =
            OAuth2Client::new(OAuthSettings::google("id", "client-secret-value", vec![])).unwrap();
        let client = AuthorizedClient::new(
            oauth_client,
            token_expiring_in(3600),
            Some("1//refresh-value".into()),
        );

        let printed = format!("{:?}", client);
        assert!(!printed.contains("ya29.test"));
        assert!(!printed.contains("1//refresh-value"));
        assert!(!printed.contains("client-secret-value"));
        assert!(printed.contains("[redacted]"));
    }

    #[tokio::test]
    async fn test_refresh_without_token() {
        let oauth_client = OAuth2Client::new(OAuthSettings::google("id", "secret", vec![])).unwrap();
        let mut client = AuthorizedClient::new(oauth_client, token_expiring_in(-1), None);

        assert!(matches!(
            client.refresh().await,
            Err(AuthError::MissingRefreshToken)
        ));
    }
}
