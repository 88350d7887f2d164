//! Login entry points returning an authenticated [`Session`].

use crate::auth::oauth::{
    parse_authorization_code, OAuth2Client, OAuthSettings, PkceChallenge, GOOGLE_AUTH_URL,
    GOOGLE_TOKEN_URL,
};
use crate::auth::prompt::CodePrompt;
use crate::auth::token::{default_refresh_margin, AccessToken, AuthorizedClient};
use crate::config::{ClientDefaults, CredentialConfig, DEFAULT_CONFIG_PATH};
use crate::drive::{self, About, DRIVE_API_URL};
use crate::error::{AppError, AuthError};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// HTTP request timeout for sessions built from a raw token.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout for sessions built from a raw token.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials accepted by [`login_with_oauth`].
#[derive(Clone)]
pub enum ClientOrAccessToken {
    /// A bare access token; the session cannot refresh it.
    RawToken(String),
    /// A client that can refresh its own access token.
    AuthorizedClient(AuthorizedClient),
}

impl fmt::Debug for ClientOrAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawToken(_) => f.debug_tuple("RawToken").field(&"[redacted]").finish(),
            Self::AuthorizedClient(client) => {
                f.debug_tuple("AuthorizedClient").field(client).finish()
            }
        }
    }
}

impl From<String> for ClientOrAccessToken {
    fn from(token: String) -> Self {
        Self::RawToken(token)
    }
}

impl From<&str> for ClientOrAccessToken {
    fn from(token: &str) -> Self {
        Self::RawToken(token.to_string())
    }
}

impl From<AuthorizedClient> for ClientOrAccessToken {
    fn from(client: AuthorizedClient) -> Self {
        Self::AuthorizedClient(client)
    }
}

/// Proxy argument accepted only to reject it with a pointer to `http_proxy`.
#[derive(Debug, Clone)]
pub struct LegacyProxy {
    pub url: String,
}

/// What to do when the stored refresh token is rejected by the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RefreshFailurePolicy {
    /// Return the error to the caller.
    #[default]
    Fail,
    /// Discard the stored token and run the interactive authorization.
    Reprompt,
}

/// Authenticated handle for Drive and Sheets API calls.
#[derive(Debug)]
pub struct Session {
    credentials: ClientOrAccessToken,
    http_client: reqwest::Client,
    drive_api_url: String,
    /// Credential file a rotated refresh token is written back to.
    credential_path: Option<PathBuf>,
}

impl Session {
    fn new(credentials: ClientOrAccessToken) -> Result<Self, AppError> {
        let http_client = match &credentials {
            ClientOrAccessToken::AuthorizedClient(client) => {
                client.oauth_client().http_client().clone()
            }
            ClientOrAccessToken::RawToken(_) => reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .connect_timeout(HTTP_CONNECT_TIMEOUT)
                .build()?,
        };

        Ok(Self {
            credentials,
            http_client,
            drive_api_url: DRIVE_API_URL.to_string(),
            credential_path: None,
        })
    }

    /// Remember the credential file for [`Session::persist_refresh_token`].
    pub fn with_credential_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_path = Some(path.into());
        self
    }

    /// Point Drive API calls at a different base URL.
    pub fn with_drive_api_url(mut self, url: impl Into<String>) -> Self {
        self.drive_api_url = url.into();
        self
    }

    /// The current access token.
    pub fn access_token(&self) -> &str {
        match &self.credentials {
            ClientOrAccessToken::RawToken(token) => token,
            ClientOrAccessToken::AuthorizedClient(client) => &client.access_token().token,
        }
    }

    /// The access token with its expiry, when the session owns an authorized client.
    pub fn token_state(&self) -> Option<&AccessToken> {
        match &self.credentials {
            ClientOrAccessToken::RawToken(_) => None,
            ClientOrAccessToken::AuthorizedClient(client) => Some(client.access_token()),
        }
    }

    pub fn refresh_token(&self) -> Option<&str> {
        match &self.credentials {
            ClientOrAccessToken::RawToken(_) => None,
            ClientOrAccessToken::AuthorizedClient(client) => client.refresh_token(),
        }
    }

    /// Build a request carrying the bearer token, refreshing it first if it is about to expire.
    pub async fn authorized_request(
        &mut self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        if let ClientOrAccessToken::AuthorizedClient(client) = &mut self.credentials {
            client.ensure_fresh(default_refresh_margin()).await?;
        }

        Ok(self
            .http_client
            .request(method, url)
            .bearer_auth(self.access_token()))
    }

    /// Write the current refresh token back to the credential file if it changed.
    ///
    /// Refreshes made through [`Session::authorized_request`] may hand out a
    /// rotated refresh token after login. Returns `Ok(false)` when there is no
    /// credential file, no refresh token, or the stored one is already current.
    pub fn persist_refresh_token(&self) -> Result<bool, AppError> {
        let (Some(path), Some(refresh_token)) = (&self.credential_path, self.refresh_token())
        else {
            return Ok(false);
        };

        let mut config = CredentialConfig::load(path)?;
        if config.refresh_token == refresh_token {
            return Ok(false);
        }

        config.refresh_token = refresh_token.to_string();
        config.save(path)?;
        info!("Saved rotated refresh token to {:?}", path);
        Ok(true)
    }

    /// Fetch the authenticated Drive user.
    pub async fn about(&mut self) -> Result<About, AppError> {
        let url = format!("{}/about", self.drive_api_url);
        let request = self.authorized_request(reqwest::Method::GET, &url).await?;
        Ok(drive::fetch_about(request).await?)
    }
}

/// Create a session from an access token or an authorized client.
///
/// Passing a proxy fails immediately; set the `http_proxy` environment
/// variable instead.
pub fn login_with_oauth(
    client_or_access_token: impl Into<ClientOrAccessToken>,
    proxy: Option<LegacyProxy>,
) -> Result<Session, AppError> {
    if proxy.is_some() {
        return Err(AuthError::ProxyUnsupported.into());
    }

    Session::new(client_or_access_token.into())
}

/// Inputs for [`saved_session`].
#[derive(Debug, Clone)]
pub struct SavedSessionOptions {
    /// Credential file to restore from and save to.
    pub path: PathBuf,
    /// Always rejected; kept so callers migrating from proxy objects get a clear error.
    pub proxy: Option<LegacyProxy>,
    /// Overrides the stored client id when given together with `client_secret`.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Fallbacks for empty client credentials in the file.
    pub defaults: ClientDefaults,
    pub on_refresh_failure: RefreshFailurePolicy,
    pub auth_url: String,
    pub token_url: String,
}

impl SavedSessionOptions {
    /// Options for `path` with client defaults taken from the environment.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            proxy: None,
            client_id: None,
            client_secret: None,
            defaults: ClientDefaults::from_env(),
            on_refresh_failure: RefreshFailurePolicy::default(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

impl Default for SavedSessionOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

/// Restore a session from the credential file, authorizing interactively if needed.
///
/// With a stored refresh token the access token is refreshed silently. Without
/// one, `prompt` is asked for an authorization code and the resulting refresh
/// token is written back to the file.
pub async fn saved_session(
    options: SavedSessionOptions,
    prompt: &mut (dyn CodePrompt + Send),
) -> Result<Session, AppError> {
    if options.proxy.is_some() {
        return Err(AuthError::ProxyUnsupported.into());
    }

    let mut config = CredentialConfig::load(&options.path)?;

    match (&options.client_id, &options.client_secret) {
        (Some(client_id), Some(client_secret)) => {
            config.apply_client_override(client_id, client_secret);
            config.save(&options.path)?;
        }
        _ => config.fill_defaults(&options.defaults),
    }

    config.validate()?;

    let mut settings = OAuthSettings::google(
        &config.client_id,
        &config.client_secret,
        config.effective_scope(),
    );
    settings.auth_url = options.auth_url;
    settings.token_url = options.token_url;
    let oauth_client = OAuth2Client::new(settings)?;

    let mut restored = None;
    if config.has_refresh_token() {
        info!("Refreshing access token from saved credentials");
        match AuthorizedClient::from_refresh_token(oauth_client.clone(), &config.refresh_token)
            .await
        {
            Ok(client) => restored = Some(client),
            Err(AuthError::RefreshTokenRejected(reason))
                if options.on_refresh_failure == RefreshFailurePolicy::Reprompt =>
            {
                warn!("Saved refresh token rejected ({}), authorizing again", reason);
                config.refresh_token.clear();
            }
            Err(e) => return Err(e.into()),
        }
    }

    let client = match restored {
        Some(client) => client,
        None => authorize_interactively(oauth_client, prompt).await?,
    };

    match client.refresh_token() {
        Some(refresh_token) => config.refresh_token = refresh_token.to_string(),
        None => warn!("No refresh token was issued; the next login will prompt again"),
    }

    config.save(&options.path)?;
    info!("Session ready");

    Ok(login_with_oauth(client, None)?.with_credential_path(options.path))
}

async fn authorize_interactively(
    oauth_client: OAuth2Client,
    prompt: &mut (dyn CodePrompt + Send),
) -> Result<AuthorizedClient, AppError> {
    let pkce = PkceChallenge::new();
    let auth_url = oauth_client.authorization_url(&pkce)?;

    let input = prompt
        .prompt_code(&auth_url)?
        .ok_or(AuthError::UserCancelled)?;
    let code = parse_authorization_code(&input)?;

    let response = oauth_client.exchange_code(&code, &pkce.verifier).await?;
    info!("Authorization code exchanged");

    let access_token = AccessToken::from_response(&response);
    Ok(AuthorizedClient::new(
        oauth_client,
        access_token,
        response.refresh_token,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::fs;
    use std::io;
    use tempfile::TempDir;
    use url::Url;

    /// Answers prompts from a fixed code and records the URLs it was shown.
    #[derive(Default)]
    struct ScriptedPrompt {
        code: Option<String>,
        shown: Vec<Url>,
    }

    impl ScriptedPrompt {
        fn answering(code: &str) -> Self {
            Self {
                code: Some(code.to_string()),
                shown: Vec::new(),
            }
        }
    }

    impl CodePrompt for ScriptedPrompt {
        fn prompt_code(&mut self, auth_url: &Url) -> io::Result<Option<String>> {
            self.shown.push(auth_url.clone());
            Ok(self.code.clone())
        }
    }

    fn write_config(dir: &TempDir, refresh_token: &str) -> PathBuf {
        let path = dir.path().join(".config.json");
        let config = CredentialConfig {
            client_id: "stored-id".into(),
            client_secret: "stored-secret".into(),
            scope: None,
            refresh_token: refresh_token.into(),
        };
        config.save(&path).unwrap();
        path
    }

    fn options(path: PathBuf, server: &Server) -> SavedSessionOptions {
        SavedSessionOptions {
            path,
            proxy: None,
            client_id: None,
            client_secret: None,
            defaults: ClientDefaults::default(),
            on_refresh_failure: RefreshFailurePolicy::Fail,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: format!("{}/token", server.url()),
        }
    }

    async fn mock_grant(
        server: &mut Server,
        grant_type: &str,
        body: &str,
        hits: usize,
    ) -> mockito::Mock {
        server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), grant_type.into()))
            .expect(hits)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_empty_refresh_token_prompts() {
        let mut server = Server::new_async().await;
        let exchange = mock_grant(
            &mut server,
            "authorization_code",
            r#"{"access_token":"ya29.first","token_type":"Bearer","expires_in":3599,"refresh_token":"1//issued"}"#,
            1,
        )
        .await;
        let refresh = mock_grant(&mut server, "refresh_token", "{}", 0).await;

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "");
        let mut prompt = ScriptedPrompt::answering("4/code");

        let session = saved_session(options(path.clone(), &server), &mut prompt)
            .await
            .unwrap();

        assert_eq!(prompt.shown.len(), 1);
        let query: std::collections::HashMap<_, _> =
            prompt.shown[0].query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "stored-id");
        assert_eq!(
            query["scope"],
            "https://www.googleapis.com/auth/drive https://spreadsheets.google.com/feeds/"
        );

        assert_eq!(session.access_token(), "ya29.first");
        assert_eq!(
            CredentialConfig::load(&path).unwrap().refresh_token,
            "1//issued"
        );
        exchange.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_stored_refresh_token_never_prompts() {
        let mut server = Server::new_async().await;
        let exchange = mock_grant(&mut server, "authorization_code", "{}", 0).await;
        let refresh = mock_grant(
            &mut server,
            "refresh_token",
            r#"{"access_token":"ya29.refreshed","token_type":"Bearer","expires_in":3599}"#,
            1,
        )
        .await;

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "1//stored");
        let before = fs::read(&path).unwrap();
        let mut prompt = ScriptedPrompt::default();

        let session = saved_session(options(path.clone(), &server), &mut prompt)
            .await
            .unwrap();

        assert!(prompt.shown.is_empty());
        assert_eq!(session.access_token(), "ya29.refreshed");
        assert_eq!(session.refresh_token(), Some("1//stored"));
        // Unchanged record is rewritten byte for byte
        assert_eq!(fs::read(&path).unwrap(), before);
        exchange.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_saved() {
        let mut server = Server::new_async().await;
        mock_grant(
            &mut server,
            "refresh_token",
            r#"{"access_token":"ya29.a","expires_in":3599,"refresh_token":"1//rotated"}"#,
            1,
        )
        .await;

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "1//old");

        saved_session(options(path.clone(), &server), &mut ScriptedPrompt::default())
            .await
            .unwrap();

        assert_eq!(
            CredentialConfig::load(&path).unwrap().refresh_token,
            "1//rotated"
        );
    }

    #[tokio::test]
    async fn test_explicit_client_credentials_override_and_persist() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "new-id".into()),
                Matcher::UrlEncoded("client_secret".into(), "new-secret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.a","expires_in":3599}"#)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "1//stored");
        let mut opts = options(path.clone(), &server);
        opts.client_id = Some("new-id".into());
        opts.client_secret = Some("new-secret".into());

        saved_session(opts, &mut ScriptedPrompt::default())
            .await
            .unwrap();

        let saved = CredentialConfig::load(&path).unwrap();
        assert_eq!(saved.client_id, "new-id");
        assert_eq!(saved.client_secret, "new-secret");
        assert_eq!(saved.refresh_token, "1//stored");
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_proxy_rejected_before_any_io() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("never-created.json");
        let mut opts = SavedSessionOptions::new(&path);
        opts.proxy = Some(LegacyProxy {
            url: "http://proxy:3128".into(),
        });
        let mut prompt = ScriptedPrompt::answering("4/code");

        let result = saved_session(opts, &mut prompt).await;

        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::ProxyUnsupported))
        ));
        assert!(prompt.shown.is_empty());
        assert!(!path.exists());

        let result = login_with_oauth(
            "ya29.token",
            Some(LegacyProxy {
                url: "http://proxy:3128".into(),
            }),
        );
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::ProxyUnsupported))
        ));
    }

    #[tokio::test]
    async fn test_rejected_refresh_token_fails_by_default() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "1//revoked");
        let mut prompt = ScriptedPrompt::answering("4/code");

        let result = saved_session(options(path.clone(), &server), &mut prompt).await;

        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::RefreshTokenRejected(_)))
        ));
        assert!(prompt.shown.is_empty());
        assert_eq!(
            CredentialConfig::load(&path).unwrap().refresh_token,
            "1//revoked"
        );
    }

    #[tokio::test]
    async fn test_rejected_refresh_token_reprompts_when_configured() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;
        mock_grant(
            &mut server,
            "authorization_code",
            r#"{"access_token":"ya29.new","expires_in":3599,"refresh_token":"1//fresh"}"#,
            1,
        )
        .await;

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "1//revoked");
        let mut opts = options(path.clone(), &server);
        opts.on_refresh_failure = RefreshFailurePolicy::Reprompt;
        let mut prompt = ScriptedPrompt::answering("4/code");

        let session = saved_session(opts, &mut prompt).await.unwrap();

        assert_eq!(prompt.shown.len(), 1);
        assert_eq!(session.access_token(), "ya29.new");
        assert_eq!(
            CredentialConfig::load(&path).unwrap().refresh_token,
            "1//fresh"
        );
    }

    #[tokio::test]
    async fn test_missing_client_credentials() {
        let server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".config.json");
        let mut prompt = ScriptedPrompt::answering("4/code");

        let result = saved_session(options(path, &server), &mut prompt).await;

        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(prompt.shown.is_empty());
    }

    #[tokio::test]
    async fn test_closed_input_cancels() {
        let server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "");

        let result = saved_session(options(path, &server), &mut ScriptedPrompt::default()).await;

        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::UserCancelled))
        ));
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_after_login_is_persisted() {
        let mut server = Server::new_async().await;
        mock_grant(
            &mut server,
            "refresh_token",
            r#"{"access_token":"ya29.renewed","expires_in":3599,"refresh_token":"1//rotated"}"#,
            1,
        )
        .await;

        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "1//old");

        let mut settings = OAuthSettings::google("stored-id", "stored-secret", vec![]);
        settings.token_url = format!("{}/token", server.url());
        let expiring = AccessToken {
            token: "ya29.expiring".into(),
            expires_at: Some(chrono::Utc::now() + chrono::Duration::seconds(10)),
        };
        let client =
            AuthorizedClient::new(OAuth2Client::new(settings).unwrap(), expiring, Some("1//old".into()));

        let mut session = login_with_oauth(client, None)
            .unwrap()
            .with_credential_path(&path);
        assert!(!session.persist_refresh_token().unwrap());

        session
            .authorized_request(reqwest::Method::GET, "http://localhost/unused")
            .await
            .unwrap();
        assert_eq!(session.access_token(), "ya29.renewed");

        assert!(session.persist_refresh_token().unwrap());
        assert_eq!(
            CredentialConfig::load(&path).unwrap().refresh_token,
            "1//rotated"
        );
        assert!(!session.persist_refresh_token().unwrap());
    }

    #[test]
    fn test_session_debug_redacts_raw_token() {
        let session = login_with_oauth("ya29.raw-secret", None).unwrap();
        let printed = format!("{:?}", session);
        assert!(!printed.contains("ya29.raw-secret"));
    }

    #[tokio::test]
    async fn test_raw_token_session_about() {
        let mut server = Server::new_async().await;
        let about = server
            .mock("GET", "/about")
            .match_query(Matcher::UrlEncoded("fields".into(), "user".into()))
            .match_header("authorization", "Bearer ya29.raw")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user":{"displayName":"Jane Doe","emailAddress":"jane@example.com","me":true}}"#)
            .create_async()
            .await;

        let mut session = login_with_oauth("ya29.raw", None)
            .unwrap()
            .with_drive_api_url(server.url());

        assert!(session.refresh_token().is_none());
        assert!(session.token_state().is_none());
        let about_response = session.about().await.unwrap();
        assert_eq!(about_response.user.display_name_or_email(), "Jane Doe");
        about.assert_async().await;
    }

    #[tokio::test]
    async fn test_about_unauthorized() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/about")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let mut session = login_with_oauth("ya29.expired", None)
            .unwrap()
            .with_drive_api_url(server.url());

        let err = session.about().await.unwrap_err();
        assert!(err.requires_reauthorization());
    }
}
