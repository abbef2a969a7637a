//! Access token lifecycle for the Microsoft Graph API.
//!
//! Interactive OAuth2 acquisition (the authorization-code/PKCE dance, the
//! browser launch, the localhost redirect listener) is an external concern:
//! something a login command performs once, out of band. What the daemon
//! needs at runtime is narrower: the current access token, and a way to get
//! a new one without prompting anyone. That contract is [`AuthProvider`].
//!
//! [`FileBackedAuthProvider`] is the reference implementation: it persists
//! [`Tokens`] as JSON under the config directory and refreshes them against
//! the Microsoft identity platform's token endpoint via the standard
//! `refresh_token` grant. No PKCE verifier is needed for this step; that
//! only applies to the initial code exchange, which happens upstream of
//! this crate.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ondrift_core::ports::cloud_provider::Tokens;

/// Microsoft identity platform token endpoint (consumers tenant).
const TOKEN_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";

/// Scopes requested on refresh. Must match what the original grant asked
/// for, or the authorization server may narrow the returned token's scope.
const DEFAULT_SCOPES: &str = "Files.ReadWrite.All User.Read offline_access";

/// A source of Microsoft Graph access tokens.
///
/// Implementors own the refresh-token lifecycle; callers only need the
/// current token and a way to trigger a refresh before it expires. Both
/// methods take `&self` so a single provider can be shared across tasks
/// behind an `Arc` without an outer mutex.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the most recently known tokens, whatever their expiry state.
    fn current_token(&self) -> Tokens;

    /// Exchanges the current refresh token for a new access token, persists
    /// the result, and returns it. Fails if there is no refresh token on
    /// file or the authorization server rejects the grant (e.g. revoked
    /// consent).
    async fn refresh(&self) -> Result<Tokens>;
}

/// `AuthProvider` backed by a JSON file on disk and the standard OAuth2
/// refresh-token grant.
///
/// The file is written atomically (temp file, then rename) and, on Unix,
/// created with mode `0600` so other local users can't read the refresh
/// token out of it.
pub struct FileBackedAuthProvider {
    app_id: String,
    path: PathBuf,
    http: reqwest::Client,
    tokens: RwLock<Tokens>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl FileBackedAuthProvider {
    /// Loads tokens from `path`, which must already contain a JSON-encoded
    /// [`Tokens`] value from a prior interactive login.
    pub fn load(app_id: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = std::fs::read(&path)
            .with_context(|| format!("reading auth token file {}", path.display()))?;
        let tokens: Tokens = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing auth token file {}", path.display()))?;
        Ok(Self {
            app_id: app_id.into(),
            path,
            http: reqwest::Client::new(),
            tokens: RwLock::new(tokens),
        })
    }

    /// Seeds the provider with tokens obtained elsewhere (e.g. a one-time
    /// login command) and persists them to `path` immediately.
    pub fn bootstrap(
        app_id: impl Into<String>,
        path: impl Into<PathBuf>,
        tokens: Tokens,
    ) -> Result<Self> {
        let path = path.into();
        write_tokens_atomically(&path, &tokens)?;
        Ok(Self {
            app_id: app_id.into(),
            path,
            http: reqwest::Client::new(),
            tokens: RwLock::new(tokens),
        })
    }

    /// Returns the current tokens, refreshing first if they are within
    /// `margin` of expiring.
    pub async fn ensure_fresh(&self, margin: Duration) -> Result<Tokens> {
        if self.current_token().expires_within(margin) {
            self.refresh().await
        } else {
            Ok(self.current_token())
        }
    }
}

#[async_trait]
impl AuthProvider for FileBackedAuthProvider {
    fn current_token(&self) -> Tokens {
        self.tokens.read().expect("auth token lock poisoned").clone()
    }

    async fn refresh(&self) -> Result<Tokens> {
        let refresh_token = self
            .current_token()
            .refresh_token
            .context("no refresh token on file; re-run interactive login")?;

        debug!("refreshing Microsoft Graph access token");

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.app_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("scope", DEFAULT_SCOPES),
            ])
            .send()
            .await
            .context("sending token refresh request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token refresh failed with status {status}: {body}");
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .context("parsing token refresh response")?;

        let expires_at = parsed
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs as i64))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        let tokens = Tokens {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token.or(Some(refresh_token)),
            expires_at,
        };

        write_tokens_atomically(&self.path, &tokens)?;
        *self.tokens.write().expect("auth token lock poisoned") = tokens.clone();

        info!("refreshed Microsoft Graph access token, expires at {}", tokens.expires_at);
        Ok(tokens)
    }
}

/// Writes `tokens` to `path` via a temp-file-then-rename so a crash mid-write
/// never leaves a truncated or partially-written token file behind.
fn write_tokens_atomically(path: &Path, tokens: &Tokens) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating auth token directory {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(tokens).context("serializing auth tokens")?;
    std::fs::write(&tmp_path, &json)
        .with_context(|| format!("writing auth token temp file {}", tmp_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("setting permissions on {}", tmp_path.display()))?;
    }

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming auth token file into place at {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tokens() -> Tokens {
        Tokens {
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn bootstrap_persists_tokens_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_tokens.json");
        let provider = FileBackedAuthProvider::bootstrap("app-id", &path, sample_tokens()).unwrap();

        assert!(path.exists());
        assert_eq!(provider.current_token().access_token, "access-1");
    }

    #[test]
    fn load_reads_back_a_bootstrapped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_tokens.json");
        FileBackedAuthProvider::bootstrap("app-id", &path, sample_tokens()).unwrap();

        let reloaded = FileBackedAuthProvider::load("app-id", &path).unwrap();
        assert_eq!(reloaded.current_token().refresh_token.as_deref(), Some("refresh-1"));
    }

    #[cfg(unix)]
    #[test]
    fn persisted_file_is_owner_only_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_tokens.json");
        FileBackedAuthProvider::bootstrap("app-id", &path, sample_tokens()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth_tokens.json");
        let tokens = Tokens {
            refresh_token: None,
            ..sample_tokens()
        };
        let provider = FileBackedAuthProvider::bootstrap("app-id", &path, tokens).unwrap();

        let result = provider.refresh().await;
        assert!(result.is_err());
    }
}
