//! Microsoft Graph API client
//!
//! Provides a typed HTTP client for interacting with the Microsoft Graph API.
//! Handles authentication headers, JSON deserialization, and endpoint construction.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ondrift_graph::client::GraphClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = GraphClient::new("access-token-here");
//! let user_info = client.get_user_info().await?;
//! println!("Hello, {}", user_info.display_name);
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ondrift_core::{domain::newtypes::RemoteId, ports::cloud_provider::UserInfo};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::rate_limit::{parse_retry_after, AdaptiveRateLimiter};

/// Base URL for Microsoft Graph API v1.0
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

// ============================================================================
// Graph API response types
// ============================================================================

/// Response from the /me endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    /// User's display name
    display_name: Option<String>,
    /// User's email (mail field)
    mail: Option<String>,
    /// User's principal name (typically email)
    user_principal_name: Option<String>,
    /// User ID
    id: Option<String>,
}

/// Response from the /me/drive endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveResponse {
    /// Drive ID
    #[allow(dead_code)]
    id: Option<String>,
    /// Quota information
    quota: Option<QuotaResponse>,
}

/// Quota information from the drive response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaResponse {
    /// Total storage in bytes
    total: Option<u64>,
    /// Used storage in bytes
    used: Option<u64>,
    /// Remaining storage in bytes
    #[allow(dead_code)]
    remaining: Option<u64>,
}

// ============================================================================
// GraphClient
// ============================================================================

/// Default retry-after duration when header is missing (30 seconds)
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Maximum number of retries for 429 responses when no rate limiter is configured
const DEFAULT_MAX_RETRIES: u32 = 5;

/// HTTP client for Microsoft Graph API calls
///
/// Wraps `reqwest::Client` with authentication headers and base URL
/// construction for the Microsoft Graph API.
///
/// Optionally integrates with an [`AdaptiveRateLimiter`] for proactive
/// rate limiting and automatic 429 retry handling.
pub struct GraphClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for API requests
    base_url: String,
    /// Current OAuth2 access token
    access_token: String,
    /// Optional adaptive rate limiter for proactive throttling
    rate_limiter: Option<Arc<AdaptiveRateLimiter>>,
}

impl GraphClient {
    /// Creates a new GraphClient with the given access token
    ///
    /// # Arguments
    /// * `access_token` - A valid OAuth2 access token for Microsoft Graph
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: GRAPH_BASE_URL.to_string(),
            access_token: access_token.into(),
            rate_limiter: None,
        }
    }

    /// Creates a new GraphClient with a custom base URL (useful for testing)
    ///
    /// # Arguments
    /// * `access_token` - A valid OAuth2 access token
    /// * `base_url` - Custom base URL for API requests
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            access_token: access_token.into(),
            rate_limiter: None,
        }
    }

    /// Sets the adaptive rate limiter for this client.
    ///
    /// When a rate limiter is present, methods like [`execute_with_retry`]
    /// will acquire a token before sending requests and notify the limiter
    /// of successes and throttle events.
    ///
    /// # Arguments
    /// * `limiter` - A shared adaptive rate limiter instance
    pub fn with_rate_limiter(mut self, limiter: Arc<AdaptiveRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Sets the rate limiter on an existing client (mutable setter variant).
    ///
    /// # Arguments
    /// * `limiter` - A shared adaptive rate limiter instance
    pub fn set_rate_limiter(&mut self, limiter: Arc<AdaptiveRateLimiter>) {
        self.rate_limiter = Some(limiter);
        debug!("Rate limiter attached to GraphClient");
    }

    /// Returns a reference to the rate limiter, if configured.
    pub fn rate_limiter(&self) -> Option<&Arc<AdaptiveRateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// Updates the access token (e.g., after a token refresh)
    ///
    /// # Arguments
    /// * `token` - The new access token
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("Updated GraphClient access token");
    }

    /// Returns a reference to the current access token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Creates an authenticated request builder for the given method and path
    ///
    /// Automatically prepends the base URL and adds the Authorization header.
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, PUT, DELETE, etc.)
    /// * `path` - API path relative to base URL (e.g., "/me" or "/me/drive")
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.access_token)
    }

    /// Retrieves information about the authenticated user
    ///
    /// Makes two API calls:
    /// 1. `GET /me` - for user profile (name, email, id)
    /// 2. `GET /me/drive` - for drive quota information
    ///
    /// # Returns
    /// A [`UserInfo`] struct with the user's profile and quota data
    pub async fn get_user_info(&self) -> Result<UserInfo> {
        debug!("Fetching user info from /me");

        // Get user profile
        let me: MeResponse = self
            .request(Method::GET, "/me")
            .send()
            .await
            .context("Failed to fetch /me")?
            .error_for_status()
            .context("GET /me returned error status")?
            .json()
            .await
            .context("Failed to parse /me response")?;

        // Get drive quota
        let (quota_used, quota_total) = self.get_drive_quota().await?;

        let email = me
            .mail
            .or(me.user_principal_name)
            .unwrap_or_else(|| "unknown@unknown.com".to_string());

        let display_name = me
            .display_name
            .unwrap_or_else(|| "Unknown User".to_string());

        let id = me.id.unwrap_or_default();

        Ok(UserInfo {
            email,
            display_name,
            id,
            quota_used,
            quota_total,
        })
    }

    /// Retrieves drive quota information
    ///
    /// # Returns
    /// A tuple of `(used_bytes, total_bytes)`
    pub async fn get_drive_quota(&self) -> Result<(u64, u64)> {
        debug!("Fetching drive quota from /me/drive");

        let drive: DriveResponse = self
            .request(Method::GET, "/me/drive")
            .send()
            .await
            .context("Failed to fetch /me/drive")?
            .error_for_status()
            .context("GET /me/drive returned error status")?
            .json()
            .await
            .context("Failed to parse /me/drive response")?;

        let used = drive.quota.as_ref().and_then(|q| q.used).unwrap_or(0);

        let total = drive.quota.as_ref().and_then(|q| q.total).unwrap_or(0);

        if total == 0 {
            warn!("Drive quota total is 0, this may indicate an API issue");
        }

        debug!("Drive quota: {} / {} bytes", used, total);
        Ok((used, total))
    }

    /// Downloads a file by its remote item ID
    ///
    /// Makes `GET /me/drive/items/{id}/content` which returns the raw file bytes.
    /// The Graph API follows a redirect to the actual download URL automatically
    /// (reqwest follows redirects by default).
    ///
    /// # Arguments
    /// * `id` - The OneDrive item ID of the file to download
    ///
    /// # Returns
    /// The file contents as a byte vector
    pub async fn download_file(&self, id: &RemoteId) -> Result<Vec<u8>> {
        let path = format!("/me/drive/items/{}/content", id.as_str());
        debug!("Downloading file: {}", id.as_str());

        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .context("Failed to send download request")?
            .error_for_status()
            .context("Download request returned error status")?;

        let bytes = response
            .bytes()
            .await
            .context("Failed to read download response body")?;

        debug!("Downloaded {} bytes for item {}", bytes.len(), id.as_str());
        Ok(bytes.to_vec())
    }

    /// Downloads one rendered thumbnail for an item.
    ///
    /// Makes `GET /me/drive/items/{id}/thumbnails/0/{size}/content`. `size`
    /// is one of OneDrive's named thumbnail sizes (`small`, `medium`,
    /// `large`) or a `WxH` custom size; unrecognized values are rejected by
    /// the remote with a 4xx, which this surfaces as-is.
    pub async fn get_thumbnail(&self, id: &RemoteId, size: &str) -> Result<Vec<u8>> {
        let path = format!("/me/drive/items/{}/thumbnails/0/{}/content", id.as_str(), size);
        debug!("Fetching thumbnail: {} ({})", id.as_str(), size);

        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .context("Failed to send thumbnail request")?
            .error_for_status()
            .context("Thumbnail request returned error status")?;

        let bytes = response
            .bytes()
            .await
            .context("Failed to read thumbnail response body")?;

        Ok(bytes.to_vec())
    }

    // ========================================================================
    // T211: execute_with_retry - 429 response handling
    // ========================================================================

    /// Executes an HTTP request with automatic 429 retry and rate limiting.
    ///
    /// This method wraps the request lifecycle with:
    /// 1. **Proactive rate limiting**: If a rate limiter is configured, acquires
    ///    a token for the given endpoint before sending the request.
    /// 2. **429 handling**: On HTTP 429 (Too Many Requests), parses the
    ///    `Retry-After` header, notifies the rate limiter, sleeps, and retries.
    /// 3. **Success notification**: On a successful response, notifies the
    ///    rate limiter to support adaptive capacity recovery.
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - API path relative to base URL
    /// * `endpoint_category` - Logical endpoint category for rate limiting
    ///   (e.g., "delta", "upload", "download", "metadata")
    ///
    /// # Returns
    /// The HTTP response on success, or an error after all retries are exhausted.
    pub async fn execute_with_retry(
        &self,
        method: Method,
        path: &str,
        endpoint_category: &str,
    ) -> Result<Response> {
        let max_retries = self
            .rate_limiter
            .as_ref()
            .map(|rl| rl.max_retries())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        for attempt in 0..=max_retries {
            // Step 1: Acquire rate limit token if limiter is present
            if let Some(ref limiter) = self.rate_limiter {
                let _guard = limiter.acquire(endpoint_category).await;
            }

            // Step 2: Build and send request
            let response = self
                .request(method.clone(), path)
                .send()
                .await
                .context("Failed to send request")?;

            // Step 3: Check for 429
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= max_retries {
                    warn!(path, attempts = attempt + 1, "429 retry limit exhausted");
                    return Err(anyhow::anyhow!(
                        "Too many requests: retry limit exhausted after {} attempts for {}",
                        attempt + 1,
                        path
                    ));
                }

                // Parse Retry-After header
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
                    .unwrap_or(DEFAULT_RETRY_AFTER);

                // Notify rate limiter
                if let Some(ref limiter) = self.rate_limiter {
                    limiter.on_throttle(endpoint_category);
                }

                info!(
                    path,
                    attempt,
                    retry_after_ms = retry_after.as_millis(),
                    "Received 429, backing off"
                );

                tokio::time::sleep(retry_after).await;
                continue;
            }

            // Step 4: Success - notify rate limiter
            if let Some(ref limiter) = self.rate_limiter {
                limiter.on_success(endpoint_category);
            }

            if attempt > 0 {
                info!(path, attempt, "Request succeeded after retry");
            }

            return Ok(response);
        }

        Err(anyhow::anyhow!(
            "Request failed: retry loop exited unexpectedly for {}",
            path
        ))
    }

    /// Returns a reference to the underlying HTTP client
    ///
    /// This is useful for upload operations that need to make requests
    /// to absolute URLs (e.g., upload session URLs) rather than relative paths.
    pub(crate) fn http_client(&self) -> &Client {
        &self.client
    }

    /// Returns the base URL for API requests
    ///
    /// Used when constructing direct API URLs (e.g., for download URLs).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns a reference to the underlying reqwest Client
    ///
    /// Useful for making direct HTTP requests (e.g., to pre-signed download URLs).
    pub fn client(&self) -> &Client {
        &self.client
    }
}
