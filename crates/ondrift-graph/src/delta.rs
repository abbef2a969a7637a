//! Microsoft Graph Delta API for incremental synchronization
//!
//! Implements the delta query pattern for OneDrive, which provides efficient
//! incremental sync by returning only items that have changed since the last query.
//!
//! ## Delta Query Flow
//!
//! 1. **Initial sync**: Call [`get_delta`] with `token = None` to get all items
//! 2. **Follow pages**: The function automatically follows `@odata.nextLink` pages
//! 3. **Save token**: The returned [`DeltaResponse`] contains a `delta_link` with
//!    a token for the next sync
//! 4. **Incremental sync**: Call [`get_delta`] with the saved token to get only changes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ondrift_graph::client::GraphClient;
//! use ondrift_graph::delta;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = GraphClient::new("access-token");
//!
//! // Initial sync: get all items
//! let response = delta::get_delta(&client, None).await?;
//! println!("Got {} items", response.items.len());
//!
//! // Save delta_link for next sync...
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::Deserialize;
use tracing::{debug, warn};

use ondrift_core::domain::newtypes::DeltaToken;
use ondrift_core::ports::cloud_provider::{DeltaItem, DeltaResponse};

use crate::client::GraphClient;

/// Path for the delta endpoint relative to the Graph API base URL
const DELTA_PATH: &str = "/me/drive/root/delta";

// ============================================================================
// Microsoft Graph API response types (JSON deserialization)
// ============================================================================

/// Raw response from the Microsoft Graph delta API
///
/// Represents the JSON structure returned by:
/// `GET /me/drive/root/delta`
///
/// See: <https://learn.microsoft.com/en-us/graph/api/driveitem-delta>
#[derive(Debug, Deserialize)]
struct GraphDeltaResponse {
    /// Array of changed drive items
    #[serde(default)]
    value: Vec<GraphDriveItem>,

    /// URL for the next page of results (present when more pages exist)
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,

    /// URL containing the delta token for the next sync cycle
    /// (present only on the last page of results)
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

/// A drive item from the Microsoft Graph delta response
///
/// Maps to the DriveItem resource type in the Graph API.
/// Fields use camelCase to match the JSON format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDriveItem {
    /// Unique identifier of the item within the drive
    id: String,

    /// Name of the item (filename or folder name)
    #[serde(default)]
    name: String,

    /// Size of the item in bytes (only for files)
    size: Option<u64>,

    /// Last modified date and time in ISO 8601 format
    last_modified_date_time: Option<DateTime<Utc>>,

    /// Reference to the parent item
    parent_reference: Option<GraphParentReference>,

    /// File facet (present if the item is a file)
    file: Option<GraphFileFacet>,

    /// Folder facet (present if the item is a folder)
    folder: Option<GraphFolderFacet>,

    /// Deleted facet (present if the item has been deleted)
    deleted: Option<GraphDeletedFacet>,
}

/// Parent reference information for a drive item
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphParentReference {
    /// Unique identifier of the parent item
    id: Option<String>,

    /// URL-decoded path of the parent in the drive
    /// Format: `/drive/root:/path/to/parent`
    path: Option<String>,
}

/// File facet indicating the item is a file
///
/// Contains file-specific metadata like hashes.
#[derive(Debug, Deserialize)]
struct GraphFileFacet {
    /// Content hashes for integrity verification
    hashes: Option<GraphHashes>,
}

/// Hash values for a file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphHashes {
    /// QuickXorHash of the file content (Base64-encoded)
    quick_xor_hash: Option<String>,
}

/// Folder facet indicating the item is a folder
///
/// The mere presence of this facet indicates the item is a folder.
/// The child_count field provides the number of immediate children.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFolderFacet {
    /// Number of immediate children in the folder
    #[allow(dead_code)]
    child_count: Option<u64>,
}

/// Deleted facet indicating the item has been deleted
///
/// The mere presence of this facet indicates deletion.
/// The state field may provide additional information.
#[derive(Debug, Deserialize)]
struct GraphDeletedFacet {
    /// Reason or state of deletion (often absent)
    #[allow(dead_code)]
    state: Option<String>,
}

// ============================================================================
// DeltaParser - converts Graph API responses to port-level types
// ============================================================================

/// Parser for converting Microsoft Graph delta responses into port-level types
///
/// Transforms the raw JSON-deserialized Graph API structs into the
/// [`DeltaItem`] and [`DeltaResponse`] types defined in `ondrift-core`.
pub struct DeltaParser;

impl DeltaParser {
    /// Parse a single Graph API drive item into a port-level [`DeltaItem`]
    ///
    /// Extracts and normalizes fields from the Graph API format:
    /// - Determines if the item is a directory based on the `folder` facet
    /// - Determines if the item is deleted based on the `deleted` facet
    /// - Extracts the quickXorHash from the file facet
    /// - Strips the `/drive/root:` prefix from the parent path
    fn parse_item(item: GraphDriveItem) -> DeltaItem {
        let is_deleted = item.deleted.is_some();
        let is_directory = item.folder.is_some();

        // Extract the quickXorHash from the file facet
        let hash = item
            .file
            .as_ref()
            .and_then(|f| f.hashes.as_ref())
            .and_then(|h| h.quick_xor_hash.clone());

        // Extract and normalize the parent path
        // Graph API returns paths like "/drive/root:/Documents/Subfolder"
        // We strip the "/drive/root:" prefix to get "/Documents/Subfolder"
        let path = item
            .parent_reference
            .as_ref()
            .and_then(|pr| pr.path.as_ref())
            .map(|p| Self::normalize_parent_path(p, &item.name));

        // Extract parent ID
        let parent_id = item.parent_reference.as_ref().and_then(|pr| pr.id.clone());

        DeltaItem {
            id: item.id,
            name: item.name,
            path,
            size: item.size,
            hash,
            modified: item.last_modified_date_time,
            is_deleted,
            is_directory,
            parent_id,
        }
    }

    /// Normalize a parent path from Graph API format to a clean path
    ///
    /// The Graph API returns parent paths like `/drive/root:/Documents/Subfolder`.
    /// This method strips the `/drive/root:` prefix and appends the item name
    /// to produce a full path like `/Documents/Subfolder/filename.txt`.
    ///
    /// If the parent path is exactly `/drive/root:` (root folder), the result
    /// is `/<item_name>`.
    fn normalize_parent_path(parent_path: &str, item_name: &str) -> String {
        let stripped = if let Some(rest) = parent_path.strip_prefix("/drive/root:") {
            if rest.is_empty() {
                "/".to_string()
            } else {
                rest.to_string()
            }
        } else {
            // Fallback: use the path as-is
            parent_path.to_string()
        };

        if stripped == "/" {
            format!("/{item_name}")
        } else {
            format!("{stripped}/{item_name}")
        }
    }

    /// Parse a complete Graph API delta response into a port-level [`DeltaResponse`]
    ///
    /// Converts all items and preserves the pagination links.
    fn parse_response(response: GraphDeltaResponse) -> DeltaResponse {
        let items = response.value.into_iter().map(Self::parse_item).collect();

        DeltaResponse {
            items,
            next_link: response.next_link,
            delta_link: response.delta_link,
        }
    }

    /// Extract the delta token value from a delta link URL
    ///
    /// The delta link is a full URL like:
    /// `https://graph.microsoft.com/v1.0/me/drive/root/delta?token=...`
    ///
    /// This extracts just the token parameter value.
    pub fn extract_delta_token(delta_link: &str) -> Option<String> {
        url::Url::parse(delta_link).ok().and_then(|u| {
            u.query_pairs()
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
        })
    }
}

// ============================================================================
// Delta query functions
// ============================================================================

/// Fetches all delta changes from OneDrive, automatically following pagination
///
/// Makes the initial delta request and follows all `@odata.nextLink` pages
/// until the final page with `@odata.deltaLink` is reached.
///
/// # Arguments
///
/// * `client` - A reference to the authenticated [`GraphClient`]
/// * `token` - Optional delta token from a previous sync. Pass `None` for initial sync.
///
/// # Returns
///
/// A [`DeltaResponse`] containing all changed items across all pages,
/// with `delta_link` set to the token URL for the next sync cycle.
///
/// # Errors
///
/// Returns an error if:
/// - The HTTP request fails
/// - The API returns a non-success status
/// - The response cannot be parsed as JSON
pub async fn get_delta(client: &GraphClient, token: Option<&DeltaToken>) -> Result<DeltaResponse> {
    // Build the initial request URL
    let path = match token {
        Some(t) => format!("{}?token={}", DELTA_PATH, t.as_str()),
        None => DELTA_PATH.to_string(),
    };

    debug!(has_token = token.is_some(), "Starting delta query");

    // Make the initial request using GraphClient's request() method
    let http_response = client
        .request(Method::GET, &path)
        .send()
        .await
        .context("Failed to send delta request")?;

    // T169: Check for 410 Gone before calling error_for_status().
    // A 410 means the delta token has expired and the client must
    // perform a full resync by re-querying without a token.
    if http_response.status() == reqwest::StatusCode::GONE {
        anyhow::bail!("Delta token expired (410 Gone)");
    }

    let raw_response: GraphDeltaResponse = http_response
        .error_for_status()
        .context("Delta request returned error status")?
        .json()
        .await
        .context("Failed to parse delta response JSON")?;

    let mut response = DeltaParser::parse_response(raw_response);

    debug!(
        items = response.items.len(),
        has_next = response.next_link.is_some(),
        "Received initial delta page"
    );

    // Follow pagination via nextLink
    let mut page_count: u32 = 1;
    while let Some(next_link) = response.next_link.take() {
        page_count += 1;
        debug!(page = page_count, "Following delta nextLink");

        let page = get_delta_page(client, &next_link).await?;

        debug!(
            page = page_count,
            items = page.items.len(),
            has_next = page.next_link.is_some(),
            "Received delta page"
        );

        // Accumulate items from this page
        response.items.extend(page.items);
        response.next_link = page.next_link;
        response.delta_link = page.delta_link;
    }

    debug!(
        total_items = response.items.len(),
        total_pages = page_count,
        has_delta_link = response.delta_link.is_some(),
        "Delta query complete"
    );

    if response.delta_link.is_none() {
        warn!("Delta query completed without a deltaLink; next sync may require full re-scan");
    }

    Ok(response)
}

/// Fetches a single page of delta results from a nextLink URL
///
/// The `@odata.nextLink` URL from the Graph API is an absolute URL,
/// so this function makes a direct HTTP request rather than using
/// the `GraphClient::request()` method (which prepends the base URL).
///
/// # Arguments
///
/// * `client` - A reference to the authenticated [`GraphClient`] (used for the access token)
/// * `next_link` - The absolute URL from `@odata.nextLink` in a previous response
///
/// # Returns
///
/// A [`DeltaResponse`] for this single page, which may contain its own
/// `next_link` (if more pages follow) or `delta_link` (if this is the last page).
///
/// # Errors
///
/// Returns an error if the HTTP request fails or the response cannot be parsed.
pub async fn get_delta_page(client: &GraphClient, next_link: &str) -> Result<DeltaResponse> {
    // nextLink is an absolute URL, so we cannot use client.request()
    // which prepends the base URL. Instead, create a direct request
    // with Bearer auth using the client's access token.
    let http_client = Client::new();

    let raw_response: GraphDeltaResponse = http_client
        .get(next_link)
        .bearer_auth(client.access_token())
        .send()
        .await
        .context("Failed to send delta page request")?
        .error_for_status()
        .context("Delta page request returned error status")?
        .json()
        .await
        .context("Failed to parse delta page response JSON")?;

    Ok(DeltaParser::parse_response(raw_response))
}

// ============================================================================
// Tests
// ============================================================================
