//! Client for the upstream wiki's REST content API.
//!
//! Responsible for enumerating items in a scope (a whole space, or one
//! page and its descendants, following server-driven pagination) and
//! fetching individual item bodies in storage markup.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use wikiharvest_shared::{HarvestError, Item, Result};

use crate::transport::RetryTransport;

/// Items requested per listing page.
const PAGE_LIMIT: u32 = 50;

/// Fields expanded on every listing call. Ancestors, labels, version, and
/// creation history all feed the work tree and the report.
const LIST_EXPAND: &str = "ancestors,metadata.labels,version,history";

// ---------------------------------------------------------------------------
// Wire types (upstream response shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<WireItem>,
    #[serde(rename = "_links", default)]
    links: WireLinks,
}

#[derive(Debug, Default, Deserialize)]
struct WireLinks {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    id: String,
    title: String,
    #[serde(rename = "type", default)]
    item_type: Option<String>,
    /// Ancestor chain, furthest first; the immediate parent is last.
    #[serde(default)]
    ancestors: Vec<WireAncestor>,
    #[serde(default)]
    metadata: WireMetadata,
    #[serde(default)]
    version: Option<WireVersion>,
    #[serde(default)]
    history: Option<WireHistory>,
}

#[derive(Debug, Deserialize)]
struct WireAncestor {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    labels: WireLabels,
}

#[derive(Debug, Default, Deserialize)]
struct WireLabels {
    #[serde(default)]
    results: Vec<WireLabel>,
}

#[derive(Debug, Deserialize)]
struct WireLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireVersion {
    number: u64,
    #[serde(default)]
    when: Option<DateTime<Utc>>,
    #[serde(default)]
    by: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct WireHistory {
    #[serde(rename = "createdDate", default)]
    created_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    body: Option<WireBody>,
}

#[derive(Debug, Deserialize)]
struct WireBody {
    #[serde(default)]
    storage: Option<WireStorage>,
}

#[derive(Debug, Deserialize)]
struct WireStorage {
    value: String,
}

impl From<WireItem> for Item {
    fn from(wire: WireItem) -> Self {
        Item {
            id: wire.id,
            title: wire.title,
            ancestors: wire.ancestors.into_iter().map(|a| a.id).collect(),
            labels: wire
                .metadata
                .labels
                .results
                .into_iter()
                .map(|l| l.name)
                .collect(),
            item_type: wire.item_type,
            version: wire.version.as_ref().map(|v| v.number),
            updated_by: wire
                .version
                .as_ref()
                .and_then(|v| v.by.as_ref())
                .map(|u| u.display_name.clone()),
            created_at: wire.history.and_then(|h| h.created_date),
            updated_at: wire.version.and_then(|v| v.when),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemScope
// ---------------------------------------------------------------------------

/// What to enumerate: a whole space, or one page and all of its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemScope {
    /// Every page in the space with this key.
    Space(String),
    /// The page with this id, plus every descendant page under it.
    Parent(String),
}

impl ItemScope {
    /// Stable identifier keying the checkpoint, reports, and error log.
    pub fn key(&self) -> String {
        match self {
            Self::Space(key) => key.clone(),
            Self::Parent(id) => format!("page-{id}"),
        }
    }
}

impl std::fmt::Display for ItemScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Space(key) => write!(f, "space {key}"),
            Self::Parent(id) => write!(f, "page {id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// WikiClient
// ---------------------------------------------------------------------------

/// Client for the upstream wiki content API.
#[derive(Debug, Clone)]
pub struct WikiClient {
    transport: RetryTransport,
    base_url: Url,
    credentials: Option<(String, String)>,
}

impl WikiClient {
    /// Create a client rooted at `base_url` (the site root, not an API path).
    pub fn new(
        transport: RetryTransport,
        mut base_url: Url,
        credentials: Option<(String, String)>,
    ) -> Self {
        // Joins drop the last path segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            transport,
            base_url,
            credentials,
        }
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, token)) => request.basic_auth(user, Some(token)),
            None => request,
        }
    }

    /// Enumerate every item in `scope`, following pagination to the end.
    ///
    /// This is all-or-nothing: any page of the listing failing after retries
    /// fails the whole enumeration, so a run never starts from a partial
    /// item set.
    #[instrument(skip_all, fields(scope = %scope))]
    pub async fn list_items(&self, scope: &ItemScope) -> Result<Vec<Item>> {
        let items = match scope {
            ItemScope::Space(key) => {
                self.list_paged("rest/api/content", &[("spaceKey", key.as_str()), ("type", "page")])
                    .await?
            }
            ItemScope::Parent(id) => {
                let url = self
                    .base_url
                    .join(&format!("rest/api/content/{id}"))
                    .map_err(|e| HarvestError::Network(format!("bad parent id {id:?}: {e}")))?;
                let parent: WireItem = self
                    .get_json_with_query("list", url, &[("expand", LIST_EXPAND)])
                    .await?;

                // Parent first, leading its subtree in enumeration order.
                let mut items = vec![Item::from(parent)];
                items.extend(
                    self.list_paged(&format!("rest/api/content/{id}/descendant/page"), &[])
                        .await?,
                );
                items
            }
        };

        info!(items = items.len(), "enumeration complete");
        Ok(items)
    }

    /// Fetch every page of a listing endpoint, stepping the `start` offset
    /// while the server reports a next page. The server's next link is only
    /// used as a has-more signal, never dereferenced: those links are
    /// site-root-relative and would drop a path-bearing base URL.
    async fn list_paged(&self, endpoint: &str, extra: &[(&str, &str)]) -> Result<Vec<Item>> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| HarvestError::Network(format!("bad base URL: {e}")))?;

        let mut items: Vec<Item> = Vec::new();
        let mut start = 0u32;
        let mut pages = 0usize;

        loop {
            let limit = PAGE_LIMIT.to_string();
            let offset = start.to_string();
            let mut query: Vec<(&str, &str)> = extra.to_vec();
            query.push(("limit", &limit));
            query.push(("start", &offset));
            query.push(("expand", LIST_EXPAND));

            let page: ListResponse = self
                .get_json_with_query("list", url.clone(), &query)
                .await?;

            pages += 1;
            debug!(page = pages, results = page.results.len(), "listing page fetched");
            items.extend(page.results.into_iter().map(Item::from));

            if page.links.next.is_some() {
                start += PAGE_LIMIT;
            } else {
                break;
            }
        }

        Ok(items)
    }

    /// Fetch an item's body in storage markup.
    pub async fn fetch_body(&self, item_id: &str) -> Result<String> {
        let url = self
            .base_url
            .join(&format!("rest/api/content/{item_id}"))
            .map_err(|e| HarvestError::Network(format!("bad item id {item_id:?}: {e}")))?;

        let key = format!("{item_id}/fetch");
        let content: ContentResponse = self
            .get_json_with_query(&key, url, &[("expand", "body.storage")])
            .await?;

        Ok(content
            .body
            .and_then(|b| b.storage)
            .map(|s| s.value)
            .unwrap_or_default())
    }

    async fn get_json_with_query<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .transport
            .execute(key, |client| {
                self.apply_auth(client.get(url.clone()).query(query))
            })
            .await?;

        response
            .json::<T>()
            .await
            .map_err(|e| HarvestError::Network(format!("invalid response body: {e}")))
    }
}
