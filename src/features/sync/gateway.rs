//! Remote gateway abstraction.
//!
//! The authoritative backend is an external collaborator. Each table gets a
//! [`RemoteGateway`] registered in a [`GatewayRegistry`]; the sync engine
//! looks gateways up by the queue item's table name. [`RestGateway`] is a
//! generic JSON-over-HTTP adapter for backends that expose one resource per
//! table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use super::operation::validate_table_name;
use crate::error::SyncError;

/// Per-table operations on the remote backend.
///
/// A [`SyncError::Gateway`] message is collected verbatim into the pass's
/// error list; other errors are collected via `Display`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Create a record remotely.
    async fn create(&self, record: &Value) -> Result<(), SyncError>;

    /// Create or replace the record with the given id.
    async fn upsert(&self, id: &str, record: &Value) -> Result<(), SyncError>;

    /// Remove the record with the given id.
    async fn remove(&self, id: &str) -> Result<(), SyncError>;
}

/// Table name → gateway mapping, validated at registration time.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn RemoteGateway>>,
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("tables", &self.tables())
            .finish()
    }
}

impl GatewayRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the gateway for `table`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidTable`] if the name is invalid, or
    /// [`SyncError::Config`] if the table already has a gateway.
    pub fn register(
        &mut self,
        table: &str,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Result<(), SyncError> {
        validate_table_name(table)?;
        if self.gateways.contains_key(table) {
            return Err(SyncError::Config(format!(
                "A remote gateway is already registered for table '{table}'"
            )));
        }
        self.gateways.insert(table.to_string(), gateway);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn with(mut self, table: &str, gateway: Arc<dyn RemoteGateway>) -> Result<Self, SyncError> {
        self.register(table, gateway)?;
        Ok(self)
    }

    /// Look up the gateway for `table`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Gateway`] if nothing is registered for it.
    pub fn get(&self, table: &str) -> Result<&Arc<dyn RemoteGateway>, SyncError> {
        self.gateways.get(table).ok_or_else(|| {
            SyncError::Gateway(format!("no remote gateway registered for table '{table}'"))
        })
    }

    /// Registered table names, sorted.
    #[must_use]
    pub fn tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = self.gateways.keys().map(String::as_str).collect();
        tables.sort_unstable();
        tables
    }

    /// Whether no gateways are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

/// JSON-over-HTTP gateway for one table.
///
/// - insert: `POST {base}/{table}`
/// - update: `PUT {base}/{table}/{id}`
/// - delete: `DELETE {base}/{table}/{id}`
///
/// The id is percent-encoded as a single path segment.
#[derive(Debug, Clone)]
pub struct RestGateway {
    client: reqwest::Client,
    collection_url: Url,
}

impl RestGateway {
    /// Create a gateway for `table` under `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name or base URL is invalid, or the
    /// HTTP client cannot be built.
    pub fn new(base_url: &str, table: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {e}")))?;
        Self::with_client(client, base_url, table)
    }

    /// Create a gateway that shares an existing HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or `base_url` is not an
    /// absolute URL.
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        table: &str,
    ) -> Result<Self, SyncError> {
        validate_table_name(table)?;
        let base = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("Invalid remote.base_url '{base_url}': {e}")))?;
        let collection_url = push_segment(base, table)?;
        Ok(Self {
            client,
            collection_url,
        })
    }

    /// Build a registry with one REST gateway per table, sharing one client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built or a table name is
    /// invalid or repeated.
    pub fn registry(
        base_url: &str,
        tables: &[String],
        timeout: Duration,
    ) -> Result<GatewayRegistry, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {e}")))?;

        let mut registry = GatewayRegistry::new();
        for table in tables {
            let gateway = Self::with_client(client.clone(), base_url, table)?;
            registry.register(table, Arc::new(gateway))?;
        }
        Ok(registry)
    }

    /// URL of the table's collection.
    #[must_use]
    pub const fn collection_url(&self) -> &Url {
        &self.collection_url
    }

    /// URL of a single record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidItem`] for ids that would not address a
    /// record (`""`, `.` and `..`).
    pub fn record_url(&self, id: &str) -> Result<Url, SyncError> {
        if matches!(id, "" | "." | "..") {
            return Err(SyncError::InvalidItem(format!(
                "record id '{id}' cannot be sent to {}",
                self.collection_url
            )));
        }
        push_segment(self.collection_url.clone(), id)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<(), SyncError> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Gateway(format!("{what} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Gateway(format!(
            "{what} returned {status}: {}",
            body.trim()
        )))
    }
}

#[async_trait]
impl RemoteGateway for RestGateway {
    async fn create(&self, record: &Value) -> Result<(), SyncError> {
        let what = format!("POST {}", self.collection_url);
        let request = self.client.post(self.collection_url.clone()).json(record);
        self.send(request, &what).await
    }

    async fn upsert(&self, id: &str, record: &Value) -> Result<(), SyncError> {
        let url = self.record_url(id)?;
        let what = format!("PUT {url}");
        let request = self.client.put(url).json(record);
        self.send(request, &what).await
    }

    async fn remove(&self, id: &str) -> Result<(), SyncError> {
        let url = self.record_url(id)?;
        let what = format!("DELETE {url}");
        let request = self.client.delete(url);
        self.send(request, &what).await
    }
}

/// Append `segment` to the path, escaping `/`, `?`, `#` and `%`.
fn push_segment(mut url: Url, segment: &str) -> Result<Url, SyncError> {
    if url.cannot_be_a_base() {
        return Err(SyncError::Config(format!(
            "Remote URL '{url}' cannot have a path"
        )));
    }
    url.path_segments_mut()
        .map_err(|()| SyncError::Config("Remote URL cannot have a path".to_string()))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}
