//! Front door: tenant/path parsing, endpoint classification, and the
//! process-wide Agent registry.
//!
//! `Router` holds the *only* process-wide mutable state: a
//! `DashMap<String, Arc<AgentHandle>>` keyed by
//! `OwnerKey::canonical()`, grounded on
//! `message_router::implementations::agent_registry`'s `DashMap<AgentId,
//! LocalAgent>` registry and on `caxton::server`'s top-level `Router`
//! construction.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, instrument};

use crate::agent::AgentHandle;
use crate::collaborators::{ApprovalHook, MessageBus, ModelClient, VectorStore, WorkflowDispatcher};
use crate::config::FleetConfig;
use crate::domain_types::{AgentPath, OwnerKey, PathSegment, TenantKey};
use crate::error::{ApiError, ApiResult};
use crate::store::Store;

/// The four external collaborator bindings plus the approval hook, bundled
/// so `Router` and every spawned `AgentHandle` can share one `Arc` each.
#[derive(Clone)]
pub struct Collaborators {
    /// Language model binding.
    pub model: Arc<dyn ModelClient>,
    /// Vector similarity binding.
    pub vector: Arc<dyn VectorStore>,
    /// Background workflow binding.
    pub workflow: Arc<dyn WorkflowDispatcher>,
    /// Audit/notification bus binding.
    pub bus: Arc<dyn MessageBus>,
    /// Human-in-the-loop approval gate.
    pub approval: Arc<dyn ApprovalHook>,
}

/// An HTTP/subscription endpoint, classified from a raw URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiEndpoint {
    /// `/state`
    State,
    /// `/increment`
    Increment,
    /// `/messages`
    Messages,
    /// `/message`
    Message,
    /// `/delete-subtree`
    DeleteSubtree,
    /// `/inventory/stock`
    InventoryStock,
    /// `/inventory/query`
    InventoryQuery,
    /// `/inventory/sync`
    InventorySync,
    /// `/inventory/alerts`
    InventoryAlerts,
    /// `/ai/analyze`
    AiAnalyze,
    /// `/ai/forecast`
    AiForecast,
    /// `/ai/insights`
    AiInsights,
    /// `/debug/locations`
    DebugLocations,
    /// `/debug/db`
    DebugDb,
    /// `/ws` — a subscription upgrade rather than an HTTP API call.
    Subscription,
}

const KNOWN_SUFFIXES: &[(&str, ApiEndpoint)] = &[
    ("/state", ApiEndpoint::State),
    ("/increment", ApiEndpoint::Increment),
    ("/messages", ApiEndpoint::Messages),
    ("/message", ApiEndpoint::Message),
    ("/delete-subtree", ApiEndpoint::DeleteSubtree),
    ("/inventory/stock", ApiEndpoint::InventoryStock),
    ("/inventory/query", ApiEndpoint::InventoryQuery),
    ("/inventory/sync", ApiEndpoint::InventorySync),
    ("/inventory/alerts", ApiEndpoint::InventoryAlerts),
    ("/ai/analyze", ApiEndpoint::AiAnalyze),
    ("/ai/forecast", ApiEndpoint::AiForecast),
    ("/ai/insights", ApiEndpoint::AiInsights),
    ("/debug/locations", ApiEndpoint::DebugLocations),
    ("/debug/db", ApiEndpoint::DebugDb),
];

/// Derive `(tenant, remaining_path)` from a host header and URL path, trying
/// subdomain, then `/tenant/<id>/...` prefix, then bare first segment, in
/// that order.
#[must_use]
pub fn derive_tenant(host: Option<&str>, url_path: &str) -> (TenantKey, String) {
    if let Some(host) = host {
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() >= 3 && labels[0] != "www" {
            if let Ok(tenant) = TenantKey::try_new(labels[0]) {
                return (tenant, url_path.to_string());
            }
        }
    }

    let trimmed = url_path.trim_start_matches('/');
    if let Some(rest) = trimmed.strip_prefix("tenant/") {
        let mut parts = rest.splitn(2, '/');
        if let Some(id) = parts.next() {
            if let Ok(tenant) = TenantKey::try_new(id) {
                let remaining = parts.next().unwrap_or("");
                return (tenant, format!("/{remaining}"));
            }
        }
    }

    let mut parts = trimmed.splitn(2, '/');
    if let Some(first) = parts.next() {
        if !first.is_empty() {
            if let Ok(tenant) = TenantKey::try_new(first) {
                let remaining = parts.next().unwrap_or("");
                return (tenant, format!("/{remaining}"));
            }
        }
    }

    (TenantKey::default(), url_path.to_string())
}

/// Classify `url_path` (already stripped of its tenant prefix) into an
/// `(AgentPath, ApiEndpoint)` pair.
///
/// # Errors
///
/// Returns [`ApiError::UnknownEndpoint`] if no known suffix, `/inventory/`,
/// `/ai/` substring, or trailing `/ws` is found, or
/// [`ApiError::Validation`] if the remaining path segments don't
/// canonicalize.
pub fn classify_endpoint(url_path: &str) -> ApiResult<(AgentPath, ApiEndpoint)> {
    if let Some(stripped) = url_path.strip_suffix("/ws") {
        let path = AgentPath::parse(stripped)
            .map_err(|e| ApiError::Validation(format!("invalid path: {e}")))?;
        return Ok((path, ApiEndpoint::Subscription));
    }

    for (suffix, endpoint) in KNOWN_SUFFIXES {
        if let Some(stripped) = url_path.strip_suffix(suffix) {
            let path = AgentPath::parse(stripped)
                .map_err(|e| ApiError::Validation(format!("invalid path: {e}")))?;
            return Ok((path, *endpoint));
        }
    }

    if let Some(idx) = url_path.find("/inventory/") {
        return Err(ApiError::UnknownEndpoint(url_path[idx..].to_string()));
    }
    if let Some(idx) = url_path.find("/ai/") {
        return Err(ApiError::UnknownEndpoint(url_path[idx..].to_string()));
    }

    Err(ApiError::UnknownEndpoint(url_path.to_string()))
}

/// The process-wide front door and Agent registry.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    registry: DashMap<String, Arc<AgentHandle>>,
    config: FleetConfig,
    collaborators: Collaborators,
}

impl Router {
    /// Build a new, empty Router.
    #[must_use]
    pub fn new(config: FleetConfig, collaborators: Collaborators) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                registry: DashMap::new(),
                config,
                collaborators,
            }),
        }
    }

    /// This router's configuration.
    #[must_use]
    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    /// This router's collaborator bindings.
    #[must_use]
    pub fn collaborators(&self) -> &Collaborators {
        &self.inner.collaborators
    }

    /// Return the live `AgentHandle` for `owner`, creating and initializing
    /// one (opening its `Store`, applying migrations, loading persisted
    /// state) if this is the first request for that `OwnerKey`.
    ///
    /// Because this call is `await`ed by every caller before a command is
    /// ever sent to the returned handle, there is no window in which a
    /// command can reach an Agent before its store has finished loading —
    /// the `INITIALIZING` barrier is enforced structurally: no handle
    /// exists to send to until this future resolves.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the store cannot be opened.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn handle_for(&self, owner: OwnerKey) -> ApiResult<Arc<AgentHandle>> {
        let key = owner.canonical();
        if let Some(existing) = self.inner.registry.get(&key) {
            return Ok(Arc::clone(&existing));
        }

        let store = Store::open(&self.inner.config.data_dir, &key, self.inner.config.store_pool_size)
            .await
            .map_err(ApiError::from)?;
        let handle = AgentHandle::spawn(owner, store, self.clone()).await?;

        match self.inner.registry.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let handle = Arc::new(handle);
                vacant.insert(Arc::clone(&handle));
                Ok(handle)
            }
        }
    }

    /// Return the already-registered handle for `owner`, without creating
    /// one. Used by the hierarchy fabric to reach children/parents that may
    /// not have been touched yet in this process.
    #[must_use]
    pub fn existing_handle(&self, owner: &OwnerKey) -> Option<Arc<AgentHandle>> {
        self.inner.registry.get(&owner.canonical()).map(|e| Arc::clone(&e))
    }

    /// Remove `owner` from the registry. Called once an Agent has finished
    /// draining (`DRAINING -> TERMINATED`).
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn remove(&self, owner: &OwnerKey) {
        if self.inner.registry.remove(&owner.canonical()).is_some() {
            info!("agent removed from registry");
        }
    }

    /// Build the `OwnerKey` for `tenant`'s child `segment` under `parent`.
    #[must_use]
    pub fn child_owner(tenant: &TenantKey, parent: &AgentPath, segment: &PathSegment) -> OwnerKey {
        OwnerKey::new(tenant.clone(), parent.child(segment.clone()))
    }

    /// Canonical keys of every Agent this process currently has live, for
    /// `/debug/locations`.
    #[must_use]
    pub fn registered_owners(&self) -> Vec<String> {
        self.inner.registry.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_tenant_from_subdomain() {
        let (tenant, path) = derive_tenant(Some("acme.fleet.example.com"), "/wh");
        assert_eq!(tenant.to_string(), "acme");
        assert_eq!(path, "/wh");
    }

    #[test]
    fn derive_tenant_ignores_www_subdomain() {
        let (tenant, _) = derive_tenant(Some("www.fleet.example.com"), "/acme/wh");
        assert_eq!(tenant.to_string(), "acme");
    }

    #[test]
    fn derive_tenant_from_tenant_path_prefix() {
        let (tenant, path) = derive_tenant(None, "/tenant/acme/wh/state");
        assert_eq!(tenant.to_string(), "acme");
        assert_eq!(path, "/wh/state");
    }

    #[test]
    fn derive_tenant_from_first_segment() {
        let (tenant, path) = derive_tenant(None, "/acme/wh/state");
        assert_eq!(tenant.to_string(), "acme");
        assert_eq!(path, "/wh/state");
    }

    #[test]
    fn derive_tenant_defaults_to_demo() {
        let (tenant, _) = derive_tenant(None, "/");
        assert_eq!(tenant.to_string(), "demo");
    }

    #[test]
    fn classify_known_suffix() {
        let (path, endpoint) = classify_endpoint("/wh/a/state").unwrap();
        assert_eq!(path.to_string(), "/wh/a");
        assert_eq!(endpoint, ApiEndpoint::State);
    }

    #[test]
    fn classify_subscription_upgrade() {
        let (path, endpoint) = classify_endpoint("/wh/a/ws").unwrap();
        assert_eq!(path.to_string(), "/wh/a");
        assert_eq!(endpoint, ApiEndpoint::Subscription);
    }

    #[test]
    fn classify_inventory_substring_split() {
        let (path, endpoint) = classify_endpoint("/wh/inventory/stock").unwrap();
        assert_eq!(path.to_string(), "/wh");
        assert_eq!(endpoint, ApiEndpoint::InventoryStock);
    }

    #[test]
    fn classify_unknown_endpoint_errors() {
        assert!(classify_endpoint("/wh/nonsense").is_err());
    }
}
