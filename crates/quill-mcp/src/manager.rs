//! Reconciles the declared server list against live sessions.
//!
//! The manager owns the registry, the capability cache, and the persisted
//! config document. Reconciliation drives sessions toward the declared
//! state; a server that fails to start, or whose process exits unexpectedly,
//! is flipped to disabled and persisted so it will not auto-restart.

use crate::capability::{CapabilityCache, CapabilitySnapshot};
use crate::client::McpClient;
use crate::config::{CONFIG_KEY, InstallMetadata, ServerConfig, TransportConfig};
use crate::error::McpError;
use crate::launch::RuntimeLocator;
use crate::registry::{Session, SessionRegistry};
use quill_store::FileStore;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Result of one server within a reconciliation pass.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub identity: String,
    pub name: String,
    /// The start failure, if the server could not be brought up.
    pub error: Option<McpError>,
}

/// Outcome of probing a server outside the registry.
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub ok: bool,
    #[serde(flatten)]
    pub capabilities: Option<CapabilitySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeReport {
    fn success(capabilities: CapabilitySnapshot) -> Self {
        Self {
            ok: true,
            capabilities: Some(capabilities),
            error: None,
        }
    }

    fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            capabilities: None,
            error: Some(error.to_string()),
        }
    }
}

/// Orchestrates server sessions against the persisted config document.
pub struct McpManager {
    registry: Arc<SessionRegistry>,
    cache: Arc<CapabilityCache>,
    store: Arc<FileStore>,
    locator: Arc<dyn RuntimeLocator>,
}

impl McpManager {
    pub fn new(store: Arc<FileStore>, locator: Arc<dyn RuntimeLocator>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(Arc::clone(&locator))),
            cache: Arc::new(CapabilityCache::new()),
            store,
            locator,
        }
    }

    // --- config document -------------------------------------------------

    /// The persisted server list, in document order.
    pub async fn load_configs(&self) -> Result<Vec<ServerConfig>, McpError> {
        Ok(self
            .store
            .get::<Vec<ServerConfig>>(CONFIG_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Replace the whole persisted document. Last writer wins.
    pub async fn save_configs(&self, configs: &[ServerConfig]) -> Result<(), McpError> {
        self.store.set(CONFIG_KEY, &configs).await?;
        Ok(())
    }

    /// Append a new server with a fresh identity and persist the list.
    pub async fn add_config(
        &self,
        name: &str,
        enabled: bool,
        transport: TransportConfig,
        install: Option<InstallMetadata>,
    ) -> Result<ServerConfig, McpError> {
        let config = ServerConfig {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            enabled,
            transport,
            install,
        };
        let mut configs = self.load_configs().await?;
        configs.push(config.clone());
        self.save_configs(&configs).await?;
        Ok(config)
    }

    /// Update a server in place and persist the list.
    pub async fn update_config(&self, updated: &ServerConfig) -> Result<(), McpError> {
        let mut configs = self.load_configs().await?;
        let Some(slot) = configs.iter_mut().find(|c| c.id == updated.id) else {
            return Err(McpError::UnknownServer {
                identity: updated.id.clone(),
            });
        };
        *slot = updated.clone();
        self.save_configs(&configs).await
    }

    /// Remove a server from the document, stopping any session it has.
    pub async fn remove_config(&self, identity: &str) -> Result<(), McpError> {
        self.stop(identity).await;
        let mut configs = self.load_configs().await?;
        configs.retain(|c| c.id != identity);
        self.save_configs(&configs).await
    }

    // --- lifecycle -------------------------------------------------------

    /// Start (or fetch) the session for this config, snapshotting its
    /// capabilities and arming the exit monitor.
    pub async fn start(&self, config: &ServerConfig) -> Result<Arc<Session>, McpError> {
        let session = self.registry.start(config).await?;

        if session.arm_monitor() {
            self.snapshot_capabilities(&session).await;
            self.spawn_exit_monitor(&session);
        }

        Ok(session)
    }

    /// Stop the session for `identity`. Never fails; invalidates its
    /// capability snapshot.
    pub async fn stop(&self, identity: &str) {
        self.registry.stop(identity).await;
        self.cache.invalidate(identity).await;
    }

    pub async fn is_running(&self, identity: &str) -> bool {
        self.registry.is_running(identity).await
    }

    /// The live session handle for `identity`, if any. Tool calls go
    /// through `session.client`.
    pub async fn session(&self, identity: &str) -> Option<Arc<Session>> {
        self.registry.get(identity).await
    }

    /// Cached capabilities for the current session of `identity`.
    pub async fn capabilities(&self, identity: &str) -> Option<CapabilitySnapshot> {
        let session = self.registry.get(identity).await?;
        self.cache.get(identity, session.id).await
    }

    /// Stop everything. Used on shutdown.
    pub async fn stop_all(&self) {
        self.registry.stop_all().await;
    }

    // --- reconciliation --------------------------------------------------

    /// Drive live sessions toward the declared list.
    ///
    /// Every enabled config without a session gets a start attempt; a
    /// failure marks that config disabled and persists it, and the pass
    /// continues over the rest. Disabled configs with a session are stopped.
    pub async fn reconcile_all(&self, configs: &[ServerConfig]) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();

        for config in configs {
            if !config.enabled {
                if self.registry.get(&config.id).await.is_some() {
                    self.stop(&config.id).await;
                }
                continue;
            }

            let error = match self.start(config).await {
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("failed to start server '{}': {}", config.name, e);
                    if let Err(persist_err) = self.mark_disabled(&config.id).await {
                        tracing::warn!(
                            "failed to persist disabled flag for '{}': {}",
                            config.id,
                            persist_err
                        );
                    }
                    Some(e)
                }
            };
            outcomes.push(ReconcileOutcome {
                identity: config.id.clone(),
                name: config.name.clone(),
                error,
            });
        }

        outcomes
    }

    /// Authoritative enable/disable toggle.
    ///
    /// Enabling persists the flag and starts the session; if the start
    /// fails, the persisted flag reverts to false and any half-started
    /// session is stopped before the error is returned. Disabling persists
    /// and stops unconditionally.
    pub async fn set_enabled(&self, identity: &str, enabled: bool) -> Result<(), McpError> {
        let mut configs = self.load_configs().await?;
        let Some(config) = configs.iter_mut().find(|c| c.id == identity) else {
            return Err(McpError::UnknownServer {
                identity: identity.to_string(),
            });
        };
        config.enabled = enabled;
        let config = config.clone();
        self.save_configs(&configs).await?;

        if !enabled {
            self.stop(identity).await;
            return Ok(());
        }

        match self.start(&config).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Err(persist_err) = self.mark_disabled(identity).await {
                    tracing::warn!(
                        "failed to revert enabled flag for '{}': {}",
                        identity,
                        persist_err
                    );
                }
                self.stop(identity).await;
                Err(e)
            }
        }
    }

    /// Full start → discovery → close cycle against an unsaved config,
    /// bypassing the registry and leaving persisted state untouched.
    pub async fn probe_config(&self, config: &ServerConfig) -> ProbeReport {
        let client =
            match McpClient::connect(&config.name, &config.transport, self.locator.as_ref()).await
            {
                Ok(client) => client,
                Err(e) => return ProbeReport::failure(e),
            };

        let report = match client.fetch_capabilities().await {
            Ok(capabilities) => ProbeReport::success(capabilities),
            Err(e) => ProbeReport::failure(e),
        };
        client.close().await;
        report
    }

    /// Probe a configured server by identity.
    pub async fn probe(&self, identity: &str) -> ProbeReport {
        let configs = match self.load_configs().await {
            Ok(configs) => configs,
            Err(e) => return ProbeReport::failure(e),
        };
        match configs.iter().find(|c| c.id == identity) {
            Some(config) => self.probe_config(config).await,
            None => ProbeReport::failure(McpError::UnknownServer {
                identity: identity.to_string(),
            }),
        }
    }

    // --- internals -------------------------------------------------------

    async fn snapshot_capabilities(&self, session: &Arc<Session>) {
        match session.client.fetch_capabilities().await {
            Ok(snapshot) => {
                self.cache
                    .put(&session.identity, session.id, snapshot)
                    .await;
            }
            Err(e) => {
                tracing::warn!("discovery failed for '{}': {}", session.identity, e);
            }
        }
    }

    /// Watches for the transport closing underneath a session. An orderly
    /// stop marks the session first and is ignored here; anything else is an
    /// unexpected exit: evict the session, drop its snapshot, and persist
    /// the config disabled so reconciliation will not restart it.
    fn spawn_exit_monitor(&self, session: &Arc<Session>) {
        let session = Arc::clone(session);
        let registry = Arc::clone(&self.registry);
        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            session.client.closed().await;
            if session.is_closing() {
                return;
            }
            tracing::warn!("server '{}' exited unexpectedly", session.identity);

            registry.remove_if(&session.identity, session.id).await;
            cache.invalidate(&session.identity).await;
            if let Err(e) = Self::mark_disabled_in(&store, &session.identity).await {
                tracing::warn!(
                    "failed to persist disabled flag for '{}': {}",
                    session.identity,
                    e
                );
            }
        });
    }

    async fn mark_disabled(&self, identity: &str) -> Result<(), McpError> {
        Self::mark_disabled_in(&self.store, identity).await
    }

    async fn mark_disabled_in(store: &FileStore, identity: &str) -> Result<(), McpError> {
        let mut configs = store
            .get::<Vec<ServerConfig>>(CONFIG_KEY)
            .await?
            .unwrap_or_default();
        if let Some(config) = configs.iter_mut().find(|c| c.id == identity) {
            config.enabled = false;
            store.set(CONFIG_KEY, &configs).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::SystemLocator;
    use crate::testutil;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn test_manager() -> (McpManager, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path().to_path_buf()).await.unwrap();
        let manager = McpManager::new(Arc::new(store), Arc::new(SystemLocator));
        (manager, tmp)
    }

    async fn persisted_enabled(manager: &McpManager, identity: &str) -> Option<bool> {
        manager
            .load_configs()
            .await
            .unwrap()
            .iter()
            .find(|c| c.id == identity)
            .map(|c| c.enabled)
    }

    #[tokio::test]
    async fn set_enabled_starts_and_stops_a_session() {
        let (manager, _tmp) = test_manager().await;
        let config = testutil::mock_config("a", false);
        manager.save_configs(&[config]).await.unwrap();

        manager.set_enabled("a", true).await.unwrap();
        assert!(manager.is_running("a").await);
        assert_eq!(persisted_enabled(&manager, "a").await, Some(true));

        manager.set_enabled("a", false).await.unwrap();
        assert!(!manager.is_running("a").await);
        assert_eq!(persisted_enabled(&manager, "a").await, Some(false));
    }

    #[tokio::test]
    async fn failed_enable_reverts_the_persisted_flag() {
        let (manager, _tmp) = test_manager().await;
        let config = testutil::broken_config("b", false);
        manager.save_configs(&[config]).await.unwrap();

        let err = manager.set_enabled("b", true).await.unwrap_err();
        assert!(matches!(err, McpError::Start { .. }));
        assert!(!manager.is_running("b").await);
        assert_eq!(persisted_enabled(&manager, "b").await, Some(false));
    }

    #[tokio::test]
    async fn set_enabled_unknown_identity_errors() {
        let (manager, _tmp) = test_manager().await;
        let err = manager.set_enabled("ghost", true).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownServer { .. }));
    }

    #[tokio::test]
    async fn reconcile_isolates_the_failing_server() {
        let (manager, _tmp) = test_manager().await;
        let configs = vec![
            testutil::mock_config("good-1", true),
            testutil::broken_config("bad", true),
            testutil::mock_config("good-2", true),
        ];
        manager.save_configs(&configs).await.unwrap();

        let outcomes = manager.reconcile_all(&configs).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].error.is_none());
        assert!(outcomes[1].error.is_some());
        assert!(outcomes[2].error.is_none());

        assert!(manager.is_running("good-1").await);
        assert!(!manager.is_running("bad").await);
        assert!(manager.is_running("good-2").await);
        assert_eq!(persisted_enabled(&manager, "bad").await, Some(false));

        manager.stop_all().await;
    }

    #[tokio::test]
    async fn reconcile_stops_disabled_servers() {
        let (manager, _tmp) = test_manager().await;
        let mut config = testutil::mock_config("a", true);
        manager.save_configs(&[config.clone()]).await.unwrap();

        manager.reconcile_all(&[config.clone()]).await;
        assert!(manager.is_running("a").await);

        config.enabled = false;
        manager.reconcile_all(&[config]).await;
        assert!(!manager.is_running("a").await);
    }

    #[tokio::test]
    async fn start_populates_the_capability_cache() {
        let (manager, _tmp) = test_manager().await;
        let config = testutil::mock_config("a", true);

        manager.start(&config).await.unwrap();
        let snapshot = manager.capabilities("a").await.unwrap();
        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.tools[0].name, "echo");

        manager.stop("a").await;
        assert!(manager.capabilities("a").await.is_none());
    }

    #[tokio::test]
    async fn probe_reports_without_registering_a_session() {
        let (manager, _tmp) = test_manager().await;
        let config = testutil::mock_config("a", false);
        manager.save_configs(&[config]).await.unwrap();

        let report = manager.probe("a").await;
        assert!(report.ok);
        assert_eq!(report.capabilities.unwrap().tools.len(), 1);

        assert!(!manager.is_running("a").await);
        assert_eq!(persisted_enabled(&manager, "a").await, Some(false));
    }

    #[tokio::test]
    async fn probe_failure_is_a_report_not_an_error() {
        let (manager, _tmp) = test_manager().await;
        let report = manager.probe_config(&testutil::broken_config("x", false)).await;
        assert!(!report.ok);
        assert!(report.error.is_some());

        let unknown = manager.probe("ghost").await;
        assert!(!unknown.ok);
    }

    #[tokio::test]
    async fn unexpected_exit_disables_the_config() {
        let (manager, _tmp) = test_manager().await;
        let config = testutil::mock_config("a", true);
        manager.save_configs(&[config.clone()]).await.unwrap();

        let session = manager.start(&config).await.unwrap();
        assert!(manager.is_running("a").await);

        // The mock exits without replying when it sees this method.
        let _ = session.client.request("shutdown/crash", None).await;

        let settled = testutil::wait_until(Duration::from_secs(5), || async {
            !manager.is_running("a").await
                && persisted_enabled(&manager, "a").await == Some(false)
        })
        .await;
        assert!(settled, "exit monitor did not settle");
        assert!(manager.capabilities("a").await.is_none());
    }

    #[tokio::test]
    async fn orderly_stop_does_not_touch_the_enabled_flag() {
        let (manager, _tmp) = test_manager().await;
        let config = testutil::mock_config("a", true);
        manager.save_configs(&[config.clone()]).await.unwrap();

        manager.start(&config).await.unwrap();
        manager.stop("a").await;

        // Give a misbehaving monitor a chance to fire before checking.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(persisted_enabled(&manager, "a").await, Some(true));
    }

    #[tokio::test]
    async fn add_update_remove_config_roundtrip() {
        let (manager, _tmp) = test_manager().await;
        let added = manager
            .add_config(
                "fs",
                false,
                testutil::mock_config("ignored", false).transport,
                None,
            )
            .await
            .unwrap();

        let mut configs = manager.load_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "fs");

        configs[0].name = "filesystem".to_string();
        manager.update_config(&configs[0]).await.unwrap();
        assert_eq!(manager.load_configs().await.unwrap()[0].name, "filesystem");

        manager.remove_config(&added.id).await.unwrap();
        assert!(manager.load_configs().await.unwrap().is_empty());
    }
}
