//! Session registry: at most one live session per server identity.
//!
//! Concurrent `start` calls for the same identity coalesce onto one shared
//! attempt instead of spawning a second process. Every map insert and remove
//! happens in one lock-held step with no await in between, so interleaved
//! callers cannot lose updates or resurrect a stopped session.

use crate::client::McpClient;
use crate::config::ServerConfig;
use crate::error::McpError;
use crate::launch::RuntimeLocator;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Runtime binding between a server identity and its live client. Owned by
/// the registry; never persisted.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub identity: String,
    pub client: Arc<McpClient>,
    pub created_at: DateTime<Utc>,
    closing: AtomicBool,
    monitor_armed: AtomicBool,
}

impl Session {
    /// Mark that this session is being stopped on purpose, so observers of
    /// the transport closing don't treat it as a crash.
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Claim the right to monitor this session's exit. First caller wins.
    pub(crate) fn arm_monitor(&self) -> bool {
        !self.monitor_armed.swap(true, Ordering::AcqRel)
    }
}

type StartFuture = Shared<BoxFuture<'static, Result<Arc<Session>, Arc<McpError>>>>;

enum Entry {
    Live(Arc<Session>),
    Starting(StartFuture),
}

/// Process-wide table of live sessions, injectable so tests get isolation.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
    locator: Arc<dyn RuntimeLocator>,
}

impl SessionRegistry {
    pub fn new(locator: Arc<dyn RuntimeLocator>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            locator,
        }
    }

    /// Start a session for this config, or return the existing handle.
    ///
    /// Idempotent: a healthy session is never restarted. A second caller
    /// arriving while a start is in flight awaits the same attempt. Failure
    /// surfaces as `StartError` wrapping the cause; the slot is cleared so a
    /// later call can retry.
    pub async fn start(&self, config: &ServerConfig) -> Result<Arc<Session>, McpError> {
        let identity = config.id.clone();

        let attempt = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&identity) {
                Some(Entry::Live(session)) => return Ok(Arc::clone(session)),
                Some(Entry::Starting(attempt)) => attempt.clone(),
                None => {
                    let attempt = Self::start_attempt(config.clone(), Arc::clone(&self.locator))
                        .boxed()
                        .shared();
                    sessions.insert(identity.clone(), Entry::Starting(attempt.clone()));
                    attempt
                }
            }
        };

        let result = attempt.clone().await;

        let mut sessions = self.sessions.lock().await;
        match result {
            Ok(session) => {
                // Promote only if this attempt still owns the slot; a stop
                // that raced us may have cleared or replaced it.
                if let Some(Entry::Starting(current)) = sessions.get(&identity) {
                    if current.ptr_eq(&attempt) {
                        sessions.insert(identity, Entry::Live(Arc::clone(&session)));
                    }
                }
                Ok(session)
            }
            Err(source) => {
                if let Some(Entry::Starting(current)) = sessions.get(&identity) {
                    if current.ptr_eq(&attempt) {
                        sessions.remove(&identity);
                    }
                }
                Err(McpError::Start { identity, source })
            }
        }
    }

    async fn start_attempt(
        config: ServerConfig,
        locator: Arc<dyn RuntimeLocator>,
    ) -> Result<Arc<Session>, Arc<McpError>> {
        let client = McpClient::connect(&config.name, &config.transport, locator.as_ref())
            .await
            .map_err(Arc::new)?;
        Ok(Arc::new(Session {
            id: Uuid::new_v4(),
            identity: config.id,
            client: Arc::new(client),
            created_at: Utc::now(),
            closing: AtomicBool::new(false),
            monitor_armed: AtomicBool::new(false),
        }))
    }

    /// Stop the session for `identity`, if any. Never fails: the close is a
    /// force-kill and close errors are logged, not propagated.
    pub async fn stop(&self, identity: &str) {
        // Settle any in-flight start first so it cannot resurrect a session
        // after we clear the slot.
        let inflight = {
            let sessions = self.sessions.lock().await;
            match sessions.get(identity) {
                Some(Entry::Starting(attempt)) => Some(attempt.clone()),
                _ => None,
            }
        };
        if let Some(attempt) = inflight {
            if let Err(e) = attempt.await {
                tracing::debug!("start attempt for '{}' failed during stop: {}", identity, e);
            }
        }

        let removed = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(identity)
        };
        match removed {
            Some(Entry::Live(session)) => {
                session.mark_closing();
                session.client.close().await;
            }
            Some(Entry::Starting(attempt)) => {
                if let Ok(session) = attempt.await {
                    session.mark_closing();
                    session.client.close().await;
                }
            }
            None => {}
        }
    }

    /// Remove `identity` only if it is still bound to the given session.
    /// Used by exit monitors so an already-replaced session is left alone.
    pub async fn remove_if(&self, identity: &str, session_id: Uuid) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(identity) {
                Some(Entry::Live(session)) if session.id == session_id => {
                    sessions.remove(identity)
                }
                _ => None,
            }
        };
        match removed {
            Some(Entry::Live(session)) => {
                session.mark_closing();
                session.client.close().await;
                true
            }
            _ => false,
        }
    }

    /// Whether a live, still-connected session exists for `identity`.
    pub async fn is_running(&self, identity: &str) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(identity) {
            Some(Entry::Live(session)) => !session.client.is_closed(),
            _ => false,
        }
    }

    /// The live session for `identity`, if any.
    pub async fn get(&self, identity: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().await;
        match sessions.get(identity) {
            Some(Entry::Live(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Stop every session. Used on shutdown.
    pub async fn stop_all(&self) {
        let identities: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions.keys().cloned().collect()
        };
        for identity in identities {
            self.stop(&identity).await;
        }
    }
}
