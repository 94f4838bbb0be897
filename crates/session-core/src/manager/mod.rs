//! Session Manager
//!
//! Owns the id → (persisted state, live engine) map and is the only place
//! sessions are created, changed or removed. Mutations are serialized by a
//! single writer gate so every save is a complete snapshot; reads go
//! straight to the map and never wait on a write.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use soundrelay_audio_core::{AudioBackend, AudioError, DeviceCatalog};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeEngine, BridgeState, BridgeStats, EngineSettings};
use crate::config::ManagerConfig;
use crate::errors::{Result, SessionError};
use crate::peer::{PeerConnector, RtpPeerConnector};
use crate::store::SessionStore;
use crate::types::{NegotiateResponse, PersistedState, SessionConfig, SessionConfigPatch, SessionId, SessionState};

#[derive(Debug, Clone)]
struct SessionRecord {
    state: SessionState,
    engine: Arc<BridgeEngine>,
}

/// Runtime view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: SessionId,
    pub state: BridgeState,
    pub stats: BridgeStats,
}

/// Session lifecycle manager
#[derive(Debug)]
pub struct SessionManager {
    config: ManagerConfig,
    store: SessionStore,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn PeerConnector>,
    sessions: DashMap<SessionId, SessionRecord>,
    /// Single-writer gate for create/update/remove and the save that follows
    write_gate: Mutex<()>,
}

impl SessionManager {
    /// Load persisted sessions and build one idle engine per session.
    ///
    /// A corrupt sessions file fails the load.
    pub async fn load(
        config: ManagerConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self> {
        let store = SessionStore::new(&config.store_path);
        let persisted = store.load().await?;

        let manager = Self {
            config,
            store,
            backend,
            connector,
            sessions: DashMap::new(),
            write_gate: Mutex::new(()),
        };

        for state in persisted.sessions {
            state.config.validate().map_err(|e| {
                SessionError::storage(format!(
                    "invalid stored session {} in {}: {}",
                    state.id(),
                    manager.store.path().display(),
                    e
                ))
            })?;
            let engine = manager.new_engine(state.config.clone());
            manager.sessions.insert(state.id(), SessionRecord { state, engine });
        }

        info!(
            "Loaded {} sessions from {} (audio backend: {})",
            manager.sessions.len(),
            manager.store.path().display(),
            manager.backend.name()
        );
        Ok(manager)
    }

    /// [`load`](Self::load) with the plain RTP connector described by `config.media`
    pub async fn with_rtp(config: ManagerConfig, backend: Arc<dyn AudioBackend>) -> Result<Self> {
        let connector = Arc::new(RtpPeerConnector::new(config.media.clone()));
        Self::load(config, backend, connector).await
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Snapshot of every session, oldest first
    pub fn list(&self) -> Vec<SessionState> {
        let mut sessions: Vec<SessionState> = self.sessions.iter().map(|r| r.state.clone()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id().cmp(&b.id())));
        sessions
    }

    pub fn get(&self, id: &SessionId) -> Result<SessionState> {
        self.sessions
            .get(id)
            .map(|r| r.state.clone())
            .ok_or_else(|| SessionError::not_found(id))
    }

    /// Create a session from partial input. `name` is required.
    pub async fn create(&self, patch: SessionConfigPatch) -> Result<SessionState> {
        let _gate = self.write_gate.lock().await;

        let config = SessionConfig::from_patch(SessionId::new(), patch)?;
        let state = SessionState::new(config);
        let engine = self.new_engine(state.config.clone());

        let mut snapshot = self.snapshot();
        snapshot.sessions.push(state.clone());
        if let Err(e) = self.store.save(&snapshot).await {
            let _ = engine.shutdown().await;
            return Err(e);
        }

        self.sessions.insert(
            state.id(),
            SessionRecord {
                state: state.clone(),
                engine,
            },
        );
        info!(
            "Created session {} '{}' ({})",
            state.id(),
            state.config.name,
            state.config.direction
        );
        Ok(state)
    }

    /// Merge `patch` into a session and hand the result to its engine.
    ///
    /// Nothing changes if the engine rejects the new config. A save failure
    /// is reported even though the engine already runs the new config.
    pub async fn update(&self, id: &SessionId, patch: SessionConfigPatch) -> Result<SessionState> {
        let _gate = self.write_gate.lock().await;

        let record = self.record(id)?;
        let config = record.state.config.merged(&patch)?;
        record.engine.reconfigure(config.clone()).await?;

        let state = SessionStore::touch_session(&SessionState {
            config,
            ..record.state
        });
        self.sessions.insert(
            *id,
            SessionRecord {
                state: state.clone(),
                engine: record.engine,
            },
        );

        self.store.save(&self.snapshot()).await.map_err(|e| {
            warn!("Session {} updated live but not persisted: {}", id, e);
            e
        })?;
        debug!("Updated session {}", id);
        Ok(state)
    }

    /// Shut a session's engine down and forget the session.
    ///
    /// Removal goes ahead even if the shutdown fails or hangs. The session
    /// leaves memory only once the file no longer lists it, so a failed
    /// save can be retried.
    pub async fn remove(&self, id: &SessionId) -> Result<()> {
        let _gate = self.write_gate.lock().await;

        let record = self.record(id)?;
        match tokio::time::timeout(self.config.shutdown_timeout, record.engine.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Session {} did not shut down cleanly: {}", id, e),
            Err(_) => warn!(
                "Session {} shutdown timed out after {:?}, removing anyway",
                id, self.config.shutdown_timeout
            ),
        }

        let mut remaining = self.snapshot();
        remaining.sessions.retain(|s| s.id() != *id);
        self.store.save(&remaining).await?;
        self.sessions.remove(id);
        info!("Removed session {}", id);
        Ok(())
    }

    /// Forward an SDP offer to the session's engine
    pub async fn handle_offer(&self, id: &SessionId, offer: &str) -> Result<NegotiateResponse> {
        let engine = self.engine(id)?;
        let sdp = engine.negotiate(offer).await?;
        Ok(NegotiateResponse { sdp })
    }

    /// Drop a session's live media and return it to idle
    pub async fn disconnect(&self, id: &SessionId) -> Result<()> {
        self.engine(id)?.disconnect().await
    }

    pub async fn status(&self, id: &SessionId) -> Result<SessionStatus> {
        let engine = self.engine(id)?;
        Ok(SessionStatus {
            id: *id,
            state: engine.state().await,
            stats: engine.stats().await,
        })
    }

    /// Host APIs and devices the audio backend can see
    pub async fn catalog(&self) -> Result<DeviceCatalog> {
        let backend = self.backend.clone();
        let catalog = tokio::task::spawn_blocking(move || backend.catalog())
            .await
            .map_err(|e| AudioError::platform(format!("catalog task failed: {}", e)))??;
        Ok(catalog)
    }

    /// Close every engine, leaving the persisted sessions untouched
    pub async fn shutdown_all(&self) {
        let engines: Vec<Arc<BridgeEngine>> = self.sessions.iter().map(|r| r.engine.clone()).collect();
        for engine in engines {
            if let Err(e) = engine.shutdown().await {
                warn!("Session {} did not shut down cleanly: {}", engine.session_id(), e);
            }
        }
        info!("All session engines closed");
    }

    fn new_engine(&self, config: SessionConfig) -> Arc<BridgeEngine> {
        Arc::new(BridgeEngine::new(
            config,
            self.backend.clone(),
            self.connector.clone(),
            EngineSettings::from(&self.config),
        ))
    }

    fn record(&self, id: &SessionId) -> Result<SessionRecord> {
        self.sessions
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| SessionError::not_found(id))
    }

    fn engine(&self, id: &SessionId) -> Result<Arc<BridgeEngine>> {
        self.sessions
            .get(id)
            .map(|r| r.engine.clone())
            .ok_or_else(|| SessionError::not_found(id))
    }

    fn snapshot(&self) -> PersistedState {
        PersistedState { sessions: self.list() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use soundrelay_audio_core::SimulatedBackend;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    async fn live_session(
        dir: &tempfile::TempDir,
        backend: &SimulatedBackend,
    ) -> (SessionManager, SessionId, UdpSocket) {
        let config = ManagerConfig::new(dir.path().join("sessions.json"))
            .with_shutdown_timeout(Duration::from_millis(100))
            .with_media(MediaConfig::default().with_bind_ip(Ipv4Addr::LOCALHOST.into()));
        let manager = SessionManager::with_rtp(config, Arc::new(backend.clone())).await.unwrap();
        let state = manager.create(SessionConfigPatch::named("Mic")).await.unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let offer = format!(
            "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\n\
             m=audio {} RTP/AVP 0\r\na=ptime:20\r\na=recvonly\r\n",
            peer.local_addr().unwrap().port()
        );
        manager.handle_offer(&state.id(), &offer).await.unwrap();
        assert_eq!(manager.status(&state.id()).await.unwrap().state, BridgeState::Active);
        (manager, state.id(), peer)
    }

    fn persisted(manager: &SessionManager) -> PersistedState {
        serde_json::from_slice(&std::fs::read(manager.store.path()).unwrap()).unwrap()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_remove_survives_hung_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend::new();
        let (manager, id, _peer) = live_session(&dir, &backend).await;

        backend.set_close_delay(Duration::from_millis(500));
        manager.remove(&id).await.unwrap();

        assert!(matches!(manager.get(&id), Err(SessionError::NotFound(_))));
        assert!(persisted(&manager).sessions.is_empty());
        assert!(logs_contain("removing anyway"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_remove_survives_failed_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend::new();
        let (manager, id, _peer) = live_session(&dir, &backend).await;

        backend.fail_close(0);
        manager.remove(&id).await.unwrap();

        assert!(matches!(manager.get(&id), Err(SessionError::NotFound(_))));
        assert!(persisted(&manager).sessions.is_empty());
        assert!(backend.active_streams().is_empty());
        assert!(logs_contain("did not shut down cleanly"));
        assert!(logs_contain("failed to close"));
    }
}
