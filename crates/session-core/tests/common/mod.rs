// Common test utilities for session-core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use soundrelay_audio_core::SimulatedBackend;
use soundrelay_session_core::{
    ManagerConfig, MediaConfig, MediaRequest, PeerConnector, PeerLink, Result, SessionManager,
};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Notify;

/// A manager wired to a simulated backend and a throwaway store
pub struct TestHarness {
    pub manager: Arc<SessionManager>,
    pub backend: SimulatedBackend,
    pub store_path: PathBuf,
    // Keeps the store directory alive
    pub dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> ManagerConfig {
    ManagerConfig::new(dir.path().join("data").join("sessions.json"))
        .with_negotiation_timeout(Duration::from_secs(5))
        .with_media(MediaConfig::default().with_bind_ip(Ipv4Addr::LOCALHOST.into()))
}

/// Harness answering offers with real RTP sockets on loopback
pub async fn rtp_harness() -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let backend = SimulatedBackend::new();
    let store_path = config.store_path.clone();
    let manager = SessionManager::with_rtp(config, Arc::new(backend.clone()))
        .await
        .unwrap();

    TestHarness {
        manager: Arc::new(manager),
        backend,
        store_path,
        dir,
    }
}

/// Harness with a custom connector and config
pub async fn harness_with(
    connector: Arc<dyn PeerConnector>,
    configure: impl FnOnce(ManagerConfig) -> ManagerConfig,
) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let config = configure(test_config(&dir));
    let backend = SimulatedBackend::new();
    let store_path = config.store_path.clone();
    let manager = SessionManager::load(config, Arc::new(backend.clone()), connector)
        .await
        .unwrap();

    TestHarness {
        manager: Arc::new(manager),
        backend,
        store_path,
        dir,
    }
}

/// Connector whose `connect` never returns
#[derive(Debug, Default)]
pub struct StallingConnector {
    pub calls: AtomicUsize,
    pub entered: Notify,
}

impl StallingConnector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnector for StallingConnector {
    async fn connect(&self, _offer: &str, _request: &MediaRequest) -> Result<PeerLink> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        std::future::pending().await
    }
}

/// PCMU offer from a peer listening on 127.0.0.1:`port`
pub fn pcmu_offer(port: u16, direction: &str) -> String {
    format!(
        "v=0\r\n\
         o=- 20518 0 IN IP4 127.0.0.1\r\n\
         s=-\r\n\
         c=IN IP4 127.0.0.1\r\n\
         t=0 0\r\n\
         m=audio {} RTP/AVP 0 8\r\n\
         a=rtpmap:0 PCMU/8000\r\n\
         a=rtpmap:8 PCMA/8000\r\n\
         a=ptime:20\r\n\
         a={}\r\n",
        port, direction
    )
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
