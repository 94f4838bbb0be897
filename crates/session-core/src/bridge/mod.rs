//! Bridge Engine
//!
//! One engine per session. It owns at most one native stream and, once
//! negotiated, one peer connection, and moves audio between them:
//!
//! ```text
//! capture:  device ─▶ ring ─▶ capture pump (convert) ─▶ outbound track ─▶ peer
//! playback: peer ─▶ inbound track ─▶ playback pump (convert) ─▶ ring ─▶ device
//! ```
//!
//! State machine: `Idle → Negotiating → Active → Idle` (disconnect or failed
//! restore after a same-device swap), and `Closed` from anywhere via [`BridgeEngine::shutdown`].
//!
//! Engines never rewrite their own config; they are handed one through
//! [`BridgeEngine::reconfigure`].

mod pump;

use serde::{Deserialize, Serialize};
use soundrelay_audio_core::{
    AudioBackend, AudioError, NativeStream, RingStats, RingStatsSnapshot, StreamDirection, StreamIo, StreamParams,
    block_ring,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::errors::{Result, SessionError};
use crate::peer::{MediaRequest, PeerConnection, PeerConnector, PeerLink, PeerStatsSnapshot};
use crate::types::{SessionConfig, SessionId};
use pump::{PumpEnd, Tracks};

/// Lifecycle state of a bridge engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Idle,
    Negotiating,
    Active,
    Closed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Idle => write!(f, "idle"),
            BridgeState::Negotiating => write!(f, "negotiating"),
            BridgeState::Active => write!(f, "active"),
            BridgeState::Closed => write!(f, "closed"),
        }
    }
}

/// Observable counters of one engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Ring counters, accumulated over every stream the engine opened
    pub ring: RingStatsSnapshot,
    /// Present while a peer connection is live
    pub peer: Option<PeerStatsSnapshot>,
    /// Native streams swapped under a live connection
    pub stream_swaps: u64,
}

/// Engine tunables taken from the manager configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub negotiation_timeout: Duration,
    pub ring_capacity_blocks: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&ManagerConfig::default())
    }
}

impl From<&ManagerConfig> for EngineSettings {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            negotiation_timeout: config.negotiation_timeout,
            ring_capacity_blocks: config.ring_capacity_blocks,
        }
    }
}

/// Aborts the pump task when dropped
#[derive(Debug)]
struct PumpHandle(JoinHandle<()>);

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A freshly opened stream and the ring half its pump will own
#[derive(Debug)]
struct OpenedStream {
    stream: Box<dyn NativeStream>,
    end: PumpEnd,
}

/// Result of a successful negotiation, before it is committed
#[derive(Debug)]
struct Established {
    opened: OpenedStream,
    link: PeerLink,
}

/// Live resources of an `Active` engine
#[derive(Debug)]
struct ActiveBridge {
    stream: Box<dyn NativeStream>,
    pump: PumpHandle,
    tracks: Tracks,
    connection: Box<dyn PeerConnection>,
}

#[derive(Debug)]
struct EngineInner {
    config: SessionConfig,
    state: BridgeState,
    /// `Some` exactly while `Active`
    active: Option<ActiveBridge>,
    stream_swaps: u64,
}

/// Per-session bridge between a native stream and a peer connection
#[derive(Debug)]
pub struct BridgeEngine {
    session_id: SessionId,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn PeerConnector>,
    settings: EngineSettings,
    ring_stats: Arc<RingStats>,
    inner: Mutex<EngineInner>,
    /// Flipped once by `shutdown`; in-flight negotiations watch it
    closed_tx: watch::Sender<bool>,
}

impl BridgeEngine {
    /// Create an idle engine. Nothing is opened until the first negotiation.
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn PeerConnector>,
        settings: EngineSettings,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            session_id: config.id,
            backend,
            connector,
            settings,
            ring_stats: RingStats::new(),
            inner: Mutex::new(EngineInner {
                config,
                state: BridgeState::Idle,
                active: None,
                stream_swaps: 0,
            }),
            closed_tx,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn state(&self) -> BridgeState {
        self.inner.lock().await.state
    }

    /// Config the engine is currently bound to
    pub async fn config(&self) -> SessionConfig {
        self.inner.lock().await.config.clone()
    }

    pub async fn stats(&self) -> BridgeStats {
        let inner = self.inner.lock().await;
        BridgeStats {
            ring: self.ring_stats.snapshot(),
            peer: inner.active.as_ref().map(|a| a.connection.stats()),
            stream_swaps: inner.stream_swaps,
        }
    }

    /// Whether `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Open the native stream, apply `offer` and return the SDP answer.
    ///
    /// Only valid from `Idle`. Bounded by the negotiation timeout; fails
    /// fast with `SessionClosed` if the engine is shut down meanwhile.
    /// Any failure leaves the engine `Idle` with nothing open.
    pub async fn negotiate(&self, offer: &str) -> Result<String> {
        let config = {
            let mut inner = self.inner.lock().await;
            if inner.state == BridgeState::Closed || self.is_closed() {
                return Err(SessionError::session_closed(self.session_id));
            }
            match inner.state {
                BridgeState::Negotiating => {
                    return Err(SessionError::conflict(format!(
                        "session {} is already negotiating",
                        self.session_id
                    )));
                }
                BridgeState::Active => {
                    return Err(SessionError::conflict(format!(
                        "session {} is already active",
                        self.session_id
                    )));
                }
                _ => {}
            }
            inner.state = BridgeState::Negotiating;
            inner.config.clone()
        };
        info!(
            "Session {} negotiating {} on device {}",
            self.session_id,
            config.direction,
            config.stream_params().device_label()
        );

        let timeout = self.settings.negotiation_timeout;
        let outcome = tokio::select! {
            _ = wait_closed(self.closed_tx.subscribe()) => {
                Err(SessionError::session_closed(self.session_id))
            }
            result = tokio::time::timeout(timeout, self.establish(&config, offer)) => match result {
                Ok(result) => result,
                Err(_) => Err(SessionError::negotiation(format!(
                    "negotiation timed out after {:?}",
                    timeout
                ))),
            },
        };

        let mut inner = self.inner.lock().await;
        if inner.state == BridgeState::Closed || self.is_closed() {
            if let Ok(established) = outcome {
                self.discard(established).await;
            }
            return Err(SessionError::session_closed(self.session_id));
        }

        let result = match outcome {
            Ok(established) => self.commit(&mut inner, established).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(_) => {
                inner.state = BridgeState::Active;
                info!("Session {} bridge active", self.session_id);
            }
            Err(e) => {
                inner.state = BridgeState::Idle;
                warn!("Session {} negotiation failed: {}", self.session_id, e);
            }
        }
        result
    }

    /// Bind the engine to `config`.
    ///
    /// Only a live stream whose parameters change is touched: it is swapped
    /// under the preserved peer connection. On failure the previous config
    /// and stream stay in place.
    pub async fn reconfigure(&self, config: SessionConfig) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BridgeState::Closed => return Err(SessionError::session_closed(self.session_id)),
            // A negotiation in flight converges to the latest config when it commits
            BridgeState::Idle | BridgeState::Negotiating => {
                inner.config = config;
                return Ok(());
            }
            BridgeState::Active => {}
        }

        if !inner.config.requires_stream_swap(&config) {
            debug!("Session {} reconfigured without a stream swap", self.session_id);
            inner.config = config;
            return Ok(());
        }
        self.swap_stream(&mut inner, config).await
    }

    /// Tear down the stream and connection and return to `Idle`
    pub async fn disconnect(&self) -> Result<()> {
        let active = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                BridgeState::Closed => return Err(SessionError::session_closed(self.session_id)),
                BridgeState::Negotiating => {
                    return Err(SessionError::conflict(format!(
                        "session {} is negotiating",
                        self.session_id
                    )));
                }
                BridgeState::Idle => return Ok(()),
                BridgeState::Active => {}
            }
            inner.state = BridgeState::Idle;
            inner.active.take()
        };

        info!("Session {} bridge disconnected", self.session_id);
        match active {
            Some(active) => self.teardown(active).await,
            None => Ok(()),
        }
    }

    /// Release everything and enter `Closed`. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.closed_tx.send_replace(true);

        let active = {
            let mut inner = self.inner.lock().await;
            if inner.state == BridgeState::Closed {
                return Ok(());
            }
            inner.state = BridgeState::Closed;
            inner.active.take()
        };

        info!("Session {} bridge closed", self.session_id);
        match active {
            Some(active) => self.teardown(active).await,
            None => Ok(()),
        }
    }

    async fn establish(&self, config: &SessionConfig, offer: &str) -> Result<Established> {
        // Dropping this future (timeout, shutdown) drops whatever was opened
        let opened = self.open_stream(config.stream_params(), self.ring_capacity(config)).await?;

        let request = MediaRequest {
            session_id: self.session_id,
            direction: config.direction,
        };
        match self.connector.connect(offer, &request).await {
            Ok(link) => Ok(Established { opened, link }),
            Err(e) => {
                self.release(opened.stream).await;
                Err(e)
            }
        }
    }

    async fn commit(&self, inner: &mut EngineInner, established: Established) -> Result<String> {
        let Established { opened, link } = established;
        let PeerLink {
            answer,
            codec,
            media_format,
            outbound,
            inbound,
            mut connection,
        } = link;
        let tracks = Tracks {
            outbound,
            inbound: Arc::new(Mutex::new(inbound)),
            media_format,
        };

        let params = inner.config.stream_params();
        let opened = if *opened.stream.params() != params {
            debug!("Session {} config changed while negotiating, reopening stream", self.session_id);
            self.release(opened.stream).await;
            match self.open_stream(params, self.ring_capacity(&inner.config)).await {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = connection.close().await;
                    return Err(e);
                }
            }
        } else {
            opened
        };

        let pump = match pump::spawn_pump(
            self.session_id,
            opened.end,
            params.format(),
            params.block_period(),
            &tracks,
        ) {
            Ok(handle) => PumpHandle(handle),
            Err(e) => {
                self.release(opened.stream).await;
                let _ = connection.close().await;
                return Err(e);
            }
        };

        debug!(
            "Session {} bridging {} <-> {} {}",
            self.session_id,
            params.format().description(),
            codec,
            media_format.description()
        );
        inner.active = Some(ActiveBridge {
            stream: opened.stream,
            pump,
            tracks,
            connection,
        });
        Ok(answer)
    }

    /// Replace the live stream, keeping the peer connection.
    ///
    /// Tries the new stream alongside the old one first. A different device
    /// that fails to open leaves the old stream running untouched. Only when
    /// the new stream targets the same device is the old one released and
    /// the open retried; if that fails the old stream is reopened, and if
    /// even that fails the engine drops to `Idle`.
    async fn swap_stream(&self, inner: &mut EngineInner, config: SessionConfig) -> Result<()> {
        let Some(active) = inner.active.take() else {
            inner.config = config;
            return Ok(());
        };
        let ActiveBridge {
            stream,
            pump,
            tracks,
            mut connection,
        } = active;

        let new_params = config.stream_params();
        let new_capacity = self.ring_capacity(&config);
        let old_params = *stream.params();
        let old_capacity = self.ring_capacity(&inner.config);

        match self.bring_up(new_params, new_capacity, &tracks).await {
            Ok((new_stream, new_pump)) => {
                drop(pump);
                self.release(stream).await;
                self.finish_swap(inner, config, new_stream, new_pump, tracks, connection);
                return Ok(());
            }
            Err(e) if !new_params.same_device(&old_params) => {
                warn!(
                    "Session {} reconfigure to device {} failed: {}; keeping device {}",
                    self.session_id,
                    new_params.device_label(),
                    e,
                    old_params.device_label()
                );
                inner.active = Some(ActiveBridge {
                    stream,
                    pump,
                    tracks,
                    connection,
                });
                return Err(e);
            }
            Err(e) => debug!(
                "Session {} could not open device {} alongside the current stream: {}",
                self.session_id,
                new_params.device_label(),
                e
            ),
        }

        drop(pump);
        self.release(stream).await;

        let err = match self.bring_up(new_params, new_capacity, &tracks).await {
            Ok((new_stream, new_pump)) => {
                self.finish_swap(inner, config, new_stream, new_pump, tracks, connection);
                return Ok(());
            }
            Err(e) => e,
        };
        warn!(
            "Session {} reconfigure to device {} failed: {}; restoring previous stream",
            self.session_id,
            new_params.device_label(),
            err
        );

        match self.bring_up(old_params, old_capacity, &tracks).await {
            Ok((old_stream, old_pump)) => {
                inner.active = Some(ActiveBridge {
                    stream: old_stream,
                    pump: old_pump,
                    tracks,
                    connection,
                });
            }
            Err(restore_err) => {
                error!(
                    "Session {} could not restore its previous stream: {}; dropping to idle",
                    self.session_id, restore_err
                );
                let _ = connection.close().await;
                inner.state = BridgeState::Idle;
            }
        }
        Err(err)
    }

    fn finish_swap(
        &self,
        inner: &mut EngineInner,
        config: SessionConfig,
        stream: Box<dyn NativeStream>,
        pump: PumpHandle,
        tracks: Tracks,
        connection: Box<dyn PeerConnection>,
    ) {
        info!(
            "Session {} swapped to {} stream on device {} ({})",
            self.session_id,
            stream.params().direction,
            stream.params().device_label(),
            stream.params().format().description()
        );
        inner.active = Some(ActiveBridge {
            stream,
            pump,
            tracks,
            connection,
        });
        inner.config = config;
        inner.stream_swaps += 1;
    }

    /// Open a stream and start its pump on `tracks`
    async fn bring_up(
        &self,
        params: StreamParams,
        capacity: usize,
        tracks: &Tracks,
    ) -> Result<(Box<dyn NativeStream>, PumpHandle)> {
        let opened = self.open_stream(params, capacity).await?;
        match pump::spawn_pump(
            self.session_id,
            opened.end,
            params.format(),
            params.block_period(),
            tracks,
        ) {
            Ok(handle) => Ok((opened.stream, PumpHandle(handle))),
            Err(e) => {
                self.release(opened.stream).await;
                Err(e)
            }
        }
    }

    /// Allocate a ring and open a native stream on it, off the async threads
    async fn open_stream(&self, params: StreamParams, capacity: usize) -> Result<OpenedStream> {
        let (writer, reader) = block_ring(capacity, params.block_len(), self.ring_stats.clone())?;
        let (io, end) = match params.direction {
            StreamDirection::Input => (StreamIo::Capture(writer), PumpEnd::Capture(reader)),
            StreamDirection::Output => (StreamIo::Playback(reader), PumpEnd::Playback(writer)),
        };

        let backend = self.backend.clone();
        let stream = tokio::task::spawn_blocking(move || backend.open_stream(&params, io))
            .await
            .map_err(|e| AudioError::platform(format!("device open task failed: {}", e)))??;

        debug!(
            "Session {} opened {} stream on device {} via {}",
            self.session_id,
            params.direction,
            params.device_label(),
            self.backend.name()
        );
        Ok(OpenedStream { stream, end })
    }

    async fn close_stream(&self, stream: Box<dyn NativeStream>) -> Result<()> {
        tokio::task::spawn_blocking(move || {
            let mut stream = stream;
            stream.close()
        })
        .await
        .map_err(|e| AudioError::platform(format!("device close task failed: {}", e)))??;
        Ok(())
    }

    /// Close a stream on a path that has a more important error to report
    async fn release(&self, stream: Box<dyn NativeStream>) {
        if let Err(e) = self.close_stream(stream).await {
            warn!("Session {} failed to close stream: {}", self.session_id, e);
        }
    }

    async fn teardown(&self, active: ActiveBridge) -> Result<()> {
        let ActiveBridge {
            stream,
            pump,
            tracks,
            mut connection,
        } = active;
        drop(pump);
        drop(tracks);

        let stream_result = self.close_stream(stream).await;
        let peer_result = connection.close().await;
        stream_result.and(peer_result)
    }

    async fn discard(&self, established: Established) {
        let Established { opened, mut link } = established;
        self.release(opened.stream).await;
        let _ = link.connection.close().await;
    }

    /// Ring depth: the configured minimum, or two latency windows of blocks
    fn ring_capacity(&self, config: &SessionConfig) -> usize {
        let block_ms = (config.block_size as u64 * 1000)
            .div_ceil(config.sample_rate.max(1) as u64)
            .max(1);
        let latency_blocks = (config.latency_ms as u64).div_ceil(block_ms) as usize * 2;
        self.settings.ring_capacity_blocks.max(latency_blocks).max(1)
    }
}

/// Resolves once the closed flag is set
async fn wait_closed(mut closed_rx: watch::Receiver<bool>) {
    while !*closed_rx.borrow_and_update() {
        if closed_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionConfigPatch;
    use async_trait::async_trait;
    use soundrelay_audio_core::SimulatedBackend;

    #[derive(Debug)]
    struct UnreachableConnector;

    #[async_trait]
    impl PeerConnector for UnreachableConnector {
        async fn connect(&self, _offer: &str, _request: &MediaRequest) -> Result<PeerLink> {
            Err(SessionError::negotiation("no route to peer"))
        }
    }

    fn engine(backend: &SimulatedBackend) -> BridgeEngine {
        let config = SessionConfig::from_patch(SessionId::new(), SessionConfigPatch::named("test")).unwrap();
        BridgeEngine::new(
            config,
            Arc::new(backend.clone()),
            Arc::new(UnreachableConnector),
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_failed_negotiation_returns_to_idle() {
        let backend = SimulatedBackend::new();
        let engine = engine(&backend);

        let err = engine.negotiate("v=0").await.unwrap_err();
        assert!(matches!(err, SessionError::Negotiation(_)));
        assert_eq!(engine.state().await, BridgeState::Idle);
        assert_eq!(backend.open_count(), 1);
        assert_eq!(backend.close_count(), 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_failed_negotiation_is_logged() {
        let backend = SimulatedBackend::new();
        let engine = engine(&backend);

        let _ = engine.negotiate("v=0").await;
        assert!(logs_contain("negotiation failed"));
        assert!(logs_contain("no route to peer"));
    }

    #[tokio::test]
    async fn test_device_failure_surfaces_as_device_error() {
        let backend = SimulatedBackend::new();
        backend.fail_device(0);
        let engine = engine(&backend);

        let err = engine.negotiate("v=0").await.unwrap_err();
        assert!(matches!(err, SessionError::Device(_)));
        assert_eq!(engine.state().await, BridgeState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_terminal() {
        let backend = SimulatedBackend::new();
        let engine = engine(&backend);

        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();
        assert_eq!(engine.state().await, BridgeState::Closed);

        let config = engine.config().await;
        assert!(matches!(
            engine.reconfigure(config).await,
            Err(SessionError::SessionClosed(_))
        ));
        assert!(matches!(
            engine.negotiate("v=0").await,
            Err(SessionError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_idle_reconfigure_opens_nothing() {
        let backend = SimulatedBackend::new();
        let engine = engine(&backend);
        let config = engine
            .config()
            .await
            .merged(&SessionConfigPatch::default().with_input_device(Some(3)))
            .unwrap();

        engine.reconfigure(config.clone()).await.unwrap();
        assert_eq!(engine.config().await, config);
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn test_ring_capacity_follows_latency_hint() {
        let backend = SimulatedBackend::new();
        let engine = engine(&backend);
        let mut config = SessionConfig::from_patch(SessionId::new(), SessionConfigPatch::named("x")).unwrap();

        assert_eq!(engine.ring_capacity(&config), 8);
        config.latency_ms = 100;
        assert_eq!(engine.ring_capacity(&config), 20);
    }
}
