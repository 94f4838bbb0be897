//! Plain RTP/AVP peer connection over UDP
//!
//! One socket per connection. A sender task packetizes outbound PCM at the
//! negotiated ptime; a receiver task parses, filters and decodes inbound
//! packets into the inbound track, dropping what it has no room for.

use async_trait::async_trait;
use soundrelay_audio_core::{RtpPacket, RtpPacketizer, SequenceTracker};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::{MediaRequest, PeerConnection, PeerConnector, PeerLink, PeerStats, PeerStatsSnapshot};
use crate::config::MediaConfig;
use crate::errors::{Result, SessionError};
use crate::sdp::{self, NegotiatedMedia, SessionDescription};

// Largest UDP payload
const MAX_DATAGRAM: usize = 65535;

/// Connector answering offers with plain RTP over UDP
#[derive(Debug, Clone)]
pub struct RtpPeerConnector {
    media: MediaConfig,
}

impl RtpPeerConnector {
    pub fn new(media: MediaConfig) -> Self {
        Self { media }
    }

    /// Address to put in the answer
    async fn advertised_ip(&self, remote: SocketAddr, bound: IpAddr) -> IpAddr {
        if let Some(ip) = self.media.advertised_ip {
            return ip;
        }
        if !bound.is_unspecified() {
            return bound;
        }

        // Let the routing table pick the local address that reaches the peer
        let unspecified: IpAddr = match remote {
            SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        if let Ok(probe) = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await {
            if probe.connect(remote).await.is_ok() {
                if let Ok(local) = probe.local_addr() {
                    return local.ip();
                }
            }
        }
        bound
    }
}

#[async_trait]
impl PeerConnector for RtpPeerConnector {
    async fn connect(&self, offer: &str, request: &MediaRequest) -> Result<PeerLink> {
        let offer = SessionDescription::parse(offer)?;
        let negotiated = sdp::negotiate(&offer, request.direction, self.media.ptime_ms)?;

        let socket = UdpSocket::bind(SocketAddr::new(self.media.bind_ip, 0))
            .await
            .map_err(|e| SessionError::negotiation(format!("failed to bind media socket: {}", e)))?;
        let bound = socket
            .local_addr()
            .map_err(|e| SessionError::negotiation(format!("media socket has no address: {}", e)))?;
        let advertised = SocketAddr::new(self.advertised_ip(negotiated.remote_addr, bound.ip()).await, bound.port());

        let answer = sdp::build_answer(&negotiated, advertised, rand::random::<u32>() as u64).to_string();

        let socket = Arc::new(socket);
        let stats = Arc::new(PeerStats::default());
        let queue = self.media.inbound_queue_frames.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(queue);
        let (inbound_tx, inbound_rx) = mpsc::channel(queue);

        let packetizer = RtpPacketizer::new(
            negotiated.payload_type,
            rand::random(),
            rand::random(),
            rand::random(),
        );
        let sender = tokio::spawn(run_sender(
            socket.clone(),
            negotiated.clone(),
            packetizer,
            outbound_rx,
            stats.clone(),
        ));
        let receiver = tokio::spawn(run_receiver(socket, negotiated.clone(), inbound_tx, stats.clone()));

        info!(
            "Session {} media: {} {} pt={} ptime={}ms local={} remote={} ({})",
            request.session_id,
            negotiated.codec,
            negotiated.format.description(),
            negotiated.payload_type,
            negotiated.ptime_ms,
            advertised,
            negotiated.remote_addr,
            negotiated.local_direction
        );

        Ok(PeerLink {
            answer,
            codec: negotiated.codec,
            media_format: negotiated.format,
            outbound: outbound_tx,
            inbound: inbound_rx,
            connection: Box::new(RtpPeerConnection {
                local_addr: bound,
                remote_addr: negotiated.remote_addr,
                tasks: vec![sender, receiver],
                stats,
                closed: false,
            }),
        })
    }
}

async fn run_sender(
    socket: Arc<UdpSocket>,
    media: NegotiatedMedia,
    mut packetizer: RtpPacketizer,
    mut outbound: mpsc::Receiver<Vec<i16>>,
    stats: Arc<PeerStats>,
) {
    let frames = media.frames_per_packet();
    let samples_per_packet = frames * media.format.channels as usize;
    let mut pending: Vec<i16> = Vec::with_capacity(samples_per_packet * 2);

    while let Some(pcm) = outbound.recv().await {
        pending.extend_from_slice(&pcm);

        while pending.len() >= samples_per_packet {
            let mut payload = Vec::with_capacity(samples_per_packet * media.codec.bytes_per_sample());
            media.codec.encode(&pending[..samples_per_packet], &mut payload);
            pending.drain(..samples_per_packet);

            let packet = packetizer.packetize(payload, frames as u32);
            match socket.send_to(&packet.serialize(), media.remote_addr).await {
                Ok(_) => {
                    stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    trace!("RTP send to {} failed: {}", media.remote_addr, e);
                    stats.send_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
    debug!("Outbound track for ssrc {:08x} ended", packetizer.ssrc());
}

async fn run_receiver(
    socket: Arc<UdpSocket>,
    media: NegotiatedMedia,
    inbound: mpsc::Sender<Vec<i16>>,
    stats: Arc<PeerStats>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut tracker = SequenceTracker::new();

    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _from)) if len < buf.len() => len,
            Ok(_) => {
                // Filled the buffer: the datagram may have been truncated
                stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                // ICMP unreachable surfaces here on some platforms
                trace!("RTP receive error: {}", e);
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            }
        };

        let packet = match RtpPacket::parse(&buf[..len]) {
            Ok(packet) => packet,
            Err(_) => {
                stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        if packet.payload_type != media.payload_type || !tracker.accept(packet.ssrc, packet.sequence_number) {
            stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        stats.packets_received.fetch_add(1, Ordering::Relaxed);

        let mut pcm = Vec::with_capacity(packet.payload.len());
        if media.codec.decode(&packet.payload, &mut pcm).is_err() {
            stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        match inbound.try_send(pcm) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

/// Connection handle returned by [`RtpPeerConnector`]
#[derive(Debug)]
pub struct RtpPeerConnection {
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<PeerStats>,
    closed: bool,
}

impl RtpPeerConnection {
    /// Address the media socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

#[async_trait]
impl PeerConnection for RtpPeerConnection {
    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!("Closed RTP connection {} <-> {}", self.local_addr, self.remote_addr);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> PeerStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for RtpPeerConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
