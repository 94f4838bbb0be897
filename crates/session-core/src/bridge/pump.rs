//! Pump tasks on the non-real-time side of a ring
//!
//! A capture pump drains the capture ring, converts each block from the
//! session format to the media format and pushes it onto the outbound track.
//! A playback pump pulls frames off the inbound track, converts them to the
//! session format and writes them into the playback ring. All format
//! conversion happens here, never on the device thread.

use soundrelay_audio_core::format::{f32_to_i16, i16_to_f32};
use soundrelay_audio_core::{AudioFormat, BlockReader, BlockWriter, FormatConverter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::errors::Result;
use crate::types::SessionId;

/// The half of a ring a pump owns
#[derive(Debug)]
pub(crate) enum PumpEnd {
    /// Drains a capture ring
    Capture(BlockReader),
    /// Feeds a playback ring
    Playback(BlockWriter),
}

/// Track endpoints a pump can attach to
#[derive(Debug, Clone)]
pub(crate) struct Tracks {
    pub outbound: mpsc::Sender<Vec<i16>>,
    pub inbound: Arc<Mutex<mpsc::Receiver<Vec<i16>>>>,
    pub media_format: AudioFormat,
}

/// Start the pump serving `end`
pub(crate) fn spawn_pump(
    session_id: SessionId,
    end: PumpEnd,
    session_format: AudioFormat,
    block_period: Duration,
    tracks: &Tracks,
) -> Result<JoinHandle<()>> {
    let handle = match end {
        PumpEnd::Capture(reader) => {
            let converter = FormatConverter::new(session_format, tracks.media_format)?;
            tokio::spawn(capture_pump(
                session_id,
                reader,
                converter,
                block_period,
                tracks.outbound.clone(),
            ))
        }
        PumpEnd::Playback(writer) => {
            let converter = FormatConverter::new(tracks.media_format, session_format)?;
            tokio::spawn(playback_pump(session_id, writer, converter, tracks.inbound.clone()))
        }
    };
    Ok(handle)
}

async fn capture_pump(
    session_id: SessionId,
    mut reader: BlockReader,
    mut converter: FormatConverter,
    block_period: Duration,
    outbound: mpsc::Sender<Vec<i16>>,
) {
    let mut ticker = tokio::time::interval(block_period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut block = Vec::with_capacity(reader.block_len());
    let mut converted = Vec::new();

    loop {
        ticker.tick().await;
        while reader.read_block(&mut block) {
            converted.clear();
            converter.process(&block, &mut converted);
            if converted.is_empty() {
                continue;
            }
            let pcm: Vec<i16> = converted.iter().map(|s| f32_to_i16(*s)).collect();
            if outbound.send(pcm).await.is_err() {
                debug!("Session {} outbound track closed, capture pump stopping", session_id);
                return;
            }
        }
    }
}

async fn playback_pump(
    session_id: SessionId,
    mut writer: BlockWriter,
    mut converter: FormatConverter,
    inbound: Arc<Mutex<mpsc::Receiver<Vec<i16>>>>,
) {
    // Held for the pump's lifetime; released when the task is aborted
    let mut inbound = inbound.lock_owned().await;

    let mut samples = Vec::new();
    let mut converted = Vec::new();
    while let Some(pcm) = inbound.recv().await {
        samples.clear();
        samples.extend(pcm.iter().map(|s| i16_to_f32(*s)));
        converted.clear();
        converter.process(&samples, &mut converted);
        writer.write(&converted);
    }
    debug!("Session {} inbound track closed, playback pump stopping", session_id);
}
