//! Session data model
//!
//! [`SessionConfig`] is the durable description of one session,
//! [`SessionState`] adds timestamps and [`PersistedState`] is the whole
//! on-disk file. JSON keys are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use soundrelay_audio_core::{StreamDirection, StreamParams};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{Result, SessionError};

pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_CHANNEL_COUNT: u16 = 2;
pub const DEFAULT_BLOCK_SIZE: u32 = 480;
pub const DEFAULT_LATENCY_MS: u32 = 10;

/// Opaque unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|_| SessionError::not_found(s))
    }
}

/// Which way audio flows through a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Native input device → peer
    #[default]
    Capture,
    /// Peer → native output device
    Playback,
}

impl Direction {
    /// Native stream direction serving this session direction
    pub fn stream_direction(&self) -> StreamDirection {
        match self {
            Direction::Capture => StreamDirection::Input,
            Direction::Playback => StreamDirection::Output,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => write!(f, "capture"),
            Direction::Playback => write!(f, "playback"),
        }
    }
}

/// Durable configuration of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub id: SessionId,
    pub name: String,
    pub direction: Direction,
    #[serde(default)]
    pub host_api_id: Option<u32>,
    #[serde(default)]
    pub input_device_id: Option<u32>,
    #[serde(default)]
    pub output_device_id: Option<u32>,
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Frames per callback
    pub block_size: u32,
    /// Latency hint; never causes a stream swap
    pub latency_ms: u32,
    #[serde(default)]
    pub description: Option<String>,
}

impl SessionConfig {
    /// Build a new config from create input, filling defaults.
    ///
    /// `name` is required and must not be blank.
    pub fn from_patch(id: SessionId, patch: SessionConfigPatch) -> Result<Self> {
        let name = match patch.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(SessionError::validation("name is required")),
        };

        let mut config = Self {
            id,
            name,
            direction: patch.direction.unwrap_or_default(),
            host_api_id: patch.host_api_id.flatten(),
            input_device_id: patch.input_device_id.flatten(),
            output_device_id: patch.output_device_id.flatten(),
            sample_rate: patch.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            channel_count: patch.channel_count.unwrap_or(DEFAULT_CHANNEL_COUNT),
            block_size: patch.block_size.unwrap_or(DEFAULT_BLOCK_SIZE),
            latency_ms: patch.latency_ms.unwrap_or(DEFAULT_LATENCY_MS),
            description: patch.description.flatten(),
        };
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Copy of `self` with `patch` applied and the direction invariant re-derived
    pub fn merged(&self, patch: &SessionConfigPatch) -> Result<Self> {
        let mut config = self.clone();

        if let Some(name) = &patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(SessionError::validation("name must not be empty"));
            }
            config.name = name.to_string();
        }
        if let Some(direction) = patch.direction {
            config.direction = direction;
        }
        if let Some(host_api_id) = patch.host_api_id {
            config.host_api_id = host_api_id;
        }
        if let Some(input_device_id) = patch.input_device_id {
            config.input_device_id = input_device_id;
        }
        if let Some(output_device_id) = patch.output_device_id {
            config.output_device_id = output_device_id;
        }
        if let Some(sample_rate) = patch.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(channel_count) = patch.channel_count {
            config.channel_count = channel_count;
        }
        if let Some(block_size) = patch.block_size {
            config.block_size = block_size;
        }
        if let Some(latency_ms) = patch.latency_ms {
            config.latency_ms = latency_ms;
        }
        if let Some(description) = &patch.description {
            config.description = description.clone();
        }

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Null the device id the direction does not use
    pub fn normalize(&mut self) {
        match self.direction {
            Direction::Capture => self.output_device_id = None,
            Direction::Playback => self.input_device_id = None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SessionError::validation("name is required"));
        }
        if self.sample_rate == 0 {
            return Err(SessionError::validation("sampleRate must be greater than 0"));
        }
        if self.channel_count == 0 {
            return Err(SessionError::validation("channelCount must be at least 1"));
        }
        if self.block_size == 0 {
            return Err(SessionError::validation("blockSize must be greater than 0"));
        }
        match self.direction {
            Direction::Capture if self.output_device_id.is_some() => Err(SessionError::validation(
                "capture sessions cannot have an outputDeviceId",
            )),
            Direction::Playback if self.input_device_id.is_some() => Err(SessionError::validation(
                "playback sessions cannot have an inputDeviceId",
            )),
            _ => Ok(()),
        }
    }

    /// The device id the direction uses
    pub fn device_id(&self) -> Option<u32> {
        match self.direction {
            Direction::Capture => self.input_device_id,
            Direction::Playback => self.output_device_id,
        }
    }

    /// Parameters of the native stream this session needs
    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            direction: self.direction.stream_direction(),
            host_api: self.host_api_id,
            device: self.device_id(),
            sample_rate: self.sample_rate,
            channels: self.channel_count,
            block_size: self.block_size,
        }
    }

    /// Whether moving from `self` to `other` needs the native stream reopened
    pub fn requires_stream_swap(&self, other: &SessionConfig) -> bool {
        self.stream_params() != other.stream_params()
    }
}

/// Partial config used by create and update.
///
/// Absent fields are left alone. For nullable fields an explicit JSON
/// `null` (`Some(None)`) clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub host_api_id: Option<Option<u32>>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub input_device_id: Option<Option<u32>>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub output_device_id: Option<Option<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u32>,
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
}

fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl SessionConfigPatch {
    /// Patch carrying only a name, the minimum create input
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_host_api(mut self, host_api_id: Option<u32>) -> Self {
        self.host_api_id = Some(host_api_id);
        self
    }

    pub fn with_input_device(mut self, device_id: Option<u32>) -> Self {
        self.input_device_id = Some(device_id);
        self
    }

    pub fn with_output_device(mut self, device_id: Option<u32>) -> Self {
        self.output_device_id = Some(device_id);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_channel_count(mut self, channel_count: u16) -> Self {
        self.channel_count = Some(channel_count);
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u32) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }
}

/// The persisted unit: a config plus its timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub config: SessionConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> SessionId {
        self.config.id
    }
}

/// Entire content of the sessions file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub sessions: Vec<SessionState>,
}

/// Answer returned by a successful negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiateResponse {
    pub sdp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_fills_defaults_and_nulls_output_device() {
        let patch = SessionConfigPatch::named("Mic In")
            .with_direction(Direction::Capture)
            .with_output_device(Some(4))
            .with_input_device(Some(1));

        let config = SessionConfig::from_patch(SessionId::new(), patch).unwrap();
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.channel_count, DEFAULT_CHANNEL_COUNT);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.latency_ms, DEFAULT_LATENCY_MS);
        assert_eq!(config.input_device_id, Some(1));
        assert_eq!(config.output_device_id, None);
    }

    #[test]
    fn test_create_requires_name() {
        let err = SessionConfig::from_patch(SessionId::new(), SessionConfigPatch::default()).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));

        let err = SessionConfig::from_patch(SessionId::new(), SessionConfigPatch::named("  ")).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[test]
    fn test_create_rejects_zero_geometry() {
        let err = SessionConfig::from_patch(SessionId::new(), SessionConfigPatch::named("x").with_block_size(0))
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));

        let err = SessionConfig::from_patch(SessionId::new(), SessionConfigPatch::named("x").with_channel_count(0))
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[test]
    fn test_merge_switches_direction() {
        let config = SessionConfig::from_patch(
            SessionId::new(),
            SessionConfigPatch::named("Mic In").with_input_device(Some(2)),
        )
        .unwrap();

        let patch = SessionConfigPatch::default()
            .with_direction(Direction::Playback)
            .with_output_device(Some(3));
        let merged = config.merged(&patch).unwrap();

        assert_eq!(merged.id, config.id);
        assert_eq!(merged.input_device_id, None);
        assert_eq!(merged.output_device_id, Some(3));
        assert!(config.requires_stream_swap(&merged));
    }

    #[test]
    fn test_latency_and_description_do_not_swap_stream() {
        let config = SessionConfig::from_patch(SessionId::new(), SessionConfigPatch::named("x")).unwrap();
        let merged = config
            .merged(
                &SessionConfigPatch::default()
                    .with_latency_ms(40)
                    .with_description(Some("desk".into())),
            )
            .unwrap();
        assert!(!config.requires_stream_swap(&merged));
    }

    #[test]
    fn test_patch_distinguishes_null_from_absent() {
        let patch: SessionConfigPatch =
            serde_json::from_str(r#"{"inputDeviceId": null, "sampleRate": 44100}"#).unwrap();
        assert_eq!(patch.input_device_id, Some(None));
        assert_eq!(patch.output_device_id, None);
        assert_eq!(patch.sample_rate, Some(44100));

        let config = SessionConfig::from_patch(
            SessionId::new(),
            SessionConfigPatch::named("x").with_input_device(Some(5)),
        )
        .unwrap();
        assert_eq!(config.merged(&patch).unwrap().input_device_id, None);
    }

    #[test]
    fn test_config_json_uses_camel_case() {
        let config = SessionConfig::from_patch(SessionId::new(), SessionConfigPatch::named("x")).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["direction"], "capture");
        assert_eq!(json["sampleRate"], 48000);
        assert!(json["outputDeviceId"].is_null());
    }
}
