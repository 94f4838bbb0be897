//! SDP offer/answer for plain RTP audio
//!
//! Parses remote offers (RFC 4566), picks a codec and direction for one
//! session, and renders the answer. Only the subset a single audio stream
//! needs is understood; unknown lines are ignored.

pub mod types;

pub use types::{MediaDescription, MediaDirection, NegotiatedMedia, Origin, RtpMap, SessionDescription};

use soundrelay_audio_core::{AudioFormat, PayloadCodec};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::errors::{Result, SessionError};
use crate::types::Direction;

const SUPPORTED_PROTOCOLS: [&str; 2] = ["RTP/AVP", "RTP/AVPF"];

impl SessionDescription {
    /// Parse SDP text. Accepts `\n` or `\r\n` line endings.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty());

        match lines.next() {
            Some("v=0") => {}
            _ => return Err(SessionError::negotiation("SDP must start with v=0")),
        }

        let mut sdp = SessionDescription {
            origin: None,
            session_name: String::new(),
            connection: None,
            direction: None,
            media: Vec::new(),
        };

        for line in lines {
            let Some((kind, value)) = line.split_once('=') else {
                return Err(SessionError::negotiation(format!("malformed SDP line: {}", line)));
            };
            let value = value.trim();

            match kind {
                "o" => sdp.origin = Some(parse_origin(value)?),
                "s" => sdp.session_name = value.to_string(),
                "c" => {
                    let address = parse_connection(value)?;
                    match sdp.media.last_mut() {
                        Some(media) => media.connection = Some(address),
                        None => sdp.connection = Some(address),
                    }
                }
                "m" => sdp.media.push(parse_media(value)?),
                "a" => {
                    let (name, attr_value) = match value.split_once(':') {
                        Some((name, v)) => (name, Some(v.trim())),
                        None => (value, None),
                    };
                    if let Some(direction) = MediaDirection::from_attribute(name) {
                        match sdp.media.last_mut() {
                            Some(media) => media.direction = Some(direction),
                            None => sdp.direction = Some(direction),
                        }
                        continue;
                    }
                    let Some(media) = sdp.media.last_mut() else {
                        continue;
                    };
                    match (name, attr_value) {
                        ("rtpmap", Some(v)) => media.rtpmaps.push(parse_rtpmap(v)?),
                        ("ptime", Some(v)) => {
                            media.ptime = Some(v.parse().map_err(|_| {
                                SessionError::negotiation(format!("invalid ptime: {}", v))
                            })?)
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        Ok(sdp)
    }

    /// First audio section with a non-zero port
    pub fn audio(&self) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.media == "audio" && m.port != 0)
    }
}

fn parse_origin(value: &str) -> Result<Origin> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(SessionError::negotiation(format!("malformed o= line: {}", value)));
    }
    Ok(Origin {
        username: parts[0].to_string(),
        session_id: parts[1].parse().unwrap_or(0),
        session_version: parts[2].parse().unwrap_or(0),
        address: parts[5].parse().unwrap_or(IpAddr::from([0, 0, 0, 0])),
    })
}

fn parse_connection(value: &str) -> Result<IpAddr> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 3 || parts[0] != "IN" {
        return Err(SessionError::negotiation(format!("malformed c= line: {}", value)));
    }
    // Multicast addresses may carry /ttl
    let address = parts[2].split('/').next().unwrap_or_default();
    address
        .parse()
        .map_err(|_| SessionError::negotiation(format!("invalid connection address: {}", parts[2])))
}

fn parse_media(value: &str) -> Result<MediaDescription> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(SessionError::negotiation(format!("malformed m= line: {}", value)));
    }
    let port = parts[1]
        .split('/')
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| SessionError::negotiation(format!("invalid media port: {}", parts[1])))?;

    Ok(MediaDescription {
        media: parts[0].to_string(),
        port,
        protocol: parts[2].to_string(),
        formats: parts[3..].iter().filter_map(|f| f.parse().ok()).collect(),
        connection: None,
        rtpmaps: Vec::new(),
        direction: None,
        ptime: None,
    })
}

fn parse_rtpmap(value: &str) -> Result<RtpMap> {
    let malformed = || SessionError::negotiation(format!("malformed rtpmap: {}", value));

    let (pt, encoding) = value.split_once(' ').ok_or_else(malformed)?;
    let mut parts = encoding.trim().split('/');
    let name = parts.next().ok_or_else(malformed)?;
    let clock_rate = parts.next().and_then(|r| r.parse().ok()).ok_or_else(malformed)?;
    let channels = match parts.next() {
        Some(ch) => Some(ch.parse().map_err(|_| malformed())?),
        None => None,
    };

    Ok(RtpMap {
        payload_type: pt.parse().map_err(|_| malformed())?,
        encoding: name.to_string(),
        clock_rate,
        channels,
    })
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=0\r\n")?;
        if let Some(o) = &self.origin {
            write!(
                f,
                "o={} {} {} IN {} {}\r\n",
                o.username,
                o.session_id,
                o.session_version,
                address_type(&o.address),
                o.address
            )?;
        }
        let name = if self.session_name.is_empty() { "-" } else { &self.session_name };
        write!(f, "s={}\r\n", name)?;
        if let Some(c) = &self.connection {
            write!(f, "c=IN {} {}\r\n", address_type(c), c)?;
        }
        write!(f, "t=0 0\r\n")?;
        if let Some(direction) = &self.direction {
            write!(f, "a={}\r\n", direction)?;
        }

        for m in &self.media {
            let formats: Vec<String> = m.formats.iter().map(|pt| pt.to_string()).collect();
            write!(f, "m={} {} {} {}\r\n", m.media, m.port, m.protocol, formats.join(" "))?;
            if let Some(c) = &m.connection {
                write!(f, "c=IN {} {}\r\n", address_type(c), c)?;
            }
            for map in &m.rtpmaps {
                write!(f, "a=rtpmap:{} {}/{}", map.payload_type, map.encoding, map.clock_rate)?;
                if let Some(ch) = map.channels {
                    write!(f, "/{}", ch)?;
                }
                write!(f, "\r\n")?;
            }
            if let Some(ptime) = m.ptime {
                write!(f, "a=ptime:{}\r\n", ptime)?;
            }
            if let Some(direction) = &m.direction {
                write!(f, "a={}\r\n", direction)?;
            }
        }
        Ok(())
    }
}

fn address_type(address: &IpAddr) -> &'static str {
    match address {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    }
}

/// Apply a remote offer to a session of the given direction.
///
/// Picks the first offered format this side can carry and checks that the
/// offered direction lets audio flow the way the session needs.
pub fn negotiate(offer: &SessionDescription, direction: Direction, default_ptime_ms: u32) -> Result<NegotiatedMedia> {
    let audio = offer
        .audio()
        .ok_or_else(|| SessionError::negotiation("offer has no active audio stream"))?;

    if !SUPPORTED_PROTOCOLS.contains(&audio.protocol.as_str()) {
        return Err(SessionError::negotiation(format!(
            "unsupported media transport {}",
            audio.protocol
        )));
    }
    if audio.formats.is_empty() {
        return Err(SessionError::negotiation("offer lists no payload formats"));
    }

    let address = audio
        .connection
        .or(offer.connection)
        .ok_or_else(|| SessionError::negotiation("offer has no connection address"))?;
    if address.is_unspecified() {
        return Err(SessionError::negotiation("offer connection address is unspecified"));
    }

    let offered = audio.direction.or(offer.direction).unwrap_or(MediaDirection::SendRecv);
    let local_direction = match direction {
        Direction::Capture if offered.receives() => MediaDirection::SendOnly,
        Direction::Playback if offered.sends() => MediaDirection::RecvOnly,
        _ => {
            return Err(SessionError::negotiation(format!(
                "offer direction {} is incompatible with a {} session",
                offered, direction
            )));
        }
    };

    let (payload_type, codec, format) = audio
        .formats
        .iter()
        .find_map(|pt| select_format(audio, *pt).map(|(codec, format)| (*pt, codec, format)))
        .ok_or_else(|| SessionError::negotiation("no supported codec offered (PCMU, PCMA, L16)"))?;

    let ptime_ms = audio.ptime.filter(|p| *p > 0).unwrap_or(default_ptime_ms.max(1));

    Ok(NegotiatedMedia {
        codec,
        payload_type,
        format,
        remote_addr: SocketAddr::new(address, audio.port),
        protocol: audio.protocol.clone(),
        ptime_ms,
        local_direction,
    })
}

fn select_format(audio: &MediaDescription, payload_type: u8) -> Option<(PayloadCodec, AudioFormat)> {
    let (codec, format) = match audio.rtpmap(payload_type) {
        Some(map) => (
            PayloadCodec::from_sdp_name(&map.encoding)?,
            AudioFormat::new(map.clock_rate, map.channels.unwrap_or(1)),
        ),
        None => PayloadCodec::from_static_payload_type(payload_type)?,
    };
    codec.supports(&format).then_some((codec, format))
}

/// Render the answer for `negotiated`, advertising `local_addr`
pub fn build_answer(negotiated: &NegotiatedMedia, local_addr: SocketAddr, session_id: u64) -> SessionDescription {
    let ip = local_addr.ip();
    let channels = (negotiated.format.channels > 1).then_some(negotiated.format.channels);

    SessionDescription {
        origin: Some(Origin {
            username: "soundrelay".to_string(),
            session_id,
            session_version: session_id,
            address: ip,
        }),
        session_name: "soundrelay".to_string(),
        connection: Some(ip),
        direction: None,
        media: vec![MediaDescription {
            media: "audio".to_string(),
            port: local_addr.port(),
            protocol: negotiated.protocol.clone(),
            formats: vec![negotiated.payload_type],
            connection: None,
            rtpmaps: vec![RtpMap {
                payload_type: negotiated.payload_type,
                encoding: negotiated.codec.sdp_name().to_string(),
                clock_rate: negotiated.format.sample_rate,
                channels,
            }],
            direction: Some(negotiated.local_direction),
            ptime: Some(negotiated.ptime_ms),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 4242 1 IN IP4 192.0.2.10\r\n\
        s=call\r\n\
        c=IN IP4 192.0.2.10\r\n\
        t=0 0\r\n\
        m=audio 40000 RTP/AVP 96 0 8\r\n\
        a=rtpmap:96 opus/48000/2\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=ptime:30\r\n\
        a=sendrecv\r\n";

    #[test]
    fn test_parse_offer() {
        let sdp = SessionDescription::parse(OFFER).unwrap();
        let audio = sdp.audio().unwrap();
        assert_eq!(sdp.connection, Some("192.0.2.10".parse().unwrap()));
        assert_eq!(audio.port, 40000);
        assert_eq!(audio.formats, vec![96, 0, 8]);
        assert_eq!(audio.rtpmap(96).unwrap().channels, Some(2));
        assert_eq!(audio.ptime, Some(30));
        assert_eq!(audio.direction, Some(MediaDirection::SendRecv));
    }

    #[test]
    fn test_parse_rejects_non_sdp() {
        assert!(matches!(
            SessionDescription::parse("hello"),
            Err(SessionError::Negotiation(_))
        ));
        assert!(SessionDescription::parse("v=0\nm=audio x RTP/AVP 0\n").is_err());
    }

    #[test]
    fn test_negotiate_skips_unsupported_codecs() {
        let sdp = SessionDescription::parse(OFFER).unwrap();
        let media = negotiate(&sdp, Direction::Capture, 20).unwrap();
        assert_eq!(media.codec, PayloadCodec::Pcmu);
        assert_eq!(media.payload_type, 0);
        assert_eq!(media.format, AudioFormat::new(8000, 1));
        assert_eq!(media.ptime_ms, 30);
        assert_eq!(media.frames_per_packet(), 240);
        assert_eq!(media.local_direction, MediaDirection::SendOnly);
        assert_eq!(media.remote_addr, "192.0.2.10:40000".parse().unwrap());
    }

    #[test]
    fn test_negotiate_dynamic_l16() {
        let offer = "v=0\nc=IN IP4 127.0.0.1\nm=audio 5004 RTP/AVP 97\na=rtpmap:97 L16/48000/2\na=sendonly\n";
        let sdp = SessionDescription::parse(offer).unwrap();
        let media = negotiate(&sdp, Direction::Playback, 20).unwrap();
        assert_eq!(media.codec, PayloadCodec::L16);
        assert_eq!(media.format, AudioFormat::new(48000, 2));
        assert_eq!(media.local_direction, MediaDirection::RecvOnly);
    }

    #[test]
    fn test_negotiate_checks_direction() {
        let offer = "v=0\nc=IN IP4 127.0.0.1\nm=audio 5004 RTP/AVP 0\na=sendonly\n";
        let sdp = SessionDescription::parse(offer).unwrap();
        assert!(negotiate(&sdp, Direction::Capture, 20).is_err());

        let offer = "v=0\nc=IN IP4 127.0.0.1\nm=audio 5004 RTP/AVP 0\na=inactive\n";
        let sdp = SessionDescription::parse(offer).unwrap();
        assert!(negotiate(&sdp, Direction::Playback, 20).is_err());
    }

    #[test]
    fn test_negotiate_rejects_secure_profiles_and_missing_address() {
        let offer = "v=0\nc=IN IP4 127.0.0.1\nm=audio 5004 UDP/TLS/RTP/SAVPF 0\n";
        let sdp = SessionDescription::parse(offer).unwrap();
        assert!(negotiate(&sdp, Direction::Capture, 20).is_err());

        let offer = "v=0\nm=audio 5004 RTP/AVP 0\n";
        let sdp = SessionDescription::parse(offer).unwrap();
        assert!(negotiate(&sdp, Direction::Capture, 20).is_err());
    }

    #[test]
    fn test_answer_renders_crlf_lines() {
        let sdp = SessionDescription::parse(OFFER).unwrap();
        let media = negotiate(&sdp, Direction::Capture, 20).unwrap();
        let answer = build_answer(&media, "198.51.100.7:30000".parse().unwrap(), 99).to_string();

        assert!(answer.starts_with("v=0\r\n"));
        assert!(answer.contains("c=IN IP4 198.51.100.7\r\n"));
        assert!(answer.contains("m=audio 30000 RTP/AVP 0\r\n"));
        assert!(answer.contains("a=rtpmap:0 PCMU/8000\r\n"));
        assert!(answer.contains("a=sendonly\r\n"));
        assert_eq!(answer.matches("\r\n").count(), answer.matches('\n').count());

        let reparsed = SessionDescription::parse(&answer).unwrap();
        assert_eq!(reparsed.audio().unwrap().port, 30000);
    }
}
