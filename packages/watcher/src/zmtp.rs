//! ZMTP 3.0 Subscriber
//!
//! Enough of the ZeroMQ wire protocol to act as a SUB peer over TCP:
//! NULL-mechanism greeting, READY handshake, subscription messages and
//! frame reading. The TCP stream is owned directly, so a publisher that
//! goes away surfaces as an end-of-stream error on the next read.

use std::io::ErrorKind;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Size of the fixed greeting both peers send first
pub const GREETING_LEN: usize = 64;

/// Largest frame body accepted from the peer
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

const FLAG_MORE: u8 = 0x01;
const FLAG_LONG: u8 = 0x02;
const FLAG_COMMAND: u8 = 0x04;

const MECHANISM_NULL: &[u8] = b"NULL";
const SUBSCRIBE: u8 = 0x01;

/// Errors raised by the wire protocol
#[derive(Error, Debug)]
pub enum ZmtpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported endpoint '{0}', expected tcp://host:port")]
    Endpoint(String),

    #[error("Invalid greeting: {0}")]
    Greeting(&'static str),

    #[error("Unsupported ZMTP version {0}.{1}")]
    Version(u8, u8),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Frame of {0} bytes exceeds limit")]
    FrameTooLarge(u64),
}

impl ZmtpError {
    /// Check whether the stream is gone or can no longer be read in step
    pub fn ends_stream(&self) -> bool {
        match self {
            ZmtpError::Io(io) => matches!(
                io.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            // Body was left unread
            ZmtpError::FrameTooLarge(_) => true,
            _ => false,
        }
    }
}

/// One frame off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Command(Vec<u8>),
    Message { body: Vec<u8>, more: bool },
}

/// Extract `host:port` from a `tcp://host:port` endpoint
pub fn tcp_address(uri: &str) -> Result<&str, ZmtpError> {
    match uri.strip_prefix("tcp://") {
        Some(address) if !address.is_empty() => Ok(address),
        _ => Err(ZmtpError::Endpoint(uri.to_string())),
    }
}

/// Our greeting: version 3.0, NULL mechanism, client role
pub fn greeting() -> [u8; GREETING_LEN] {
    let mut data = [0u8; GREETING_LEN];
    data[0] = 0xff;
    data[9] = 0x7f;
    data[10] = 3;
    data[11] = 0;
    data[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    data
}

/// Validate the peer's greeting and return its protocol version
pub fn check_greeting(data: &[u8; GREETING_LEN]) -> Result<(u8, u8), ZmtpError> {
    if data[0] != 0xff || data[9] != 0x7f {
        return Err(ZmtpError::Greeting("bad signature"));
    }

    let (major, minor) = (data[10], data[11]);
    if major < 3 {
        return Err(ZmtpError::Version(major, minor));
    }

    let mechanism = &data[12..32];
    let name_len = mechanism.iter().position(|b| *b == 0).unwrap_or(mechanism.len());
    if &mechanism[..name_len] != MECHANISM_NULL {
        return Err(ZmtpError::Greeting("unsupported security mechanism"));
    }

    Ok((major, minor))
}

/// Encode a frame, switching to the 8-byte length form above 255 bytes
pub fn encode_frame(flags: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 9);
    if body.len() > 255 {
        out.push(flags | FLAG_LONG);
        out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    } else {
        out.push(flags);
        out.push(body.len() as u8);
    }
    out.extend_from_slice(body);
    out
}

/// READY command announcing our socket type
pub fn ready_command(socket_type: &str) -> Vec<u8> {
    let name = b"READY";
    let mut body = vec![name.len() as u8];
    body.extend_from_slice(name);

    let key = b"Socket-Type";
    body.push(key.len() as u8);
    body.extend_from_slice(key);
    body.extend_from_slice(&(socket_type.len() as u32).to_be_bytes());
    body.extend_from_slice(socket_type.as_bytes());

    encode_frame(FLAG_COMMAND, &body)
}

/// Subscription message for a topic prefix
pub fn subscription(topic: &str) -> Vec<u8> {
    let mut body = vec![SUBSCRIBE];
    body.extend_from_slice(topic.as_bytes());
    encode_frame(0, &body)
}

/// Split a command body into its name and properties
pub fn parse_command(body: &[u8]) -> Result<(&[u8], Vec<(&[u8], &[u8])>), ZmtpError> {
    let malformed = || ZmtpError::Handshake("malformed command".to_string());

    let (&name_len, rest) = body.split_first().ok_or_else(malformed)?;
    let name_len = name_len as usize;
    if rest.len() < name_len {
        return Err(malformed());
    }
    let (name, mut rest) = rest.split_at(name_len);

    let mut properties = Vec::new();
    while let Some((&key_len, tail)) = rest.split_first() {
        let key_len = key_len as usize;
        if tail.len() < key_len + 4 {
            return Err(malformed());
        }
        let (key, tail) = tail.split_at(key_len);
        let (len_bytes, tail) = tail.split_at(4);
        let value_len = u32::from_be_bytes(len_bytes.try_into().map_err(|_| malformed())?) as usize;
        if tail.len() < value_len {
            return Err(malformed());
        }
        let (value, tail) = tail.split_at(value_len);
        properties.push((key, value));
        rest = tail;
    }

    Ok((name, properties))
}

/// Read one frame
///
/// Not cancel-safe: dropping the future mid-frame loses sync with the peer.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<WireFrame, ZmtpError> {
    let flags = reader.read_u8().await?;
    let len = if flags & FLAG_LONG != 0 {
        reader.read_u64().await?
    } else {
        u64::from(reader.read_u8().await?)
    };
    if len > MAX_FRAME_LEN {
        return Err(ZmtpError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    if flags & FLAG_COMMAND != 0 {
        Ok(WireFrame::Command(body))
    } else {
        Ok(WireFrame::Message {
            body,
            more: flags & FLAG_MORE != 0,
        })
    }
}

/// SUB side of one ZMTP connection
pub struct SubStream {
    stream: BufReader<TcpStream>,
}

impl SubStream {
    /// Connect to a `tcp://` endpoint and complete the handshake
    pub async fn connect(uri: &str) -> Result<Self, ZmtpError> {
        let stream = TcpStream::connect(tcp_address(uri)?).await?;
        stream.set_nodelay(true)?;

        let mut sub = Self {
            stream: BufReader::new(stream),
        };
        sub.handshake().await?;
        Ok(sub)
    }

    async fn handshake(&mut self) -> Result<(), ZmtpError> {
        self.stream.get_mut().write_all(&greeting()).await?;

        let mut peer = [0u8; GREETING_LEN];
        self.stream.read_exact(&mut peer).await?;
        let (major, minor) = check_greeting(&peer)?;
        debug!("Peer speaks ZMTP {}.{}", major, minor);

        self.stream.get_mut().write_all(&ready_command("SUB")).await?;

        let body = match read_frame(&mut self.stream).await? {
            WireFrame::Command(body) => body,
            WireFrame::Message { .. } => {
                return Err(ZmtpError::Handshake("expected READY command".to_string()))
            }
        };

        let (name, properties) = parse_command(&body)?;
        if name != b"READY" {
            return Err(ZmtpError::Handshake(format!(
                "expected READY, got {}",
                String::from_utf8_lossy(name)
            )));
        }

        let socket_type = properties
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(b"Socket-Type"))
            .map(|(_, value)| *value);

        match socket_type {
            Some(b"PUB") | Some(b"XPUB") => Ok(()),
            Some(other) => Err(ZmtpError::Handshake(format!(
                "incompatible peer socket type {}",
                String::from_utf8_lossy(other)
            ))),
            None => Err(ZmtpError::Handshake("peer did not announce a socket type".to_string())),
        }
    }

    /// Ask the publisher for messages starting with `topic`
    pub async fn subscribe(&mut self, topic: &str) -> Result<(), ZmtpError> {
        self.stream.get_mut().write_all(&subscription(topic)).await?;
        Ok(())
    }

    /// Read the next complete message, skipping command frames
    pub async fn recv(&mut self) -> Result<Vec<Vec<u8>>, ZmtpError> {
        let mut parts = Vec::new();
        loop {
            match read_frame(&mut self.stream).await? {
                WireFrame::Command(body) => debug!("Ignoring {} byte command frame", body.len()),
                WireFrame::Message { body, more } => {
                    parts.push(body);
                    if !more {
                        return Ok(parts);
                    }
                }
            }
        }
    }

    /// Close our side of the connection
    pub async fn shutdown(&mut self) -> Result<(), ZmtpError> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}
