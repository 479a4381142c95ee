//! RFS Protocol Implementation
//!
//! Every frame on the wire is laid out as:
//!
//! ```text
//! +----------------+----------------------------+------------------+
//! | Type (1 byte)  | Length (4 bytes, BE u32)   | Payload          |
//! +----------------+----------------------------+------------------+
//! ```
//!
//! The codec enforces no maximum frame size. Payload conventions:
//!
//! - `RequestLogin`: UTF-8 `username\npassword`
//! - `RequestUpload`: UTF-8 `destination\n` followed by raw file bytes
//! - `RequestCopy` / `RequestCopyRecursive`: UTF-8 `source\ndestination`
//! - all other requests: a single UTF-8 path (or nothing)

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the frame header (type byte + length)
pub const HEADER_LEN: usize = 5;

/// Pre-agreed server port
pub const DEFAULT_PORT: u16 = 980;

/// Upper bound on a single read-buffer reservation while waiting for a payload
const MAX_RESERVE: usize = 64 * 1024;

/// RFS message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `username\npassword`
    RequestLogin = 0,
    /// Change working directory
    RequestChangeDirectory = 1,
    /// Fetch a file
    RequestDownload = 2,
    /// `path\n` + file bytes
    RequestUpload = 3,
    /// Successful command result (possibly empty)
    ResponseCommandOutput = 4,
    /// Reserved; never produced by the server
    ResponseFile = 5,
    /// Error text
    ResponseError = 6,
    /// Login accepted
    ResponseLoginSuccess = 7,
    /// Print working directory
    RequestPrintDirectory = 8,
    /// Create a directory
    RequestMakeDirectory = 9,
    /// List a directory
    RequestList = 10,
    /// Delete a file
    RequestRemoveFile = 11,
    /// Delete a directory tree
    RequestRemoveRecursive = 12,
    /// Copy a file
    RequestCopy = 13,
    /// Copy a directory tree
    RequestCopyRecursive = 14,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::RequestLogin),
            1 => Ok(Self::RequestChangeDirectory),
            2 => Ok(Self::RequestDownload),
            3 => Ok(Self::RequestUpload),
            4 => Ok(Self::ResponseCommandOutput),
            5 => Ok(Self::ResponseFile),
            6 => Ok(Self::ResponseError),
            7 => Ok(Self::ResponseLoginSuccess),
            8 => Ok(Self::RequestPrintDirectory),
            9 => Ok(Self::RequestMakeDirectory),
            10 => Ok(Self::RequestList),
            11 => Ok(Self::RequestRemoveFile),
            12 => Ok(Self::RequestRemoveRecursive),
            13 => Ok(Self::RequestCopy),
            14 => Ok(Self::RequestCopyRecursive),
            _ => Err(Error::UnknownRequest(value)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(message_type: MessageType) -> Self {
        message_type as Self
    }
}

impl MessageType {
    /// Check if this type is only ever sent by the server
    pub const fn is_response(self) -> bool {
        matches!(
            self,
            Self::ResponseCommandOutput
                | Self::ResponseFile
                | Self::ResponseError
                | Self::ResponseLoginSuccess
        )
    }
}

/// One protocol frame
///
/// The raw type byte is kept as received so the dispatcher can answer frames
/// whose type it does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    tag: u8,
    payload: Bytes,
}

impl Message {
    /// Create a message with a payload
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            tag: message_type.into(),
            payload: payload.into(),
        }
    }

    /// Create a message with an empty payload
    pub fn empty(message_type: MessageType) -> Self {
        Self::new(message_type, Bytes::new())
    }

    /// Create a message from a raw type byte
    pub fn from_raw(tag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// Create a `ResponseError` carrying `text`
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageType::ResponseError, text.into())
    }

    /// Create a request whose payload is two newline-separated fields
    pub fn with_pair(message_type: MessageType, first: &str, second: &str) -> Self {
        Self::new(message_type, format!("{first}\n{second}"))
    }

    /// Raw type byte
    pub const fn tag(&self) -> u8 {
        self.tag
    }

    /// Decoded message type
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRequest`] for an undefined type byte.
    pub fn message_type(&self) -> Result<MessageType> {
        MessageType::try_from(self.tag)
    }

    /// Check the message type without decoding errors
    pub fn is(&self, message_type: MessageType) -> bool {
        self.tag == u8::from(message_type)
    }

    /// Payload bytes
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check for an empty payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the message, returning its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload as UTF-8 text
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] if the payload is not valid UTF-8.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| Error::BadRequest(format!("payload is not UTF-8: {e}")))
    }

    /// Payload text lossily decoded, for display
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Split the payload on the first newline into a UTF-8 head and raw tail
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] if there is no newline or the head is not UTF-8.
    pub fn split_first_line(&self) -> Result<(&str, &[u8])> {
        let newline = self
            .payload
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| Error::BadRequest("missing field separator".into()))?;
        let head = std::str::from_utf8(&self.payload[..newline])
            .map_err(|e| Error::BadRequest(format!("field is not UTF-8: {e}")))?;
        Ok((head, &self.payload[newline + 1..]))
    }

    /// Split a text payload on the first newline into two fields
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] if there is no newline or the payload is not UTF-8.
    pub fn split_pair(&self) -> Result<(&str, &str)> {
        let (first, rest) = self.split_first_line()?;
        let second = std::str::from_utf8(rest)
            .map_err(|e| Error::BadRequest(format!("field is not UTF-8: {e}")))?;
        Ok((first, second))
    }
}

/// Length-prefixed frame codec
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        let frame_len = HEADER_LEN + len;

        if src.len() < frame_len {
            src.reserve((frame_len - src.len()).min(MAX_RESERVE));
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Message::from_raw(tag, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::ConnectionLost),
        }
    }
}

impl<'a> Encoder<&'a Message> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, message: &'a Message, dst: &mut BytesMut) -> Result<()> {
        let len = u32::try_from(message.payload.len()).map_err(|_| {
            Error::Protocol(format!(
                "payload of {} bytes does not fit a frame",
                message.payload.len()
            ))
        })?;

        dst.reserve(HEADER_LEN + message.payload.len());
        dst.put_u8(message.tag);
        dst.put_u32(len);
        dst.put_slice(&message.payload);
        Ok(())
    }
}

/// Encode a single message into a standalone buffer
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the payload is longer than `u32::MAX`.
pub fn encode(message: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    FrameCodec.encode(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Peer resets and broken pipes end the connection like a clean close
fn transport_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

/// Framed message stream over any async byte stream
///
/// Reads accumulate partial deliveries until a complete frame is buffered;
/// a zero-byte read before that is reported as [`Error::ConnectionLost`].
pub struct MessageStream<S> {
    inner: S,
    codec: FrameCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<S> MessageStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a byte stream
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            codec: FrameCodec,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: BytesMut::new(),
        }
    }

    /// Read the next complete frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the peer closes the stream, or
    /// [`Error::Io`] on a transport failure.
    pub async fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.codec.decode(&mut self.read_buf)? {
                return Ok(message);
            }

            let read = self
                .inner
                .read_buf(&mut self.read_buf)
                .await
                .map_err(transport_error)?;
            if read == 0 {
                return Err(Error::ConnectionLost);
            }
        }
    }

    /// Write one frame and flush it
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the peer has gone away,
    /// [`Error::Io`] on another transport failure, or [`Error::Protocol`] if
    /// the payload cannot be framed.
    pub async fn write_message(&mut self, message: &Message) -> Result<()> {
        self.write_buf.clear();
        self.codec.encode(message, &mut self.write_buf)?;
        self.inner
            .write_all(&self.write_buf)
            .await
            .map_err(transport_error)?;
        self.inner.flush().await.map_err(transport_error)?;
        Ok(())
    }

    /// Check whether a partial frame is buffered
    pub fn has_partial_frame(&self) -> bool {
        !self.read_buf.is_empty()
    }
}
