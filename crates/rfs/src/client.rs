//! RFS Client Implementation
//!
//! One method per remote command. Each sends a single request frame and
//! waits for its response; a `ResponseError` frame becomes [`Error::Remote`]
//! carrying the server's text. Local file checks happen before any frame is
//! sent.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::protocol::{Message, MessageStream, MessageType};
use crate::{Error, Result};

/// Largest file the client will upload (50 MB)
pub const MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

const TOO_LARGE: &str = "Files larger than 50 MB are not supported.";
const LOCAL_MISSING: &str = "File not found.";
const LOCAL_UNREADABLE: &str = "Permission denied for local file";
const DESTINATION_MISSING: &str = "Destination directory not found";
const DESTINATION_UNWRITABLE: &str = "Permission denied for destination directory";

/// RFS client over any byte stream
pub struct Client<S = TcpStream> {
    stream: MessageStream<S>,
    username: Option<String>,
}

impl Client<TcpStream> {
    /// Connect to an RFS server
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the TCP connection fails.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        info!("Connecting to {}:{}", host, port);
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: MessageStream::new(stream),
            username: None,
        }
    }

    /// User bound by a successful [`Client::login`]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Send one frame and wait for the response frame
    ///
    /// # Errors
    ///
    /// Returns a frame-level error if the connection fails.
    pub async fn request(&mut self, message: &Message) -> Result<Message> {
        debug!(request_type = message.tag(), bytes = message.len(), "Sending request");
        self.stream.write_message(message).await?;
        let response = self.stream.read_message().await?;
        debug!(response_type = response.tag(), bytes = response.len(), "Received response");
        Ok(response)
    }

    /// Send a command and return its output
    async fn command(&mut self, message: &Message) -> Result<Bytes> {
        let response = self.request(message).await?;
        match response.message_type() {
            Ok(MessageType::ResponseCommandOutput) => Ok(response.into_payload()),
            Ok(MessageType::ResponseError) => Err(Error::Remote(response.text_lossy())),
            _ => Err(Error::Protocol(format!(
                "unexpected response type {}",
                response.tag()
            ))),
        }
    }

    async fn command_text(&mut self, message: &Message) -> Result<String> {
        let output = self.command(message).await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    fn path_request(message_type: MessageType, path: &str) -> Message {
        Message::new(message_type, Bytes::copy_from_slice(path.as_bytes()))
    }

    /// Log in
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] with the server's reason if the login is
    /// rejected. The connection stays usable for another attempt.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let request = Message::with_pair(MessageType::RequestLogin, username, password);
        let response = self.request(&request).await?;
        match response.message_type() {
            Ok(MessageType::ResponseLoginSuccess) => {
                info!(user = username, "Logged in");
                self.username = Some(username.to_string());
                Ok(())
            }
            Ok(MessageType::ResponseError) => Err(Error::Remote(response.text_lossy())),
            _ => Err(Error::Protocol(format!(
                "unexpected response type {}",
                response.tag()
            ))),
        }
    }

    /// Change the remote working directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the server rejects the directory.
    pub async fn change_directory(&mut self, path: &str) -> Result<()> {
        self.command(&Self::path_request(MessageType::RequestChangeDirectory, path))
            .await?;
        Ok(())
    }

    /// Remote working directory (`/` is the home root)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] on a server error.
    pub async fn print_directory(&mut self) -> Result<String> {
        self.command_text(&Message::empty(MessageType::RequestPrintDirectory))
            .await
    }

    /// Create a remote directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the directory exists or its parent is invalid.
    pub async fn make_directory(&mut self, path: &str) -> Result<()> {
        self.command(&Self::path_request(MessageType::RequestMakeDirectory, path))
            .await?;
        Ok(())
    }

    /// List a remote directory, one entry per line
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the directory does not exist.
    pub async fn list(&mut self, path: &str) -> Result<String> {
        self.command_text(&Self::path_request(MessageType::RequestList, path))
            .await
    }

    /// Upload a local file
    ///
    /// # Errors
    ///
    /// - [`Error::LocalFile`] if the file is missing, unreadable or over
    ///   [`MAX_UPLOAD_SIZE`]; nothing is sent in that case
    /// - [`Error::Remote`] if the server rejects the destination
    pub async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let metadata = match fs::metadata(local).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(Error::LocalFile(LOCAL_MISSING.into())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::LocalFile(LOCAL_MISSING.into()));
            }
            Err(_) => return Err(Error::LocalFile(LOCAL_UNREADABLE.into())),
        };

        if metadata.len() > MAX_UPLOAD_SIZE {
            return Err(Error::LocalFile(TOO_LARGE.into()));
        }

        let data = fs::read(local)
            .await
            .map_err(|_| Error::LocalFile(LOCAL_UNREADABLE.into()))?;

        let mut payload = BytesMut::with_capacity(remote.len() + 1 + data.len());
        payload.put_slice(remote.as_bytes());
        payload.put_u8(b'\n');
        payload.put_slice(&data);

        self.command(&Message::new(MessageType::RequestUpload, payload.freeze()))
            .await?;
        debug!(local = %local.display(), remote, bytes = data.len(), "Upload complete");
        Ok(())
    }

    /// Download a remote file, returning the number of bytes written
    ///
    /// # Errors
    ///
    /// - [`Error::LocalFile`] if the local destination directory is missing
    ///   or not writable
    /// - [`Error::Remote`] if the remote file does not exist
    pub async fn download(&mut self, remote: &str, local: &Path) -> Result<u64> {
        let parent = match local.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !fs::metadata(parent).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::LocalFile(DESTINATION_MISSING.into()));
        }

        let data = self
            .command(&Self::path_request(MessageType::RequestDownload, remote))
            .await?;

        fs::write(local, &data)
            .await
            .map_err(|_| Error::LocalFile(DESTINATION_UNWRITABLE.into()))?;
        debug!(remote, local = %local.display(), bytes = data.len(), "Download complete");
        Ok(data.len() as u64)
    }

    /// Remove a remote file, or a directory tree when `recursive`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the target does not exist or is protected.
    pub async fn remove(&mut self, path: &str, recursive: bool) -> Result<()> {
        let message_type = if recursive {
            MessageType::RequestRemoveRecursive
        } else {
            MessageType::RequestRemoveFile
        };
        self.command(&Self::path_request(message_type, path)).await?;
        Ok(())
    }

    /// Copy a remote file, or a directory tree when `recursive`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the copy is rejected.
    pub async fn copy(&mut self, source: &str, destination: &str, recursive: bool) -> Result<()> {
        let message_type = if recursive {
            MessageType::RequestCopyRecursive
        } else {
            MessageType::RequestCopy
        };
        self.command(&Message::with_pair(message_type, source, destination))
            .await?;
        Ok(())
    }
}
