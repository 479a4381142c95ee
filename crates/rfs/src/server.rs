//! RFS Server Implementation
//!
//! NIST 800-53: AC-3 (Access Enforcement), AU-12 (Audit Generation), SC-7 (Boundary Protection)
//!
//! One tokio task per accepted TCP connection. Each task owns its
//! [`Session`] and runs a strict request/response loop: read one frame,
//! dispatch it, write one response. A frame-level failure ends the
//! connection; a failed command only produces an error frame.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLogger, SessionInfo};
use crate::auth::{self, Authenticator};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::protocol::{Message, MessageStream, MessageType};
use crate::session::Session;
use crate::{Error, Result};

/// RFS server
pub struct Server {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    audit: AuditLogger,
}

impl Server {
    /// Create a server with the password policy selected by the configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn new(config: Config) -> Result<Self> {
        let authenticator = auth::from_config(&config);
        Self::with_authenticator(config, authenticator)
    }

    /// Create a server with an explicit password policy
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn with_authenticator(config: Config, authenticator: Arc<dyn Authenticator>) -> Result<Self> {
        config.validate()?;
        let audit = AuditLogger::new(config.logging.audit_enabled);
        let config = Arc::new(config);
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&config), authenticator));
        Ok(Self {
            config,
            dispatcher,
            audit,
        })
    }

    /// Bind the configured address and serve until the listener fails
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    ///
    /// # Errors
    ///
    /// Never returns under normal operation; accept errors are logged and
    /// the loop continues.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            event = "server_started",
            address = %local_addr,
            root = %self.config.root_dir.display(),
            "RFS server listening"
        );

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(event = "accept_failed", error = %e, "Failed to accept connection");
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Could not disable Nagle's algorithm");
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let audit = self.audit;
            tokio::spawn(async move {
                let mut connection = Connection::new(stream, Some(peer), dispatcher, audit);
                if let Err(e) = connection.run().await {
                    warn!(peer = %peer, error = %e, "Connection terminated");
                }
            });
        }
    }
}

/// Request/response loop for one client
pub struct Connection<S> {
    stream: MessageStream<S>,
    session: Session,
    info: SessionInfo,
    dispatcher: Arc<Dispatcher>,
    audit: AuditLogger,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a transport stream in a fresh unauthenticated session
    pub fn new(
        stream: S,
        peer: Option<SocketAddr>,
        dispatcher: Arc<Dispatcher>,
        audit: AuditLogger,
    ) -> Self {
        let client_ip: Option<IpAddr> = peer.map(|addr| addr.ip());
        Self {
            stream: MessageStream::new(stream),
            session: dispatcher.new_session(),
            info: SessionInfo::new(client_ip),
            dispatcher,
            audit,
        }
    }

    /// Serve requests until the peer disconnects or a frame error occurs
    ///
    /// # Errors
    ///
    /// Returns the frame-level error that ended the connection. A clean
    /// disconnect between frames is `Ok`.
    pub async fn run(&mut self) -> Result<()> {
        self.audit.connection_established(&self.info);
        let result = self.serve_requests().await;
        self.audit.connection_closed(&self.info);
        result
    }

    async fn serve_requests(&mut self) -> Result<()> {
        loop {
            let request = match self.stream.read_message().await {
                Ok(request) => request,
                Err(Error::ConnectionLost) if !self.stream.has_partial_frame() => {
                    info!(session_id = %self.info.session_id, "Client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            debug!(
                session_id = %self.info.session_id,
                request_type = request.tag(),
                bytes = request.len(),
                "Request received"
            );

            let response = match self.dispatcher.dispatch(&mut self.session, &request).await {
                Ok(response) => {
                    self.audit_request(&request, &response, None);
                    response
                }
                Err(e) => {
                    let response = Dispatcher::error_response(&self.session, &request, &e);
                    self.audit_request(&request, &response, Some(&e));
                    response
                }
            };
            self.info.record_request();

            self.stream.write_message(&response).await?;
        }
    }

    /// Record the audit trail for one served request
    ///
    /// NIST 800-53: AU-2 (Audit Events), AU-3 (Content of Audit Records)
    fn audit_request(&mut self, request: &Message, response: &Message, failure: Option<&Error>) {
        let error_text = failure.map(|_| response.text_lossy());

        // Login failures are covered by the AuthAttempt record below
        if let Some(e) =
            failure.filter(|e| e.is_security_event() && !matches!(e, Error::Authentication(_)))
        {
            self.audit
                .security_event(&self.info, security_event_name(e), e.wire_message());
        }

        let Ok(request_type) = request.message_type() else {
            return;
        };

        match request_type {
            MessageType::RequestLogin => {
                let username = request
                    .split_pair()
                    .map_or_else(|_| String::new(), |(user, _)| user.to_string());
                let success = response.is(MessageType::ResponseLoginSuccess);
                if success {
                    self.info.set_username(username.clone());
                }
                self.audit.auth_attempt(&self.info, &username, success, error_text);
            }
            MessageType::RequestUpload => {
                let (path, data_len) = request
                    .split_first_line()
                    .map_or_else(|_| (String::new(), 0), |(path, data)| (path.to_string(), data.len()));
                self.audit
                    .file_operation(&self.info, "upload", &path, Some(data_len as u64), error_text);
            }
            MessageType::RequestDownload => {
                let bytes = failure.is_none().then(|| response.len() as u64);
                self.audit
                    .file_operation(&self.info, "download", &request.text_lossy(), bytes, error_text);
            }
            MessageType::RequestRemoveFile => {
                self.audit
                    .file_operation(&self.info, "remove", &request.text_lossy(), None, error_text);
            }
            MessageType::RequestCopy => {
                self.audit
                    .file_operation(&self.info, "copy", &pair_summary(request), None, error_text);
            }
            MessageType::RequestCopyRecursive => {
                self.audit.directory_operation(
                    &self.info,
                    "copy_recursive",
                    &pair_summary(request),
                    error_text,
                );
            }
            MessageType::RequestChangeDirectory => {
                self.audit.directory_operation(
                    &self.info,
                    "change_directory",
                    &request.text_lossy(),
                    error_text,
                );
            }
            MessageType::RequestPrintDirectory => {
                self.audit
                    .directory_operation(&self.info, "print_directory", "", error_text);
            }
            MessageType::RequestMakeDirectory => {
                self.audit.directory_operation(
                    &self.info,
                    "make_directory",
                    &request.text_lossy(),
                    error_text,
                );
            }
            MessageType::RequestList => {
                self.audit
                    .directory_operation(&self.info, "list", &request.text_lossy(), error_text);
            }
            MessageType::RequestRemoveRecursive => {
                self.audit.directory_operation(
                    &self.info,
                    "remove_recursive",
                    &request.text_lossy(),
                    error_text,
                );
            }
            MessageType::ResponseCommandOutput
            | MessageType::ResponseFile
            | MessageType::ResponseError
            | MessageType::ResponseLoginSuccess => {}
        }
    }
}

fn security_event_name(e: &Error) -> &'static str {
    match e {
        Error::OutsideHome(_) => "sandbox_violation",
        Error::InvalidPath(_) => "invalid_path",
        Error::NotAuthenticated => "request_before_login",
        Error::AlreadyAuthenticated => "repeated_login",
        _ => "security",
    }
}

/// `source -> destination` for a two-field request, for audit records
fn pair_summary(request: &Message) -> String {
    request.split_pair().map_or_else(
        |_| request.text_lossy(),
        |(source, destination)| format!("{source} -> {destination}"),
    )
}
