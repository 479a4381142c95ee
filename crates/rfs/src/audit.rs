//! Audit trail and session tracking
//!
//! NIST 800-53: AU-2 (Audit Events), AU-3 (Content of Audit Records), AU-12 (Audit Generation)
//! STIG: V-222648 (Audit Records)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{info, warn};
use uuid::Uuid;

/// Audit event types
///
/// NIST 800-53: AU-2 (Audit Events)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AuditEvent {
    /// Connection accepted
    ConnectionEstablished {
        /// Session identifier
        session_id: Uuid,
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
    /// Connection ended
    ConnectionClosed {
        /// Session identifier
        session_id: Uuid,
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Bound username
        username: Option<String>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Session duration in seconds
        duration_secs: i64,
        /// Requests served on this connection
        requests: u64,
    },
    /// Login attempt
    AuthAttempt {
        /// Session identifier
        session_id: Uuid,
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Username attempted
        username: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether the login succeeded
        success: bool,
        /// Failure reason if applicable
        reason: Option<String>,
    },
    /// File command (upload, download, remove, copy)
    FileOperation {
        /// Session identifier
        session_id: Uuid,
        /// Bound username
        username: Option<String>,
        /// Operation name
        operation: String,
        /// Path as sent by the client
        path: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether the command succeeded
        success: bool,
        /// Bytes transferred if applicable
        bytes_transferred: Option<u64>,
        /// Error text if failed
        error: Option<String>,
    },
    /// Directory command (cd, pwd, mkdir, ls, recursive remove and copy)
    DirectoryOperation {
        /// Session identifier
        session_id: Uuid,
        /// Bound username
        username: Option<String>,
        /// Operation name
        operation: String,
        /// Path as sent by the client
        path: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
        /// Whether the command succeeded
        success: bool,
        /// Error text if failed
        error: Option<String>,
    },
    /// Security event (sandbox violation, request before login)
    SecurityEvent {
        /// Session identifier
        session_id: Uuid,
        /// Client IP address
        client_ip: Option<IpAddr>,
        /// Bound username
        username: Option<String>,
        /// Security event type
        event: String,
        /// Event details
        details: String,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    /// Log the audit event
    ///
    /// NIST 800-53: AU-12 (Audit Generation)
    pub fn log(&self) {
        match self {
            Self::ConnectionEstablished {
                session_id,
                client_ip,
                ..
            } => {
                info!(
                    event = "connection_established",
                    %session_id,
                    client_ip = ?client_ip,
                    audit = ?self,
                    "New connection established"
                );
            }
            Self::ConnectionClosed {
                session_id,
                username,
                duration_secs,
                requests,
                ..
            } => {
                info!(
                    event = "connection_closed",
                    %session_id,
                    username = ?username,
                    duration_secs,
                    requests,
                    audit = ?self,
                    "Connection closed"
                );
            }
            Self::AuthAttempt {
                session_id,
                username,
                success,
                reason,
                ..
            } => {
                if *success {
                    info!(
                        event = "auth_success",
                        %session_id,
                        username,
                        audit = ?self,
                        "Authentication successful"
                    );
                } else {
                    warn!(
                        event = "auth_failure",
                        %session_id,
                        username,
                        reason = ?reason,
                        audit = ?self,
                        "Authentication failed"
                    );
                }
            }
            Self::FileOperation {
                session_id,
                username,
                operation,
                path,
                success,
                bytes_transferred,
                error,
                ..
            } => {
                if *success {
                    info!(
                        event = "file_operation",
                        %session_id,
                        username = ?username,
                        operation,
                        path,
                        bytes = ?bytes_transferred,
                        audit = ?self,
                        "File operation completed"
                    );
                } else {
                    warn!(
                        event = "file_operation_failed",
                        %session_id,
                        username = ?username,
                        operation,
                        path,
                        error = ?error,
                        audit = ?self,
                        "File operation failed"
                    );
                }
            }
            Self::DirectoryOperation {
                session_id,
                username,
                operation,
                path,
                success,
                error,
                ..
            } => {
                if *success {
                    info!(
                        event = "directory_operation",
                        %session_id,
                        username = ?username,
                        operation,
                        path,
                        audit = ?self,
                        "Directory operation completed"
                    );
                } else {
                    warn!(
                        event = "directory_operation_failed",
                        %session_id,
                        username = ?username,
                        operation,
                        path,
                        error = ?error,
                        audit = ?self,
                        "Directory operation failed"
                    );
                }
            }
            Self::SecurityEvent {
                session_id,
                username,
                event,
                details,
                ..
            } => {
                warn!(
                    event = "security_event",
                    %session_id,
                    username = ?username,
                    security_event = event,
                    details,
                    audit = ?self,
                    "Security event detected"
                );
            }
        }
    }

    /// Export as JSON
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the event cannot be encoded.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Per-connection audit context
///
/// NIST 800-53: AU-3 (Content of Audit Records)
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Unique session identifier
    pub session_id: Uuid,
    /// Client IP address
    pub client_ip: Option<IpAddr>,
    /// Bound username
    pub username: Option<String>,
    /// Session start time
    pub start_time: DateTime<Utc>,
    /// Time of last request
    pub last_activity: DateTime<Utc>,
    /// Requests served
    pub requests: u64,
}

impl SessionInfo {
    /// Create session info with a fresh identifier
    pub fn new(client_ip: Option<IpAddr>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            client_ip,
            username: None,
            start_time: now,
            last_activity: now,
            requests: 0,
        }
    }

    /// Record that a request was served
    pub fn record_request(&mut self) {
        self.last_activity = Utc::now();
        self.requests += 1;
    }

    /// Set username after login
    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    /// Session duration in seconds
    pub fn duration_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.start_time)
            .num_seconds()
    }
}

/// Emits audit events when auditing is enabled
///
/// NIST 800-53: AU-2 (Audit Events), AU-12 (Audit Generation)
#[derive(Debug, Clone, Copy)]
pub struct AuditLogger {
    enabled: bool,
}

impl AuditLogger {
    /// Create a logger; a disabled logger drops every event
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether events are emitted
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Log an event if enabled
    pub fn record(&self, event: &AuditEvent) {
        if self.enabled {
            event.log();
        }
    }

    /// Log a new connection
    pub fn connection_established(&self, session: &SessionInfo) {
        self.record(&AuditEvent::ConnectionEstablished {
            session_id: session.session_id,
            client_ip: session.client_ip,
            timestamp: Utc::now(),
        });
    }

    /// Log the end of a connection
    pub fn connection_closed(&self, session: &SessionInfo) {
        self.record(&AuditEvent::ConnectionClosed {
            session_id: session.session_id,
            client_ip: session.client_ip,
            username: session.username.clone(),
            timestamp: Utc::now(),
            duration_secs: session.duration_secs(),
            requests: session.requests,
        });
    }

    /// Log a login attempt
    pub fn auth_attempt(
        &self,
        session: &SessionInfo,
        username: &str,
        success: bool,
        reason: Option<String>,
    ) {
        self.record(&AuditEvent::AuthAttempt {
            session_id: session.session_id,
            client_ip: session.client_ip,
            username: username.to_string(),
            timestamp: Utc::now(),
            success,
            reason,
        });
    }

    /// Log a file command
    pub fn file_operation(
        &self,
        session: &SessionInfo,
        operation: &str,
        path: &str,
        bytes: Option<u64>,
        error: Option<String>,
    ) {
        self.record(&AuditEvent::FileOperation {
            session_id: session.session_id,
            username: session.username.clone(),
            operation: operation.to_string(),
            path: path.to_string(),
            timestamp: Utc::now(),
            success: error.is_none(),
            bytes_transferred: bytes,
            error,
        });
    }

    /// Log a directory command
    pub fn directory_operation(
        &self,
        session: &SessionInfo,
        operation: &str,
        path: &str,
        error: Option<String>,
    ) {
        self.record(&AuditEvent::DirectoryOperation {
            session_id: session.session_id,
            username: session.username.clone(),
            operation: operation.to_string(),
            path: path.to_string(),
            timestamp: Utc::now(),
            success: error.is_none(),
            error,
        });
    }

    /// Log a security event
    pub fn security_event(&self, session: &SessionInfo, event: &str, details: impl Into<String>) {
        self.record(&AuditEvent::SecurityEvent {
            session_id: session.session_id,
            client_ip: session.client_ip,
            username: session.username.clone(),
            event: event.to_string(),
            details: details.into(),
            timestamp: Utc::now(),
        });
    }
}
