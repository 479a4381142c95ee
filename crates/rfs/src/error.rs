//! Error types for RFS operations
//!
//! NIST 800-53: SI-11 (Error Handling), AU-3 (Content of Audit Records)
//! STIG: V-222566 - The application must generate error messages that provide information
//! necessary for corrective actions without revealing information that could be exploited
//!
//! Every variant carries the human-readable detail that is sent to the peer
//! (validation and authentication failures) or logged (frame-level failures).
//! Frame-level failures end the connection; everything else is answered with
//! a `ResponseError` frame built from [`Error::wire_message`].

use thiserror::Error;

/// Result type alias for RFS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Text sent for failures that must not leak internal detail
pub const GENERIC_FAILURE: &str = "Error in handling request";

/// RFS error types
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    ///
    /// At the frame layer this terminates the connection; inside a command it
    /// is reported to the peer as a generic failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame or frame that cannot be encoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Peer closed the stream before a complete frame was read
    #[error("Connection lost")]
    ConnectionLost,

    /// Login rejected (unknown user, bad credentials, malformed request)
    ///
    /// NIST 800-53: IA-2 (Identification and Authentication)
    #[error("{0}")]
    Authentication(String),

    /// Session already has a bound user
    #[error("Client already assigned a user")]
    AlreadyAuthenticated,

    /// Request other than login received before authentication
    ///
    /// NIST 800-53: AC-3 (Access Enforcement)
    #[error("Not logged in")]
    NotAuthenticated,

    /// Resolved path escapes the session's home directory
    ///
    /// NIST 800-53: AC-3 (Access Enforcement), SI-10 (Input Validation)
    /// STIG: V-222396, V-222596
    #[error("Path is outside the home directory")]
    OutsideHome(String),

    /// Path contains characters that can never name a file
    ///
    /// NIST 800-53: SI-10 (Input Validation)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Change-directory target is missing, not a directory, or outside home
    #[error("Invalid directory")]
    InvalidDirectory,

    /// File or directory does not exist
    #[error("{0}")]
    NotFound(String),

    /// Target already exists
    #[error("{0}")]
    AlreadyExists(String),

    /// Destination or its parent directory is unusable
    #[error("{0}")]
    InvalidDestination(String),

    /// Operation would act on itself (self-copy, removing the working directory)
    #[error("{0}")]
    SelfReference(String),

    /// Request payload does not follow the expected layout
    #[error("Malformed request: {0}")]
    BadRequest(String),

    /// Request type the dispatcher does not handle
    #[error("Unknown request type: {0}")]
    UnknownRequest(u8),

    /// Error frame received from the server (client side)
    #[error("{0}")]
    Remote(String),

    /// Local file problem detected by the client; never sent over the wire
    #[error("{0}")]
    LocalFile(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Text placed in the `ResponseError` frame for this error
    ///
    /// NIST 800-53: SI-11 (Error Handling)
    /// STIG: V-222566
    /// Implementation: Internal failures are reported generically; their detail
    /// only reaches the server log.
    pub fn wire_message(&self) -> String {
        match self {
            Self::Io(_)
            | Self::Protocol(_)
            | Self::ConnectionLost
            | Self::Config(_)
            | Self::UnknownRequest(_) => GENERIC_FAILURE.to_string(),
            _ => self.to_string(),
        }
    }

    /// Check if the error ends the connection instead of producing a response
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::ConnectionLost)
    }

    /// Check if error is due to client input
    ///
    /// # NIST 800-53: SI-10 (Input Validation), SI-11
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::OutsideHome(_)
                | Self::InvalidPath(_)
                | Self::InvalidDirectory
                | Self::NotFound(_)
                | Self::AlreadyExists(_)
                | Self::InvalidDestination(_)
                | Self::SelfReference(_)
                | Self::BadRequest(_)
                | Self::UnknownRequest(_)
                | Self::NotAuthenticated
        )
    }

    /// Check if error has security implications and should be audited
    ///
    /// # NIST 800-53: AU-2 (Audit Events), SI-11
    pub const fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::OutsideHome(_)
                | Self::InvalidPath(_)
                | Self::Authentication(_)
                | Self::AlreadyAuthenticated
                | Self::NotAuthenticated
        )
    }

    /// Create not-found error with context
    pub fn not_found(context: impl Into<String>) -> Self {
        Self::NotFound(context.into())
    }

    /// Create invalid-destination error with context
    pub fn invalid_destination(context: impl Into<String>) -> Self {
        Self::InvalidDestination(context.into())
    }

    /// Create self-reference error with context
    pub fn self_reference(context: impl Into<String>) -> Self {
        Self::SelfReference(context.into())
    }
}
