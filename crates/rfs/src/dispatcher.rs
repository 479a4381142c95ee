//! Request Dispatcher
//!
//! NIST 800-53: AC-3 (Access Enforcement), SI-10 (Input Validation), SI-11 (Error Handling)
//!
//! Maps one request frame to one filesystem action and one response frame.
//! Actions return [`Result`]; the error is turned into a `ResponseError`
//! frame in exactly one place, [`Dispatcher::handle`].

use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::config::Config;
use crate::protocol::{Message, MessageType};
use crate::sandbox;
use crate::session::Session;
use crate::{Error, Result};

const BAD_LOGIN: &str = "Bad login attempt";
const DIRECTORY_EXISTS: &str = "Directory already exists";
const FILE_EXISTS: &str = "File already exists";
const INVALID_PARENT: &str = "Parent directory is invalid or does not exist";
const DIRECTORY_NOT_FOUND: &str = "Directory not found";
const INVALID_FILE_NAME: &str = "Invalid destination file name";
const DOWNLOAD_MISSING: &str = "Requested file does not exist";
const FILE_MISSING: &str = "File does not exist";
const DIRECTORY_MISSING: &str = "Directory does not exist";
const REMOVES_WORKING_DIR: &str = "Cannot remove parent directory of working directory";
const SOURCE_MISSING: &str = "File or directory does not exist";
const COPY_TO_SELF: &str = "Cannot copy file to itself";
const DESTINATION_DIR_MISSING: &str = "Destination directory does not exist";
const DESTINATION_NOT_DIR: &str = "Destination is not a directory";
const COPY_INTO_SELF: &str = "Cannot copy directory into itself";

/// Routes request frames to session and filesystem actions
pub struct Dispatcher {
    config: Arc<Config>,
    authenticator: Arc<dyn Authenticator>,
}

impl Dispatcher {
    /// Create a dispatcher over a data root and a password policy
    pub fn new(config: Arc<Config>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            config,
            authenticator,
        }
    }

    /// Fresh unauthenticated session rooted at the configured data root
    pub fn new_session(&self) -> Session {
        Session::new(self.config.root_dir.clone())
    }

    /// Produce the response frame for one request
    ///
    /// Never fails: every error becomes a `ResponseError` frame and the
    /// session keeps its previous state.
    pub async fn handle(&self, session: &mut Session, request: &Message) -> Message {
        match self.dispatch(session, request).await {
            Ok(response) => response,
            Err(e) => Self::error_response(session, request, &e),
        }
    }

    /// Run one request against the session's state
    ///
    /// # Errors
    ///
    /// Returns the authentication, validation or I/O error of the action.
    /// Use [`Dispatcher::error_response`] to turn it into a frame.
    pub async fn dispatch(&self, session: &mut Session, request: &Message) -> Result<Message> {
        if session.is_authenticated() {
            self.execute(session, request).await
        } else {
            self.handshake(session, request).await
        }
    }

    /// Log a failed request and build its `ResponseError` frame
    ///
    /// NIST 800-53: SI-11 (Error Handling)
    pub fn error_response(session: &Session, request: &Message, e: &Error) -> Message {
        if e.is_security_event() {
            warn!(
                event = "request_rejected",
                user = ?session.user(),
                request_type = request.tag(),
                error = %e,
                "Request rejected"
            );
        } else if e.is_client_error() {
            debug!(request_type = request.tag(), error = %e, "Request failed");
        } else {
            // Detail stays in the server log
            error!(
                event = "request_error",
                user = ?session.user(),
                request_type = request.tag(),
                error = %e,
                "Internal error while handling request"
            );
        }
        Message::error(e.wire_message())
    }

    /// Unauthenticated state: only a login is accepted
    async fn handshake(&self, session: &mut Session, request: &Message) -> Result<Message> {
        if !request.is(MessageType::RequestLogin) {
            return Err(Error::NotAuthenticated);
        }
        self.login(session, request).await?;
        Ok(Message::empty(MessageType::ResponseLoginSuccess))
    }

    /// Bind a user if the home exists and the password policy accepts
    ///
    /// NIST 800-53: IA-2 (Identification and Authentication)
    async fn login(&self, session: &mut Session, request: &Message) -> Result<()> {
        if session.is_authenticated() {
            return Err(Error::AlreadyAuthenticated);
        }

        let (username, password) = request
            .split_pair()
            .map_err(|_| Error::Authentication(BAD_LOGIN.into()))?;

        session.home_for(username)?;

        if !self.authenticator.verify(username, password).await {
            return Err(Error::Authentication(BAD_LOGIN.into()));
        }

        session.bind_user(username)?;
        info!(event = "login", user = username, "User logged in");
        Ok(())
    }

    /// Authenticated state: run one command
    async fn execute(&self, session: &mut Session, request: &Message) -> Result<Message> {
        let request_type = request.message_type()?;

        let output: Bytes = match request_type {
            MessageType::RequestLogin => {
                self.login(session, request).await?;
                return Ok(Message::empty(MessageType::ResponseLoginSuccess));
            }
            MessageType::RequestChangeDirectory => {
                session.try_change_directory(request.text()?)?;
                Bytes::new()
            }
            MessageType::RequestPrintDirectory => session.display_directory().into(),
            MessageType::RequestMakeDirectory => {
                make_directory(session, request.text()?).await?;
                Bytes::new()
            }
            MessageType::RequestList => list_directory(session, request.text()?).await?.into(),
            MessageType::RequestUpload => {
                let (path, data) = request.split_first_line()?;
                upload(session, path, data).await?;
                Bytes::new()
            }
            MessageType::RequestDownload => download(session, request.text()?).await?.into(),
            MessageType::RequestRemoveFile => {
                remove_file(session, request.text()?).await?;
                Bytes::new()
            }
            MessageType::RequestRemoveRecursive => {
                remove_recursive(session, request.text()?).await?;
                Bytes::new()
            }
            MessageType::RequestCopy => {
                let (source, destination) = request.split_pair()?;
                copy_file(session, source, destination).await?;
                Bytes::new()
            }
            MessageType::RequestCopyRecursive => {
                let (source, destination) = request.split_pair()?;
                copy_recursive(session, source, destination).await?;
                Bytes::new()
            }
            MessageType::ResponseCommandOutput
            | MessageType::ResponseFile
            | MessageType::ResponseError
            | MessageType::ResponseLoginSuccess => {
                return Err(Error::UnknownRequest(request.tag()));
            }
        };

        Ok(Message::new(MessageType::ResponseCommandOutput, output))
    }
}

/// Metadata of a path, or None if it does not exist
async fn metadata(path: &Path) -> Result<Option<std::fs::Metadata>> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata of a path itself, not following a symbolic link, or None if it does not exist
async fn entry_metadata(path: &Path) -> Result<Option<std::fs::Metadata>> {
    match fs::symlink_metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn is_dir(path: &Path) -> Result<bool> {
    Ok(metadata(path).await?.is_some_and(|m| m.is_dir()))
}

async fn is_file(path: &Path) -> Result<bool> {
    Ok(metadata(path).await?.is_some_and(|m| m.is_file()))
}

/// True if the parent of `target` is an existing directory inside the home
async fn parent_is_usable(session: &Session, target: &Path) -> Result<bool> {
    let home = session.home_dir()?;
    match target.parent() {
        Some(parent) if target != home && sandbox::is_within(home, parent) => is_dir(parent).await,
        _ => Ok(false),
    }
}

async fn make_directory(session: &Session, raw: &str) -> Result<()> {
    let target = session.resolve(raw)?;
    if target == session.home_dir()? {
        return Err(Error::AlreadyExists(DIRECTORY_EXISTS.into()));
    }
    if !parent_is_usable(session, &target).await? {
        return Err(Error::invalid_destination(INVALID_PARENT));
    }

    match metadata(&target).await? {
        Some(existing) if existing.is_dir() => Err(Error::AlreadyExists(DIRECTORY_EXISTS.into())),
        Some(_) => Err(Error::AlreadyExists(FILE_EXISTS.into())),
        None => {
            fs::create_dir(&target).await?;
            debug!(path = %target.display(), "Directory created");
            Ok(())
        }
    }
}

/// One line of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// Entry name
    pub name: String,
    /// True for directories (not following symbolic links)
    pub is_dir: bool,
}

/// Render entries sorted by name; directories get a trailing `/`,
/// names containing whitespace are single-quoted
pub fn format_listing(mut entries: Vec<ListingEntry>) -> String {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
        .into_iter()
        .map(|entry| {
            let mut line = if entry.name.chars().any(char::is_whitespace) {
                format!("'{}'", entry.name)
            } else {
                entry.name
            };
            if entry.is_dir {
                line.push('/');
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn list_directory(session: &Session, raw: &str) -> Result<String> {
    let target = session.resolve(raw)?;
    if !is_dir(&target).await? {
        return Err(Error::not_found(DIRECTORY_NOT_FOUND));
    }

    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(&target).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type().await?.is_dir(),
        });
    }
    Ok(format_listing(entries))
}

async fn upload(session: &Session, raw: &str, data: &[u8]) -> Result<()> {
    let target = session.resolve(raw)?;
    if target == session.home_dir()? {
        return Err(Error::invalid_destination(INVALID_FILE_NAME));
    }
    if !parent_is_usable(session, &target).await? {
        return Err(Error::invalid_destination(INVALID_PARENT));
    }
    if is_dir(&target).await? {
        return Err(Error::invalid_destination(INVALID_FILE_NAME));
    }

    fs::write(&target, data).await.map_err(|e| {
        debug!(path = %target.display(), error = %e, "Upload write failed");
        Error::invalid_destination(INVALID_FILE_NAME)
    })?;
    debug!(path = %target.display(), bytes = data.len(), "File uploaded");
    Ok(())
}

async fn download(session: &Session, raw: &str) -> Result<Vec<u8>> {
    let target = session.resolve(raw)?;
    if !is_file(&target).await? {
        return Err(Error::not_found(DOWNLOAD_MISSING));
    }
    Ok(fs::read(&target).await?)
}

/// Remove a regular file or a symbolic link; a link is removed, never its target
async fn remove_file(session: &Session, raw: &str) -> Result<()> {
    let target = session.resolve_entry(raw)?;
    let removable = entry_metadata(&target)
        .await?
        .is_some_and(|m| m.is_file() || m.file_type().is_symlink());
    if !removable {
        return Err(Error::not_found(FILE_MISSING));
    }
    fs::remove_file(&target).await?;
    Ok(())
}

/// Remove a directory tree, or only the link when the path is a symbolic link
async fn remove_recursive(session: &Session, raw: &str) -> Result<()> {
    let target = session.resolve_entry(raw)?;
    let Some(entry) = entry_metadata(&target).await? else {
        return Err(Error::not_found(DIRECTORY_MISSING));
    };

    if entry.file_type().is_symlink() {
        fs::remove_file(&target).await?;
        debug!(path = %target.display(), "Symbolic link removed");
        return Ok(());
    }
    if !entry.is_dir() {
        return Err(Error::not_found(DIRECTORY_MISSING));
    }
    // Covers the home itself, the working directory and every ancestor of it
    if session.working_dir()?.starts_with(&target) {
        return Err(Error::self_reference(REMOVES_WORKING_DIR));
    }
    fs::remove_dir_all(&target).await?;
    Ok(())
}

async fn copy_file(session: &Session, source: &str, destination: &str) -> Result<()> {
    let source = session.resolve(source)?;
    let destination = session.resolve(destination)?;
    if !is_file(&source).await? {
        return Err(Error::not_found(SOURCE_MISSING));
    }

    let destination = if is_dir(&destination).await? {
        let name = source
            .file_name()
            .ok_or_else(|| Error::not_found(SOURCE_MISSING))?;
        session.contain(&destination.join(name))?
    } else {
        if !parent_is_usable(session, &destination).await? {
            return Err(Error::invalid_destination(DESTINATION_DIR_MISSING));
        }
        destination
    };

    if destination == source {
        return Err(Error::self_reference(COPY_TO_SELF));
    }
    if is_dir(&destination).await? {
        return Err(Error::invalid_destination(DESTINATION_NOT_DIR));
    }

    let bytes = fs::copy(&source, &destination).await?;
    debug!(
        source = %source.display(),
        destination = %destination.display(),
        bytes,
        "File copied"
    );
    Ok(())
}

async fn copy_recursive(session: &Session, source: &str, destination: &str) -> Result<()> {
    let source = session.resolve(source)?;
    let destination = session.resolve(destination)?;
    if !is_dir(&source).await? {
        return Err(Error::not_found(SOURCE_MISSING));
    }
    if destination.starts_with(&source) {
        return Err(Error::self_reference(COPY_INTO_SELF));
    }
    if metadata(&destination).await?.is_some_and(|m| !m.is_dir()) {
        return Err(Error::invalid_destination(DESTINATION_NOT_DIR));
    }

    let files = copy_tree(&source, &destination).await?;
    debug!(
        source = %source.display(),
        destination = %destination.display(),
        files,
        "Directory copied"
    );
    Ok(())
}

/// Copy the contents of `source` into `destination`, creating directories as needed
///
/// Symbolic links and special files inside the source are skipped. Entries
/// of an existing destination that are symbolic links are never written
/// through. Returns the number of regular files copied.
async fn copy_tree(source: &Path, destination: &Path) -> Result<u64> {
    let mut pending: Vec<(PathBuf, PathBuf)> =
        vec![(source.to_path_buf(), destination.to_path_buf())];
    let mut files = 0;

    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let target = to.join(entry.file_name());

            // NIST 800-53: AC-3 - A link in the destination could lead out of the home
            if entry_metadata(&target)
                .await?
                .is_some_and(|m| m.file_type().is_symlink())
            {
                warn!(
                    event = "symlink_in_destination",
                    path = %target.display(),
                    "Not copying through symbolic link in destination"
                );
                continue;
            }

            if file_type.is_dir() {
                pending.push((entry.path(), target));
            } else if file_type.is_file() {
                fs::copy(entry.path(), &target).await?;
                files += 1;
            } else {
                debug!(path = %entry.path().display(), "Skipping non-regular entry");
            }
        }
    }

    Ok(files)
}
