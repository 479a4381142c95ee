//! Per-connection session state
//!
//! NIST 800-53: AC-3 (Access Enforcement), IA-2 (Identification and Authentication)
//!
//! A session starts unauthenticated. Binding a user fixes the home directory
//! (`<root>/<username>`, canonicalized) for the rest of the connection and
//! puts the working directory at the home root. The working directory is kept
//! relative to the home so it can never name anything outside it.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::sandbox;
use crate::{Error, Result};

const UNKNOWN_USER: &str = "User does not exist";

/// Session state for one connection
#[derive(Debug)]
pub struct Session {
    root_dir: PathBuf,
    user: Option<String>,
    home: Option<PathBuf>,
    current_dir: PathBuf,
}

impl Session {
    /// Create an unauthenticated session over a data root
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            user: None,
            home: None,
            current_dir: PathBuf::new(),
        }
    }

    /// True once a user is bound
    pub const fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Bound username
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Canonical home directory of the bound user
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before login.
    pub fn home_dir(&self) -> Result<&Path> {
        self.home.as_deref().ok_or(Error::NotAuthenticated)
    }

    /// Working directory relative to the home
    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    /// Absolute working directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before login.
    pub fn working_dir(&self) -> Result<PathBuf> {
        Ok(self.home_dir()?.join(&self.current_dir))
    }

    /// Locate the home directory for a username
    ///
    /// The name must be a single plain path component and the directory
    /// must exist under the data root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] ("User does not exist") otherwise.
    pub fn home_for(&self, username: &str) -> Result<PathBuf> {
        // NIST 800-53: SI-10 - A username can never select a path outside the root
        let single_component = matches!(
            Path::new(username).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(name)] if *name == OsStr::new(username)
        );
        if !single_component || username.contains(['\\', '\0']) {
            debug!(username, "Rejected username that is not a plain name");
            return Err(Error::Authentication(UNKNOWN_USER.into()));
        }

        match self.root_dir.join(username).canonicalize() {
            Ok(home) if home.is_dir() => Ok(home),
            _ => Err(Error::Authentication(UNKNOWN_USER.into())),
        }
    }

    /// Bind a user to this session
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyAuthenticated`] if a user is already bound
    /// - [`Error::Authentication`] if the user has no home directory
    pub fn bind_user(&mut self, username: &str) -> Result<()> {
        if self.is_authenticated() {
            return Err(Error::AlreadyAuthenticated);
        }

        let home = self.home_for(username)?;
        self.user = Some(username.to_string());
        self.home = Some(home);
        self.current_dir = PathBuf::new();
        Ok(())
    }

    /// Resolve a client path to an absolute path inside the home
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] before login and otherwise
    /// whatever [`sandbox::resolve`] reports.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        sandbox::resolve(self.home_dir()?, &self.current_dir, raw)
    }

    /// Resolve a client path to the entry it names, not following a final symbolic link
    ///
    /// # Errors
    ///
    /// Same as [`Session::resolve`].
    pub fn resolve_entry(&self, raw: &str) -> Result<PathBuf> {
        sandbox::resolve_entry(self.home_dir()?, &self.current_dir, raw)
    }

    /// Re-check a path built from resolved parts (e.g. a directory plus a file name)
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutsideHome`] if symbolic links lead out of the home.
    pub fn contain(&self, path: &Path) -> Result<PathBuf> {
        let home = self.home_dir()?;
        let canonical = sandbox::canonicalize_existing_prefix(&sandbox::normalize_lexically(path))?;
        if sandbox::is_within(home, &canonical) {
            Ok(canonical)
        } else {
            Err(Error::OutsideHome(path.display().to_string()))
        }
    }

    /// Change the working directory
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDirectory`] if the target is outside the home,
    /// missing, or not a directory. The working directory is then unchanged.
    pub fn try_change_directory(&mut self, raw: &str) -> Result<()> {
        let target = self.resolve(raw).map_err(|e| {
            debug!(path = raw, error = %e, "Change directory rejected");
            Error::InvalidDirectory
        })?;

        if !target.is_dir() {
            return Err(Error::InvalidDirectory);
        }

        let relative = target
            .strip_prefix(self.home_dir()?)
            .map_err(|_| Error::InvalidDirectory)?
            .to_path_buf();
        self.current_dir = relative;
        Ok(())
    }

    /// Working directory as shown to the client (`/` is the home root)
    pub fn display_directory(&self) -> String {
        sandbox::to_virtual(&self.current_dir)
    }
}
