//! Path Resolution and Home-Directory Sandbox
//!
//! NIST 800-53: AC-3 (Access Enforcement), AC-6 (Least Privilege), SI-10 (Input Validation)
//! STIG: V-222396, V-222596, V-222603 (directory traversal), V-222612 (path canonicalization)
//!
//! A client path is resolved in two passes. The lexical pass removes `.` and
//! `..` without touching the disk, and a path that leaves the home directory
//! at that point is rejected before any filesystem call. The second pass
//! resolves symbolic links along the longest existing prefix, and the
//! containment check is repeated on the result.

use crate::{Error, Result};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Symlink hops followed before giving up (matches the usual ELOOP limit)
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `.` and `..` components without touching the filesystem
///
/// `..` at the root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(name) => normalized.push(name),
        }
    }
    normalized
}

/// Check that `path` equals `home` or lies beneath it
///
/// Comparison is per component, so `/data/al` does not contain `/data/alice`.
pub fn is_within(home: &Path, path: &Path) -> bool {
    path.starts_with(home)
}

/// Canonicalize the longest existing prefix of an absolute, normalized path
///
/// Components that do not exist yet are re-appended unchanged. Dangling
/// symbolic links are followed to their target so a later create or write
/// cannot be redirected through them.
///
/// # Errors
///
/// Returns an I/O error other than not-found from the filesystem, or
/// `ErrorKind::InvalidInput` when too many symbolic links are chained.
pub fn canonicalize_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();
    let mut hops = 0;

    loop {
        match std::fs::canonicalize(&existing) {
            Ok(mut canonical) => {
                for name in missing.iter().rev() {
                    canonical.push(name);
                }
                return Ok(canonical);
            }
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                if let Some(target) = dangling_link_target(&existing)? {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(std::io::Error::new(
                            ErrorKind::InvalidInput,
                            "too many levels of symbolic links",
                        ));
                    }
                    existing = target;
                    continue;
                }

                let Some(name) = existing.file_name().map(ToOwned::to_owned) else {
                    return Err(e);
                };
                missing.push(name);
                if !existing.pop() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Absolute, normalized target of `path` if it is a symbolic link
fn dangling_link_target(path: &Path) -> std::io::Result<Option<PathBuf>> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            let target = std::fs::read_link(path)?;
            let absolute = match path.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target,
            };
            Ok(Some(normalize_lexically(&absolute)))
        }
        Ok(_) => Ok(None),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Resolve a client path against a canonical home and a home-relative working directory
///
/// A leading `/` makes the path home-rooted; otherwise it is relative to
/// `current_dir`. An empty path names the working directory itself.
///
/// # Errors
///
/// - [`Error::InvalidPath`] if the path contains a NUL byte
/// - [`Error::OutsideHome`] if the result is not `home` or a descendant
/// - [`Error::Io`] if symbolic-link resolution fails
pub fn resolve(home: &Path, current_dir: &Path, raw: &str) -> Result<PathBuf> {
    let lexical = lexical_path(home, current_dir, raw)?;
    canonical_within(home, &lexical, raw)
}

/// Resolve a client path without following a symbolic link in its last component
///
/// Only the parent directory is canonicalized; the final name is appended
/// as given, so a link resolves to the link itself. Used where the entry,
/// not its target, is acted on.
///
/// # Errors
///
/// Same as [`resolve`].
pub fn resolve_entry(home: &Path, current_dir: &Path, raw: &str) -> Result<PathBuf> {
    let lexical = lexical_path(home, current_dir, raw)?;
    if lexical == home {
        return Ok(home.to_path_buf());
    }

    match (lexical.parent(), lexical.file_name()) {
        (Some(parent), Some(name)) => Ok(canonical_within(home, parent, raw)?.join(name)),
        _ => Ok(home.to_path_buf()),
    }
}

/// Join and normalize a client path, rejecting NUL bytes and lexical escapes
fn lexical_path(home: &Path, current_dir: &Path, raw: &str) -> Result<PathBuf> {
    if raw.contains('\0') {
        warn!(event = "invalid_path", "Path contains NUL byte");
        return Err(Error::InvalidPath("Path contains invalid characters".into()));
    }

    let joined = match raw.strip_prefix('/') {
        Some(rooted) => home.join(rooted.trim_start_matches('/')),
        None => home.join(current_dir).join(raw),
    };

    // NIST 800-53: AC-3 - Reject traversal before any filesystem access
    let lexical = normalize_lexically(&joined);
    if !is_within(home, &lexical) {
        warn!(event = "path_traversal", path = raw, "Path traversal attempt detected");
        return Err(Error::OutsideHome(raw.to_string()));
    }
    Ok(lexical)
}

/// Canonicalize `lexical` and repeat the containment check on the result
fn canonical_within(home: &Path, lexical: &Path, raw: &str) -> Result<PathBuf> {
    let canonical = canonicalize_existing_prefix(lexical)?;
    if !is_within(home, &canonical) {
        warn!(
            event = "symlink_escape",
            path = raw,
            "Symbolic link leads outside the home directory"
        );
        return Err(Error::OutsideHome(raw.to_string()));
    }
    Ok(canonical)
}

/// Render a home-relative path the way clients see it: `/` + forward-slash components
pub fn to_virtual(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn canonical_home() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let home = temp.path().canonicalize().unwrap();
        (temp, home)
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/data/alice/./a/../b/")),
            PathBuf::from("/data/alice/b")
        );
        assert_eq!(
            normalize_lexically(Path::new("/data/../../../etc")),
            PathBuf::from("/etc")
        );
        assert_eq!(normalize_lexically(Path::new("/a//b///c")), PathBuf::from("/a/b/c"));
    }

    #[test]
    fn test_is_within_is_component_wise() {
        let home = Path::new("/data/alice");
        assert!(is_within(home, Path::new("/data/alice")));
        assert!(is_within(home, Path::new("/data/alice/docs")));
        assert!(!is_within(home, Path::new("/data/alice2")));
        assert!(!is_within(home, Path::new("/data")));
    }

    #[test]
    fn test_traversal_rejected_without_filesystem_access() {
        // The home does not exist: any filesystem call would surface as Io.
        let home = Path::new("/nonexistent-rfs-home/alice");
        let result = resolve(home, Path::new(""), "../../etc/passwd");
        assert!(matches!(result, Err(Error::OutsideHome(_))));

        let result = resolve(home, Path::new("docs"), "/../bob");
        assert!(matches!(result, Err(Error::OutsideHome(_))));
    }

    #[test]
    fn test_nul_byte_rejected() {
        let home = Path::new("/nonexistent-rfs-home/alice");
        assert!(matches!(
            resolve(home, Path::new(""), "a\0b"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_resolve_relative_and_rooted() {
        let (_temp, home) = canonical_home();
        std::fs::create_dir_all(home.join("docs/reports")).unwrap();

        assert_eq!(
            resolve(&home, Path::new("docs"), "reports").unwrap(),
            home.join("docs/reports")
        );
        assert_eq!(
            resolve(&home, Path::new("docs/reports"), "/docs").unwrap(),
            home.join("docs")
        );
        assert_eq!(resolve(&home, Path::new("docs"), "..").unwrap(), home);
        assert_eq!(resolve(&home, Path::new("docs"), "/").unwrap(), home);
        assert_eq!(resolve(&home, Path::new("docs"), "").unwrap(), home.join("docs"));
        assert_eq!(
            resolve(&home, Path::new(""), "docs/reports/").unwrap(),
            home.join("docs/reports")
        );
    }

    #[test]
    fn test_resolve_missing_tail_is_kept() {
        let (_temp, home) = canonical_home();
        std::fs::create_dir(home.join("docs")).unwrap();

        assert_eq!(
            resolve(&home, Path::new(""), "docs/new/deeper.txt").unwrap(),
            home.join("docs/new/deeper.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (_temp, home) = canonical_home();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), home.join("escape")).unwrap();

        assert!(matches!(
            resolve(&home, Path::new(""), "escape/secret.txt"),
            Err(Error::OutsideHome(_))
        ));
        assert!(matches!(
            resolve(&home, Path::new(""), "escape/not-yet-created"),
            Err(Error::OutsideHome(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_escape_rejected() {
        let (_temp, home) = canonical_home();
        let outside = TempDir::new().unwrap();
        let target = outside.path().canonicalize().unwrap().join("created-later.txt");
        std::os::unix::fs::symlink(&target, home.join("trap.txt")).unwrap();

        assert!(matches!(
            resolve(&home, Path::new(""), "trap.txt"),
            Err(Error::OutsideHome(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_home_is_followed() {
        let (_temp, home) = canonical_home();
        std::fs::create_dir(home.join("real")).unwrap();
        std::os::unix::fs::symlink(home.join("real"), home.join("alias")).unwrap();

        assert_eq!(
            resolve(&home, Path::new(""), "alias").unwrap(),
            home.join("real")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_entry_keeps_final_symlink() {
        let (_temp, home) = canonical_home();
        let outside = TempDir::new().unwrap();
        std::fs::create_dir(home.join("real")).unwrap();
        std::os::unix::fs::symlink(home.join("real"), home.join("alias")).unwrap();
        std::os::unix::fs::symlink(outside.path(), home.join("escape")).unwrap();

        assert_eq!(
            resolve_entry(&home, Path::new(""), "alias").unwrap(),
            home.join("alias")
        );
        assert_eq!(
            resolve_entry(&home, Path::new("real"), "../escape").unwrap(),
            home.join("escape")
        );
        assert_eq!(resolve_entry(&home, Path::new("real"), "..").unwrap(), home);

        // Links before the final component are still followed and checked
        assert_eq!(
            resolve_entry(&home, Path::new(""), "alias/file.txt").unwrap(),
            home.join("real/file.txt")
        );
        assert!(matches!(
            resolve_entry(&home, Path::new(""), "escape/file.txt"),
            Err(Error::OutsideHome(_))
        ));
        assert!(matches!(
            resolve_entry(&home, Path::new(""), "../bob"),
            Err(Error::OutsideHome(_))
        ));
    }

    #[test]
    fn test_to_virtual() {
        assert_eq!(to_virtual(Path::new("")), "/");
        assert_eq!(to_virtual(Path::new("foo")), "/foo");
        assert_eq!(to_virtual(Path::new("foo/bar baz")), "/foo/bar baz");
    }
}
