//! Interactive command surface of the client
//!
//! A line is split into words (double quotes group words containing spaces),
//! parsed with clap, and executed against a [`Client`].

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::client::Client;
use crate::Result;

/// One shell input line
#[derive(Parser, Debug)]
#[command(
    name = "rfs",
    no_binary_name = true,
    disable_version_flag = true,
    about = "Remote file system commands"
)]
pub struct ShellLine {
    /// Command to run
    #[command(subcommand)]
    pub command: ShellCommand,
}

/// Shell commands, one per request type
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Upload a file to the server
    Up {
        /// Local file
        source_path: PathBuf,
        /// Remote destination file
        destination_path: String,
    },
    /// Download a file from the server
    Down {
        /// Remote file
        source_path: String,
        /// Local destination file
        destination_path: PathBuf,
    },
    /// Change working directory
    Cd {
        /// Remote directory
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print working directory
    Pwd,
    /// Make a new directory
    Mkdir {
        /// Remote directory
        dir: String,
    },
    /// List files and subdirectories
    Ls {
        /// Remote directory
        #[arg(default_value = ".")]
        directory: String,
    },
    /// Remove a file, or a directory with -r
    Rm {
        /// Remote path
        path: String,
        /// Remove a directory and its contents
        #[arg(short, long)]
        recursive: bool,
    },
    /// Copy a file, or a directory with -r
    Cp {
        /// Remote source
        source_path: String,
        /// Remote destination
        destination_path: String,
        /// Copy a directory and its contents
        #[arg(short, long)]
        recursive: bool,
    },
    /// Close the session
    Exit,
}

/// Split a line on whitespace; double quotes toggle grouping and are removed
pub fn tokenize(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    words.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        words.push(current);
    }
    words
}

/// Parse a line into a command; `Ok(None)` for a blank line
///
/// # Errors
///
/// Returns the clap error (unknown command, missing argument, or help text).
pub fn parse(line: &str) -> std::result::Result<Option<ShellCommand>, clap::Error> {
    let words = tokenize(line);
    if words.is_empty() {
        return Ok(None);
    }
    ShellLine::try_parse_from(words).map(|parsed| Some(parsed.command))
}

/// Convert local path separators to the `/` the server expects
pub fn normalize_path(path: &str) -> String {
    if std::path::MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Run one command; returns the text to print, if any
///
/// # Errors
///
/// Returns local-file errors, server error responses as [`crate::Error::Remote`],
/// and frame-level errors.
pub async fn execute<S>(client: &mut Client<S>, command: ShellCommand) -> Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match command {
        ShellCommand::Up {
            source_path,
            destination_path,
        } => {
            client
                .upload(&source_path, &normalize_path(&destination_path))
                .await?;
            Ok(None)
        }
        ShellCommand::Down {
            source_path,
            destination_path,
        } => {
            client
                .download(&normalize_path(&source_path), &destination_path)
                .await?;
            Ok(None)
        }
        ShellCommand::Cd { path } => {
            client.change_directory(&normalize_path(&path)).await?;
            Ok(None)
        }
        ShellCommand::Pwd => Ok(Some(client.print_directory().await?)),
        ShellCommand::Mkdir { dir } => {
            client.make_directory(&normalize_path(&dir)).await?;
            Ok(None)
        }
        ShellCommand::Ls { directory } => {
            let listing = client.list(&normalize_path(&directory)).await?;
            Ok((!listing.is_empty()).then_some(listing))
        }
        ShellCommand::Rm { path, recursive } => {
            client.remove(&normalize_path(&path), recursive).await?;
            Ok(None)
        }
        ShellCommand::Cp {
            source_path,
            destination_path,
            recursive,
        } => {
            client
                .copy(
                    &normalize_path(&source_path),
                    &normalize_path(&destination_path),
                    recursive,
                )
                .await?;
            Ok(None)
        }
        ShellCommand::Exit => Ok(None),
    }
}
