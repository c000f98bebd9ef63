// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::fmt;

/// The possible errors that can arise anywhere in the relay pipeline, from catalog loading
/// through a single instance's decode-and-forward step.
#[derive(Debug)]
pub enum Error {
    /// Errors encountered while parsing the command line or preparing the environment.
    Config(ConfigError),

    /// Errors encountered while loading protocol description files into a catalog.
    Catalog(CatalogError),

    /// A violation of the wire framing contract: fatal to the instance that produced it.
    Framing(FramingError),

    /// Errors returned by I/O failures on a connection's socket.
    Io(std::io::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Catalog(e) => write!(f, "catalog error: {e}"),
            Self::Framing(e) => write!(f, "framing error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Self::Io(std::io::Error::from(e))
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<CatalogError> for Error {
    fn from(e: CatalogError) -> Self {
        Self::Catalog(e)
    }
}

impl From<FramingError> for Error {
    fn from(e: FramingError) -> Self {
        Self::Framing(e)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// `XDG_RUNTIME_DIR` is not set in the environment.
    MissingRuntimeDir,

    /// The assembled socket path (runtime dir + display name) does not fit in `sockaddr_un`.
    SocketPathTooLong(String),

    /// The server-mode lockfile is already held by another process.
    LockContention(String),

    /// A `--protocol` or `--server` argument was missing its value, or no client was given in
    /// single mode.
    BadArguments(String),

    /// `$WAYLAND_SOCKET` held a value that did not parse as a file descriptor number.
    BadInheritedSocket(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRuntimeDir => write!(f, "XDG_RUNTIME_DIR is not set in the environment"),
            Self::SocketPathTooLong(path) => {
                write!(f, "socket path \"{path}\" plus null terminator exceeds 108 bytes")
            }
            Self::LockContention(path) => {
                write!(f, "unable to lock {path}, maybe another instance is running")
            }
            Self::BadArguments(msg) => write!(f, "{msg}"),
            Self::BadInheritedSocket(value) => {
                write!(f, "WAYLAND_SOCKET=\"{value}\" is not a valid file descriptor number")
            }
        }
    }
}

#[derive(Debug)]
pub enum CatalogError {
    /// The description file could not be read from disk.
    Read(String, std::io::Error),

    /// The XML in a description file did not parse.
    Xml(String, String),

    /// An `interface="..."` attribute referenced a name not defined anywhere in the catalog.
    UnknownInterfaceRef(String),

    /// Two description files (or two entries in one file) declared the same interface name.
    DuplicateInterface(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(path, e) => write!(f, "failed to read {path}: {e}"),
            Self::Xml(path, msg) => write!(f, "failed to parse {path}: {msg}"),
            Self::UnknownInterfaceRef(name) => {
                write!(f, "arg references unknown interface \"{name}\"")
            }
            Self::DuplicateInterface(name) => {
                write!(f, "interface \"{name}\" declared more than once")
            }
        }
    }
}

#[derive(Debug)]
pub enum FramingError {
    /// A frame declared a `size` smaller than the 8-byte header.
    TooShort { size: u32 },

    /// A frame declared a `size` larger than the ring buffer can ever hold.
    ExceedsCapacity { size: u32, capacity: usize },
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { size } => write!(f, "frame size {size} is smaller than the 8-byte header"),
            Self::ExceedsCapacity { size, capacity } => {
                write!(f, "frame size {size} exceeds ring buffer capacity {capacity}")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
