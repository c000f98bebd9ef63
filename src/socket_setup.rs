// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Locating and opening the Unix sockets this tool sits between.
//!
//! Adapted from `wayland-client.c`/`wayland-server.c`'s socket setup, which this repository's
//! upstream explicitly borrowed wholesale rather than reimplementing: `XDG_RUNTIME_DIR`-relative
//! paths, a sibling `.lock` file held with a non-blocking `flock`, and the historical rule that a
//! stale socket path is only unlinked when it is writable by its owner or group.

use std::fs::{File, OpenOptions};
use std::os::fd::FromRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use nix::sys::stat::{self, Mode};

use crate::error::{ConfigError, Error, Result};

const LOCK_SUFFIX: &str = ".lock";
const DEFAULT_DISPLAY_NAME: &str = "wayland-0";
/// `sizeof(sockaddr_un.sun_path)`, the Linux ABI limit this repository's upstream checked against.
const SUN_PATH_MAX: usize = 108;

fn runtime_dir() -> Result<PathBuf> {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .ok_or(Error::Config(ConfigError::MissingRuntimeDir))
}

fn socket_path(name: Option<&str>, env_var: &str) -> Result<PathBuf> {
    let dir = runtime_dir()?;
    let name = name
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
    let path = dir.join(&name);

    let encoded_len = path.as_os_str().len() + 1; // + NUL terminator
    if encoded_len > SUN_PATH_MAX {
        return Err(Error::Config(ConfigError::SocketPathTooLong(path.display().to_string())));
    }
    Ok(path)
}

/// Connects as a client to an already-running compositor's socket, mirroring
/// `wayland-client.c`'s `wl_display_connect`.
pub fn connect_to_socket(name: Option<&str>) -> Result<UnixStream> {
    let path = socket_path(name, "WAYLAND_DISPLAY")?;
    let stream = UnixStream::connect(&path)?;
    Ok(stream)
}

/// Connects to the compositor this process should relay toward: an inherited `WAYLAND_SOCKET` fd
/// if the environment carries one (as set by `spawn::spawn_child`'s parent for the traced
/// client), otherwise a fresh connection by name.
pub fn connect_server(name: Option<&str>) -> Result<UnixStream> {
    if let Some(value) = std::env::var_os("WAYLAND_SOCKET") {
        let text = value.to_string_lossy();
        let fd: i32 = text
            .parse()
            .map_err(|_| Error::Config(ConfigError::BadInheritedSocket(text.into_owned())))?;
        // SAFETY: the caller is responsible for WAYLAND_SOCKET genuinely naming an fd this
        // process owns and has not yet consumed; that contract is upheld by `spawn::spawn_child`.
        let owned = unsafe { std::os::fd::OwnedFd::from_raw_fd(fd) };
        nix::fcntl::fcntl(&owned, nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC))?;
        std::env::remove_var("WAYLAND_SOCKET");
        Ok(UnixStream::from(owned))
    } else {
        connect_to_socket(name)
    }
}

/// A bound, listening socket plus the lockfile held for its lifetime (dropping this releases the
/// lock but does not unlink the socket or lock paths — matching the upstream's own behavior of
/// leaving that to the next invocation's stale-socket check).
pub struct Listener {
    pub listener: UnixListener,
    pub socket_path: PathBuf,
    _lock_file: File,
}

/// Opens (creating if needed) and non-blocking-`flock`s `<socket_path>.lock`, then applies the
/// upstream's stale-socket rule: an existing socket path is unlinked only if it is writable by its
/// owner or group. This is deliberately preserved rather than tightened: a compositor crash
/// can leave a socket behind that a live, privileged-but-different user still holds open, and the
/// mode check is the only signal this tool inherits for telling those cases apart.
fn get_socket_lock(socket_path: &Path) -> Result<File> {
    let lock_path = lock_path_for(socket_path);
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .mode(0o660)
        .open(&lock_path)
        .map_err(|_| Error::Config(ConfigError::LockContention(lock_path.display().to_string())))?;

    flock(&lock_file, FlockArg::LockExclusiveNonblock)
        .map_err(|_| Error::Config(ConfigError::LockContention(lock_path.display().to_string())))?;

    match stat::stat(socket_path) {
        Ok(info) => {
            let mode = Mode::from_bits_truncate(info.st_mode);
            if mode.contains(Mode::S_IWUSR) || mode.contains(Mode::S_IWGRP) {
                let _ = std::fs::remove_file(socket_path);
            }
        }
        Err(nix::errno::Errno::ENOENT) => {}
        Err(e) => return Err(Error::from(e)),
    }

    Ok(lock_file)
}

fn lock_path_for(socket_path: &Path) -> PathBuf {
    let mut lock = socket_path.as_os_str().to_owned();
    lock.push(LOCK_SUFFIX);
    PathBuf::from(lock)
}

/// Creates the server-mode listening socket, mirroring `wayland-server.c`'s `wl_display_add_socket`.
pub fn create_listener(name: Option<&str>) -> Result<Listener> {
    let socket_path = socket_path(name, "WAYLAND_DISPLAY")?;
    let lock_file = get_socket_lock(&socket_path)?;
    let listener = UnixListener::bind(&socket_path)?;
    Ok(Listener { listener, socket_path, _lock_file: lock_file })
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_runtime_dir_is_a_config_error() {
        let saved = std::env::var_os("XDG_RUNTIME_DIR");
        std::env::remove_var("XDG_RUNTIME_DIR");
        let result = connect_to_socket(Some("wayland-test"));
        assert!(matches!(result, Err(Error::Config(ConfigError::MissingRuntimeDir))));
        if let Some(value) = saved {
            std::env::set_var("XDG_RUNTIME_DIR", value);
        }
    }

    #[test]
    fn overlong_socket_path_is_rejected() {
        std::env::set_var("XDG_RUNTIME_DIR", "/tmp");
        let long_name: String = "x".repeat(SUN_PATH_MAX);
        let result = connect_to_socket(Some(&long_name));
        assert!(matches!(result, Err(Error::Config(ConfigError::SocketPathTooLong(_)))));
    }

    #[test]
    fn create_and_reconnect_listener_roundtrip() {
        let dir = std::env::temp_dir().join(format!("wl_tracer_socktest_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::env::set_var("XDG_RUNTIME_DIR", &dir);

        let listener = create_listener(Some("wayland-roundtrip")).unwrap();
        let path = listener.socket_path.clone();
        assert!(path.exists());

        let _client = UnixStream::connect(&path).unwrap();
        drop(listener);
        assert!(!path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
