// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Single-mode child spawning: `fork()` + `exec()` the traced client with its half of a fresh
//! socketpair handed over as `WAYLAND_SOCKET`, mirroring `tracer_create`'s child branch in
//! `tracer.c`.

use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::{fork, ForkResult};

use crate::error::{ConfigError, Error, Result};

/// The parent's half of the socketpair created for single mode: the tracer's own connection to
/// the spawned client.
pub struct SpawnedChild {
    pub tracer_side: UnixStream,
    pub child_pid: nix::unistd::Pid,
}

/// Forks, execs `args` in the child with `WAYLAND_SOCKET` set to its half of a fresh socketpair,
/// and returns the parent's half plus the child's pid.
///
/// # Safety considerations
/// `fork()` in a multi-threaded process only guarantees async-signal-safe calls are sound until
/// `exec`; the child branch here does nothing but environment and fd manipulation before calling
/// `exec`, matching that constraint.
pub fn spawn_child(args: &[String]) -> Result<SpawnedChild> {
    let (tracer_side, client_side) = UnixStream::pair()?;

    if args.is_empty() {
        return Err(Error::Config(ConfigError::BadArguments(
            "no client command given in single mode".to_string(),
        )));
    }

    // SAFETY: see module doc; the child performs only env/fd setup and an exec before returning
    // control to foreign code.
    match unsafe { fork() }.map_err(Error::from)? {
        ForkResult::Child => {
            drop(tracer_side);
            let client_fd: OwnedFd = client_side.into();
            // `UnixStream::pair` creates both ends `SOCK_CLOEXEC`; the traced client needs to
            // inherit this one across its own `exec`, so clear close-on-exec before we hand off
            // the number.
            let _ = fcntl(&client_fd, FcntlArg::F_SETFD(FdFlag::empty()));
            std::env::set_var("WAYLAND_SOCKET", client_fd.as_raw_fd().to_string());
            // `OwnedFd`'s `Drop` is bypassed by `exec`'s replacement of the process image; closing
            // it ourselves first would hand the client a dead descriptor number.
            std::mem::forget(client_fd);

            let err = Command::new(&args[0]).args(&args[1..]).exec();
            // Only reached if exec() itself failed to launch the program.
            eprintln!("wl-tracer: failed to exec {:?}: {err}", args[0]);
            std::process::exit(1);
        }
        ForkResult::Parent { child } => {
            drop(client_side);
            Ok(SpawnedChild { tracer_side, child_pid: child })
        }
    }
}
