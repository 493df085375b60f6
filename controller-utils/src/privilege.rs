// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running work as an unprivileged account from a root process.
//!
//! Two primitives are provided:
//!
//! - [`drop_privileges`] switches the *effective* user and group of the
//!   current process to an unprivileged [`Identity`] and returns a guard that
//!   restores the previous (root) identity when dropped.
//! - [`run_unprivileged`] spawns a child whose real user and group are the
//!   unprivileged identity, relays SIGINT and SIGTERM received by the parent
//!   to that child, and waits for it to exit.

use crate::process::{send_signal, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use slog::{debug, info, warn, Logger};
use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uzers::switch::{switch_user_group, SwitchUserGuard};
use uzers::{get_group_by_name, get_user_by_name};

/// User id of the superuser.
pub const ROOT_UID: u32 = 0;

#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    #[error("no such user: {0}")]
    NoSuchUser(String),

    #[error("no such group: {0}")]
    NoSuchGroup(String),

    #[error("failed to switch effective identity to {user}")]
    Switch {
        user: String,
        #[source]
        err: io::Error,
    },

    #[error("failed to install signal handlers")]
    Signals(#[source] io::Error),

    #[error("failed to start [{command}] as {user}")]
    Spawn {
        command: String,
        user: String,
        #[source]
        err: io::Error,
    },

    #[error("failed to wait for [{command}]")]
    Wait {
        command: String,
        #[source]
        err: io::Error,
    },

    #[error("[{command}] running as {user} failed with {status}")]
    ChildFailed { command: String, user: String, status: ExitStatus },
}

/// A non-root account work can be delegated to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Looks up the user and the group of the same name.
    pub fn lookup(name: &str) -> Result<Self, PrivilegeError> {
        let user = get_user_by_name(name)
            .ok_or_else(|| PrivilegeError::NoSuchUser(name.to_string()))?;
        let group = get_group_by_name(name)
            .ok_or_else(|| PrivilegeError::NoSuchGroup(name.to_string()))?;
        Ok(Self { name: name.to_string(), uid: user.uid(), gid: group.gid() })
    }

    /// The identity the current process runs as.
    pub fn current() -> Self {
        let uid = uzers::get_current_uid();
        let name = uzers::get_user_by_uid(uid)
            .map(|u| u.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| uid.to_string());
        Self { name, uid, gid: uzers::get_current_gid() }
    }
}

/// Returns true if the process currently has root's effective user id.
pub fn is_effective_root() -> bool {
    uzers::get_effective_uid() == ROOT_UID
}

/// Guard returned by [`drop_privileges`].
///
/// The previous effective identity is restored when this is dropped, on every
/// exit path.
pub struct PrivilegesDropped {
    log: Logger,
    user: String,
    _guard: SwitchUserGuard,
}

impl Drop for PrivilegesDropped {
    fn drop(&mut self) {
        debug!(self.log, "restoring effective identity"; "from" => &self.user);
    }
}

/// Switches the effective user and group to `identity` until the returned
/// guard is dropped.
///
/// Supplementary groups are cleared first; this requires the caller to still
/// be root.
pub fn drop_privileges(
    log: &Logger,
    identity: &Identity,
) -> Result<PrivilegesDropped, PrivilegeError> {
    if is_effective_root() {
        // Safety: setgroups(2) with an empty list reads no memory.
        if unsafe { libc::setgroups(0, std::ptr::null()) } != 0 {
            return Err(PrivilegeError::Switch {
                user: identity.name.clone(),
                err: io::Error::last_os_error(),
            });
        }
    }
    let guard =
        switch_user_group(identity.uid, identity.gid).map_err(|err| {
            PrivilegeError::Switch { user: identity.name.clone(), err }
        })?;
    debug!(log, "dropped effective identity"; "to" => &identity.name);
    Ok(PrivilegesDropped {
        log: log.clone(),
        user: identity.name.clone(),
        _guard: guard,
    })
}

fn command_to_string(command: &Command) -> String {
    crate::host::input::Input::from(&*command).to_string()
}

/// Runs `command` as `identity`, blocking until it exits.
///
/// While the child runs, SIGINT and SIGTERM delivered to this process are
/// forwarded to the child. Each forwarded signal is sent with the effective
/// identity temporarily switched to `identity`, so the child is only ever
/// signalled by its own account. Once the child has exited, SIGINT and
/// SIGTERM terminate this process again as they normally would.
///
/// A non-zero exit of the child is reported as
/// [`PrivilegeError::ChildFailed`]; the child is expected to have printed its
/// own diagnostics.
pub fn run_unprivileged(
    log: &Logger,
    identity: &Identity,
    command: &mut Command,
) -> Result<(), PrivilegeError> {
    let command_str = command_to_string(command);

    // Register before spawning so that a signal arriving in between is
    // queued rather than lost.
    let _window = RelayWindow::open().map_err(PrivilegeError::Signals)?;
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).map_err(PrivilegeError::Signals)?;
    let handle = signals.handle();

    command.uid(identity.uid).gid(identity.gid);
    info!(
        log, "running unprivileged command";
        "command" => &command_str,
        "user" => &identity.name,
    );
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            handle.close();
            return Err(PrivilegeError::Spawn {
                command: command_str,
                user: identity.name.clone(),
                err,
            });
        }
    };
    let pid = i32::try_from(child.id()).expect("pid fits in i32");

    let status = std::thread::scope(|s| {
        s.spawn(|| {
            for signal in signals.forever() {
                relay_signal(log, identity, pid, signal);
            }
        });
        let status = child.wait();
        handle.close();
        status
    })
    .map_err(|err| PrivilegeError::Wait { command: command_str.clone(), err })?;

    if status.success() {
        Ok(())
    } else {
        Err(PrivilegeError::ChildFailed {
            command: command_str,
            user: identity.name.clone(),
            status,
        })
    }
}

// signal-hook never restores a signal's default disposition once it has
// installed its handler, so the default (terminate) action is emulated
// through a conditional action that is switched off while a child is being
// relayed to.
static TERMINATE_ON_SIGNAL: Mutex<Option<Arc<AtomicBool>>> = Mutex::new(None);

fn terminate_on_signal() -> io::Result<Arc<AtomicBool>> {
    let mut slot = TERMINATE_ON_SIGNAL.lock().unwrap();
    if let Some(flag) = slot.as_ref() {
        return Ok(flag.clone());
    }
    let flag = Arc::new(AtomicBool::new(true));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_default(signal, flag.clone())?;
    }
    *slot = Some(flag.clone());
    Ok(flag)
}

/// While alive, SIGINT and SIGTERM no longer terminate this process.
struct RelayWindow {
    terminate: Arc<AtomicBool>,
}

impl RelayWindow {
    fn open() -> io::Result<Self> {
        let terminate = terminate_on_signal()?;
        terminate.store(false, Ordering::SeqCst);
        Ok(Self { terminate })
    }
}

impl Drop for RelayWindow {
    fn drop(&mut self) {
        self.terminate.store(true, Ordering::SeqCst);
    }
}

fn relay_signal(log: &Logger, identity: &Identity, pid: i32, signal: i32) {
    info!(log, "forwarding signal to child"; "pid" => pid, "signal" => signal);
    let _dropped = match drop_privileges(log, identity) {
        Ok(dropped) => dropped,
        Err(err) => {
            warn!(
                log, "could not drop privileges to forward signal";
                "error" => %err,
            );
            return;
        }
    };
    if let Err(err) = send_signal(pid, signal) {
        warn!(
            log, "failed to forward signal";
            "pid" => pid,
            "signal" => signal,
            "error" => %err,
        );
    }
}
