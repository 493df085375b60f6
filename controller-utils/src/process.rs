// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivering signals to other processes.

use std::io;
use std::sync::Arc;

pub use libc::{SIGHUP, SIGINT, SIGTERM};

/// Sends `signal` to `pid`.
pub fn send_signal(pid: i32, signal: libc::c_int) -> io::Result<()> {
    // Safety: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Returns true if the error indicates that the target process no longer
/// exists.
pub fn is_no_such_process(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

pub type BoxedSignaller = Arc<dyn Signaller>;

/// Something that can signal a process by pid.
///
/// Production code uses [`HostSignaller`]; tests substitute a recorder so no
/// real process is disturbed.
pub trait Signaller: Send + Sync {
    fn signal(&self, pid: i32, signal: libc::c_int) -> io::Result<()>;
}

pub struct HostSignaller;

impl HostSignaller {
    pub fn new() -> Arc<Self> {
        Arc::new(HostSignaller)
    }

    pub fn as_signaller(self: Arc<Self>) -> BoxedSignaller {
        self
    }
}

impl Signaller for HostSignaller {
    fn signal(&self, pid: i32, signal: libc::c_int) -> io::Result<()> {
        send_signal(pid, signal)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_signal_zero_checks_existence() {
        let me = i32::try_from(std::process::id()).unwrap();
        HostSignaller.signal(me, 0).expect("we exist");
    }

    #[test]
    fn test_missing_process_is_recognized() {
        // pid_max on Linux never reaches i32::MAX.
        let err = send_signal(i32::MAX, 0).unwrap_err();
        assert!(is_no_such_process(&err), "unexpected error: {err}");
    }
}
