// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for testing executable commands

use camino::Utf8PathBuf;
use camino_tempfile::NamedUtf8TempFile;
use std::time::Duration;
use subprocess::Exec;
use subprocess::ExitStatus;
use subprocess::NullFile;
use subprocess::Redirection;

/// Maximum time to wait for any command.
///
/// This is important because a bug might actually cause a test to block on a
/// command indefinitely.
const TIMEOUT: Duration = Duration::from_secs(30);

pub const EXIT_SUCCESS: u32 = libc::EXIT_SUCCESS as u32;
pub const EXIT_FAILURE: u32 = libc::EXIT_FAILURE as u32;
pub const EXIT_USAGE: u32 = 2;

pub fn path_to_executable(cmd_name: &str) -> Utf8PathBuf {
    let mut rv = Utf8PathBuf::from(cmd_name);
    // Drop the ".exe" extension on Windows.  Otherwise, this appears in stderr
    // output, which then differs across platforms.
    rv.set_extension("");
    rv
}

/// Run the given command to completion or up to a hardcoded timeout, whichever
/// is shorter.  The caller provides a `subprocess::Exec` object that's already
/// had its program, arguments, environment, etc. configured, but hasn't been
/// started.  Stdin will be empty unless the caller configured it, and both
/// stdout and stderr will be buffered to disk and returned as strings.
pub fn run_command(exec: Exec) -> (ExitStatus, String, String) {
    let cmdline = exec.to_cmdline_lossy();

    let stdout_file = NamedUtf8TempFile::new().expect("failed to create file");
    let stderr_file = NamedUtf8TempFile::new().expect("failed to create file");

    let mut subproc = exec
        .stdout(Redirection::File(
            stdout_file.reopen().expect("failed to reopen stdout file"),
        ))
        .stderr(Redirection::File(
            stderr_file.reopen().expect("failed to reopen stderr file"),
        ))
        .detached()
        .popen()
        .unwrap_or_else(|_| panic!("failed to start command: {cmdline}"));

    let exit_status = subproc
        .wait_timeout(TIMEOUT)
        .unwrap_or_else(|_| panic!("failed to wait for command: {cmdline}"))
        .unwrap_or_else(|| {
            panic!(
                "timed out waiting for command for {} ms: {}",
                TIMEOUT.as_millis(),
                cmdline
            )
        });

    let stdout_text = std::fs::read_to_string(stdout_file.path())
        .expect("failed to read stdout file");
    let stderr_text = std::fs::read_to_string(stderr_file.path())
        .expect("failed to read stderr file");

    (exit_status, stdout_text, stderr_text)
}

/// Like [`run_command`], but with stdin redirected from the null device.
pub fn run_command_no_input(exec: Exec) -> (ExitStatus, String, String) {
    run_command(exec.stdin(NullFile))
}

pub fn assert_exit_code(exit_status: ExitStatus, code: u32, stderr_text: &str) {
    if let ExitStatus::Exited(exit_code) = exit_status {
        assert_eq!(exit_code, code, "stderr:\n{stderr_text}");
    } else {
        panic!(
            "expected normal process exit with code {code}, got {exit_status:?}\n\nprocess stderr:{stderr_text}",
        );
    }
}
