// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test doubles and a per-test installation in a temporary directory.

use crate::context::{SetupContext, Timing};
use crate::paths::Paths;
use crate::prompt::Console;
use crate::settings::FileConfigStore;
use crate::supervisor::Supervisor;
use crate::unprivileged::{run_task, UnprivilegedRunner, UnprivilegedTask};
use camino_tempfile::Utf8TempDir;
use controller_test_utils::dev::{test_setup_log, LogContext};
use controller_utils::poll::RetryPolicy;
use controller_utils::privilege::{Identity, PrivilegeError};
use controller_utils::process::Signaller;
use controller_utils::{BoxedExecutor, FakeExecutor};
use indicatif::{ProgressDrawTarget, TermLike};
use slog::Logger;
use std::collections::VecDeque;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TEMPLATE: &str = include_str!("../templates/supervisord.conf.template");

/// Recorded in place of a line cleared by a progress spinner.
pub const CLEAR_LINE: &str = "<clear line>";

/// A terminal for progress spinners that records what is drawn.
#[derive(Clone, Debug, Default)]
struct ScriptedTerm {
    drawn: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTerm {
    fn record(&self, text: &str) -> io::Result<()> {
        if !text.is_empty() {
            self.drawn.lock().unwrap().push(text.to_string());
        }
        Ok(())
    }
}

impl TermLike for ScriptedTerm {
    fn width(&self) -> u16 {
        80
    }

    fn move_cursor_up(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_down(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_right(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn move_cursor_left(&self, _n: usize) -> io::Result<()> {
        Ok(())
    }

    fn write_line(&self, s: &str) -> io::Result<()> {
        self.record(s)
    }

    fn write_str(&self, s: &str) -> io::Result<()> {
        self.record(s)
    }

    fn clear_line(&self) -> io::Result<()> {
        self.record(CLEAR_LINE)
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// A console answering prompts from a script and recording all output.
pub struct ScriptedConsole {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
    inline: Mutex<Vec<String>>,
    terminal: bool,
    term: ScriptedTerm,
}

impl ScriptedConsole {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            stdout: Mutex::new(String::new()),
            stderr: Mutex::new(String::new()),
            inline: Mutex::new(Vec::new()),
            terminal: false,
            term: ScriptedTerm::default(),
        }
    }

    pub fn terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }


    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn stdout(&self) -> String {
        self.stdout.lock().unwrap().clone()
    }

    pub fn stderr(&self) -> String {
        self.stderr.lock().unwrap().clone()
    }

    pub fn inline(&self) -> Vec<String> {
        self.inline.lock().unwrap().clone()
    }

    /// Lines drawn by progress spinners, with cleared lines as
    /// [`CLEAR_LINE`].
    pub fn drawn(&self) -> Vec<String> {
        self.term.drawn.lock().unwrap().clone()
    }

    /// Answers not consumed by the code under test.
    pub fn unused_answers(&self) -> usize {
        self.answers.lock().unwrap().len()
    }
}

impl Console for ScriptedConsole {
    fn read_line(&self, prompt: &str) -> io::Result<Option<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answers.lock().unwrap().pop_front())
    }

    fn print(&self, msg: &str) {
        let mut stdout = self.stdout.lock().unwrap();
        stdout.push_str(msg);
        stdout.push('\n');
    }

    fn eprint(&self, msg: &str) {
        let mut stderr = self.stderr.lock().unwrap();
        stderr.push_str(msg);
        stderr.push('\n');
    }

    fn write_inline(&self, text: &str) {
        self.inline.lock().unwrap().push(text.to_string());
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn progress_target(&self) -> ProgressDrawTarget {
        ProgressDrawTarget::term_like(Box::new(self.term.clone()))
    }
}

/// Records signals instead of delivering them.
pub struct RecordingSignaller {
    sent: Mutex<Vec<(i32, i32)>>,
    fail_with: Mutex<Option<i32>>,
}

impl RecordingSignaller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()), fail_with: Mutex::new(None) })
    }

    /// Makes every later signal fail with `errno`.
    pub fn fail_with(&self, errno: i32) {
        *self.fail_with.lock().unwrap() = Some(errno);
    }

    pub fn sent(&self) -> Vec<(i32, i32)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Signaller for RecordingSignaller {
    fn signal(&self, pid: i32, signal: i32) -> io::Result<()> {
        if let Some(errno) = *self.fail_with.lock().unwrap() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        self.sent.lock().unwrap().push((pid, signal));
        Ok(())
    }
}

/// Runs unprivileged tasks in the test process, recording them.
pub struct InProcessRunner {
    log: Logger,
    paths: Paths,
    executor: BoxedExecutor,
    tasks: Mutex<Vec<UnprivilegedTask>>,
}

impl InProcessRunner {
    pub fn tasks(&self) -> Vec<UnprivilegedTask> {
        self.tasks.lock().unwrap().clone()
    }
}

impl UnprivilegedRunner for InProcessRunner {
    fn run(&self, task: &UnprivilegedTask) -> Result<(), PrivilegeError> {
        self.tasks.lock().unwrap().push(task.clone());
        run_task(&self.log, &self.paths, self.executor.clone(), task).map_err(
            |err| PrivilegeError::ChildFailed {
                command: format!("{task:?}: {err}"),
                user: Identity::current().name,
                status: ExitStatus::from_raw(1 << 8),
            },
        )
    }
}

/// An installation rooted in a temporary directory, with fakes for every
/// external effect.
pub struct TestEnv {
    logctx: LogContext,
    pub log: Logger,
    _dir: Utf8TempDir,
    pub paths: Paths,
    pub executor: Arc<FakeExecutor>,
    pub signaller: Arc<RecordingSignaller>,
    pub console: Arc<ScriptedConsole>,
    pub runner: Arc<InProcessRunner>,
    pub service: Identity,
}

impl TestEnv {
    pub fn new(test_name: &str) -> Self {
        let logctx = test_setup_log(test_name);
        let log = logctx.log.clone();
        let dir = Utf8TempDir::new().unwrap();
        let paths = Paths::new(
            dir.path().join("snap"),
            dir.path().join("snap-data"),
            dir.path().join("snap-common"),
        );
        let template = paths.supervisord_template();
        std::fs::create_dir_all(template.parent().unwrap()).unwrap();
        std::fs::write(&template, TEMPLATE).unwrap();
        std::fs::create_dir_all(paths.supervisord_dir()).unwrap();
        std::fs::create_dir_all(paths.snap_common()).unwrap();

        let executor = FakeExecutor::new(log.clone());
        let runner = Arc::new(InProcessRunner {
            log: log.clone(),
            paths: paths.clone(),
            executor: executor.clone().as_executor(),
            tasks: Mutex::new(Vec::new()),
        });
        Self {
            logctx,
            log,
            _dir: dir,
            paths,
            executor,
            signaller: RecordingSignaller::new(),
            console: Arc::new(ScriptedConsole::new(&[])),
            runner,
            service: Identity::current(),
        }
    }

    /// Replaces the console with one answering `answers`.
    pub fn answer(&mut self, answers: &[&str]) {
        self.console = Arc::new(ScriptedConsole::new(answers));
    }

    fn timing() -> Timing {
        Timing {
            supervisor: RetryPolicy::new(
                Duration::from_millis(1),
                Some(Duration::from_secs(5)),
            ),
            database_poll: Duration::from_millis(1),
            progress: Duration::from_millis(1),
        }
    }

    pub fn context(&self, is_root: bool) -> SetupContext {
        SetupContext {
            log: self.log.clone(),
            paths: self.paths.clone(),
            console: self.console.clone(),
            executor: self.executor.clone().as_executor(),
            signaller: self.signaller.clone(),
            runner: self.runner.clone(),
            config: Arc::new(FileConfigStore::new(self.paths.config_file())),
            service: self.service.clone(),
            is_root,
            timing: Self::timing(),
        }
    }

    pub fn supervisor(&self) -> Supervisor {
        self.context(true).supervisor()
    }

    pub fn database(&self) -> crate::database::DatabaseManager {
        self.context(true).database()
    }

    /// Pretends a supervisor is running as `pid`.
    pub fn write_supervisor_pid(&self, pid: i32) {
        std::fs::write(self.paths.supervisord_pid(), format!("{pid}\n"))
            .unwrap();
    }

    pub fn cleanup_successful(self) {
        self.logctx.cleanup_successful();
    }
}
