// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driving the process supervisor that runs the service set of a mode.

use crate::mode::Mode;
use crate::paths::Paths;
use camino::Utf8PathBuf;
use controller_utils::fs::{write_atomic, AtomicWriteError};
use controller_utils::poll::{
    self, wait_for_condition, CondCheckError, RetryPolicy,
};
use controller_utils::process::{is_no_such_process, BoxedSignaller, SIGHUP};
use controller_utils::{BoxedExecutor, ExecutionError};
use slog::{debug, info, Logger};
use std::io;
use std::process::Command;
use std::time::Duration;

/// Substring of the status output while the supervisor is not yet serving.
const NOT_READY_MARKER: &str = "error:";

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which services run in a mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisorPlan {
    pub postgresql: bool,
    pub regiond: bool,
    pub rackd: bool,
}

impl SupervisorPlan {
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            postgresql: mode == Mode::All,
            regiond: matches!(mode, Mode::All | Mode::Region | Mode::RegionRack),
            rackd: matches!(mode, Mode::All | Mode::RegionRack | Mode::Rack),
        }
    }

    fn variable(&self, name: &str) -> Option<bool> {
        match name {
            "postgresql" => Some(self.postgresql),
            "regiond" => Some(self.regiond),
            "rackd" => Some(self.rackd),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("line {line}: unknown variable {name:?}")]
    UnknownVariable { name: String, line: usize },

    #[error("line {line}: unclosed tag")]
    UnclosedTag { line: usize },

    #[error("line {line}: malformed tag {tag:?}")]
    MalformedTag { tag: String, line: usize },

    #[error("line {line}: {{{{{keyword}}}}} without a matching {{{{if}}}}")]
    Unmatched { keyword: &'static str, line: usize },

    #[error("line {line}: second {{{{else}}}} in one block")]
    DuplicateElse { line: usize },

    #[error("line {line}: {{{{if}}}} is never closed")]
    UnterminatedIf { line: usize },
}

struct Block {
    /// Whether the enclosing text is being emitted.
    outer_active: bool,
    condition: bool,
    in_else: bool,
    line: usize,
}

impl Block {
    fn active(&self) -> bool {
        self.outer_active && (self.condition != self.in_else)
    }
}

enum Tag<'a> {
    Variable(&'a str),
    If(&'a str),
    Else,
    EndIf,
}

fn parse_tag(tag: &str, line: usize) -> Result<Tag<'_>, TemplateError> {
    let words: Vec<&str> = tag.split_whitespace().collect();
    match words.as_slice() {
        ["if", name] => Ok(Tag::If(name)),
        ["else"] => Ok(Tag::Else),
        ["endif"] => Ok(Tag::EndIf),
        [name] if *name != "if" => Ok(Tag::Variable(name)),
        _ => Err(TemplateError::MalformedTag { tag: tag.to_string(), line }),
    }
}

/// Renders a supervisor configuration template for `plan`.
///
/// `{{name}}` expands to `true` or `false`. `{{if name}}`, `{{else}}` and
/// `{{endif}}` select text and may nest. A block tag that is alone on its
/// line takes the whole line with it.
pub fn render_template(
    template: &str,
    plan: &SupervisorPlan,
) -> Result<String, TemplateError> {
    let line_of = |offset: usize| template[..offset].matches('\n').count() + 1;
    let lookup = |name: &str, line: usize| {
        plan.variable(name).ok_or_else(|| TemplateError::UnknownVariable {
            name: name.to_string(),
            line,
        })
    };

    let mut out = String::with_capacity(template.len());
    let mut blocks: Vec<Block> = Vec::new();
    let mut pos = 0;

    while let Some(found) = template[pos..].find("{{") {
        let start = pos + found;
        let line = line_of(start);
        let close = template[start + 2..]
            .find("}}")
            .ok_or(TemplateError::UnclosedTag { line })?;
        let end = start + 2 + close + 2;
        let tag = parse_tag(&template[start + 2..end - 2], line)?;
        let active = blocks.last().map_or(true, Block::active);

        // A block tag standing alone on its line consumes the line.
        let line_start = template[..start].rfind('\n').map_or(0, |i| i + 1);
        let line_end = template[end..].find('\n').map(|i| end + i + 1);
        let standalone = !matches!(tag, Tag::Variable(_))
            && template[line_start..start].trim().is_empty()
            && template[end..line_end.map_or(template.len(), |e| e - 1)]
                .trim()
                .is_empty();
        let (text_end, next) = if standalone {
            (line_start.max(pos), line_end.unwrap_or(template.len()))
        } else {
            (start, end)
        };
        if active {
            out.push_str(&template[pos..text_end]);
        }
        pos = next;

        match tag {
            Tag::Variable(name) => {
                let value = lookup(name, line)?;
                if active {
                    out.push_str(if value { "true" } else { "false" });
                }
            }
            Tag::If(name) => {
                let condition = lookup(name, line)?;
                blocks.push(Block {
                    outer_active: active,
                    condition,
                    in_else: false,
                    line,
                });
            }
            Tag::Else => {
                let block = blocks.last_mut().ok_or(
                    TemplateError::Unmatched { keyword: "else", line },
                )?;
                if block.in_else {
                    return Err(TemplateError::DuplicateElse { line });
                }
                block.in_else = true;
            }
            Tag::EndIf => {
                blocks
                    .pop()
                    .ok_or(TemplateError::Unmatched { keyword: "endif", line })?;
            }
        }
    }

    if let Some(block) = blocks.last() {
        return Err(TemplateError::UnterminatedIf { line: block.line });
    }
    out.push_str(&template[pos..]);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to read supervisor template {path}")]
    ReadTemplate {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },

    #[error("failed to render supervisor template {path}")]
    Render {
        path: Utf8PathBuf,
        #[source]
        err: TemplateError,
    },

    #[error("failed to create {path}")]
    CreateDir {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },

    #[error(transparent)]
    Write(#[from] AtomicWriteError),

    #[error("failed to read supervisor pid from {path}")]
    ReadPid {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },

    #[error("invalid supervisor pid {contents:?} in {path}")]
    InvalidPid { path: Utf8PathBuf, contents: String },

    #[error("failed to signal supervisor (pid {pid})")]
    Signal {
        pid: i32,
        #[source]
        err: io::Error,
    },

    #[error("failed to query supervisor status")]
    Status(#[source] ExecutionError),

    #[error("supervisor still reports errors after {0:?}")]
    Timeout(Duration),
}

/// Exit code and standard output of the supervisor status query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub code: i32,
    pub output: String,
}

impl SupervisorStatus {
    /// The supervisor answers with an error while it is restarting.
    pub fn is_restarting(&self) -> bool {
        self.output.contains(NOT_READY_MARKER)
    }
}

pub struct Supervisor {
    log: Logger,
    paths: Paths,
    executor: BoxedExecutor,
    signaller: BoxedSignaller,
    settle_policy: RetryPolicy,
}

impl Supervisor {
    pub fn new(
        log: &Logger,
        paths: Paths,
        executor: BoxedExecutor,
        signaller: BoxedSignaller,
    ) -> Self {
        Self {
            log: log.new(slog::o!("component" => "Supervisor")),
            paths,
            executor,
            signaller,
            settle_policy: RetryPolicy::new(DEFAULT_POLL_INTERVAL, None)
                .with_initial_delay(DEFAULT_SETTLE_DELAY),
        }
    }

    /// How to wait for the supervisor to come back after a reload. Without a
    /// timeout the wait is unbounded.
    pub fn with_settle_policy(mut self, policy: RetryPolicy) -> Self {
        self.settle_policy = policy;
        self
    }

    /// Writes the supervisor configuration for `mode`.
    pub fn render(&self, mode: Mode) -> Result<(), SupervisorError> {
        let template_path = self.paths.supervisord_template();
        let template = std::fs::read_to_string(&template_path).map_err(
            |err| SupervisorError::ReadTemplate {
                path: template_path.clone(),
                err,
            },
        )?;
        let plan = SupervisorPlan::for_mode(mode);
        let rendered = render_template(&template, &plan).map_err(|err| {
            SupervisorError::Render { path: template_path.clone(), err }
        })?;

        let dir = self.paths.supervisord_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|err| SupervisorError::CreateDir { path: dir, err })?;
        let conf = self.paths.supervisord_conf();
        write_atomic(&conf, rendered.as_bytes())?;
        info!(
            self.log, "rendered supervisor configuration";
            "mode" => %mode,
            "path" => %conf,
            "plan" => ?plan,
        );
        Ok(())
    }

    fn pid(&self) -> Result<Option<i32>, SupervisorError> {
        let path = self.paths.supervisord_pid();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(err) => return Err(SupervisorError::ReadPid { path, err }),
        };
        match contents.trim().parse() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => Err(SupervisorError::InvalidPid { path, contents }),
        }
    }

    /// Makes a running supervisor restart its services with the current
    /// configuration, and waits until it is serving again.
    ///
    /// Nothing happens when no supervisor is running.
    pub fn reload(&self) -> Result<(), SupervisorError> {
        let Some(pid) = self.pid()? else {
            debug!(self.log, "supervisor is not running; nothing to reload");
            return Ok(());
        };
        match self.signaller.signal(pid, SIGHUP) {
            Ok(()) => (),
            Err(err) if is_no_such_process(&err) => {
                debug!(self.log, "supervisor is gone"; "pid" => pid);
                return Ok(());
            }
            Err(err) => return Err(SupervisorError::Signal { pid, err }),
        }
        info!(self.log, "reloading supervisor"; "pid" => pid);

        wait_for_condition(&self.settle_policy, || {
            let status = self.status().map_err(CondCheckError::Failed)?;
            if status.is_restarting() {
                Err(CondCheckError::NotYet)
            } else {
                Ok(())
            }
        })
        .map_err(|err| match err {
            poll::Error::TimedOut(elapsed) => SupervisorError::Timeout(elapsed),
            poll::Error::PermanentError(err) => err,
        })
    }

    /// Queries the supervisor's view of its services.
    pub fn status(&self) -> Result<SupervisorStatus, SupervisorError> {
        let mut command = Command::new(self.paths.supervisorctl());
        command.arg("status");
        match self.executor.execute(&mut command) {
            Ok(output) => Ok(SupervisorStatus {
                code: 0,
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
            }),
            Err(err) => match err.failure_info() {
                Some(info) => Ok(SupervisorStatus {
                    code: info.exit_code(),
                    output: info.stdout.clone(),
                }),
                None => Err(SupervisorError::Status(err)),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::TestEnv;
    use assert_matches::assert_matches;
    use controller_utils::{Output, OutputExt};
    use expectorate::assert_contents;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TEMPLATE: &str = include_str!("../templates/supervisord.conf.template");

    #[test]
    fn test_plan_table() {
        let table = [
            (Mode::None, (false, false, false)),
            (Mode::Rack, (false, false, true)),
            (Mode::Region, (false, true, false)),
            (Mode::RegionRack, (false, true, true)),
            (Mode::All, (true, true, true)),
        ];
        for (mode, (postgresql, regiond, rackd)) in table {
            assert_eq!(
                SupervisorPlan::for_mode(mode),
                SupervisorPlan { postgresql, regiond, rackd },
                "{mode}"
            );
        }
    }

    #[test]
    fn test_rendered_configurations() {
        for mode in Mode::ALL {
            let rendered =
                render_template(TEMPLATE, &SupervisorPlan::for_mode(mode))
                    .unwrap();
            let name = mode.as_str().replace('+', "-");
            assert_contents(
                format!("tests/output/supervisord-{name}.conf"),
                &rendered,
            );
        }
    }

    #[test]
    fn test_template_syntax() {
        let plan = SupervisorPlan::for_mode(Mode::Rack);
        assert_eq!(
            render_template("rackd={{rackd}} regiond={{ regiond }}\n", &plan)
                .unwrap(),
            "rackd=true regiond=false\n"
        );
        assert_eq!(
            render_template(
                "a\n{{if rackd}}\n  {{if regiond}}\nboth\n  {{else}}\nrack\n  {{endif}}\n{{endif}}\nz",
                &plan
            )
            .unwrap(),
            "a\nrack\nz"
        );
        assert_eq!(
            render_template("[{{if postgresql}}db{{else}}none{{endif}}]", &plan)
                .unwrap(),
            "[none]"
        );
    }

    #[test]
    fn test_template_errors() {
        let plan = SupervisorPlan::for_mode(Mode::All);
        assert_eq!(
            render_template("x\n{{dhcpd}}", &plan),
            Err(TemplateError::UnknownVariable {
                name: "dhcpd".to_string(),
                line: 2
            })
        );
        assert_eq!(
            render_template("{{rackd", &plan),
            Err(TemplateError::UnclosedTag { line: 1 })
        );
        assert_eq!(
            render_template("{{if rackd}}\n", &plan),
            Err(TemplateError::UnterminatedIf { line: 1 })
        );
        assert_eq!(
            render_template("{{endif}}", &plan),
            Err(TemplateError::Unmatched { keyword: "endif", line: 1 })
        );
        assert_eq!(
            render_template("\n{{else}}", &plan),
            Err(TemplateError::Unmatched { keyword: "else", line: 2 })
        );
        assert_eq!(
            render_template("{{if rackd}}{{else}}{{else}}{{endif}}", &plan),
            Err(TemplateError::DuplicateElse { line: 1 })
        );
        assert_matches!(
            render_template("{{if}}", &plan),
            Err(TemplateError::MalformedTag { .. })
        );
        assert_eq!(
            TemplateError::Unmatched { keyword: "endif", line: 3 }.to_string(),
            "line 3: {{endif}} without a matching {{if}}"
        );
    }

    #[test]
    fn test_render_writes_configuration() {
        let env = TestEnv::new("test_render_writes_configuration");
        let supervisor = env.supervisor();
        supervisor.render(Mode::Rack).unwrap();
        let rendered =
            std::fs::read_to_string(env.paths.supervisord_conf()).unwrap();
        assert!(rendered.contains("[program:rackd]"));
        assert!(!rendered.contains("[program:regiond]"));
        env.cleanup_successful();
    }

    #[test]
    fn test_reload_without_supervisor_is_noop() {
        let env = TestEnv::new("test_reload_without_supervisor_is_noop");
        env.supervisor().reload().unwrap();
        assert!(env.signaller.sent().is_empty());
        assert!(env.executor.history().is_empty());
        env.cleanup_successful();
    }

    #[test]
    fn test_reload_with_exited_supervisor_is_noop() {
        let env = TestEnv::new("test_reload_with_exited_supervisor_is_noop");
        env.write_supervisor_pid(4242);
        env.signaller.fail_with(libc::ESRCH);
        env.supervisor().reload().unwrap();
        assert!(env.executor.history().is_empty());
        env.cleanup_successful();
    }

    #[test]
    fn test_reload_signal_failure() {
        let env = TestEnv::new("test_reload_signal_failure");
        env.write_supervisor_pid(4242);
        env.signaller.fail_with(libc::EPERM);
        assert_matches!(
            env.supervisor().reload(),
            Err(SupervisorError::Signal { pid: 4242, .. })
        );
        env.cleanup_successful();
    }

    #[test]
    fn test_reload_waits_for_supervisor() {
        let env = TestEnv::new("test_reload_waits_for_supervisor");
        env.write_supervisor_pid(4242);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        env.executor.set_wait_handler(Box::new(move |input| {
            assert_eq!(input.program_name(), "run-supervisorctl");
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Output::exit_code(1).set_stdout(
                    "error: <class 'ConnectionRefusedError'>, [Errno 111]",
                )
            } else {
                Output::success().set_stdout("regiond RUNNING pid 12")
            }
        }));
        env.supervisor().reload().unwrap();
        assert_eq!(env.signaller.sent(), vec![(4242, SIGHUP)]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        env.cleanup_successful();
    }

    #[test]
    fn test_reload_timeout() {
        let env = TestEnv::new("test_reload_timeout");
        env.write_supervisor_pid(4242);
        env.executor.set_wait_handler(Box::new(|_| {
            Output::success().set_stdout("error: still starting")
        }));
        let supervisor = env.supervisor().with_settle_policy(RetryPolicy::new(
            Duration::from_millis(5),
            Some(Duration::from_millis(50)),
        ));
        assert_matches!(supervisor.reload(), Err(SupervisorError::Timeout(_)));
        env.cleanup_successful();
    }

    #[test]
    fn test_invalid_pid_file() {
        let env = TestEnv::new("test_invalid_pid_file");
        std::fs::write(env.paths.supervisord_pid(), "not-a-pid\n").unwrap();
        assert_matches!(
            env.supervisor().reload(),
            Err(SupervisorError::InvalidPid { .. })
        );
        env.cleanup_successful();
    }

    #[test]
    fn test_status_reports_failures() {
        let env = TestEnv::new("test_status_reports_failures");
        env.executor.set_wait_handler(Box::new(|_| {
            Output::exit_code(3).set_stdout("rackd FATAL")
        }));
        let status = env.supervisor().status().unwrap();
        assert_eq!(
            status,
            SupervisorStatus { code: 3, output: "rackd FATAL".to_string() }
        );
        assert!(!status.is_restarting());
        env.cleanup_successful();
    }
}
