// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::host::{
    error::output_to_exec_error, error::ExecutionError, input::env_keys,
    input::Input, output::Output, output::OutputExt,
};

use slog::{debug, error, info, Logger};
use std::process::{Command, Stdio};
use std::str::from_utf8;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

fn log_input(log: &Logger, id: u64, input: &Input) {
    info!(
        log,
        "running command via executor"; "id" => id, "command" => %input
    );
    debug!(
        log,
        "running command via executor"; "id" => id, "envs" => env_keys(input)
    );
}

fn log_output(log: &Logger, id: u64, output: &Output) {
    info!(
        log,
        "finished running command via executor";
        "id" => id,
        "result" => if output.status.success() { "OK" } else { "ERROR" },
        "status" => output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );
    if !output.stdout.is_empty() {
        debug!(
            log,
            "finished command stdout";
            "id" => id,
            "stdout" => from_utf8(&output.stdout).unwrap_or("<Not valid UTF-8>"),
        );
    }
    if !output.stderr.is_empty() {
        debug!(
            log,
            "finished command stderr";
            "id" => id,
            "stderr" => from_utf8(&output.stderr).unwrap_or("<Not valid UTF-8>"),
        );
    }
}

/// Describes the commonly-used "safe-to-reference" type describing the
/// Executor as a trait object.
pub type BoxedExecutor = Arc<dyn Executor>;

/// Describes an "executor", which can run [Command]s and return a response.
///
/// - In production, this is usually simply a [HostExecutor].
/// - Under test, this can be customized, and a [FakeExecutor] may be used.
pub trait Executor: Send + Sync {
    /// Executes a task, waiting for it to complete, and returning captured
    /// output.
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError>;

    /// Executes a task with its stdio attached to ours, waiting for it to
    /// complete. The returned output carries only the exit status.
    fn execute_streaming(
        &self,
        command: &mut Command,
    ) -> Result<Output, ExecutionError>;
}

/// Handler called when a fake command "runs".
pub type WaitFn = dyn FnMut(&Input) -> Output + Send;
pub type BoxedWaitFn = Box<WaitFn>;

/// An executor which can expect certain inputs, and respond with specific
/// outputs.
pub struct FakeExecutor {
    log: Logger,
    counter: AtomicU64,
    wait_handler: Mutex<BoxedWaitFn>,
    history: Mutex<Vec<Input>>,
}

impl FakeExecutor {
    pub fn new(log: Logger) -> Arc<FakeExecutor> {
        Arc::new(Self {
            log,
            counter: AtomicU64::new(0),
            wait_handler: Mutex::new(Box::new(|_input| Output::success())),
            history: Mutex::new(Vec::new()),
        })
    }

    /// Set the request handler to an arbitrary function.
    pub fn set_wait_handler(&self, f: BoxedWaitFn) {
        *self.wait_handler.lock().unwrap() = f;
    }

    /// Perform some type coercion to access a commonly-used trait object.
    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }

    /// Every command observed so far, in order.
    pub fn history(&self) -> Vec<Input> {
        self.history.lock().unwrap().clone()
    }

    fn execute_internal(
        &self,
        command: &Command,
    ) -> Result<Output, ExecutionError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let input = Input::from(command);
        log_input(&self.log, id, &input);
        self.history.lock().unwrap().push(input.clone());

        let output = self.wait_handler.lock().unwrap()(&input);
        log_output(&self.log, id, &output);

        if !output.status.success() {
            return Err(output_to_exec_error(input.to_string(), &output));
        }
        Ok(output)
    }
}

impl Executor for FakeExecutor {
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError> {
        self.execute_internal(command)
    }

    fn execute_streaming(
        &self,
        command: &mut Command,
    ) -> Result<Output, ExecutionError> {
        // A streamed command never hands its output back to the caller.
        self.execute_internal(command).map(|output| Output {
            status: output.status,
            stdout: vec![],
            stderr: vec![],
        })
    }
}

pub struct HostExecutor {
    log: slog::Logger,
    counter: AtomicU64,
}

impl HostExecutor {
    pub fn new(log: Logger) -> Arc<Self> {
        Arc::new(Self { log, counter: AtomicU64::new(0) })
    }

    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }

    fn prepare(&self, command: &Command) -> (u64, Input) {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let input = Input::from(command);
        log_input(&self.log, id, &input);
        (id, input)
    }

    fn finalize(
        &self,
        input: &Input,
        id: u64,
        output: Output,
    ) -> Result<Output, ExecutionError> {
        log_output(&self.log, id, &output);
        if !output.status.success() {
            return Err(output_to_exec_error(input.to_string(), &output));
        }
        Ok(output)
    }
}

impl Executor for HostExecutor {
    fn execute(&self, command: &mut Command) -> Result<Output, ExecutionError> {
        let (id, input) = self.prepare(command);
        let output = command.output().map_err(|err| {
            error!(self.log, "Could not start program!"; "id" => id);
            ExecutionError::ExecutionStart { command: input.to_string(), err }
        })?;
        self.finalize(&input, id, output)
    }

    fn execute_streaming(
        &self,
        command: &mut Command,
    ) -> Result<Output, ExecutionError> {
        let (id, input) = self.prepare(command);
        let status = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| {
                error!(self.log, "Could not start program!"; "id" => id);
                ExecutionError::ExecutionStart {
                    command: input.to_string(),
                    err,
                }
            })?;
        self.finalize(&input, id, Output { status, stdout: vec![], stderr: vec![] })
    }
}

type DynamicHandler = Box<dyn FnMut(&Input) -> Output + Send>;

enum HandledCommand {
    Static { input: Input, output: Output },
    Dynamic { handler: DynamicHandler },
}

/// A handler that may be used for setting inputs/outputs to the executor
/// when these commands are known ahead-of-time.
///
/// See: [Self::register] for integration with a [FakeExecutor].
pub struct StaticHandler {
    expected: Vec<HandledCommand>,
    index: usize,
}

impl StaticHandler {
    pub fn new() -> Self {
        Self { expected: Vec::new(), index: 0 }
    }

    /// Convenience function to register the handler with a [FakeExecutor].
    pub fn register(mut self, executor: &FakeExecutor) {
        executor.set_wait_handler(Box::new(move |input| -> Output {
            self.execute(input)
        }));
    }

    /// Expects a static "input" to exactly produce some "output".
    pub fn expect(&mut self, input: Input, output: Output) {
        self.expected.push(HandledCommand::Static { input, output });
    }

    /// A helper for [Self::expect] which quietly succeeds.
    pub fn expect_ok<S: AsRef<str>>(&mut self, input: S) {
        self.expect(Input::shell(input), Output::success())
    }

    /// A helper for [Self::expect] which quietly fails.
    pub fn expect_fail<S: AsRef<str>>(&mut self, input: S) {
        self.expect(Input::shell(input), Output::failure())
    }

    /// Expects a dynamic handler to be invoked to dynamically
    /// determine the output of this call.
    pub fn expect_dynamic(&mut self, handler: DynamicHandler) {
        self.expected.push(HandledCommand::Dynamic { handler });
    }

    fn execute(&mut self, observed: &Input) -> Output {
        let expected = &mut self
            .expected
            .get_mut(self.index)
            .unwrap_or_else(|| panic!("Unexpected command: {observed}"));
        self.index += 1;

        match expected {
            HandledCommand::Static { input, output } => {
                assert_eq!(
                    (&observed.program, &observed.args),
                    (&input.program, &input.args),
                    "Unexpected input command"
                );
                output.clone()
            }
            HandledCommand::Dynamic { ref mut handler } => handler(observed),
        }
    }
}

impl Default for StaticHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StaticHandler {
    fn drop(&mut self) {
        let expected = self.expected.len();
        let actual = self.index;
        if actual < expected {
            let next = &self.expected[actual];
            let tip = match next {
                HandledCommand::Static { input, .. } => input.to_string(),
                HandledCommand::Dynamic { .. } => {
                    "<dynamic handler>".to_string()
                }
            };
            let errmsg = format!("Only saw {actual} calls, expected {expected}\nNext would have been: {tip}");
            if !std::thread::panicking() {
                panic!("{errmsg}");
            } else {
                eprintln!("{errmsg}");
            }
        }
    }
}
