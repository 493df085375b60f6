// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line entry point for controller setup.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use controller_setup::commands::config::ConfigArgs;
use controller_setup::commands::init::InitArgs;
use controller_setup::commands::migrate::MigrateArgs;
use controller_setup::commands::{self, config, init, migrate, status};
use controller_setup::context::{SetupContext, Timing, SERVICE_ACCOUNT};
use controller_setup::prompt::TerminalConsole;
use controller_setup::settings::FileConfigStore;
use controller_setup::unprivileged::{
    run_task, ReexecRunner, UnprivilegedCommand,
};
use controller_setup::{Mode, Paths, SetupError};
use controller_utils::cmd::{fatal, CmdError};
use controller_utils::poll::RetryPolicy;
use controller_utils::privilege::{Identity, ROOT_UID};
use controller_utils::process::HostSignaller;
use controller_utils::HostExecutor;
use slog::{debug, o, Drain, Level, Logger};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(version, about = "Set up and manage the controller services")]
struct Args {
    /// Read-only installation directory.
    #[arg(long, env = "SNAP")]
    snap: Utf8PathBuf,

    /// Writable data directory of the installed revision.
    #[arg(long, env = "SNAP_DATA")]
    snap_data: Utf8PathBuf,

    /// Writable data directory shared by all revisions.
    #[arg(long, env = "SNAP_COMMON")]
    snap_common: Utf8PathBuf,

    /// Log level for diagnostics written to stderr.
    #[arg(long, default_value = "warn", value_parser = parse_log_level)]
    log_level: Level,

    /// Give up waiting for the supervisor to come back after this many
    /// seconds. Waits indefinitely by default.
    #[arg(long, value_name = "SECONDS")]
    supervisor_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialise the controller in the given mode.
    Init(InitArgs),
    /// View or change the controller configuration.
    Config(ConfigArgs),
    /// Perform migrations on the connected database.
    Migrate(MigrateArgs),
    /// Status of the controller services.
    Status,
    /// Rewrite the supervisor configuration and signal it to reload.
    #[command(hide = true)]
    ReconfigureSupervisord,
    /// Work performed as the service account on behalf of a root parent.
    #[command(hide = true, subcommand)]
    Unprivileged(UnprivilegedCommand),
}

fn parse_log_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|()| format!("unknown log level {s:?}"))
}

fn main() {
    let args = Args::parse();
    let log = setup_logger(args.log_level);
    let result = run(args, &log);
    // Flush the asynchronous drain before exiting.
    drop(log);
    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => fatal(err),
    }
}

fn setup_logger(level: Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = drain.filter_level(level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "controller-setup"))
}

fn setup_error(err: SetupError) -> CmdError {
    CmdError::Exit {
        code: err.exit_code(),
        message: Some(format!("{:#}", anyhow::Error::from(err))),
    }
}

fn run(args: Args, log: &Logger) -> Result<i32, CmdError> {
    let paths = Paths::new(args.snap, args.snap_data, args.snap_common);
    let executor = HostExecutor::new(log.clone()).as_executor();

    let command = match args.command {
        Command::Unprivileged(task) => {
            run_task(log, &paths, executor, &task.into())
                .context("unprivileged task failed")
                .map_err(CmdError::Failure)?;
            return Ok(0);
        }
        command => command,
    };

    let is_root = uzers::get_current_uid() == ROOT_UID;
    // Only a local database needs the service account to exist.
    let needs_service =
        matches!(&command, Command::Init(init) if init.mode == Mode::All);
    let service = if is_root && needs_service {
        Identity::lookup(SERVICE_ACCOUNT)
            .context("failed to look up the service account")
            .map_err(CmdError::Failure)?
    } else {
        Identity::current()
    };
    debug!(log, "service account"; "name" => &service.name, "uid" => service.uid);

    let exe = std::env::current_exe()
        .context("failed to locate this executable")
        .and_then(|exe| {
            Utf8PathBuf::try_from(exe).context("executable path is not UTF-8")
        })
        .map_err(CmdError::Failure)?;

    let mut timing = Timing::default();
    if let Some(secs) = args.supervisor_timeout {
        timing.supervisor = RetryPolicy {
            timeout: Some(Duration::from_secs(secs)),
            ..timing.supervisor
        };
    }

    let ctx = SetupContext {
        log: log.clone(),
        paths: paths.clone(),
        console: Arc::new(TerminalConsole),
        executor,
        signaller: HostSignaller::new().as_signaller(),
        runner: Arc::new(ReexecRunner::new(
            log,
            exe,
            paths.clone(),
            service.clone(),
        )),
        config: Arc::new(FileConfigStore::new(paths.config_file())),
        service,
        is_root,
        timing,
    };

    let result = match &command {
        Command::Init(init_args) => init::run(&ctx, init_args),
        Command::Config(config_args) => config::run(&ctx, config_args),
        Command::Migrate(migrate_args) => migrate::run(&ctx, migrate_args),
        Command::Status => status::run(&ctx),
        Command::ReconfigureSupervisord => {
            commands::reconfigure_supervisord(&ctx)
        }
        Command::Unprivileged(_) => unreachable!("handled before setup"),
    };
    result.map_err(setup_error)
}
