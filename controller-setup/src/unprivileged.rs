// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Work that must not run as root, and how it reaches the service account.
//!
//! The root process never performs these tasks itself. [`ReexecRunner`]
//! starts this same binary as the service account with the hidden
//! `unprivileged` subcommand, which turns its arguments back into an
//! [`UnprivilegedTask`] and calls [`run_task`].

use crate::database::{DatabaseError, DatabaseManager};
use crate::database_uri::DatabaseConnectionSpec;
use crate::paths::Paths;
use camino::Utf8PathBuf;
use controller_utils::privilege::{run_unprivileged, Identity, PrivilegeError};
use controller_utils::BoxedExecutor;
use slog::{info, Logger};
use std::process::Command;

/// Carries the database password to the child, keeping it out of argv.
pub const DATABASE_PASS_ENV: &str = "CONTROLLER_SETUP_DATABASE_PASS";

/// A unit of work performed as the service account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnprivilegedTask {
    RemoveDirectory { path: Utf8PathBuf },
    BootstrapDatabase { spec: DatabaseConnectionSpec },
}

pub trait UnprivilegedRunner: Send + Sync {
    fn run(&self, task: &UnprivilegedTask) -> Result<(), PrivilegeError>;
}

/// Arguments of the hidden `unprivileged` subcommand.
#[derive(Clone, Debug, clap::Subcommand)]
pub enum UnprivilegedCommand {
    /// Recursively remove a directory owned by the service account.
    RemoveDirectory { path: Utf8PathBuf },
    /// Create the local database cluster, role and database.
    BootstrapDatabase {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        user: String,
        #[arg(long, env = DATABASE_PASS_ENV, hide_env_values = true)]
        pass: Option<String>,
    },
}

impl From<UnprivilegedCommand> for UnprivilegedTask {
    fn from(command: UnprivilegedCommand) -> Self {
        match command {
            UnprivilegedCommand::RemoveDirectory { path } => {
                UnprivilegedTask::RemoveDirectory { path }
            }
            UnprivilegedCommand::BootstrapDatabase {
                host,
                port,
                name,
                user,
                pass,
            } => UnprivilegedTask::BootstrapDatabase {
                spec: DatabaseConnectionSpec { host, port, name, user, pass },
            },
        }
    }
}

impl UnprivilegedTask {
    /// Subcommand arguments and environment reproducing this task in a child.
    fn child_invocation(&self) -> (Vec<String>, Option<&str>) {
        match self {
            UnprivilegedTask::RemoveDirectory { path } => (
                vec!["remove-directory".to_string(), path.to_string()],
                None,
            ),
            UnprivilegedTask::BootstrapDatabase { spec } => {
                let mut args = vec![
                    "bootstrap-database".to_string(),
                    "--host".to_string(),
                    spec.host.clone(),
                    "--name".to_string(),
                    spec.name.clone(),
                    "--user".to_string(),
                    spec.user.clone(),
                ];
                if let Some(port) = spec.port {
                    args.extend(["--port".to_string(), port.to_string()]);
                }
                (args, spec.pass.as_deref())
            }
        }
    }
}

/// Runs tasks by re-executing this binary as the service account.
pub struct ReexecRunner {
    log: Logger,
    exe: Utf8PathBuf,
    paths: Paths,
    identity: Identity,
}

impl ReexecRunner {
    pub fn new(
        log: &Logger,
        exe: Utf8PathBuf,
        paths: Paths,
        identity: Identity,
    ) -> Self {
        Self { log: log.clone(), exe, paths, identity }
    }

    fn command(&self, task: &UnprivilegedTask) -> Command {
        let (args, pass) = task.child_invocation();
        let mut command = Command::new(&self.exe);
        command
            .arg("--snap")
            .arg(self.paths.snap())
            .arg("--snap-data")
            .arg(self.paths.snap_data())
            .arg("--snap-common")
            .arg(self.paths.snap_common())
            .arg("unprivileged")
            .args(args);
        match pass {
            Some(pass) => command.env(DATABASE_PASS_ENV, pass),
            None => command.env_remove(DATABASE_PASS_ENV),
        };
        command
    }
}

impl UnprivilegedRunner for ReexecRunner {
    fn run(&self, task: &UnprivilegedTask) -> Result<(), PrivilegeError> {
        run_unprivileged(&self.log, &self.identity, &mut self.command(task))
    }
}

/// Performs `task` in the current process. This is the child side of
/// [`ReexecRunner`].
pub fn run_task(
    log: &Logger,
    paths: &Paths,
    executor: BoxedExecutor,
    task: &UnprivilegedTask,
) -> Result<(), DatabaseError> {
    match task {
        UnprivilegedTask::RemoveDirectory { path } => {
            info!(log, "removing directory"; "path" => %path);
            std::fs::remove_dir_all(path)
                .map_err(|err| DatabaseError::Remove { path: path.clone(), err })
        }
        UnprivilegedTask::BootstrapDatabase { spec } => {
            DatabaseManager::new(log, paths.clone(), executor).bootstrap(spec)
        }
    }
}
