// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The locally managed PostgreSQL instance and schema migrations.

use crate::database_uri::DatabaseConnectionSpec;
use crate::paths::Paths;
use crate::unprivileged::{UnprivilegedRunner, UnprivilegedTask};
use camino::{Utf8Path, Utf8PathBuf};
use controller_utils::poll::{self, wait_for_condition, CondCheckError, RetryPolicy};
use controller_utils::privilege::{Identity, PrivilegeError};
use controller_utils::{BoxedExecutor, ExecutionError};
use slog::{info, warn, Logger};
use std::fs::Permissions;
use std::io;
use std::os::unix::fs::{chown, PermissionsExt};
use std::process::Command;
use std::time::Duration;

/// How long `start` waits for the engine to answer queries.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const SUPERUSER: &str = "postgres";
const READY_QUERY: &str = "SELECT now();";

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("failed to prepare {path}")]
    Prepare {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },

    #[error("failed to remove {path}")]
    Remove {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error(transparent)]
    Command(#[from] ExecutionError),

    #[error("Unable to connect to postgresql after {} seconds.", .0.as_secs())]
    Timeout(Duration),

    #[error("database migrations failed with exit code {code}")]
    Migration {
        code: i32,
        /// Combined output of the migration tool, when it was captured.
        output: Option<String>,
    },
}

fn prepare_err(path: &Utf8Path) -> impl FnOnce(io::Error) -> DatabaseError + '_ {
    move |err| DatabaseError::Prepare { path: path.to_owned(), err }
}

/// Quotes an SQL identifier.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes an SQL string literal.
fn quote_literal(literal: &str) -> String {
    format!("'{}'", literal.replace('\'', "''"))
}

/// Statements creating the application role and database.
pub fn bootstrap_statements(spec: &DatabaseConnectionSpec) -> Vec<String> {
    let user = quote_ident(&spec.user);
    let name = quote_ident(&spec.name);
    let create_user = match &spec.pass {
        Some(pass) => {
            format!("CREATE USER {user} WITH PASSWORD {};", quote_literal(pass))
        }
        None => format!("CREATE USER {user};"),
    };
    vec![
        create_user,
        format!("CREATE DATABASE {name};"),
        format!("GRANT ALL PRIVILEGES ON DATABASE {name} TO {user};"),
    ]
}

pub struct DatabaseManager {
    log: Logger,
    paths: Paths,
    executor: BoxedExecutor,
    poll_interval: Duration,
}

impl DatabaseManager {
    pub fn new(log: &Logger, paths: Paths, executor: BoxedExecutor) -> Self {
        Self {
            log: log.new(slog::o!("component" => "DatabaseManager")),
            paths,
            executor,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often readiness is checked.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Creates a fresh database cluster holding the application database
    /// described by `spec`, destroying any previous one. The engine is left
    /// stopped.
    ///
    /// Directories are prepared here, as root, so that `service` owns what it
    /// needs to; everything touching database contents runs as `service`
    /// through `runner`.
    pub fn initialize(
        &self,
        spec: &DatabaseConnectionSpec,
        service: &Identity,
        runner: &dyn UnprivilegedRunner,
    ) -> Result<(), DatabaseError> {
        // Ownership and modes are applied to existing directories too, so an
        // earlier installation with different ones is brought in line.
        let base = self.paths.db_base_dir();
        std::fs::create_dir_all(&base).map_err(prepare_err(&base))?;
        // Both root and the service account manage entries in here.
        chown(&base, None, Some(service.gid)).map_err(prepare_err(&base))?;
        std::fs::set_permissions(&base, Permissions::from_mode(0o770))
            .map_err(prepare_err(&base))?;

        let data = self.paths.db_data_dir();
        if data.exists() {
            runner.run(&UnprivilegedTask::RemoveDirectory { path: data.clone() })?;
        }
        std::fs::create_dir(&data).map_err(prepare_err(&data))?;
        chown(&data, Some(service.uid), Some(service.gid))
            .map_err(prepare_err(&data))?;

        let log_file = self.paths.db_log_file();
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(prepare_err(parent))?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(prepare_err(&log_file))?;
        chown(&log_file, Some(service.uid), Some(service.gid))
            .map_err(prepare_err(&log_file))?;

        let sockets = self.paths.db_sockets_dir();
        if !sockets.exists() {
            std::fs::create_dir(&sockets).map_err(prepare_err(&sockets))?;
        }
        std::fs::set_permissions(&sockets, Permissions::from_mode(0o775))
            .map_err(prepare_err(&sockets))?;
        // The group stays root's.
        chown(&sockets, Some(service.uid), None)
            .map_err(prepare_err(&sockets))?;

        info!(self.log, "bootstrapping database"; "name" => &spec.name);
        runner.run(&UnprivilegedTask::BootstrapDatabase { spec: spec.clone() })?;
        Ok(())
    }

    /// Creates the cluster, the application role and its database. Runs as
    /// the service account.
    pub fn bootstrap(
        &self,
        spec: &DatabaseConnectionSpec,
    ) -> Result<(), DatabaseError> {
        let mut initdb = Command::new(self.paths.initdb());
        initdb
            .arg("-D")
            .arg(self.paths.db_data_dir())
            .args(["-U", SUPERUSER, "-E", "UTF8", "--locale=C"]);
        self.executor.execute(&mut initdb)?;

        self.start()?;
        let created = bootstrap_statements(spec)
            .iter()
            .try_for_each(|sql| self.run_sql(sql).map(|_| ()));
        // Stop even when a statement failed, so nothing is left running.
        let stopped = self.stop();
        if let Err(err) = &stopped {
            if created.is_err() {
                warn!(self.log, "failed to stop database"; "error" => %err);
            }
        }
        created?;
        stopped
    }

    pub fn start(&self) -> Result<(), DatabaseError> {
        let mut command = Command::new(self.paths.pg_ctl());
        command
            .args(["start", "-w", "-D"])
            .arg(self.paths.db_data_dir())
            .arg("-l")
            .arg(self.paths.db_log_file())
            .arg("-o")
            .arg(format!("-k \"{}\" -h \"\"", self.paths.db_sockets_dir()));
        self.executor.execute(&mut command)?;
        self.wait_ready(DEFAULT_READY_TIMEOUT)
    }

    pub fn stop(&self) -> Result<(), DatabaseError> {
        let mut command = Command::new(self.paths.pg_ctl());
        command.args(["stop", "-w", "-D"]).arg(self.paths.db_data_dir());
        self.executor.execute(&mut command)?;
        Ok(())
    }

    /// Runs one statement as the database superuser over the local socket.
    pub fn run_sql(&self, sql: &str) -> Result<String, ExecutionError> {
        let mut command = Command::new(self.paths.psql());
        command
            .arg("-h")
            .arg(self.paths.db_sockets_dir())
            .args(["-d", "postgres", "-U", SUPERUSER, "-c", sql]);
        let output = self.executor.execute(&mut command)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Waits until the engine answers a trivial query.
    ///
    /// A query that fails is retried; a query that cannot be started at all
    /// fails immediately.
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), DatabaseError> {
        let policy = RetryPolicy::new(self.poll_interval, Some(timeout));
        wait_for_condition(&policy, || match self.run_sql(READY_QUERY) {
            Ok(_) => Ok(()),
            Err(err) if err.failure_info().is_some() => {
                Err(CondCheckError::NotYet)
            }
            Err(err) => Err(CondCheckError::Failed(err)),
        })
        .map_err(|err| match err {
            poll::Error::TimedOut(_) => DatabaseError::Timeout(timeout),
            poll::Error::PermanentError(err) => DatabaseError::Command(err),
        })
    }

    /// Applies schema migrations.
    ///
    /// With `capture` the tool's output is collected and only handed back
    /// on failure; otherwise it goes straight to the terminal.
    pub fn migrate(&self, capture: bool) -> Result<(), DatabaseError> {
        let mut command = Command::new(self.paths.region_admin());
        command.arg("dbupgrade");
        let result = if capture {
            self.executor.execute(&mut command)
        } else {
            self.executor.execute_streaming(&mut command)
        };
        match result {
            Ok(_) => Ok(()),
            Err(err) => match err.failure_info() {
                Some(info) => Err(DatabaseError::Migration {
                    code: info.exit_code(),
                    output: capture
                        .then(|| format!("{}{}", info.stdout, info.stderr)),
                }),
                None => Err(DatabaseError::Command(err)),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::TestEnv;
    use assert_matches::assert_matches;
    use controller_utils::host::executor::StaticHandler;
    use controller_utils::{Output, OutputExt};
    use std::os::unix::fs::MetadataExt;
    use std::time::Instant;

    fn local_spec() -> DatabaseConnectionSpec {
        DatabaseConnectionSpec {
            host: "/common/postgres/sockets".to_string(),
            port: None,
            name: "maasdb".to_string(),
            user: "maas".to_string(),
            pass: Some("O'BRIEN42".to_string()),
        }
    }

    #[test]
    fn test_bootstrap_statements_are_quoted() {
        let mut spec = local_spec();
        spec.name = "maas\"db".to_string();
        assert_eq!(
            bootstrap_statements(&spec),
            vec![
                "CREATE USER \"maas\" WITH PASSWORD 'O''BRIEN42';",
                "CREATE DATABASE \"maas\"\"db\";",
                "GRANT ALL PRIVILEGES ON DATABASE \"maas\"\"db\" TO \"maas\";",
            ]
        );
    }

    #[test]
    fn test_wait_ready_times_out() {
        let env = TestEnv::new("test_wait_ready_times_out");
        env.executor.set_wait_handler(Box::new(|_| {
            Output::exit_code(2).set_stderr("could not connect to server")
        }));
        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let err = env.database().wait_ready(timeout).unwrap_err();
        let elapsed = start.elapsed();
        assert_matches!(err, DatabaseError::Timeout(t) if t == timeout);
        assert!(elapsed >= timeout, "gave up early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
        assert!(env.executor.history().len() > 1);
        env.cleanup_successful();
    }

    #[test]
    fn test_wait_ready_succeeds_once_queries_work() {
        let env = TestEnv::new("test_wait_ready_succeeds_once_queries_work");
        let mut handler = StaticHandler::new();
        for _ in 0..2 {
            handler.expect_dynamic(Box::new(|_| Output::failure()));
        }
        handler.expect_dynamic(Box::new(|input| {
            assert_eq!(input.args.last().unwrap(), "SELECT now();");
            Output::success().set_stdout("now\n-----\n")
        }));
        handler.register(&env.executor);
        env.database().wait_ready(Duration::from_secs(5)).unwrap();
        env.cleanup_successful();
    }

    #[test]
    fn test_bootstrap_stops_engine_after_failed_statement() {
        let env = TestEnv::new("test_bootstrap_stops_engine_after_failed_statement");
        let paths = &env.paths;
        let data = paths.db_data_dir();
        let sockets = paths.db_sockets_dir();
        let mut handler = StaticHandler::new();
        handler.expect_ok(format!(
            "{} -D {data} -U postgres -E UTF8 --locale=C",
            paths.initdb()
        ));
        handler.expect_dynamic(Box::new(|input| {
            assert_eq!(input.program_name(), "pg_ctl");
            assert_eq!(input.args[0], "start");
            Output::success()
        }));
        handler.expect_dynamic(Box::new(move |input| {
            assert_eq!(input.program_name(), "psql");
            assert_eq!(
                input.args,
                [
                    "-h",
                    sockets.as_str(),
                    "-d",
                    "postgres",
                    "-U",
                    "postgres",
                    "-c",
                    "SELECT now();"
                ]
            );
            Output::success()
        }));
        handler.expect_dynamic(Box::new(|input| {
            assert!(input.args.last().unwrap().starts_with("CREATE USER"));
            Output::exit_code(1).set_stderr("role \"maas\" already exists")
        }));
        handler.expect_ok(format!("{} stop -w -D {data}", paths.pg_ctl()));
        handler.register(&env.executor);

        let err = env.database().bootstrap(&local_spec()).unwrap_err();
        assert_matches!(err, DatabaseError::Command(_));
        env.cleanup_successful();
    }

    #[test]
    fn test_initialize_prepares_directories() {
        let env = TestEnv::new("test_initialize_prepares_directories");
        // Leftovers from an earlier cluster, created with the default umask
        // rather than the modes the database directories need.
        std::fs::create_dir_all(env.paths.db_data_dir().join("base")).unwrap();
        std::fs::create_dir_all(env.paths.db_sockets_dir()).unwrap();
        for dir in [env.paths.db_base_dir(), env.paths.db_sockets_dir()] {
            std::fs::set_permissions(&dir, Permissions::from_mode(0o755))
                .unwrap();
        }

        env.database()
            .initialize(&local_spec(), &env.service, env.runner.as_ref())
            .unwrap();

        let tasks = env.runner.tasks();
        assert_eq!(tasks.len(), 2);
        assert_matches!(
            &tasks[0],
            UnprivilegedTask::RemoveDirectory { path } if *path == env.paths.db_data_dir()
        );
        assert_matches!(
            &tasks[1],
            UnprivilegedTask::BootstrapDatabase { spec } if *spec == local_spec()
        );

        let mode_of = |path: Utf8PathBuf| {
            std::fs::metadata(path).unwrap().permissions().mode() & 0o777
        };
        assert_eq!(mode_of(env.paths.db_base_dir()), 0o770);
        assert_eq!(
            std::fs::metadata(env.paths.db_base_dir()).unwrap().gid(),
            env.service.gid
        );
        assert_eq!(mode_of(env.paths.db_sockets_dir()), 0o775);
        assert!(env.paths.db_data_dir().is_dir());
        assert!(!env.paths.db_data_dir().join("base").exists());
        assert!(env.paths.db_log_file().is_file());

        let programs: Vec<String> = env
            .executor
            .history()
            .iter()
            .map(|input| input.program_name().to_string())
            .collect();
        assert_eq!(
            programs,
            ["initdb", "pg_ctl", "psql", "psql", "psql", "psql", "pg_ctl"]
        );
        env.cleanup_successful();
    }

    #[test]
    fn test_captured_migration_failure() {
        let env = TestEnv::new("test_captured_migration_failure");
        env.executor.set_wait_handler(Box::new(|input| {
            assert_eq!(input.program_name(), "maas-region");
            assert_eq!(input.args, ["dbupgrade"]);
            Output::exit_code(3)
                .set_stdout("Applying maasserver.0001...")
                .set_stderr("django.db.utils.OperationalError")
        }));
        let err = env.database().migrate(true).unwrap_err();
        assert_matches!(
            err,
            DatabaseError::Migration { code: 3, output: Some(output) }
                if output.contains("Applying") && output.contains("OperationalError")
        );
        env.cleanup_successful();
    }

    #[test]
    fn test_streamed_migration_failure() {
        let env = TestEnv::new("test_streamed_migration_failure");
        env.executor.set_wait_handler(Box::new(|_| Output::exit_code(4)));
        assert_matches!(
            env.database().migrate(false),
            Err(DatabaseError::Migration { code: 4, output: None })
        );
        env.cleanup_successful();
    }
}
