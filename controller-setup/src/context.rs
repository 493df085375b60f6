// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Everything a command needs, assembled once by the binary.

use crate::database::DatabaseManager;
use crate::error::SetupError;
use crate::mode::ModeStore;
use crate::paths::Paths;
use crate::progress::{self, ProgressReporter};
use crate::prompt::Console;
use crate::secret::SecretStore;
use crate::settings::ConfigStore;
use crate::supervisor::{self, Supervisor};
use crate::unprivileged::UnprivilegedRunner;
use controller_utils::poll::RetryPolicy;
use controller_utils::privilege::Identity;
use controller_utils::process::BoxedSignaller;
use controller_utils::BoxedExecutor;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;

/// Account that owns the local database.
pub const SERVICE_ACCOUNT: &str = "snap_daemon";

/// Pacing of the waits and redraws commands perform.
#[derive(Clone, Copy, Debug)]
pub struct Timing {
    /// How the supervisor is polled after a reload.
    pub supervisor: RetryPolicy,
    /// How often the database is checked for readiness.
    pub database_poll: Duration,
    pub progress: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            supervisor: RetryPolicy::new(supervisor::DEFAULT_POLL_INTERVAL, None)
                .with_initial_delay(supervisor::DEFAULT_SETTLE_DELAY),
            database_poll: crate::database::DEFAULT_POLL_INTERVAL,
            progress: progress::DEFAULT_INTERVAL,
        }
    }
}

pub struct SetupContext {
    pub log: Logger,
    pub paths: Paths,
    pub console: Arc<dyn Console>,
    pub executor: BoxedExecutor,
    pub signaller: BoxedSignaller,
    pub runner: Arc<dyn UnprivilegedRunner>,
    pub config: Arc<dyn ConfigStore>,
    /// The account database work is delegated to.
    pub service: Identity,
    /// Whether the invoking user is root.
    pub is_root: bool,
    pub timing: Timing,
}

impl SetupContext {
    /// Fails unless invoked by root. Called before anything else is done.
    pub fn ensure_root(&self, command: &'static str) -> Result<(), SetupError> {
        if self.is_root {
            Ok(())
        } else {
            Err(SetupError::NotRoot(command))
        }
    }

    pub fn mode_store(&self) -> ModeStore {
        ModeStore::new(self.paths.mode_file())
    }

    pub fn secret_store(&self) -> SecretStore {
        SecretStore::new(self.paths.secret_file())
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(
            &self.log,
            self.paths.clone(),
            self.executor.clone(),
            self.signaller.clone(),
        )
        .with_settle_policy(self.timing.supervisor)
    }

    pub fn database(&self) -> DatabaseManager {
        DatabaseManager::new(&self.log, self.paths.clone(), self.executor.clone())
            .with_poll_interval(self.timing.database_poll)
    }

    pub fn progress(&self) -> ProgressReporter {
        ProgressReporter::new(self.console.clone())
            .with_interval(self.timing.progress)
    }
}
