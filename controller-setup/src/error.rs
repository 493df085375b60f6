// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::database::DatabaseError;
use crate::mode::{Mode, ModeStoreError};
use crate::prompt::PromptError;
use crate::secret::SecretError;
use crate::settings::SettingsError;
use crate::supervisor::SupervisorError;
use controller_utils::cmd::EXIT_FAILURE;
use controller_utils::privilege::PrivilegeError;
use controller_utils::ExecutionError;
use itertools::Itertools;

/// Input that cannot be acted on. Reported before anything is changed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error(
        "Can't use deprecated --database-* parameters together with \
         --database-uri"
    )]
    ConflictingDatabaseOptions,

    #[error(
        "Database URI needs to be either 'maas-test-db:///' or start with \
         'postgres://'"
    )]
    UnsupportedScheme,

    #[error("Error parsing database URI: {0}")]
    InvalidUri(String),

    #[error(
        "Error parsing database URI: Unsupported parameters: {}",
        .0.iter().join(", ")
    )]
    UnsupportedParameters(Vec<String>),

    #[error("No user found in URI: {0}")]
    MissingUser(String),

    #[error(
        "Following flags are not supported in '{mode}' mode: {}",
        .flags.iter().join(", ")
    )]
    UnsupportedFlags { mode: Mode, flags: Vec<String> },

    #[error(
        "Missing required settings for '{mode}' mode: {}",
        .missing.iter().join(", ")
    )]
    MissingSettings { mode: Mode, missing: Vec<&'static str> },

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("The '{0}' command must be run by root.")]
    NotRoot(&'static str),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Mode(#[from] ModeStoreError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("admin creation failed")]
    CreateAdmin(#[source] ExecutionError),
}

impl SetupError {
    /// The process exit status this error should produce.
    ///
    /// Failures of tools whose output the operator has seen are mirrored;
    /// everything else is a plain failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SetupError::Database(DatabaseError::Migration { code, .. }) => {
                *code
            }
            SetupError::CreateAdmin(err) => err
                .failure_info()
                .map_or(EXIT_FAILURE, |info| info.exit_code()),
            _ => EXIT_FAILURE,
        }
    }
}
