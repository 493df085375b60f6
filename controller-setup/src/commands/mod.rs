// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subcommands of `controller-setup`.
//!
//! Each command takes a [`SetupContext`] and returns the exit status the
//! process should end with. Errors carry their own exit status
//! ([`SetupError::exit_code`]).

pub mod config;
pub mod init;
pub mod migrate;
pub mod status;

use crate::arguments;
use crate::context::SetupContext;
use crate::database::DatabaseError;
use crate::database_uri::DatabaseOptions;
use crate::error::{ConfigurationError, SetupError};
use crate::prompt::PromptError;
use crate::settings::{self, SettingsPatch};
use controller_utils::cmd::EXIT_SUCCESS;

/// Deprecated discrete database flags.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct DatabaseFlags {
    #[arg(long, hide = true)]
    pub database_host: Option<String>,
    #[arg(long, hide = true)]
    pub database_port: Option<u16>,
    #[arg(long, hide = true)]
    pub database_name: Option<String>,
    #[arg(long, hide = true)]
    pub database_user: Option<String>,
    #[arg(long, hide = true)]
    pub database_pass: Option<String>,
}

impl DatabaseFlags {
    fn given_flags(&self) -> Vec<&'static str> {
        [
            (arguments::DATABASE_HOST, self.database_host.is_some()),
            (arguments::DATABASE_PORT, self.database_port.is_some()),
            (arguments::DATABASE_NAME, self.database_name.is_some()),
            (arguments::DATABASE_USER, self.database_user.is_some()),
            (arguments::DATABASE_PASS, self.database_pass.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, given)| given.then_some(name))
        .collect()
    }

    fn to_options(&self, uri: Option<&str>) -> DatabaseOptions {
        DatabaseOptions {
            uri: uri.map(str::to_string),
            host: self.database_host.clone(),
            port: self.database_port,
            name: self.database_name.clone(),
            user: self.database_user.clone(),
            pass: self.database_pass.clone(),
        }
    }

    /// The flags as settings, for those that were given.
    fn settings(&self) -> SettingsPatch {
        let mut patch = SettingsPatch::new();
        if let Some(host) = &self.database_host {
            patch.set(settings::DATABASE_HOST, host.as_str());
        }
        if let Some(port) = self.database_port {
            patch.set(settings::DATABASE_PORT, port);
        }
        if let Some(name) = &self.database_name {
            patch.set(settings::DATABASE_NAME, name.as_str());
        }
        if let Some(user) = &self.database_user {
            patch.set(settings::DATABASE_USER, user.as_str());
        }
        if let Some(pass) = &self.database_pass {
            patch.set(settings::DATABASE_PASS, pass.as_str());
        }
        patch
    }
}

/// Optional region controller settings.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct TuningFlags {
    /// Number of regiond worker processes to run.
    #[arg(long)]
    pub num_workers: Option<u32>,
    /// Enable debug mode for detailed error and log reporting.
    #[arg(long, conflicts_with = "disable_debug")]
    pub enable_debug: bool,
    /// Disable debug mode.
    #[arg(long)]
    pub disable_debug: bool,
    /// Enable query debugging. Requires debug to also be enabled.
    #[arg(long, conflicts_with = "disable_debug_queries")]
    pub enable_debug_queries: bool,
    /// Disable query debugging.
    #[arg(long)]
    pub disable_debug_queries: bool,
}

impl TuningFlags {
    fn given_flags(&self) -> Vec<&'static str> {
        [
            (arguments::NUM_WORKERS, self.num_workers.is_some()),
            (arguments::ENABLE_DEBUG, self.enable_debug),
            (arguments::DISABLE_DEBUG, self.disable_debug),
            (arguments::ENABLE_DEBUG_QUERIES, self.enable_debug_queries),
            (arguments::DISABLE_DEBUG_QUERIES, self.disable_debug_queries),
        ]
        .into_iter()
        .filter_map(|(name, given)| given.then_some(name))
        .collect()
    }

    fn toggle(enable: bool, disable: bool) -> Option<bool> {
        match (enable, disable) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        }
    }

    fn add_to(&self, patch: &mut SettingsPatch) {
        if let Some(workers) = self.num_workers {
            patch.set(settings::NUM_WORKERS, workers);
        }
        if let Some(debug) = Self::toggle(self.enable_debug, self.disable_debug)
        {
            patch.set(settings::DEBUG, debug);
        }
        if let Some(debug_queries) = Self::toggle(
            self.enable_debug_queries,
            self.disable_debug_queries,
        ) {
            patch.set(settings::DEBUG_QUERIES, debug_queries);
        }
    }
}

impl From<PromptError> for SetupError {
    fn from(err: PromptError) -> Self {
        SetupError::Configuration(ConfigurationError::Prompt(err))
    }
}

/// Runs schema migrations under a progress label.
///
/// Output is captured on a terminal, where it would fight with the spinner,
/// and shown only when the migrations fail.
fn perform_migrations(ctx: &SetupContext) -> Result<(), SetupError> {
    let capture = ctx.console.is_terminal();
    let database = ctx.database();
    let result = ctx
        .progress()
        .run("Performing database migrations", || database.migrate(capture));
    if let Err(DatabaseError::Migration { output: Some(output), .. }) = &result
    {
        ctx.console.print("Failed to perform migrations:");
        ctx.console.print(output);
        ctx.console.print("");
    }
    result.map_err(SetupError::from)
}

/// Re-renders the supervisor configuration for the current mode and reloads
/// the supervisor. Run by installation hooks.
pub fn reconfigure_supervisord(ctx: &SetupContext) -> Result<i32, SetupError> {
    let mode = ctx.mode_store().get()?;
    let supervisor = ctx.supervisor();
    supervisor.render(mode)?;
    supervisor.reload()?;
    Ok(EXIT_SUCCESS)
}
