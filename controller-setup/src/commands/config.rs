// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `config`: showing or changing the settings of the running mode.

use super::{DatabaseFlags, TuningFlags};
use crate::arguments;
use crate::context::SetupContext;
use crate::error::{ConfigurationError, SetupError};
use crate::mode::Mode;
use crate::settings::{self, missing_requirements, Settings, SettingsPatch};
use controller_utils::cmd::EXIT_SUCCESS;
use slog::info;

const HIDDEN: &str = "(hidden)";

#[derive(Clone, Debug, Default, clap::Args)]
pub struct ConfigArgs {
    /// Show the current configuration. Default when no settings are given.
    #[arg(long)]
    pub show: bool,
    /// Output the current configuration in a parsable format.
    #[arg(long)]
    pub parsable: bool,
    /// Show the hidden database password.
    #[arg(long)]
    pub show_database_password: bool,
    /// Show the hidden secret.
    #[arg(long)]
    pub show_secret: bool,
    /// URL that MAAS should use for communicate from the nodes to MAAS and
    /// other controllers of MAAS.
    #[arg(long)]
    pub maas_url: Option<String>,
    #[command(flatten)]
    pub database: DatabaseFlags,
    /// Secret token required for the rack controller to talk to the region
    /// controller(s).
    #[arg(long)]
    pub secret: Option<String>,
    #[command(flatten)]
    pub tuning: TuningFlags,
    /// Render the supervisor configuration for the current mode and exit.
    #[arg(long, hide = true)]
    pub render: bool,
}

impl ConfigArgs {
    fn given_flags(&self) -> Vec<&'static str> {
        let mut given = Vec::new();
        if self.maas_url.is_some() {
            given.push(arguments::MAAS_URL);
        }
        given.extend(self.database.given_flags());
        if self.secret.is_some() {
            given.push(arguments::SECRET);
        }
        given.extend(self.tuning.given_flags());
        given
    }

    fn settings(&self) -> SettingsPatch {
        let mut patch = self.database.settings();
        if let Some(url) = &self.maas_url {
            patch.set(settings::MAAS_URL, url.as_str());
        }
        self.tuning.add_to(&mut patch);
        patch
    }
}

pub fn run(ctx: &SetupContext, args: &ConfigArgs) -> Result<i32, SetupError> {
    ctx.ensure_root("config")?;
    let mode = ctx.mode_store().get()?;

    if args.render {
        ctx.supervisor().render(mode)?;
        return Ok(EXIT_SUCCESS);
    }

    let given = args.given_flags();
    if args.show || given.is_empty() {
        show(ctx, args, mode)?;
        return Ok(EXIT_SUCCESS);
    }

    let unsupported = arguments::unsupported_flags(mode, &given);
    if !unsupported.is_empty() {
        return Err(
            ConfigurationError::UnsupportedFlags { mode, flags: unsupported }
                .into(),
        );
    }

    // Only what actually differs is written.
    let current = ctx.config.get()?;
    let mut changes = SettingsPatch::new();
    for (key, value) in args.settings().iter() {
        if current.get(key) != value {
            changes.set_or_remove(key, value.cloned());
        }
    }
    let secret_store = ctx.secret_store();
    let current_secret = secret_store.get()?;
    let new_secret = args
        .secret
        .as_deref()
        .filter(|secret| current_secret.as_deref() != Some(*secret));

    let mut merged = current;
    changes.apply_to(&mut merged);
    let secret = new_secret.or(current_secret.as_deref());
    let missing = missing_requirements(mode, &merged, secret);
    if !missing.is_empty() {
        return Err(ConfigurationError::MissingSettings { mode, missing }.into());
    }

    if changes.is_empty() && new_secret.is_none() {
        info!(ctx.log, "configuration unchanged");
        return Ok(EXIT_SUCCESS);
    }
    if !changes.is_empty() {
        ctx.config.update(&changes)?;
    }
    if let Some(secret) = new_secret {
        secret_store.set(Some(secret))?;
    }

    let label = if mode == Mode::None {
        "Stopping services"
    } else {
        "Restarting services"
    };
    let supervisor = ctx.supervisor();
    ctx.progress().run(label, || supervisor.reload())?;
    Ok(EXIT_SUCCESS)
}

fn show(
    ctx: &SetupContext,
    args: &ConfigArgs,
    mode: Mode,
) -> Result<(), SetupError> {
    let console = ctx.console.as_ref();
    if args.parsable {
        console.print(&format!("mode={mode}"));
    } else {
        console.print(&format!("Mode: {mode}"));
    }
    if mode == Mode::None {
        return Ok(());
    }
    if !args.parsable {
        console.print("Settings:");
    }

    let config = ctx.config.get()?;
    let value = |key: &str| {
        config.get(key).map(ToString::to_string).unwrap_or_default()
    };
    let show_value = |key: &str| {
        console.print(&format!("{key}={}", value(key)));
    };
    show_value(settings::MAAS_URL);
    if mode.uses_database() {
        show_value(settings::DATABASE_HOST);
        show_value(settings::DATABASE_PORT);
        show_value(settings::DATABASE_NAME);
        show_value(settings::DATABASE_USER);
        let pass = if args.show_database_password {
            value(settings::DATABASE_PASS)
        } else {
            HIDDEN.to_string()
        };
        console.print(&format!("{}={pass}", settings::DATABASE_PASS));
    }
    if mode == Mode::Rack {
        let secret = if args.show_secret {
            ctx.secret_store().get()?.unwrap_or_default()
        } else {
            HIDDEN.to_string()
        };
        console.print(&format!("{}={secret}", settings::SECRET));
    } else {
        show_optional(&config, |key| show_value(key));
    }
    Ok(())
}

/// Region tuning settings are only listed once they have been set.
fn show_optional(config: &Settings, mut show: impl FnMut(&str)) {
    for key in [settings::NUM_WORKERS, settings::DEBUG, settings::DEBUG_QUERIES]
    {
        if config.contains_key(key) {
            show(key);
        }
    }
}
