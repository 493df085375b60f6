// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `migrate`: bringing the connected database schema up to date.

use crate::context::SetupContext;
use crate::database::DEFAULT_READY_TIMEOUT;
use crate::error::SetupError;
use crate::mode::Mode;
use controller_utils::cmd::{EXIT_FAILURE, EXIT_SUCCESS};

pub const NOT_CONFIGURED: &str = "MAAS is not configured";

#[derive(Clone, Debug, Default, clap::Args)]
pub struct MigrateArgs {
    /// Migrate if the current mode has a database, and succeed quietly
    /// otherwise. Used by installation hooks.
    #[arg(long, hide = true)]
    pub configure: bool,
}

pub fn run(ctx: &SetupContext, args: &MigrateArgs) -> Result<i32, SetupError> {
    ctx.ensure_root("migrate")?;
    let mode = ctx.mode_store().get()?;
    let database = ctx.database();

    if args.configure {
        match mode {
            Mode::All => database.wait_ready(DEFAULT_READY_TIMEOUT)?,
            Mode::Region | Mode::RegionRack => (),
            Mode::None | Mode::Rack => return Ok(EXIT_SUCCESS),
        }
    } else {
        match mode {
            Mode::None => {
                ctx.console.print(NOT_CONFIGURED);
                return Ok(EXIT_FAILURE);
            }
            Mode::Rack => {
                ctx.console.print(
                    "Mode 'rack' is not connected to a database. \
                     No migrations to perform.",
                );
                return Ok(EXIT_FAILURE);
            }
            Mode::Region | Mode::RegionRack | Mode::All => (),
        }
    }

    database.migrate(false)?;
    Ok(EXIT_SUCCESS)
}
