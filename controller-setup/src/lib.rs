// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Moving a controller host between its operating modes.
//!
//! A mode decides which services run: a rack controller, a region
//! controller, both, or both with a locally managed PostgreSQL instance
//! (`all`). Changing mode means resolving the settings the target mode
//! needs, stopping what runs now, persisting the new settings, preparing the
//! database when it is local, and having the process supervisor start the
//! new service set.

pub mod arguments;
pub mod commands;
pub mod context;
pub mod database;
pub mod database_uri;
pub mod error;
pub mod mode;
pub mod network;
pub mod paths;
pub mod progress;
pub mod prompt;
pub mod secret;
pub mod settings;
pub mod supervisor;
pub mod unprivileged;

#[cfg(test)]
mod testing;

pub use context::SetupContext;
pub use error::{ConfigurationError, SetupError};
pub use mode::Mode;
pub use paths::Paths;
