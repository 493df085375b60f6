// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operating modes and their persisted record.

use camino::{Utf8Path, Utf8PathBuf};
use controller_utils::fs::{write_atomic, AtomicWriteError};
use std::fmt;
use std::io;
use std::str::FromStr;

/// The role assignment of this host.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, clap::ValueEnum,
)]
pub enum Mode {
    /// No services
    #[default]
    None,
    /// Rack controller only
    Rack,
    /// Region controller only
    Region,
    /// Both region and rack controllers
    #[value(name = "region+rack")]
    RegionRack,
    /// Region and rack controllers with a locally managed database
    All,
}

impl Mode {
    pub const ALL: [Mode; 5] =
        [Mode::None, Mode::Rack, Mode::Region, Mode::RegionRack, Mode::All];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Rack => "rack",
            Mode::Region => "region",
            Mode::RegionRack => "region+rack",
            Mode::All => "all",
        }
    }

    /// Modes whose region services talk to a database.
    pub fn uses_database(&self) -> bool {
        matches!(self, Mode::Region | Mode::RegionRack | Mode::All)
    }

    /// Modes connected to a database that is managed elsewhere.
    pub fn uses_external_database(&self) -> bool {
        matches!(self, Mode::Region | Mode::RegionRack)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown mode: {0:?}")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModeStoreError {
    #[error("failed to read mode from {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },

    #[error("invalid mode recorded in {path}")]
    Invalid {
        path: Utf8PathBuf,
        #[source]
        err: UnknownMode,
    },

    #[error(transparent)]
    Write(#[from] AtomicWriteError),
}

/// The persisted current mode: a single trimmed line in a file.
///
/// A missing file means [`Mode::None`].
pub struct ModeStore {
    path: Utf8PathBuf,
}

impl ModeStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn get(&self) -> Result<Mode, ModeStoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Mode::None)
            }
            Err(err) => {
                return Err(ModeStoreError::Read { path: self.path.clone(), err })
            }
        };
        contents.trim().parse().map_err(|err| ModeStoreError::Invalid {
            path: self.path.clone(),
            err,
        })
    }

    pub fn set(&self, mode: Mode) -> Result<(), ModeStoreError> {
        write_atomic(&self.path, mode.as_str().as_bytes())?;
        Ok(())
    }
}
