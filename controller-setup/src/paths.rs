// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem layout of an installed controller.
//!
//! Everything is derived from three roots: the read-only installation
//! (`snap`), per-revision writable data (`snap_data`) and data shared across
//! revisions (`snap_common`). Components are handed a [`Paths`] at
//! construction and never consult the process environment themselves.

use camino::{Utf8Path, Utf8PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    snap: Utf8PathBuf,
    snap_data: Utf8PathBuf,
    snap_common: Utf8PathBuf,
}

impl Paths {
    pub fn new(
        snap: impl Into<Utf8PathBuf>,
        snap_data: impl Into<Utf8PathBuf>,
        snap_common: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            snap: snap.into(),
            snap_data: snap_data.into(),
            snap_common: snap_common.into(),
        }
    }

    pub fn snap(&self) -> &Utf8Path {
        &self.snap
    }

    pub fn snap_data(&self) -> &Utf8Path {
        &self.snap_data
    }

    pub fn snap_common(&self) -> &Utf8Path {
        &self.snap_common
    }

    /// An executable shipped in the installation's `bin` directory.
    pub fn bin(&self, name: &str) -> Utf8PathBuf {
        self.snap.join("bin").join(name)
    }

    pub fn psql(&self) -> Utf8PathBuf {
        self.bin("psql")
    }

    pub fn pg_ctl(&self) -> Utf8PathBuf {
        self.bin("pg_ctl")
    }

    pub fn initdb(&self) -> Utf8PathBuf {
        self.bin("initdb")
    }

    pub fn region_admin(&self) -> Utf8PathBuf {
        self.bin("maas-region")
    }

    pub fn maas_cli(&self) -> Utf8PathBuf {
        self.bin("maas")
    }

    pub fn supervisorctl(&self) -> Utf8PathBuf {
        self.bin("run-supervisorctl")
    }

    pub fn supervisord_template(&self) -> Utf8PathBuf {
        self.snap.join("usr/share/maas/supervisord.conf.template")
    }

    pub fn supervisord_dir(&self) -> Utf8PathBuf {
        self.snap_data.join("supervisord")
    }

    pub fn supervisord_conf(&self) -> Utf8PathBuf {
        self.supervisord_dir().join("supervisord.conf")
    }

    pub fn supervisord_pid(&self) -> Utf8PathBuf {
        self.supervisord_dir().join("supervisord.pid")
    }

    pub fn config_file(&self) -> Utf8PathBuf {
        self.snap_data.join("regiond.conf")
    }

    pub fn secret_file(&self) -> Utf8PathBuf {
        self.snap_data.join("var/lib/maas/secret")
    }

    pub fn mode_file(&self) -> Utf8PathBuf {
        self.snap_common.join("snap_mode")
    }

    pub fn db_base_dir(&self) -> Utf8PathBuf {
        self.snap_common.join("postgres")
    }

    pub fn db_data_dir(&self) -> Utf8PathBuf {
        self.db_base_dir().join("data")
    }

    pub fn db_sockets_dir(&self) -> Utf8PathBuf {
        self.db_base_dir().join("sockets")
    }

    pub fn db_log_file(&self) -> Utf8PathBuf {
        self.snap_common.join("log/postgresql-init.log")
    }

    /// Socket of a separately installed test database, if one is connected.
    pub fn test_db_socket(&self) -> Utf8PathBuf {
        self.snap_common.join("test-db-socket")
    }
}
