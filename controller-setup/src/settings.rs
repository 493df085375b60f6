// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Region controller settings and the per-mode requirements on them.

use crate::mode::Mode;
use camino::{Utf8Path, Utf8PathBuf};
use controller_utils::fs::{write_atomic, AtomicWriteError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;

pub const MAAS_URL: &str = "maas_url";
pub const DATABASE_HOST: &str = "database_host";
pub const DATABASE_PORT: &str = "database_port";
pub const DATABASE_NAME: &str = "database_name";
pub const DATABASE_USER: &str = "database_user";
pub const DATABASE_PASS: &str = "database_pass";
pub const NUM_WORKERS: &str = "num_workers";
pub const DEBUG: &str = "debug";
pub const DEBUG_QUERIES: &str = "debug_queries";

/// Name under which a missing secret is reported.
pub const SECRET: &str = "secret";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{b}"),
            SettingValue::Int(i) => write!(f, "{i}"),
            SettingValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<u16> for SettingValue {
    fn from(value: u16) -> Self {
        SettingValue::Int(i64::from(value))
    }
}

impl From<u32> for SettingValue {
    fn from(value: u32) -> Self {
        SettingValue::Int(i64::from(value))
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Str(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Str(value.to_string())
    }
}

pub type Settings = BTreeMap<String, SettingValue>;

/// A batch of changes to [`Settings`]: `Some` sets a key, `None` removes it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettingsPatch(BTreeMap<String, Option<SettingValue>>);

impl SettingsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<SettingValue>) {
        self.0.insert(key.to_string(), Some(value.into()));
    }

    pub fn remove(&mut self, key: &str) {
        self.0.insert(key.to_string(), None);
    }

    /// Sets `key` when `value` is present, removes it otherwise.
    pub fn set_or_remove<V: Into<SettingValue>>(
        &mut self,
        key: &str,
        value: Option<V>,
    ) {
        match value {
            Some(value) => self.set(key, value),
            None => self.remove(key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&SettingValue>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn apply_to(&self, settings: &mut Settings) {
        for (key, value) in &self.0 {
            match value {
                Some(value) => {
                    settings.insert(key.clone(), value.clone());
                }
                None => {
                    settings.remove(key);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },

    #[error("failed to parse settings in {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },

    #[error("failed to serialize settings")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Write(#[from] AtomicWriteError),
}

/// Durable key/value settings.
///
/// `update` applies the whole patch or none of it.
pub trait ConfigStore: Send + Sync {
    fn get(&self) -> Result<Settings, SettingsError>;
    fn update(&self, patch: &SettingsPatch) -> Result<(), SettingsError>;
}

/// A [`ConfigStore`] kept as a TOML table in a single file.
pub struct FileConfigStore {
    path: Utf8PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self) -> Result<Settings, SettingsError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Settings::new())
            }
            Err(err) => {
                return Err(SettingsError::Read { path: self.path.clone(), err })
            }
        };
        toml::from_str(&contents)
            .map_err(|err| SettingsError::Parse { path: self.path.clone(), err })
    }

    fn update(&self, patch: &SettingsPatch) -> Result<(), SettingsError> {
        let mut settings = self.get()?;
        patch.apply_to(&mut settings);
        let contents = toml::to_string(&settings)?;
        write_atomic(&self.path, contents.as_bytes())?;
        Ok(())
    }
}

/// Something a mode cannot run without.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    Setting(&'static str),
    Secret,
}

impl Requirement {
    pub fn name(&self) -> &'static str {
        match self {
            Requirement::Setting(key) => key,
            Requirement::Secret => SECRET,
        }
    }
}

const REGION_REQUIREMENTS: &[Requirement] = &[
    Requirement::Setting(MAAS_URL),
    Requirement::Setting(DATABASE_HOST),
    Requirement::Setting(DATABASE_NAME),
    Requirement::Setting(DATABASE_USER),
];

pub fn requirements(mode: Mode) -> &'static [Requirement] {
    match mode {
        Mode::None => &[],
        Mode::Rack => &[Requirement::Setting(MAAS_URL), Requirement::Secret],
        Mode::Region | Mode::RegionRack | Mode::All => REGION_REQUIREMENTS,
    }
}

/// Returns the requirements of `mode` that are not met, in table order. An
/// empty string counts as missing.
pub fn missing_requirements(
    mode: Mode,
    settings: &Settings,
    secret: Option<&str>,
) -> Vec<&'static str> {
    requirements(mode)
        .iter()
        .filter(|requirement| match requirement {
            Requirement::Setting(key) => match settings.get(*key) {
                None => true,
                Some(SettingValue::Str(s)) => s.is_empty(),
                Some(_) => false,
            },
            Requirement::Secret => secret.map_or(true, str::is_empty),
        })
        .map(Requirement::name)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use camino_tempfile::Utf8TempDir;

    fn region_settings() -> Settings {
        let mut patch = SettingsPatch::new();
        patch.set(MAAS_URL, "http://10.0.0.2:5240/MAAS");
        patch.set(DATABASE_HOST, "db.example.com");
        patch.set(DATABASE_NAME, "maasdb");
        patch.set(DATABASE_USER, "maas");
        let mut settings = Settings::new();
        patch.apply_to(&mut settings);
        settings
    }

    #[test]
    fn test_requirements_per_mode() {
        let empty = Settings::new();
        assert!(missing_requirements(Mode::None, &empty, None).is_empty());
        assert_eq!(
            missing_requirements(Mode::Rack, &empty, None),
            vec![MAAS_URL, SECRET]
        );
        assert_eq!(
            missing_requirements(Mode::Rack, &empty, Some("")),
            vec![MAAS_URL, SECRET]
        );
        for mode in [Mode::Region, Mode::RegionRack, Mode::All] {
            assert_eq!(
                missing_requirements(mode, &empty, Some("s3cret")),
                vec![MAAS_URL, DATABASE_HOST, DATABASE_NAME, DATABASE_USER]
            );
            assert!(missing_requirements(mode, &region_settings(), None)
                .is_empty());
        }
    }

    #[test]
    fn test_empty_string_is_missing() {
        let mut settings = region_settings();
        settings.insert(DATABASE_USER.to_string(), "".into());
        assert_eq!(
            missing_requirements(Mode::Region, &settings, None),
            vec![DATABASE_USER]
        );
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = Utf8TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("regiond.conf"));
        assert!(store.get().unwrap().is_empty());

        let mut patch = SettingsPatch::new();
        patch.set(MAAS_URL, "http://localhost:5240/MAAS");
        patch.set(DATABASE_PORT, 5432u16);
        patch.set(DEBUG, true);
        store.update(&patch).unwrap();

        let settings = store.get().unwrap();
        assert_eq!(
            settings[MAAS_URL],
            SettingValue::from("http://localhost:5240/MAAS")
        );
        assert_eq!(settings[DATABASE_PORT], SettingValue::Int(5432));
        assert_eq!(settings[DEBUG], SettingValue::Bool(true));

        let mut patch = SettingsPatch::new();
        patch.remove(DATABASE_PORT);
        patch.set(NUM_WORKERS, 4u32);
        store.update(&patch).unwrap();
        let settings = store.get().unwrap();
        assert!(!settings.contains_key(DATABASE_PORT));
        assert_eq!(settings[NUM_WORKERS].to_string(), "4");
        assert_eq!(settings[MAAS_URL].to_string(), "http://localhost:5240/MAAS");
    }

    #[test]
    fn test_unparseable_file_is_reported() {
        let dir = Utf8TempDir::new().unwrap();
        let store = FileConfigStore::new(dir.path().join("regiond.conf"));
        std::fs::write(store.path(), "maas_url = ").unwrap();
        assert_matches!(store.get(), Err(SettingsError::Parse { .. }));

        // A failed update leaves the file alone.
        let mut patch = SettingsPatch::new();
        patch.set(DEBUG, false);
        assert!(store.update(&patch).is_err());
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "maas_url = "
        );
    }
}
