// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The shared secret a rack controller presents to the region.

use camino::{Utf8Path, Utf8PathBuf};
use controller_utils::fs::write_atomic;
use std::io;

#[derive(Debug, thiserror::Error)]
#[error("failed to {action} secret at {path}")]
pub struct SecretError {
    pub action: &'static str,
    pub path: Utf8PathBuf,
    #[source]
    pub err: io::Error,
}

/// A plaintext secret file. An empty file reads as no secret.
pub struct SecretStore {
    path: Utf8PathBuf,
}

impl SecretStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn get(&self) -> Result<Option<String>, SecretError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let secret = contents.trim();
                Ok((!secret.is_empty()).then(|| secret.to_string()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.error("read", err)),
        }
    }

    /// Writes the secret, or deletes the file when there is none.
    pub fn set(&self, secret: Option<&str>) -> Result<(), SecretError> {
        match secret.filter(|s| !s.is_empty()) {
            Some(secret) => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| self.error("write", err))?;
                }
                write_atomic(&self.path, secret.as_bytes())
                    .map_err(|e| self.error("write", e.err))
            }
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(self.error("remove", err)),
            },
        }
    }

    fn error(&self, action: &'static str, err: io::Error) -> SecretError {
        SecretError { action, path: self.path.clone(), err }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn test_write_read_delete() {
        let dir = Utf8TempDir::new().unwrap();
        let store = SecretStore::new(dir.path().join("var/lib/maas/secret"));
        assert_eq!(store.get().unwrap(), None);

        store.set(Some("0123abcd")).unwrap();
        assert_eq!(store.get().unwrap().as_deref(), Some("0123abcd"));

        store.set(None).unwrap();
        assert!(!store.path().exists());
        // Deleting twice is fine.
        store.set(None).unwrap();
    }

    #[test]
    fn test_whitespace_only_is_absent() {
        let dir = Utf8TempDir::new().unwrap();
        let store = SecretStore::new(dir.path().join("secret"));
        std::fs::write(store.path(), " \n").unwrap();
        assert_eq!(store.get().unwrap(), None);
        std::fs::write(store.path(), "abc\n").unwrap();
        assert_eq!(store.get().unwrap().as_deref(), Some("abc"));
    }
}
