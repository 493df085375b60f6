// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem helpers.

use camino::Utf8Path;
use camino_tempfile::NamedUtf8TempFile;
use std::io::Write;

#[derive(Debug, thiserror::Error)]
#[error("failed to write {path}")]
pub struct AtomicWriteError {
    pub path: camino::Utf8PathBuf,
    #[source]
    pub err: std::io::Error,
}

/// Replaces the contents of `path` with `contents` so that readers observe
/// either the old file or the new one, never a partial write.
///
/// The temporary file is created next to `path`, so the final rename stays
/// within one filesystem.
pub fn write_atomic(
    path: &Utf8Path,
    contents: &[u8],
) -> Result<(), AtomicWriteError> {
    let wrap = |err| AtomicWriteError { path: path.to_owned(), err };
    let dir = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let mut file = NamedUtf8TempFile::new_in(dir).map_err(wrap)?;
    file.write_all(contents).map_err(wrap)?;
    file.as_file().sync_all().map_err(wrap)?;
    file.persist(path).map_err(|e| wrap(e.error))?;
    Ok(())
}
