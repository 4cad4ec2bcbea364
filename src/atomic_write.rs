use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Error;

/// Replace `path` with `contents` so readers see either the old or the new
/// file, never a partial one.
///
/// The temp file lives in the target's directory so the final rename stays on
/// one filesystem. Permissions of an existing target are carried over.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Error> {
    write_atomic_with(path, contents, |tmp, path| {
        tmp.persist(path).map(drop).map_err(|e| e.error)
    })
}

/// `write_atomic` with the final rename supplied by the caller.
fn write_atomic_with<F>(path: &Path, contents: &[u8], persist: F) -> Result<(), Error>
where
    F: FnOnce(NamedTempFile, &Path) -> io::Result<()>,
{
    let write_err = |source| Error::ConfigWrite {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(write_err)?;
    }

    persist(tmp, path).map_err(write_err)?;
    debug!(path = %path.display(), bytes = contents.len(), "atomic_write:replaced");
    Ok(())
}
