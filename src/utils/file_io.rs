use std::fs::create_dir_all;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;
use tracing::error;

use crate::Result;
use crate::StorageError;

pub fn create_parent_dir_if_not_exist(path: &Path) -> Result<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            if let Err(e) = create_dir_all(parent_dir) {
                error!("Failed to create directory {:?}: {:?}", parent_dir, e);
                return Err(StorageError::PathError {
                    path: parent_dir.to_path_buf(),
                    source: e,
                }
                .into());
            }
        }
    }
    Ok(())
}

pub fn open_file_for_append(path: &Path) -> Result<File> {
    create_parent_dir_if_not_exist(path)?;
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| StorageError::PathError {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(file)
}

/// Replaces `path` with `contents` so readers observe either the old or the
/// new file, never a mix.
///
/// The temp file lives in the destination directory; a cross-filesystem
/// rename would not be atomic.
pub fn write_atomically(
    path: &Path,
    contents: &[u8],
) -> Result<()> {
    create_parent_dir_if_not_exist(path)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let path_error = |source| StorageError::PathError {
        path: dir.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(path_error)?;
    tmp.write_all(contents).map_err(StorageError::IoError)?;
    tmp.flush().map_err(StorageError::IoError)?;
    tmp.as_file().sync_all().map_err(StorageError::IoError)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))
            .map_err(StorageError::IoError)?;
    }

    tmp.persist(path).map_err(|e| StorageError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    debug!(?path, bytes = contents.len(), "file replaced atomically");
    Ok(())
}
