//! Directory move/copy helpers with cross-filesystem fallbacks.

use std::fs;
use std::path::{Path, PathBuf};

use jwalk::WalkDir;
use plugdeck_core::{HostError, HostResult};

/// Move a directory, falling back to copy + delete when `rename` fails
/// (typically across filesystems).
pub fn move_dir(source: &Path, dest: &Path) -> HostResult<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
    }

    // Fast path for the same filesystem
    match fs::rename(source, dest) {
        Ok(()) => return Ok(()),
        Err(e) => {
            tracing::debug!(
                from = %source.display(),
                to = %dest.display(),
                error = %e,
                "rename failed, copying instead"
            );
        }
    }

    copy_dir(source, dest)?;
    fs::remove_dir_all(source).map_err(|e| HostError::io(source, e))
}

/// Recursively copy the contents of `source` into `dest`, creating `dest`.
pub fn copy_dir(source: &Path, dest: &Path) -> HostResult<()> {
    fs::create_dir_all(dest).map_err(|e| HostError::io(dest, e))?;

    let options = fs_extra::dir::CopyOptions::new()
        .content_only(true)
        .overwrite(true);

    fs_extra::dir::copy(source, dest, &options)
        .map(|_| ())
        .map_err(|e| HostError::Io {
            path: source.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })
}

/// Remove a path whatever it is: a symlink (without following it), a file, or a directory.
pub fn remove_path(path: &Path) -> HostResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(HostError::io(path, e)),
    };

    let result = if meta.file_type().is_symlink() {
        remove_symlink(path)
    } else if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| HostError::io(path, e))
}

#[cfg(unix)]
fn remove_symlink(path: &Path) -> std::io::Result<()> {
    fs::remove_file(path)
}

#[cfg(windows)]
fn remove_symlink(path: &Path) -> std::io::Result<()> {
    // Directory symlinks and junctions are removed as directories on Windows.
    fs::remove_dir(path).or_else(|_| fs::remove_file(path))
}

/// Total size of the regular files under `dir`, in bytes. Symlinks are not
/// followed, so linked packages are not counted twice.
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .skip_hidden(false)
        .follow_links(false)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// If `dir` holds exactly one entry and it is a directory, return that
/// directory; otherwise `dir` itself. Archives frequently wrap their content
/// in a single top-level folder (`package/` for npm tarballs).
pub fn content_root(dir: &Path) -> PathBuf {
    let Ok(entries) = fs::read_dir(dir) else {
        return dir.to_path_buf();
    };
    let entries: Vec<_> = entries.flatten().collect();
    match entries.as_slice() {
        [only] if only.path().is_dir() => only.path(),
        _ => dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_dir_and_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("index.js"), "abcd").unwrap();
        fs::write(src.join("lib").join("a.js"), "12").unwrap();

        let dest = dir.path().join("out").join("pkg");
        move_dir(&src, &dest).unwrap();

        assert!(!src.exists());
        assert_eq!(dir_size(&dest), 6);
    }

    #[cfg(unix)]
    #[test]
    fn test_size_skips_symlinked_trees() {
        let dir = tempfile::TempDir::new().unwrap();
        let shared = dir.path().join("shared");
        fs::create_dir_all(&shared).unwrap();
        fs::write(shared.join("big.js"), "0123456789").unwrap();

        let plugin = dir.path().join("plugin");
        fs::create_dir_all(plugin.join("node_modules")).unwrap();
        fs::write(plugin.join("main.rhai"), "abc").unwrap();
        std::os::unix::fs::symlink(&shared, plugin.join("node_modules").join("shared")).unwrap();

        assert_eq!(dir_size(&plugin), 3);
        assert_eq!(dir_size(dir.path()), 13);
    }

    #[test]
    fn test_content_root_unwraps_single_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("package")).unwrap();
        fs::write(dir.path().join("package").join("package.json"), "{}").unwrap();
        assert_eq!(content_root(dir.path()), dir.path().join("package"));

        fs::write(dir.path().join("README"), "").unwrap();
        assert_eq!(content_root(dir.path()), dir.path());
    }

    #[test]
    fn test_remove_path_missing_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(remove_path(&dir.path().join("nope")).is_ok());
    }
}
