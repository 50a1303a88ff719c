//! Filesystem helpers that route every operation through `cap-std` handles.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{
    ambient_authority,
    fs::{Dir, OpenOptions},
};
use color_eyre::eyre::{Context, Result};
use std::io::{ErrorKind, Write};

/// Resolves a path to an ambient directory handle paired with the relative
/// path component.
///
/// Absolute paths are opened relative to the ambient root; relative paths
/// reuse the current working directory.
pub(crate) fn ambient_dir_and_path(path: &Utf8Path) -> Result<(Dir, Utf8PathBuf)> {
    if path.has_root() {
        let relative = path
            .strip_prefix("/")
            .map_or_else(|_| path.to_path_buf(), Utf8Path::to_path_buf);
        let dir = Dir::open_ambient_dir("/", ambient_authority())
            .context("open ambient root directory")?;
        Ok((dir, relative))
    } else {
        let dir = Dir::open_ambient_dir(".", ambient_authority())
            .context("open ambient working directory")?;
        Ok((dir, path.to_path_buf()))
    }
}

/// Ensures the provided path exists, creating intermediate directories when
/// required.
pub(crate) fn ensure_dir_exists(path: &Utf8Path) -> Result<()> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }

    dir.create_dir_all(relative.as_std_path())
        .or_else(|err| {
            if err.kind() == ErrorKind::AlreadyExists {
                Ok(())
            } else {
                Err(err)
            }
        })
        .with_context(|| format!("create {path}"))
}

/// Outcome of [`create_exclusive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExclusiveCreate {
    /// The file did not exist and now holds the supplied contents.
    Created,
    /// Another writer created the file first.
    AlreadyExists,
}

/// Atomically creates `path` with `contents`, failing over to
/// [`ExclusiveCreate::AlreadyExists`] when the file is already present.
pub(crate) fn create_exclusive(path: &Utf8Path, contents: &str) -> Result<ExclusiveCreate> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    let mut file = match dir.open_with(relative.as_std_path(), &options) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            return Ok(ExclusiveCreate::AlreadyExists);
        }
        Err(err) => return Err(err).with_context(|| format!("create {path}")),
    };
    file.write_all(contents.as_bytes())
        .with_context(|| format!("write {path}"))?;
    Ok(ExclusiveCreate::Created)
}

/// Opens `path` for appending, creating it when missing.
pub(crate) fn open_append(path: &Utf8Path) -> Result<std::fs::File> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    let file = dir
        .open_with(relative.as_std_path(), &options)
        .with_context(|| format!("open {path} for appending"))?;
    Ok(file.into_std())
}

/// Writes `contents` to `path`, replacing any existing file.
pub(crate) fn write_file(path: &Utf8Path, contents: &str) -> Result<()> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    dir.write(relative.as_std_path(), contents)
        .with_context(|| format!("write {path}"))
}

/// Reads `path` as UTF-8, returning `None` when the file does not exist yet.
pub(crate) fn read_optional(path: &Utf8Path) -> Result<Option<String>> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    match dir.read_to_string(relative.as_std_path()) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {path}")),
    }
}

/// Removes a file, treating an already-missing file as success.
pub(crate) fn remove_file_if_exists(path: &Utf8Path) -> Result<()> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    match dir.remove_file(relative.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {path}")),
    }
}

/// Recursively removes a directory, treating an already-missing directory as
/// success.
pub(crate) fn remove_dir_all_if_exists(path: &Utf8Path) -> Result<()> {
    let (dir, relative) = ambient_dir_and_path(path)?;
    match dir.remove_dir_all(relative.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {path}")),
    }
}

/// Applies the provided POSIX mode to the given path.
#[cfg(unix)]
pub(crate) fn set_permissions(path: &Utf8Path, mode: u32) -> Result<()> {
    use cap_std::fs::{Permissions, PermissionsExt};

    let (dir, relative) = ambient_dir_and_path(path)?;
    dir.set_permissions(relative.as_std_path(), Permissions::from_mode(mode))
        .with_context(|| format!("chmod {path}"))
}

/// Reports whether `path` names an existing filesystem entry.
pub(crate) fn path_exists(path: &Utf8Path) -> bool {
    ambient_dir_and_path(path)
        .is_ok_and(|(dir, relative)| relative.as_str().is_empty() || dir.exists(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::ensure;
    use tempfile::tempdir;

    fn utf8_tempdir() -> color_eyre::Result<(tempfile::TempDir, Utf8PathBuf)> {
        let temp = tempdir()?;
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
            .map_err(|path| color_eyre::eyre::eyre!("non-UTF-8 temp dir {path:?}"))?;
        Ok((temp, root))
    }

    #[test]
    fn exclusive_create_reports_second_writer() -> color_eyre::Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let path = root.join("pg-1234.port");

        ensure!(create_exclusive(&path, "pg_port 1234\n")? == ExclusiveCreate::Created);
        ensure!(create_exclusive(&path, "pg_port 1234\n")? == ExclusiveCreate::AlreadyExists);
        ensure!(read_optional(&path)?.as_deref() == Some("pg_port 1234\n"));
        Ok(())
    }

    #[test]
    fn removal_helpers_tolerate_missing_paths() -> color_eyre::Result<()> {
        let (_guard, root) = utf8_tempdir()?;
        let nested = root.join("a/b");
        ensure_dir_exists(&nested)?;
        write_file(&nested.join("file.txt"), "x")?;
        ensure!(path_exists(&nested.join("file.txt")));

        remove_dir_all_if_exists(&root.join("a"))?;
        remove_dir_all_if_exists(&root.join("a"))?;
        remove_file_if_exists(&root.join("missing"))?;
        ensure!(!path_exists(&nested));
        ensure!(read_optional(&root.join("missing"))?.is_none());
        Ok(())
    }
}
