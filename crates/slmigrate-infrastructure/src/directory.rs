//! Migration directory ownership.
//!
//! Every service owns `<root>/<service-name>/`. Capture replaces that
//! directory wholesale; restore only reads it. Restoring a directory tree
//! replaces the live tree with exactly the captured one.
//!
//! ```text
//! <root>/
//! ├── TagHistorian/            # document database dump
//! │   └── nitaghistorian/      # gzip-compressed collections
//! ├── FileIngestionData/       # verbatim directory tree
//! └── SecuritySettings/
//!     └── security.json        # single file
//! ```

use slmigrate_core::{MigrationAction, MigrationError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Owner of the on-disk migration root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDirectory {
    root: PathBuf,
}

impl MigrationDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<service_name>`. Pure path composition.
    pub fn service_directory(&self, service_name: &str) -> PathBuf {
        self.root.join(service_name)
    }

    /// Removes a service's capture directory. Missing directories are fine.
    pub fn clear_service_directory(&self, service_name: &str) -> Result<PathBuf> {
        let dir = self.service_directory(service_name);
        remove_dir_forced(&dir)?;
        Ok(dir)
    }

    /// Removes any previous capture for the service and recreates the
    /// directory empty.
    pub fn ensure_clean_capture_directory(&self, service_name: &str) -> Result<PathBuf> {
        let dir = self.clear_service_directory(service_name)?;
        fs::create_dir_all(&dir).map_err(|e| MigrationError::io(&dir, e))?;
        tracing::debug!("Prepared clean capture directory {}", dir.display());
        Ok(dir)
    }

    /// Whether anything was captured for the service at this root.
    pub fn restore_directory_exists(&self, service_name: &str) -> bool {
        self.service_directory(service_name).is_dir()
    }
}

/// Whether `dir/file_name` exists and is a regular file.
pub fn file_exists(dir: &Path, file_name: &str) -> bool {
    dir.join(file_name).is_file()
}

/// Recursively deletes `path`, clearing read-only attributes on the way when
/// the first attempt is refused. A missing path is a no-op.
pub fn remove_dir_forced(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            tracing::debug!(
                "Clearing read-only attributes under {} before removal",
                path.display()
            );
            make_writable(path)?;
            fs::remove_dir_all(path).map_err(|e| MigrationError::io(path, e))
        }
        Err(e) => Err(MigrationError::io(path, e)),
    }
}

fn walk_error(root: &Path, e: walkdir::Error) -> MigrationError {
    let path = e.path().unwrap_or(root).to_path_buf();
    let source = match e.loop_ancestor() {
        Some(ancestor) => io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("symbolic link loops back to {}", ancestor.display()),
        ),
        None => e
            .into_io_error()
            .unwrap_or_else(|| io::Error::other("directory walk failed")),
    };
    MigrationError::io(path, source)
}

fn make_writable(path: &Path) -> Result<()> {
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| walk_error(path, e))?;
        if entry.path_is_symlink() {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| walk_error(entry.path(), e))?;
        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(entry.path(), permissions)
                .map_err(|e| MigrationError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

/// Duplicates `source` into `destination`.
///
/// - `Capture`: `destination` must not exist, so stale and new files are
///   never silently merged.
/// - `Restore`: `destination` is destroyed first, so the result is exactly
///   the captured tree.
pub fn copy_tree(source: &Path, destination: &Path, action: MigrationAction) -> Result<()> {
    if !source.is_dir() {
        return Err(MigrationError::io(
            source,
            io::Error::new(io::ErrorKind::NotFound, "source directory does not exist"),
        ));
    }

    // The whole source is walked before anything is touched, so a broken
    // link or a symlink loop leaves no partial copy behind.
    let entries = source_entries(source)?;

    match action {
        MigrationAction::Capture => {
            if destination.exists() {
                return Err(MigrationError::io(
                    destination,
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "capture destination already exists",
                    ),
                ));
            }
        }
        MigrationAction::Restore => remove_dir_forced(destination)?,
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| MigrationError::io(parent, e))?;
    }

    tracing::debug!(
        "Copying {} -> {} ({}, {} entries)",
        source.display(),
        destination.display(),
        action,
        entries.len()
    );
    for (relative, is_dir) in entries {
        let from = source.join(&relative);
        let to = destination.join(&relative);
        if is_dir {
            fs::create_dir_all(&to).map_err(|e| MigrationError::io(&to, e))?;
        } else {
            fs::copy(&from, &to).map_err(|e| MigrationError::io(&from, e))?;
        }
    }
    Ok(())
}

/// Every entry under `source` relative to it, parents before children.
/// Symlinks are followed so the copy is self-contained.
fn source_entries(source: &Path) -> Result<Vec<(PathBuf, bool)>> {
    WalkDir::new(source)
        .follow_links(true)
        .into_iter()
        .map(|entry| {
            let entry = entry.map_err(|e| walk_error(source, e))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| {
                    MigrationError::io(entry.path(), io::Error::new(io::ErrorKind::InvalidInput, e))
                })?
                .to_path_buf();
            Ok((relative, entry.file_type().is_dir()))
        })
        .collect()
}

/// Copies one file into `destination_dir`, creating the directory if needed.
/// Returns the path of the copy.
pub fn copy_file_into(source_file: &Path, destination_dir: &Path) -> Result<PathBuf> {
    let file_name = source_file.file_name().ok_or_else(|| {
        MigrationError::io(
            source_file,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;

    fs::create_dir_all(destination_dir).map_err(|e| MigrationError::io(destination_dir, e))?;
    let target = destination_dir.join(file_name);

    // A read-only file left by a previous restore must not block the copy.
    if let Ok(metadata) = fs::metadata(&target) {
        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(&target, permissions).map_err(|e| MigrationError::io(&target, e))?;
        }
    }

    fs::copy(source_file, &target).map_err(|e| MigrationError::io(source_file, e))?;
    Ok(target)
}
