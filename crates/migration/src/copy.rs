//! Copying a database directory minus its ancient store.

use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    process::Command,
};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::MigrationError;

/// Name of the directory holding the ancient store, never copied.
pub const ANCIENT_DIR: &str = "ancient";

pub trait TreeCopier {
    fn name(&self) -> &'static str;

    /// Whether this copier can run at all. Checked before anything is
    /// removed from the destination.
    fn is_available(&self) -> bool;

    /// Copies the contents of `src` into `dst`, skipping `src/ancient`.
    fn copy(&self, src: &Path, dst: &Path) -> Result<(), MigrationError>;
}

/// Copies with `rsync -a --checksum`, found on `PATH`.
#[derive(Debug, Clone)]
pub struct Rsync {
    search_path: Option<OsString>,
}

impl Default for Rsync {
    fn default() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
        }
    }
}

impl Rsync {
    /// Looks `rsync` up in `search_path` instead of the process `PATH`.
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    fn binary(&self) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        std::env::split_paths(search_path)
            .map(|dir| dir.join("rsync"))
            .find(|candidate| candidate.is_file())
    }
}

impl TreeCopier for Rsync {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn is_available(&self) -> bool {
        self.binary().is_some()
    }

    fn copy(&self, src: &Path, dst: &Path) -> Result<(), MigrationError> {
        let binary = self
            .binary()
            .ok_or_else(|| MigrationError::MissingDependency("rsync".to_string()))?;
        // trailing slash: copy the contents of src, not src itself
        let mut src_arg = src.as_os_str().to_owned();
        src_arg.push("/");

        info!(src = %src.display(), dst = %dst.display(), "Copying non-ancient data with rsync");
        let output = Command::new(&binary)
            .arg("-a")
            .arg(format!("--exclude={ANCIENT_DIR}"))
            .arg("--checksum")
            .arg(&src_arg)
            .arg(dst)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MigrationError::Io(io::Error::other(format!(
                "rsync failed (exit {:?}): {stderr}",
                output.status.code()
            ))));
        }
        Ok(())
    }
}

/// Recursive copy walking the source tree. Always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCopy;

impl TreeCopier for NativeCopy {
    fn name(&self) -> &'static str {
        "native"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn copy(&self, src: &Path, dst: &Path) -> Result<(), MigrationError> {
        info!(src = %src.display(), dst = %dst.display(), "Copying non-ancient data");
        fs::create_dir_all(dst)?;
        let entries = WalkDir::new(src)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == ANCIENT_DIR));
        for entry in entries {
            let entry = entry.map_err(io::Error::from)?;
            let Ok(relative) = entry.path().strip_prefix(src) else {
                continue;
            };
            let target = dst.join(relative);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                fs::create_dir_all(&target)?;
            } else if file_type.is_file() {
                let bytes = fs::copy(entry.path(), &target)?;
                debug!(file = %entry.path().display(), bytes, "Copied");
            } else {
                debug!(path = %entry.path().display(), "Skipping special file");
            }
        }
        Ok(())
    }
}

/// Removes everything in `dir` except its ancient store.
pub fn remove_non_ancients(dir: &Path) -> Result<(), MigrationError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == ANCIENT_DIR {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    info!(dir = %dir.display(), "Removed non-ancient data");
    Ok(())
}
