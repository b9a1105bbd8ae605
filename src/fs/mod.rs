use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use util::PathEncodingError;

/// Utility fns
mod ops;
pub use ops::list_entries;

/// Defines fns for creating common paths in a task work dir
mod paths;
pub use paths::{COMMAND_ERR, COMMAND_OUT, COMMAND_RUN, COMMAND_SH, EXIT_CODE};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Path is neither file nor dir: {0}")]
    UnknownPathType(String),
    #[error("Specified work directory \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
    #[error("Path has no parent directory: {0}")]
    NoParent(String),
}

/// All file operations in the crate should go through this struct.
///
/// All destructive operations check that the path in question is a child of the
/// single whitelisted prefix (the work root), otherwise they will not be performed.
/// Task scripts themselves can break this rule; it is up to the user
/// to make sure that the code there doesn't have unintended consequences.
#[derive(Debug)]
pub struct Fs {
    /// The directory we are allowed to modify
    work_root: PathBuf,
}

impl Fs {
    /// Create a new `Fs` with the given work root.
    pub fn new(work_root: &Path) -> Self {
        Self {
            work_root: work_root.to_path_buf(),
        }
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Check whether the work root exists, and create it if not.
    pub fn ensure_work_root_exists(&mut self) -> Result<()> {
        if !self.work_root.exists() {
            log::info!("Work directory {:?} doesn't exist. Creating.", self.work_root);
            fs::create_dir_all(&self.work_root).context("creating work directory")?;
        } else if !self.work_root.is_dir() {
            return Err(Error::NotDirectory(
                self.work_root
                    .to_str()
                    .ok_or(PathEncodingError)?
                    .to_string(),
            )
            .into());
        } else {
            log::debug!("Work directory {:?} already exists.", self.work_root);
        }

        self.work_root = self.work_root.canonicalize()?;
        Ok(())
    }

    /// Check if path exists on disk (a dangling symlink counts).
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Create parent directory of a given path.
    pub fn create_parent_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        let parent = path
            .parent()
            .ok_or_else(|| Error::NoParent(path.to_string_lossy().into_owned()))?;
        self.check_whitelist(parent)?;
        fs::create_dir_all(parent).context("creating parent dir")?;
        Ok(())
    }

    /// Write entire str to a file.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::write(path, text).context("writing file")?;
        Ok(())
    }

    /// Write entire str to a file and mark it executable.
    pub fn write_executable<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.write_file(path, text)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))
                .context("making file executable")?;
        }
        Ok(())
    }

    /// Delete a file or symlink.
    pub fn delete_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_file(path).context("deleting file")?;
        Ok(())
    }

    /// Recursively delete a directory.
    pub fn delete_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_dir_all(path).context("deleting dir")?;
        Ok(())
    }

    /// Symlink `symlink` to `tgt`.
    pub fn symlink<T: AsRef<Path>, U: AsRef<Path>>(&self, tgt: T, symlink: U) -> Result<()> {
        let (tgt, symlink) = (tgt.as_ref(), symlink.as_ref());
        self.check_whitelist(symlink)?;
        ops::symlink(tgt, symlink)
            .with_context(|| format!("symlinking {:?} to {:?}", symlink, tgt))?;
        Ok(())
    }

    /// Copy `src` to `tgt`, recursively if `src` is a directory. Symlinks are followed.
    pub fn copy<T: AsRef<Path>, U: AsRef<Path>>(&self, src: T, tgt: U) -> Result<()> {
        let (src, tgt) = (src.as_ref(), tgt.as_ref());
        self.check_whitelist(tgt)?;
        ops::copy(src, tgt).with_context(|| format!("copying {:?} to {:?}", src, tgt))?;
        Ok(())
    }

    /// Read entire file into a String.
    pub fn read_to_buf<T: AsRef<Path>>(&self, path: T, strbuf: &mut String) -> Result<()> {
        use std::io::Read;
        let path = path.as_ref();
        strbuf.clear();
        let cap = fs::metadata(path)?.len() as usize;
        if cap > strbuf.capacity() {
            strbuf.reserve(cap - strbuf.len());
        }
        let mut f = fs::File::open(path)?;
        f.read_to_string(strbuf)?;
        Ok(())
    }

    /// Exit status recorded in `work_dir`'s completion marker, if there is a readable one.
    pub fn read_exit_code(&self, work_dir: &Path) -> Option<i32> {
        let mut buf = PathBuf::with_capacity(256);
        let marker = self.exit_code(work_dir, &mut buf);
        let text = fs::read_to_string(marker).ok()?;
        text.trim().parse().ok()
    }

    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().starts_with(&self.work_root)
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        if !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_str().ok_or(PathEncodingError)?.to_owned()).into())
        } else {
            Ok(())
        }
    }
}
