use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::exec::TaskDef;
use crate::fs::Fs;
use crate::hash::Digest;
use crate::stage::collect_outputs;

/// Outcome of looking up a task's work dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// a previous run succeeded here and all its outputs are present
    Hit(PathBuf),
    /// an empty work dir, ready for a fresh run
    Miss(PathBuf),
}

impl Resolution {
    pub fn work_dir(&self) -> &Path {
        match self {
            Self::Hit(dir) | Self::Miss(dir) => dir,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Content-addressed work dirs under the work root: the digest picks the dir,
/// and a zero `.exitcode` in it marks a completed run.
#[derive(Debug, Clone)]
pub struct CacheStore {
    fs: Arc<Fs>,
}

impl CacheStore {
    pub fn new(fs: Arc<Fs>) -> Self {
        Self { fs }
    }

    /// Reuse the work dir for `digest` if caching is on and it holds a
    /// complete run of `task`; otherwise clear it out and recreate it.
    pub fn resolve(&self, digest: &Digest, task: &TaskDef) -> Result<Resolution> {
        let work_dir = digest.work_dir(self.fs.work_root());
        if task.resources.cache.enabled() && self.is_reusable(&work_dir, task) {
            log::debug!("{}: reusing {:?}", task.name, work_dir);
            return Ok(Resolution::Hit(work_dir));
        }

        if self.fs.exists(&work_dir) {
            log::debug!("{}: scrubbing {:?}", task.name, work_dir);
            self.fs
                .delete_dir(&work_dir)
                .with_context(|| format!("clearing work dir {:?}", work_dir))?;
        }
        self.fs
            .create_dir(&work_dir)
            .with_context(|| format!("creating work dir {:?}", work_dir))?;
        Ok(Resolution::Miss(work_dir))
    }

    fn is_reusable(&self, work_dir: &Path, task: &TaskDef) -> bool {
        match self.fs.read_exit_code(work_dir) {
            Some(0) => {}
            Some(code) => {
                log::debug!("{}: previous run exited with {code}", task.name);
                return false;
            }
            None => return false,
        }
        match collect_outputs(work_dir, task) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("{}: previous run is incomplete: {e}", task.name);
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exec::OutputDecl;
    use crate::fs::EXIT_CODE;
    use config::{CacheMode, HashMode, ResourceSpec};
    use tempfile::tempdir;

    fn setup() -> Result<(tempfile::TempDir, CacheStore, TaskDef, Digest)> {
        let dir = tempdir()?;
        let mut fs = Fs::new(dir.path());
        fs.ensure_work_root_exists()?;
        let task = TaskDef {
            name: "count".to_owned(),
            script: "wc -l in.txt > count.txt".to_owned(),
            inputs: Vec::new(),
            outputs: vec![OutputDecl::one("count.txt")],
            resources: ResourceSpec::default(),
        };
        let digest = task.digest(HashMode::Standard)?;
        Ok((dir, CacheStore::new(Arc::new(fs)), task, digest))
    }

    fn complete_run(work_dir: &Path, code: &str) -> Result<()> {
        std::fs::write(work_dir.join(EXIT_CODE), code)?;
        std::fs::write(work_dir.join("count.txt"), "3\n")?;
        Ok(())
    }

    #[test]
    fn test_miss_creates_work_dir() -> Result<()> {
        let (_dir, cache, task, digest) = setup()?;
        let resolution = cache.resolve(&digest, &task)?;
        assert!(!resolution.is_hit());
        assert!(resolution.work_dir().is_dir());
        assert!(resolution.work_dir().ends_with(digest.to_hex().get(2..).unwrap_or_default()));
        Ok(())
    }

    #[test]
    fn test_hit_after_successful_run() -> Result<()> {
        let (_dir, cache, task, digest) = setup()?;
        let work_dir = cache.resolve(&digest, &task)?.work_dir().to_path_buf();
        complete_run(&work_dir, "0")?;
        assert_eq!(cache.resolve(&digest, &task)?, Resolution::Hit(work_dir));
        Ok(())
    }

    #[test]
    fn test_no_hit_without_marker() -> Result<()> {
        let (_dir, cache, task, digest) = setup()?;
        let work_dir = cache.resolve(&digest, &task)?.work_dir().to_path_buf();
        std::fs::write(work_dir.join("count.txt"), "3\n")?;
        let resolution = cache.resolve(&digest, &task)?;
        assert_eq!(resolution, Resolution::Miss(work_dir.clone()));
        // scrubbed:
        assert!(!work_dir.join("count.txt").exists());
        Ok(())
    }

    #[test]
    fn test_no_hit_after_failure() -> Result<()> {
        let (_dir, cache, task, digest) = setup()?;
        let work_dir = cache.resolve(&digest, &task)?.work_dir().to_path_buf();
        complete_run(&work_dir, "1")?;
        assert!(!cache.resolve(&digest, &task)?.is_hit());
        Ok(())
    }

    #[test]
    fn test_no_hit_with_missing_output() -> Result<()> {
        let (_dir, cache, task, digest) = setup()?;
        let work_dir = cache.resolve(&digest, &task)?.work_dir().to_path_buf();
        complete_run(&work_dir, "0")?;
        std::fs::remove_file(work_dir.join("count.txt"))?;
        assert!(!cache.resolve(&digest, &task)?.is_hit());
        Ok(())
    }

    #[test]
    fn test_no_hit_with_cache_off() -> Result<()> {
        let (_dir, cache, mut task, digest) = setup()?;
        task.resources.cache = CacheMode::Off;
        let work_dir = cache.resolve(&digest, &task)?.work_dir().to_path_buf();
        complete_run(&work_dir, "0")?;
        assert!(!cache.resolve(&digest, &task)?.is_hit());
        assert!(!work_dir.join(EXIT_CODE).exists());
        Ok(())
    }
}
