use std::path::PathBuf;

use config::{HashMode, ResourceSpec};

use crate::hash::{self, Digest, HashItem, TaskHasher};
use crate::stage::FileHolder;

/// A value bound to one task input.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Value(String),
    List(Vec<String>),
    /// files staged under names derived from `pattern`
    Files {
        pattern: String,
        holders: Vec<FileHolder>,
    },
}

impl InputValue {
    fn hash_item(&self) -> HashItem {
        match self {
            Self::Value(v) => HashItem::from(v.as_str()),
            Self::List(items) => {
                HashItem::List(items.iter().map(|i| HashItem::from(i.as_str())).collect())
            }
            Self::Files { pattern, holders } => HashItem::List(vec![
                HashItem::from(pattern.as_str()),
                HashItem::List(
                    holders
                        .iter()
                        .map(|h| {
                            HashItem::List(vec![
                                HashItem::from(h.stage_name()),
                                HashItem::File(h.store_path().to_path_buf()),
                            ])
                        })
                        .collect(),
                ),
            ]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// A declared output: a glob over the work dir and how many matches to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDecl {
    pub pattern: String,
    pub cardinality: Cardinality,
    /// a missing optional output is not an error
    pub optional: bool,
}

impl OutputDecl {
    pub fn one(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_owned(),
            cardinality: Cardinality::One,
            optional: false,
        }
    }

    pub fn many(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_owned(),
            cardinality: Cardinality::Many,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Everything needed to run one process with concrete inputs.
#[derive(Debug, Clone)]
pub struct TaskDef {
    /// process name, used for job names and progress output
    pub name: String,
    pub script: String,
    /// input bindings, in declaration order
    pub inputs: Vec<(String, InputValue)>,
    pub outputs: Vec<OutputDecl>,
    pub resources: ResourceSpec,
}

impl TaskDef {
    /// Cache key: the process name, the script, every input binding, and the
    /// directives that change what the script does. Scheduling directives
    /// (queue, cpus, memory, time) are left out.
    pub fn digest(&self, mode: HashMode) -> Result<Digest, hash::Error> {
        let res = &self.resources;
        let mut hasher = TaskHasher::new(mode);
        hasher
            .update(&HashItem::from(self.name.as_str()))?
            .update(&HashItem::from(self.script.as_str()))?
            .update(&HashItem::Map(
                self.inputs
                    .iter()
                    .map(|(name, value)| (name.clone(), value.hash_item()))
                    .collect(),
            ))?;
        if let Some(container) = &res.container {
            hasher.update(&HashItem::from(container.as_str()))?;
        }
        hasher
            .update(&HashItem::Map(
                res.env
                    .iter()
                    .map(|(k, v)| (k.clone(), HashItem::from(v.as_str())))
                    .collect(),
            ))?
            .update(&HashItem::List(
                res.modules.iter().map(|m| HashItem::from(m.as_str())).collect(),
            ))?
            .update(&HashItem::from(res.cache.to_string()))?;
        Ok(hasher.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    New,
    Submitted,
    Running,
    Completed,
    Failed,
}

/// Files bound to one declared output, relative to the work dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedOutput {
    pub pattern: String,
    pub paths: Vec<PathBuf>,
}

/// One concrete execution of a [`TaskDef`].
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub name: String,
    pub digest: Digest,
    pub work_dir: PathBuf,
    pub status: TaskStatus,
    pub exit_code: Option<i32>,
    /// reused a previous run's results
    pub cached: bool,
    /// failed, but the error strategy said to carry on
    pub ignored: bool,
    pub outputs: Vec<CollectedOutput>,
}

impl TaskRun {
    pub fn new(task: &TaskDef, digest: Digest, work_dir: PathBuf) -> Self {
        Self {
            name: task.name.clone(),
            digest,
            work_dir,
            status: TaskStatus::New,
            exit_code: None,
            cached: false,
            ignored: false,
            outputs: Vec::with_capacity(0),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;
    use config::CacheMode;
    use tempfile::tempdir;

    fn task(script: &str) -> TaskDef {
        TaskDef {
            name: "align".to_owned(),
            script: script.to_owned(),
            inputs: vec![("sample".to_owned(), InputValue::Value("s1".to_owned()))],
            outputs: vec![OutputDecl::one("out.bam")],
            resources: ResourceSpec::default(),
        }
    }

    #[test]
    fn test_digest_depends_on_identity_only() -> Result<()> {
        let base = task("echo hi").digest(HashMode::Standard)?;
        assert_eq!(base, task("echo hi").digest(HashMode::Standard)?);
        assert_ne!(base, task("echo bye").digest(HashMode::Standard)?);

        let mut scheduled = task("echo hi");
        scheduled.resources.set("queue", "long")?;
        scheduled.resources.set("cpus", "8")?;
        scheduled.resources.set("memory", "16 GB")?;
        assert_eq!(base, scheduled.digest(HashMode::Standard)?);

        let mut contained = task("echo hi");
        contained.resources.set("container", "ubuntu:22.04")?;
        assert_ne!(base, contained.digest(HashMode::Standard)?);

        let mut env = task("echo hi");
        env.resources.set("env", "LANG=C")?;
        assert_ne!(base, env.digest(HashMode::Standard)?);

        let mut uncached = task("echo hi");
        uncached.resources.cache = CacheMode::Off;
        assert_ne!(base, uncached.digest(HashMode::Standard)?);
        Ok(())
    }

    #[test]
    fn test_digest_follows_input_files() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("reads.fq");
        std::fs::write(&path, "ACGT")?;

        let mut t = task("cat reads.fq");
        t.inputs.push((
            "reads".to_owned(),
            InputValue::Files {
                pattern: "reads.fq".to_owned(),
                holders: vec![FileHolder::from_store_path(&path)?],
            },
        ));
        let first = t.digest(HashMode::Deep)?;
        assert_eq!(first, t.digest(HashMode::Deep)?);

        std::fs::write(&path, "TTTTTT")?;
        assert_ne!(first, t.digest(HashMode::Deep)?);

        std::fs::remove_file(&path)?;
        assert!(t.digest(HashMode::Standard).is_err());
        Ok(())
    }
}
