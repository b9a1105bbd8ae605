use std::path::{Path, PathBuf};
use std::str::FromStr;

use util::HashSet;

use crate::exec::{Cardinality, CollectedOutput, InputValue, TaskDef};
use crate::fs::{list_entries, Fs};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Stage name must be relative: \"{0}\"")]
    AbsoluteStageName(String),
    #[error("Stage name \"{0}\" is used by more than one input file")]
    DuplicateStageName(String),
    #[error("Input file not found: {0:?}")]
    MissingInput(PathBuf),
    #[error("Expected output \"{0}\" not found in work dir")]
    MissingOutput(String),
    #[error("Unable to stage {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// How input files are made visible inside a work dir.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StageMode {
    #[default]
    Symlink,
    Copy,
}

impl FromStr for StageMode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "symlink" | "link" => Ok(Self::Symlink),
            "copy" => Ok(Self::Copy),
            _ => Err(()),
        }
    }
}

/// An input file: the name it gets inside the work dir, and where it really lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHolder {
    stage_name: String,
    store_path: PathBuf,
}

impl FileHolder {
    pub fn new(stage_name: &str, store_path: impl Into<PathBuf>) -> Result<Self, Error> {
        if Path::new(stage_name).is_absolute() {
            return Err(Error::AbsoluteStageName(stage_name.to_owned()));
        }
        Ok(Self {
            stage_name: stage_name.to_owned(),
            store_path: store_path.into(),
        })
    }

    /// Holder named after the source's own file name.
    pub fn from_store_path(store_path: impl Into<PathBuf>) -> Result<Self, Error> {
        let store_path = store_path.into();
        let name = store_path
            .file_name()
            .ok_or_else(|| Error::MissingInput(store_path.clone()))?
            .to_string_lossy()
            .into_owned();
        Self::new(&name, store_path)
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    fn renamed(&self, stage_name: String) -> Self {
        Self {
            stage_name,
            store_path: self.store_path.clone(),
        }
    }
}

/// Makes a task's input files visible in its work dir.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStager {
    mode: StageMode,
}

impl FileStager {
    pub fn new(mode: StageMode) -> Self {
        Self { mode }
    }

    /// Resolve every file input of `task` to its final stage name.
    pub fn bind_inputs(&self, task: &TaskDef) -> Result<Vec<FileHolder>, Error> {
        let mut seen = HashSet::default();
        let mut bound = Vec::with_capacity(task.inputs.len());
        for (_, value) in &task.inputs {
            let InputValue::Files { pattern, holders } = value else {
                continue;
            };
            for (holder, name) in holders.iter().zip(expand_wildcards(pattern, holders)) {
                if Path::new(&name).is_absolute() {
                    return Err(Error::AbsoluteStageName(name));
                }
                if !seen.insert(name.clone()) {
                    return Err(Error::DuplicateStageName(name));
                }
                bound.push(holder.renamed(name));
            }
        }
        Ok(bound)
    }

    /// Create `work_dir/<stage name>` for every holder, replacing whatever was there.
    pub fn stage(&self, fs: &Fs, work_dir: &Path, holders: &[FileHolder]) -> Result<(), Error> {
        for holder in holders {
            if !fs.exists(&holder.store_path) {
                return Err(Error::MissingInput(holder.store_path.clone()));
            }
            let staged = work_dir.join(&holder.stage_name);
            let wrap = |source| Error::Io {
                path: staged.clone(),
                source,
            };
            if fs.exists(&staged) {
                log::debug!("replacing stale staged input {:?}", staged);
                if staged.is_dir() && !staged.is_symlink() {
                    fs.delete_dir(&staged).map_err(wrap)?;
                } else {
                    fs.delete_file(&staged).map_err(wrap)?;
                }
            }
            fs.create_parent_dir(&staged).map_err(wrap)?;
            let staging = match self.mode {
                StageMode::Symlink => fs.symlink(&holder.store_path, &staged),
                StageMode::Copy => fs.copy(&holder.store_path, &staged),
            };
            staging.map_err(wrap)?;
            log::trace!("staged {:?} as {}", holder.store_path, holder.stage_name);
        }
        Ok(())
    }
}

/// Stage names for `holders` under the declared `pattern`.
///
/// - no wildcard: the name itself for a single file, otherwise a 1-based
///   index is inserted before the extension (`x.fa` -> `x1.fa`, `x2.fa`);
/// - `*`: removed for a single file, otherwise replaced by the index;
/// - a run of `?`: the index, zero-padded to the length of the run;
/// - bare `*` (or nothing): each holder keeps its own name.
pub fn expand_wildcards(pattern: &str, holders: &[FileHolder]) -> Vec<String> {
    if pattern.is_empty() || pattern == "*" {
        return holders.iter().map(|h| h.stage_name.clone()).collect();
    }
    let count = holders.len();
    let has_wildcard = pattern.contains(['*', '?']);
    (1..=count)
        .map(|index| {
            if has_wildcard {
                replace_wildcards(pattern, index, count)
            } else if count == 1 {
                pattern.to_owned()
            } else {
                insert_index(pattern, index)
            }
        })
        .collect()
}

fn replace_wildcards(pattern: &str, index: usize, count: usize) -> String {
    let mut name = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if count > 1 => name.push_str(&index.to_string()),
            '*' => {}
            '?' => {
                let mut width = 1;
                while chars.next_if_eq(&'?').is_some() {
                    width += 1;
                }
                name.push_str(&format!("{index:0width$}"));
            }
            _ => name.push(c),
        }
    }
    name
}

/// `dir/x.fa` -> `dir/x<index>.fa`; names without an extension get the index appended.
fn insert_index(name: &str, index: usize) -> String {
    let file_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[file_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = file_start + dot;
            format!("{}{index}{}", &name[..dot], &name[dot..])
        }
        _ => format!("{name}{index}"),
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// Drop paths whose file name starts with `.`.
pub fn filter_hidden<P: AsRef<Path>>(mut paths: Vec<P>) -> Vec<P> {
    paths.retain(|p| !is_hidden(p.as_ref()));
    paths
}

/// Drop paths that are one of `task`'s staged file inputs. Scalar inputs don't count.
pub fn filter_staged_inputs<P: AsRef<Path>>(task: &TaskDef, mut generated: Vec<P>) -> Vec<P> {
    let staged: Vec<String> = task
        .inputs
        .iter()
        .filter_map(|(_, value)| match value {
            InputValue::Files { pattern, holders } => Some(expand_wildcards(pattern, holders)),
            _ => None,
        })
        .flatten()
        .collect();
    generated.retain(|p| !staged.iter().any(|name| p.as_ref() == Path::new(name)));
    generated
}

/// Bind the files a task produced to its declared outputs.
pub fn collect_outputs(work_dir: &Path, task: &TaskDef) -> Result<Vec<CollectedOutput>, Error> {
    let listing = list_entries(work_dir).map_err(|e| Error::Io {
        path: work_dir.to_path_buf(),
        source: e.into(),
    })?;
    let generated = filter_staged_inputs(task, filter_hidden(listing));

    let mut collected = Vec::with_capacity(task.outputs.len());
    for decl in &task.outputs {
        let mut matches = generated
            .iter()
            .filter(|p| glob_match(&decl.pattern, &p.to_string_lossy()));
        let paths: Vec<PathBuf> = match decl.cardinality {
            Cardinality::One => matches.next().cloned().into_iter().collect(),
            Cardinality::Many => matches.cloned().collect(),
        };
        if paths.is_empty() && !decl.optional {
            return Err(Error::MissingOutput(decl.pattern.clone()));
        }
        collected.push(CollectedOutput {
            pattern: decl.pattern.clone(),
            paths,
        });
    }
    Ok(collected)
}

/// Shell-style match: `*` is any run of characters and `?` is exactly one,
/// neither crossing a `/`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0, 0);
    // position of the last `*` and the name position it was tried at:
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some('?') if name[n] != '/' => {
                p += 1;
                n += 1;
            }
            Some(&c) if c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, from)) if name[from] != '/' => {
                    p = star + 1;
                    n = from + 1;
                    backtrack = Some((star, n));
                }
                _ => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
