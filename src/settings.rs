use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use config::ResourceSpec;
use util::parse_duration;

use crate::args::Args;
use crate::exec::{InputValue, OutputDecl, Polling, ProcessorSettings};
use crate::stage::{FileHolder, StageMode};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid {flag} value '{value}' (should be formatted '{format}')")]
    InvalidFlag {
        flag: &'static str,
        value: String,
        format: &'static str,
    },
    #[error("can't derive a task name from script path {0:?}; use --name")]
    NoTaskName(PathBuf),
    #[error("invalid stage mode '{0}' (should be 'symlink' or 'copy')")]
    InvalidStageMode(String),
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are added in.
#[derive(Debug)]
pub struct Settings {
    pub script: PathBuf,
    pub work_dir: PathBuf,
    pub executor: String,
    pub name: String,
    pub inputs: Vec<(String, InputValue)>,
    pub outputs: Vec<OutputDecl>,
    pub resources: ResourceSpec,
    pub processor: ProcessorSettings,
    pub hash_log: bool,
    pub verbose: u8,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let script = absolute(&args.script)?;
        let name = match args.name {
            Some(name) => name,
            None => script
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| Error::NoTaskName(script.clone()))?,
        };

        let mut inputs = Vec::with_capacity(args.vals.len() + args.files.len());
        for val in &args.vals {
            let (k, v) = split_pair("--val", val, "NAME=VALUE")?;
            inputs.push((k.to_owned(), InputValue::Value(v.to_owned())));
        }
        for file in &args.files {
            let (pattern, paths) = split_pair("--file", file, "PATTERN=PATH[,PATH..]")?;
            let mut holders = Vec::with_capacity(4);
            for path in paths.split(',').filter(|p| !p.is_empty()) {
                holders.push(FileHolder::from_store_path(absolute(path)?)?);
            }
            let value = InputValue::Files {
                pattern: pattern.to_owned(),
                holders,
            };
            inputs.push((pattern.to_owned(), value));
        }

        let outputs = args
            .outputs
            .iter()
            .map(|pattern| {
                if pattern.contains(['*', '?']) {
                    OutputDecl::many(pattern)
                } else {
                    OutputDecl::one(pattern)
                }
            })
            .collect();

        let mut resources = ResourceSpec::default();
        for directive in &args.directives {
            let (k, v) = split_pair("--directive", directive, "KEY=VALUE")?;
            resources
                .set(k.trim(), v)
                .with_context(|| format!("while reading directive '{directive}'"))?;
        }
        for var in &args.env {
            let (k, v) = split_pair("--env", var, "KEY=VALUE")?;
            resources.set_env(k, v);
        }

        let timeout = args
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .context("while reading --timeout")?;
        let stage_mode: StageMode = args
            .stage_mode
            .parse()
            .map_err(|_| Error::InvalidStageMode(args.stage_mode.clone()))?;
        let processor = ProcessorSettings {
            stage_mode,
            polling: Polling {
                interval: Duration::from_secs(args.poll_interval),
                ..Polling::default()
            },
            timeout,
            max_forks: args.max_forks,
            bin_dir: args.bin_dir.as_deref().map(absolute).transpose()?,
        };

        Ok(Self {
            script,
            work_dir: absolute(&args.work_dir)?,
            executor: args.executor,
            name,
            inputs,
            outputs,
            resources,
            processor,
            hash_log: args.hash_log,
            verbose: args.verbose,
        })
    }
}

fn split_pair<'a>(
    flag: &'static str,
    value: &'a str,
    format: &'static str,
) -> Result<(&'a str, &'a str), Error> {
    value
        .split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| Error::InvalidFlag {
            flag,
            value: value.to_owned(),
            format,
        })
}

/// Relative paths are taken from the current dir; nothing is canonicalized,
/// so symlinked inputs keep their names.
fn absolute(path: &str) -> Result<PathBuf> {
    let path = Path::new(path);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("reading current dir")?
            .join(path))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exec::Cardinality;

    fn args() -> Args {
        Args {
            script: "/pipelines/align.sh".to_owned(),
            work_dir: "/scratch/work".to_owned(),
            executor: "slurm".to_owned(),
            poll_interval: 5,
            max_forks: 4,
            stage_mode: "symlink".to_owned(),
            ..Args::default()
        }
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let settings = Settings::try_from(args())?;
        assert_eq!(settings.name, "align");
        assert_eq!(settings.work_dir, PathBuf::from("/scratch/work"));
        assert_eq!(settings.processor.polling.interval, Duration::from_secs(5));
        assert!(settings.processor.timeout.is_none());
        assert!(settings.inputs.is_empty());
        Ok(())
    }

    #[test]
    fn test_inputs_outputs_directives() -> Result<()> {
        let settings = Settings::try_from(Args {
            name: Some("bwa".to_owned()),
            vals: vec!["sample=s1".to_owned()],
            files: vec!["reads_*.fq=/data/a.fq,/data/b.fq".to_owned()],
            outputs: vec!["out.bam".to_owned(), "logs/*.txt".to_owned()],
            directives: vec!["memory=4 GB".to_owned(), "error_strategy=retry".to_owned()],
            env: vec!["LANG=C".to_owned()],
            timeout: Some("1h30m".to_owned()),
            stage_mode: "copy".to_owned(),
            ..args()
        })?;
        assert_eq!(settings.name, "bwa");
        assert_eq!(settings.inputs[0].1, InputValue::Value("s1".to_owned()));
        let InputValue::Files { pattern, holders } = &settings.inputs[1].1 else {
            panic!("expected file input");
        };
        assert_eq!(pattern, "reads_*.fq");
        assert_eq!(holders.len(), 2);
        assert_eq!(holders[1].store_path(), Path::new("/data/b.fq"));

        assert_eq!(settings.outputs[0].cardinality, Cardinality::One);
        assert_eq!(settings.outputs[1].cardinality, Cardinality::Many);
        assert_eq!(settings.resources.memory.map(|m| m.to_mega()), Some(4096));
        assert_eq!(settings.resources.env, vec![("LANG".to_owned(), "C".to_owned())]);
        assert_eq!(settings.processor.timeout, Some(Duration::from_secs(5400)));
        assert_eq!(settings.processor.stage_mode, StageMode::Copy);
        Ok(())
    }

    #[test]
    fn test_bad_flags() {
        let bad_val = Args {
            vals: vec!["no-equals".to_owned()],
            ..args()
        };
        assert!(Settings::try_from(bad_val).is_err());

        let bad_directive = Args {
            directives: vec!["colour=blue".to_owned()],
            ..args()
        };
        assert!(Settings::try_from(bad_directive).is_err());

        let bad_mode = Args {
            stage_mode: "teleport".to_owned(),
            ..args()
        };
        assert!(Settings::try_from(bad_mode).is_err());
    }
}
