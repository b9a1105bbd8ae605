use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;

use config::ErrorStrategy;
use grid::GridJob;
use util::{HashMap, Timer};

use super::env::{build_environment, inherited_env};
use super::executor::{Executor, Polling};
use super::launcher::{command_sh, fetch_interpreter, LauncherBuilder, DEFAULT_INTERPRETER};
use super::task::{TaskDef, TaskRun, TaskStatus};
use super::{Error, TaskError};
use crate::cache::{CacheStore, Resolution};
use crate::fs::Fs;
use crate::hash::Digest;
use crate::stage::{collect_outputs, FileStager, StageMode};
use crate::state::RunStateHandle;
use crate::ui::Ui;

const PATH: &str = "PATH";

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub stage_mode: StageMode,
    pub polling: Polling,
    /// overrides each task's `time` directive
    pub timeout: Option<Duration>,
    /// upper bound on tasks running at once
    pub max_forks: usize,
    /// prepended to the task's `PATH`
    pub bin_dir: Option<PathBuf>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            stage_mode: StageMode::default(),
            polling: Polling::default(),
            timeout: None,
            max_forks: 4,
            bin_dir: None,
        }
    }
}

/// Runs tasks for one process: looks up the cache, stages inputs, writes the
/// launcher, hands it to the executor and applies the error strategy.
///
/// `submit` may be called concurrently. Concurrent submissions with the same
/// digest share a single execution; later ones resolve through the cache again.
#[derive(Debug)]
pub struct TaskProcessor {
    fs: Arc<Fs>,
    cache: CacheStore,
    stager: FileStager,
    executor: Executor,
    state: RunStateHandle,
    ui: Ui,
    settings: ProcessorSettings,
    permits: Semaphore,
    in_flight: Mutex<HashMap<Digest, Arc<OnceCell<TaskRun>>>>,
    token: CancellationToken,
}

impl TaskProcessor {
    pub fn new(
        fs: Arc<Fs>,
        executor: Executor,
        state: RunStateHandle,
        ui: Ui,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            cache: CacheStore::new(fs.clone()),
            stager: FileStager::new(settings.stage_mode),
            permits: Semaphore::new(settings.max_forks.max(1)),
            in_flight: Mutex::new(HashMap::default()),
            token: CancellationToken::new(),
            fs,
            executor,
            state,
            ui,
            settings,
        }
    }

    pub fn state(&self) -> &RunStateHandle {
        &self.state
    }

    /// Kill running tasks and refuse new ones.
    pub fn abort(&self) {
        if !self.token.is_cancelled() {
            log::info!("aborting execution");
            self.token.cancel();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `task` to completion, or reuse a cached or in-flight run of it.
    pub async fn submit(&self, task: &TaskDef) -> Result<TaskRun, TaskError> {
        let aborted = || TaskError::Other(Error::Aborted(task.name.clone()).into());
        if self.is_aborted() {
            return Err(aborted());
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| TaskError::Other(e.into()))?;
        if self.is_aborted() {
            return Err(aborted());
        }

        self.state.incr_submitted();
        let result = self.process(task).await;
        match &result {
            Ok(run) if run.ignored => {
                self.state.incr_failed();
                self.state.incr_completed();
            }
            Ok(_) => self.state.incr_completed(),
            Err(_) => self.state.incr_failed(),
        }
        result
    }

    async fn process(&self, task: &TaskDef) -> Result<TaskRun, TaskError> {
        let digest = match task.digest(task.resources.cache.hash_mode()) {
            Ok(digest) => digest,
            Err(e) => {
                log::error!("{}: {e}", task.name);
                self.abort();
                return Err(e.into());
            }
        };
        log::debug!("{}: digest {}", task.name, digest);
        let cell = self.in_flight_cell(digest);
        let result = cell
            .get_or_try_init(|| self.execute(task, digest))
            .await
            .cloned();
        self.release_in_flight(digest, &cell);
        result
    }

    fn in_flight_cell(&self, digest: Digest) -> Arc<OnceCell<TaskRun>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.entry(digest).or_default().clone()
    }

    /// Forget `cell` once its run is settled, unless a newer one already replaced it.
    fn release_in_flight(&self, digest: Digest, cell: &Arc<OnceCell<TaskRun>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&digest).is_some_and(|held| Arc::ptr_eq(held, cell)) {
            in_flight.remove(&digest);
        }
    }

    async fn execute(&self, task: &TaskDef, digest: Digest) -> Result<TaskRun, TaskError> {
        // a waiter on a failed in-flight run ends up here after a terminate:
        if self.is_aborted() {
            return Err(TaskError::Other(Error::Aborted(task.name.clone()).into()));
        }
        let resolution = self.cache.resolve(&digest, task).map_err(TaskError::Other)?;
        match resolution {
            Resolution::Hit(work_dir) => {
                let outputs =
                    collect_outputs(&work_dir, task).map_err(|e| TaskError::Other(e.into()))?;
                self.ui.cached(&digest.hash_log(), &task.name);
                let mut run = TaskRun::new(task, digest, work_dir);
                run.status = TaskStatus::Completed;
                run.exit_code = Some(0);
                run.cached = true;
                run.outputs = outputs;
                Ok(run)
            }
            Resolution::Miss(work_dir) => {
                self.run_with_policy(task, TaskRun::new(task, digest, work_dir))
                    .await
            }
        }
    }

    async fn run_with_policy(&self, task: &TaskDef, mut run: TaskRun) -> Result<TaskRun, TaskError> {
        let res = &task.resources;
        let hash_log = run.digest.hash_log();
        let mut attempt = 1;
        loop {
            self.ui.run(&hash_log, &task.name, attempt);
            let timer = Timer::now();
            let e = match self.attempt(task, &mut run).await {
                Ok(()) => {
                    run.status = TaskStatus::Completed;
                    self.ui.completed(&hash_log, &task.name, timer.elapsed());
                    return Ok(run);
                }
                Err(e) => e,
            };

            run.status = TaskStatus::Failed;
            if self.is_aborted() {
                self.ui.failed(&hash_log, &task.name, &e);
                return Err(e);
            }
            match res.error_strategy {
                ErrorStrategy::Retry if attempt <= res.max_retries => {
                    self.ui.retry(&hash_log, &task.name, &e);
                    attempt += 1;
                }
                ErrorStrategy::Ignore => {
                    self.ui.ignored(&hash_log, &task.name, &e);
                    run.status = TaskStatus::Completed;
                    run.ignored = true;
                    run.outputs.clear();
                    return Ok(run);
                }
                _ => {
                    self.ui.failed(&hash_log, &task.name, &e);
                    self.abort();
                    return Err(e);
                }
            }
        }
    }

    /// One try at running `task` in `run.work_dir`.
    async fn attempt(&self, task: &TaskDef, run: &mut TaskRun) -> Result<(), TaskError> {
        let work_dir = run.work_dir.clone();
        let holders = self
            .stager
            .bind_inputs(task)
            .map_err(|e| TaskError::Staging(e.into()))?;
        self.stager
            .stage(&self.fs, &work_dir, &holders)
            .map_err(|e| TaskError::Staging(e.into()))?;

        let job = GridJob {
            name: &task.name,
            work_dir: &work_dir,
            resources: &task.resources,
        };
        let env = build_environment(
            &task.resources.env,
            inherited_env(),
            self.settings.bin_dir.as_deref(),
        );
        self.write_launcher(task, &job, &env)
            .map_err(TaskError::Submission)?;
        self.clear_exit_code(&work_dir)
            .map_err(TaskError::Submission)?;
        run.status = TaskStatus::Submitted;

        let handle = self.executor.launch(&self.fs, &job, &env).await?;
        run.status = TaskStatus::Running;
        let timeout = self.settings.timeout.or(task.resources.time);
        let code = self
            .executor
            .wait(&self.fs, handle, &job, timeout, &self.settings.polling, &self.token)
            .await?;
        run.exit_code = Some(code);
        if code != 0 {
            return Err(TaskError::Execution(
                Error::ExitStatus {
                    name: task.name.clone(),
                    code,
                }
                .into(),
            ));
        }

        run.outputs = collect_outputs(&work_dir, task).map_err(|e| TaskError::Execution(e.into()))?;
        Ok(())
    }

    /// A marker left by an earlier attempt would end grid polling before the job runs.
    fn clear_exit_code(&self, work_dir: &Path) -> anyhow::Result<()> {
        let mut buf = PathBuf::with_capacity(256);
        let marker = self.fs.exit_code(work_dir, &mut buf);
        if self.fs.exists(marker) {
            self.fs
                .delete_file(marker)
                .context("removing stale exit status")?;
        }
        Ok(())
    }

    /// Write `.command.sh` and the `.command.run` wrapper that runs it.
    fn write_launcher(
        &self,
        task: &TaskDef,
        job: &GridJob,
        env: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let res = &task.resources;
        let mut buf = PathBuf::with_capacity(256);
        self.fs
            .write_executable(self.fs.command_sh(job.work_dir, &mut buf), &command_sh(&task.script))
            .context("writing task script")?;

        let interpreter = fetch_interpreter(&task.script).unwrap_or(DEFAULT_INTERPRETER);
        let mut strbuf = String::with_capacity(1024);
        let mut launcher = LauncherBuilder::new(&mut strbuf);
        launcher.write_prefix(&task.name);
        launcher.write_headers(&self.executor.headers(job));
        for (name, value) in exports(res, env, self.settings.bin_dir.as_deref()) {
            launcher.write_export(name, value);
        }
        launcher.write_modules(&res.modules);
        launcher.write_cd(job.work_dir);
        launcher.write_run(interpreter, res.container.as_deref());

        self.fs
            .write_executable(self.fs.command_run(job.work_dir, &mut buf), &strbuf)
            .context("writing task launcher")?;
        Ok(())
    }
}

/// The variables the launcher sets itself, so they survive a trip through
/// a scheduler that doesn't forward our environment.
fn exports<'a>(
    res: &'a config::ResourceSpec,
    env: &'a BTreeMap<String, String>,
    bin_dir: Option<&Path>,
) -> impl Iterator<Item = (&'a str, &'a str)> {
    let declares_path = res.env.iter().any(|(k, _)| k == PATH);
    let path = bin_dir
        .filter(|_| !declares_path)
        .and(env.get_key_value(PATH));
    res.env
        .iter()
        .filter_map(|(k, _)| env.get_key_value(k))
        .chain(path)
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exec::{InputValue, OutputDecl};
    use crate::stage::FileHolder;
    use anyhow::Result;
    use config::ResourceSpec;
    use tempfile::tempdir;

    struct Fixture {
        dir: tempfile::TempDir,
        processor: TaskProcessor,
    }

    fn fixture(settings: ProcessorSettings) -> Result<Fixture> {
        let dir = tempdir()?;
        let mut fs = Fs::new(&dir.path().join("work"));
        fs.ensure_work_root_exists()?;
        let processor = TaskProcessor::new(
            Arc::new(fs),
            Executor::Local,
            RunStateHandle::spawn(),
            Ui::default(),
            settings,
        );
        Ok(Fixture { dir, processor })
    }

    fn task(name: &str, script: &str) -> TaskDef {
        TaskDef {
            name: name.to_owned(),
            script: script.to_owned(),
            inputs: Vec::new(),
            outputs: vec![OutputDecl::one("out.txt")],
            resources: ResourceSpec::default(),
        }
    }

    #[tokio::test]
    async fn test_runs_and_collects_outputs() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let input = fx.dir.path().join("greeting.txt");
        std::fs::write(&input, "hello\n")?;

        let mut t = task("greet", "tr a-z A-Z < in.txt > out.txt\n");
        t.inputs.push((
            "greeting".to_owned(),
            InputValue::Files {
                pattern: "in.txt".to_owned(),
                holders: vec![FileHolder::from_store_path(&input)?],
            },
        ));
        let run = fx.processor.submit(&t).await?;
        assert_eq!(run.status, TaskStatus::Completed);
        assert_eq!(run.exit_code, Some(0));
        assert!(!run.cached);
        assert_eq!(run.outputs[0].paths, vec![PathBuf::from("out.txt")]);
        assert_eq!(std::fs::read_to_string(run.work_dir.join("out.txt"))?, "HELLO\n");

        let state = fx.processor.state().drain().await?;
        assert_eq!((state.submitted, state.completed, state.failed), (1, 1, 0));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_is_cached() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let t = task("greet", "echo hi > out.txt\n");
        let first = fx.processor.submit(&t).await?;

        let fs = Fs::new(fx.processor.fs.work_root());
        let again = TaskProcessor::new(
            Arc::new(fs),
            Executor::Local,
            RunStateHandle::spawn(),
            Ui::default(),
            ProcessorSettings::default(),
        );
        let second = again.submit(&t).await?;
        assert!(second.cached);
        assert_eq!(second.work_dir, first.work_dir);
        assert_eq!(second.outputs, first.outputs);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_digest_runs_once() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let counter = fx.dir.path().join("count");
        let script = format!("echo run >> '{}'\necho hi > out.txt\n", counter.display());
        let t = task("once", &script);
        let (a, b) = tokio::join!(fx.processor.submit(&t), fx.processor.submit(&t));
        assert_eq!(a?.work_dir, b?.work_dir);
        assert_eq!(std::fs::read_to_string(&counter)?, "run\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_then_succeed() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let mut t = task(
            "flaky",
            "if [ -f tried ]; then echo ok > out.txt; else touch tried; exit 1; fi\n",
        );
        t.resources.set("error_strategy", "retry")?;
        let run = fx.processor.submit(&t).await?;
        assert_eq!(run.status, TaskStatus::Completed);
        assert!(!fx.processor.is_aborted());
        Ok(())
    }

    #[tokio::test]
    async fn test_retries_are_bounded() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let mut t = task("broken", "echo . >> tries; exit 2\n");
        t.resources.set("error_strategy", "retry")?;
        t.resources.set("max_retries", "2")?;
        let result = fx.processor.submit(&t).await;
        assert!(matches!(result, Err(TaskError::Execution(_))));

        let work_dir = t.digest(config::HashMode::Standard)?.work_dir(fx.processor.fs.work_root());
        assert_eq!(std::fs::read_to_string(work_dir.join("tries"))?, ".\n.\n.\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_ignore_completes_without_outputs() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let mut t = task("broken", "echo partial > out.txt; exit 1\n");
        t.resources.set("error_strategy", "ignore")?;
        let run = fx.processor.submit(&t).await?;
        assert_eq!(run.status, TaskStatus::Completed);
        assert!(run.ignored);
        assert_eq!(run.exit_code, Some(1));
        assert!(run.outputs.is_empty());
        assert!(!fx.processor.is_aborted());

        let state = fx.processor.state().drain().await?;
        assert_eq!((state.completed, state.failed), (1, 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_terminate_aborts_later_submissions() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let result = fx.processor.submit(&task("broken", "exit 1\n")).await;
        assert!(matches!(result, Err(TaskError::Execution(_))));
        assert!(fx.processor.is_aborted());

        let later = fx.processor.submit(&task("fine", "echo hi > out.txt\n")).await;
        assert!(later.is_err_and(|e| e.is_aborted()));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_output_fails() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let result = fx.processor.submit(&task("lazy", "true\n")).await;
        assert!(matches!(result, Err(TaskError::Execution(_))));
        Ok(())
    }

    fn reader(fx: &Fixture, source: &str) -> Result<TaskDef> {
        let mut t = task("reader", "cat in.txt > out.txt\n");
        t.inputs.push((
            "data".to_owned(),
            InputValue::Files {
                pattern: "in.txt".to_owned(),
                holders: vec![FileHolder::from_store_path(fx.dir.path().join(source))?],
            },
        ));
        Ok(t)
    }

    #[tokio::test]
    async fn test_missing_input_fails_staging() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let t = reader(&fx, "absent.txt")?;
        let result = fx.processor.submit(&t).await;
        assert!(matches!(result, Err(TaskError::Staging(_))));
        assert!(fx.processor.is_aborted());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_input_is_ignored() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let mut t = reader(&fx, "absent.txt")?;
        t.resources.set("error_strategy", "ignore")?;
        let run = fx.processor.submit(&t).await?;
        assert!(run.ignored);
        assert_eq!(run.status, TaskStatus::Completed);
        assert_eq!(run.exit_code, None);
        assert!(!fx.processor.is_aborted());

        let next = fx.processor.submit(&task("next", "echo hi > out.txt\n")).await?;
        assert_eq!(next.status, TaskStatus::Completed);
        let state = fx.processor.state().drain().await?;
        assert_eq!((state.submitted, state.completed, state.failed), (2, 2, 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_staging_failure_is_retried() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let mut t = reader(&fx, "absent.txt")?;
        t.resources.set("error_strategy", "retry")?;
        t.resources.set("max_retries", "2")?;
        let result = fx.processor.submit(&t).await;
        assert!(matches!(result, Err(TaskError::Staging(_))));
        assert!(fx.processor.is_aborted());
        // every attempt stopped before a launcher was written:
        let work_dir = t.digest(config::HashMode::Standard)?.work_dir(fx.processor.fs.work_root());
        assert!(!work_dir.join(crate::fs::COMMAND_RUN).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_stage_name_is_ignored() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let source = fx.dir.path().join("in.txt");
        std::fs::write(&source, "data\n")?;
        let mut t = reader(&fx, "in.txt")?;
        let again = t.inputs[0].1.clone();
        t.inputs.push(("again".to_owned(), again));
        t.resources.set("error_strategy", "ignore")?;

        let run = fx.processor.submit(&t).await?;
        assert!(run.ignored);
        assert!(run.outputs.is_empty());
        assert!(!fx.processor.is_aborted());
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_input_in_deep_mode_aborts() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let mut t = reader(&fx, "absent.txt")?;
        t.resources.set("cache", "deep")?;
        t.resources.set("error_strategy", "ignore")?;
        let result = fx.processor.submit(&t).await;
        assert!(matches!(result, Err(TaskError::Hash(_))));
        assert!(fx.processor.is_aborted());
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_off_runs_every_submission() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let counter = fx.dir.path().join("count");
        let script = format!("echo run >> '{}'\necho hi > out.txt\n", counter.display());
        let mut t = task("uncached", &script);
        t.resources.set("cache", "off")?;

        let first = fx.processor.submit(&t).await?;
        let second = fx.processor.submit(&t).await?;
        assert!(!first.cached && !second.cached);
        assert_eq!(std::fs::read_to_string(&counter)?, "run\nrun\n");
        assert!(fx.processor.in_flight.lock().map_or(false, |m| m.is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_run_is_not_reused() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let counter = fx.dir.path().join("count");
        let script = format!("echo run >> '{}'\nexit 1\n", counter.display());
        let mut t = task("flaky", &script);
        t.resources.set("error_strategy", "ignore")?;

        assert!(fx.processor.submit(&t).await?.ignored);
        assert!(fx.processor.submit(&t).await?.ignored);
        assert_eq!(std::fs::read_to_string(&counter)?, "run\nrun\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_later_submission_hits_cache() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let t = task("greet", "echo hi > out.txt\n");
        let first = fx.processor.submit(&t).await?;
        let second = fx.processor.submit(&t).await?;
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.work_dir, first.work_dir);
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_fails_task() -> Result<()> {
        let fx = fixture(ProcessorSettings {
            timeout: Some(Duration::from_millis(200)),
            ..ProcessorSettings::default()
        })?;
        let result = fx.processor.submit(&task("slow", "sleep 10\n")).await;
        assert!(matches!(result, Err(TaskError::Execution(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_env_and_bin_dir() -> Result<()> {
        let fx = fixture(ProcessorSettings::default())?;
        let bin = fx.dir.path().join("bin");
        std::fs::create_dir(&bin)?;
        std::fs::write(bin.join("shout"), "#!/bin/sh\necho \"$GREETING!\"\n")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(bin.join("shout"), std::fs::Permissions::from_mode(0o755))?;
        }

        let fs = Fs::new(fx.processor.fs.work_root());
        let processor = TaskProcessor::new(
            Arc::new(fs),
            Executor::Local,
            RunStateHandle::spawn(),
            Ui::default(),
            ProcessorSettings {
                bin_dir: Some(bin),
                ..ProcessorSettings::default()
            },
        );
        let mut t = task("shout", "shout > out.txt\n");
        t.resources.set("env", "GREETING=hello")?;
        let run = processor.submit(&t).await?;
        assert_eq!(std::fs::read_to_string(run.work_dir.join("out.txt"))?, "hello!\n");

        let launcher = std::fs::read_to_string(run.work_dir.join(crate::fs::COMMAND_RUN))?;
        assert!(launcher.contains("export GREETING='hello'\n"));
        assert!(launcher.contains("export PATH="));
        Ok(())
    }
}
