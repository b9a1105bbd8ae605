use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::exec::{Executor, TaskDef, TaskProcessor, TaskRun};
use crate::fs::Fs;
use crate::settings::Settings;
use crate::state::RunStateHandle;
use crate::ui::Ui;

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// Filesystem interface
    fs: Fs,
    /// User interface
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let fs = Fs::new(&settings.work_dir);
        let ui = Ui::new(&settings);
        Self { settings, fs, ui }
    }

    /// Run the app on a fresh multi-threaded runtime, printing the paths
    /// of the task's outputs to stdout.
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("while starting async runtime")?;
        let Some(run) = runtime.block_on(self.run_task())? else {
            return Ok(());
        };
        if run.ignored {
            eprintln!("{}", "Task failed; error ignored.".yellow());
        }
        for output in &run.outputs {
            for path in &output.paths {
                println!("{}", run.work_dir.join(path).display());
            }
        }
        Ok(())
    }

    /// Run the configured task. Returns `None` if only the hash log was asked for.
    pub async fn run_task(mut self) -> Result<Option<TaskRun>> {
        let task = self.load_task()?;
        if self.settings.hash_log {
            let digest = task.digest(task.resources.cache.hash_mode())?;
            println!("{}", digest.hash_log());
            return Ok(None);
        }

        let executor = Executor::by_name(&self.settings.executor)?;
        self.fs.ensure_work_root_exists()?;
        self.ui.verbose_msg(&format!(
            "Using {} executor and work directory {:?}",
            executor.name(),
            self.fs.work_root()
        ));

        let state = RunStateHandle::spawn();
        state.subscribe(|s| {
            log::debug!(
                "submitted {}, completed {}, failed {}",
                s.submitted,
                s.completed,
                s.failed
            );
            Ok(())
        });

        let processor = TaskProcessor::new(
            Arc::new(self.fs),
            executor,
            state.clone(),
            self.ui,
            self.settings.processor,
        );
        let result = processor.submit(&task).await;

        state.poison();
        let summary = state.drain().await?;
        log::info!(
            "run finished: {} submitted, {} completed, {} failed",
            summary.submitted,
            summary.completed,
            summary.failed
        );

        let run = result.with_context(|| format!("while running task \"{}\"", task.name))?;
        Ok(Some(run))
    }

    fn load_task(&mut self) -> Result<TaskDef> {
        let mut script = String::with_capacity(0); // will be resized later.
        self.fs
            .read_to_buf(&self.settings.script, &mut script)
            .with_context(|| format!("while reading script {:?}", self.settings.script))?;
        Ok(TaskDef {
            name: self.settings.name.clone(),
            script,
            inputs: std::mem::take(&mut self.settings.inputs),
            outputs: std::mem::take(&mut self.settings.outputs),
            resources: self.settings.resources.clone(),
        })
    }
}
