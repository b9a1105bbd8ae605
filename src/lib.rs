/// High-level command line app
mod app;
/// Definition of command-line args
mod args;
/// Content-addressed work dirs
pub mod cache;
/// Task execution
pub mod exec;
/// Filesystem operations
pub mod fs;
/// Task digests
pub mod hash;
/// Combined command-line and default run settings
mod settings;
/// Input staging and output collection
pub mod stage;
/// Progress counters shared by a process's task runs
pub mod state;
/// Text UI
mod ui;

// exported for tests:
pub use app::App;
pub use args::Args;
pub use settings::Settings;
pub use ui::Ui;

/// Run the command-line app.
pub fn run() -> Result<(), anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;

    let log_level = match settings.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()?;

    Ok(())
}
