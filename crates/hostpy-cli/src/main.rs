use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use hostpy::{BatchError, HostApplication, HostObject, ObjectNode, Runtime, RuntimeConfig, run_batch};
use tracing_subscriber::EnvFilter;

/// Runs a Python script in the batch context of an embedded hostpy runtime.
#[derive(Debug, Parser)]
#[command(name = "hostpy", version, about)]
struct Cli {
    /// Script to run.
    script: PathBuf,

    /// Runtime configuration file (TOML).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Extra directory to append to `sys.path`; may be repeated.
    #[arg(long = "module-path", value_name = "DIR")]
    module_paths: Vec<PathBuf>,

    /// Name of the project scripts see through `current_project()`.
    #[arg(long, default_value = "default")]
    project: String,

    /// Expose unreleased calculators.
    #[arg(long)]
    dev: bool,

    /// Log runtime internals to stderr.
    #[arg(short, long)]
    verbose: bool,
}

/// Host application of a command-line run: one empty project rooted at the script's directory.
#[derive(Debug)]
struct CliApplication {
    project: Arc<ObjectNode>,
    root: PathBuf,
}

impl CliApplication {
    fn new(project: &str, script: &Path) -> Self {
        let root = script
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            project: ObjectNode::new("Project", project),
            root,
        }
    }
}

impl HostApplication for CliApplication {
    fn current_project(&self) -> Option<Arc<dyn HostObject>> {
        Some(self.project.clone())
    }

    fn open_project(&self, name: &str) -> Option<Arc<dyn HostObject>> {
        (self.project.object_name() == name).then(|| Arc::clone(&self.project) as Arc<dyn HostObject>)
    }

    fn project_path(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }
}

fn install_tracing(verbose: bool) {
    let default = if verbose { "hostpy=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("HOSTPY_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    for path in &cli.module_paths {
        config = config.with_module_path(path);
    }
    if cli.dev {
        config = config.with_dev_mode(true);
    }
    Ok(config)
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(cli)?;
    let app = Arc::new(CliApplication::new(&cli.project, &cli.script));
    let runtime = Runtime::builder(config)
        .application(app)
        .build()
        .context("starting the interpreter")?;

    match run_batch(&runtime, &cli.script) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            // the traceback has already been mirrored to stderr
            if !matches!(err, BatchError::Failed(_)) {
                eprintln!("{err}");
            }
            tracing::debug!(error = %err, "batch run failed");
            Ok(ExitCode::from(err.exit_code()))
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_tracing(cli.verbose);
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
