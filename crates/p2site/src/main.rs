use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, error, info};

use p2site::{
    config::Config,
    orchestrator::{RunOutcome, SiteOrchestrator},
    tools::ToolSet,
};

/// Build a P2 update site from declared artifacts
///
/// Reads `p2site.toml` from the project root (or the user config directory),
/// resolves and bundles the declared artifacts as OSGi plugins and publishes
/// them together with features and P2 artifacts as a P2 repository.
#[derive(Parser, Debug)]
#[command(name = "p2site")]
#[command(version, about)]
struct Cli {
    /// Configuration file, discovered from the project root when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Project root used to resolve relative paths
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Continue when a transitive artifact cannot be bundled
    #[arg(long)]
    skip_invalid_artifacts: bool,

    /// Record a checksum of the declared artifacts and skip unchanged runs
    #[arg(long)]
    generate_checksum: bool,

    /// Checksum file, relative to the project root
    #[arg(long)]
    checksum_file: Option<PathBuf>,

    /// Build directory holding the scratch folders
    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Destination of the published repository
    #[arg(long)]
    destination: Option<PathBuf>,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::discover(&self.project_root)?,
        };

        if self.skip_invalid_artifacts {
            config.skip_invalid_artifacts = true;
        }
        if self.generate_checksum {
            config.checksum.generate = true;
        }
        if let Some(file) = &self.checksum_file {
            config.checksum.file.clone_from(file);
        }
        if let Some(dir) = &self.build_dir {
            config.build_directory.clone_from(dir);
        }
        if let Some(dir) = &self.destination {
            config.destination_directory = Some(dir.clone());
        }
        Ok(config)
    }
}

fn run(cli: &Cli) -> Result<()> {
    let project_root = cli.project_root.canonicalize().with_context(|| {
        format!(
            "Project root {} does not exist",
            cli.project_root.display()
        )
    })?;
    let config = cli.load_config()?;

    let tools = ToolSet::from_config(&config.tools, &project_root);
    let orchestrator = SiteOrchestrator::new(config, &project_root, tools.collaborators());

    match orchestrator.run()? {
        RunOutcome::Skipped => {}
        RunOutcome::Completed(summary) => info!(
            "Published {} plugins and {} features to {}",
            summary.bundled.len(),
            summary.features.len(),
            summary.destination.display()
        ),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
