//! Command-backed collaborators
//!
//! The pipeline only talks to traits; this module implements each of them by
//! launching a configured external tool. Resolver output is read back as
//! TOML, everything else communicates through files.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use log::debug;
use serde::Deserialize;

use crate::{
    bundler::{ArtifactBundler, BundlerInstructions, BundlerRequest},
    config::ToolsConfig,
    foreign::{ForeignResolutionRequest, ForeignResolver},
    launcher::{ToolCommand, file_url, launch},
    orchestrator::Collaborators,
    publisher::{CategoryPublishRequest, CategoryPublisher, SitePublishRequest, SitePublisher},
    resolver::{ArtifactResolver, ResolutionRequest},
    types::{ArtifactFile, ArtifactIdentity, ResolvedArtifact},
};

pub const FEATURES_AND_BUNDLES_PUBLISHER: &str =
    "org.eclipse.equinox.p2.publisher.FeaturesAndBundlesPublisher";
pub const CATEGORY_PUBLISHER: &str = "org.eclipse.equinox.p2.publisher.CategoryPublisher";

/// Document printed by the resolver tool
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResolverOutput {
    #[serde(default)]
    artifact: Vec<ResolverEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ResolverEntry {
    coordinate: String,
    file: PathBuf,
    source_coordinate: Option<String>,
    source_file: Option<PathBuf>,
    #[serde(default)]
    root: bool,
}

impl ResolverEntry {
    fn into_resolved(self) -> Result<ResolvedArtifact> {
        let identity: ArtifactIdentity = self.coordinate.parse()?;
        let source = match self.source_file {
            Some(file) => {
                let source_identity = match &self.source_coordinate {
                    Some(coordinate) => coordinate.parse()?,
                    None => identity.clone().with_classifier("sources"),
                };
                Some(ArtifactFile::new(source_identity, file))
            }
            None => None,
        };
        Ok(ResolvedArtifact {
            artifact: ArtifactFile::new(identity, self.file),
            source,
            is_root: self.root,
        })
    }
}

/// Resolves through `<tool> resolve <coordinate> [flags]`
#[derive(Debug, Clone)]
pub struct CommandResolver {
    pub command: ToolCommand,
    pub timeout_seconds: u64,
}

impl CommandResolver {
    fn arguments(request: &ResolutionRequest) -> Vec<String> {
        let mut args = vec!["resolve".to_owned(), request.root_artifact_id.clone()];
        if request.resolve_transitive {
            args.push("--transitive".to_owned());
        }
        if request.resolve_source {
            args.push("--sources".to_owned());
        }
        for exclude in &request.excludes {
            args.push("--exclude".to_owned());
            args.push(exclude.clone());
        }
        args
    }
}

impl ArtifactResolver for CommandResolver {
    fn resolve(&self, request: &ResolutionRequest) -> Result<Vec<ResolvedArtifact>> {
        let output = launch(
            &self.command,
            &Self::arguments(request),
            self.timeout_seconds,
        )?;
        parse_resolver_output(&output.stdout)
    }
}

fn parse_resolver_output(stdout: &str) -> Result<Vec<ResolvedArtifact>> {
    let document: ResolverOutput =
        toml::from_str(stdout).context("Resolver printed an invalid artifact list")?;
    document
        .artifact
        .into_iter()
        .map(ResolverEntry::into_resolved)
        .collect()
}

/// Bundles through `<tool> wrap --input <jar> --output <jar> ...`
#[derive(Debug, Clone)]
pub struct CommandBundler {
    pub command: ToolCommand,
    pub timeout_seconds: u64,
}

impl CommandBundler {
    fn arguments(request: &BundlerRequest, instructions: &BundlerInstructions) -> Vec<String> {
        let mut args = vec![
            "wrap".to_owned(),
            "--input".to_owned(),
            request.binary_input.display().to_string(),
            "--output".to_owned(),
            request.binary_output.display().to_string(),
        ];
        if let (Some(input), Some(output)) = (&request.source_input, &request.source_output) {
            args.extend([
                "--source-input".to_owned(),
                input.display().to_string(),
                "--source-output".to_owned(),
                output.display().to_string(),
            ]);
        }
        args.extend([
            "--symbolic-name".to_owned(),
            instructions.symbolic_name.clone(),
            "--version".to_owned(),
            instructions.version.clone(),
        ]);
        if instructions.singleton {
            args.push("--singleton".to_owned());
        }
        if instructions.pedantic {
            args.push("--pedantic".to_owned());
        }
        for (key, value) in &instructions.instructions {
            args.push("--instruction".to_owned());
            args.push(format!("{key}={value}"));
        }
        args
    }
}

impl ArtifactBundler for CommandBundler {
    fn execute(&self, request: &BundlerRequest, instructions: &BundlerInstructions) -> Result<()> {
        launch(
            &self.command,
            &Self::arguments(request, instructions),
            self.timeout_seconds,
        )?;
        Ok(())
    }
}

/// Fetches P2 artifacts through `<tool> fetch <namespace> <name> ...`
#[derive(Debug, Clone)]
pub struct CommandForeignResolver {
    pub command: ToolCommand,
    pub timeout_seconds: u64,
}

impl ForeignResolver for CommandForeignResolver {
    fn resolve(&self, request: &ForeignResolutionRequest, destination: &Path) -> Result<()> {
        let mut args = vec![
            "fetch".to_owned(),
            request.namespace.clone(),
            request.name.clone(),
            "--output".to_owned(),
            destination.display().to_string(),
        ];
        if request.include_sources {
            args.push("--sources".to_owned());
        }
        launch(&self.command, &args, self.timeout_seconds)?;
        debug!(
            "Fetched {}:{} into {}",
            request.namespace,
            request.name,
            destination.display()
        );
        Ok(())
    }
}

/// Runs the Eclipse launcher with the P2 publisher applications
#[derive(Debug, Clone)]
pub struct LauncherPublisher {
    pub launcher: ToolCommand,
}

impl LauncherPublisher {
    fn site_arguments(request: &SitePublishRequest) -> Vec<String> {
        let repository = file_url(&request.destination);
        let mut args = vec![
            "-application".to_owned(),
            FEATURES_AND_BUNDLES_PUBLISHER.to_owned(),
            "-source".to_owned(),
            request.source_folder.display().to_string(),
            "-metadataRepository".to_owned(),
            repository.clone(),
            "-artifactRepository".to_owned(),
            repository,
            "-publishArtifacts".to_owned(),
        ];
        if request.compress {
            args.push("-compress".to_owned());
        }
        args.extend(request.additional_args.iter().cloned());
        args
    }

    fn category_arguments(request: &CategoryPublishRequest) -> Vec<String> {
        let mut args = vec![
            "-application".to_owned(),
            CATEGORY_PUBLISHER.to_owned(),
            "-metadataRepository".to_owned(),
            file_url(&request.metadata_repository),
            "-categoryDefinition".to_owned(),
            file_url(&request.category_file),
            "-categoryQualifier".to_owned(),
        ];
        args.extend(request.additional_args.iter().cloned());
        args
    }
}

impl SitePublisher for LauncherPublisher {
    fn publish_site(&self, request: &SitePublishRequest) -> Result<()> {
        launch(
            &self.launcher,
            &Self::site_arguments(request),
            request.timeout_seconds,
        )?;
        Ok(())
    }
}

impl CategoryPublisher for LauncherPublisher {
    fn publish_categories(&self, request: &CategoryPublishRequest) -> Result<()> {
        launch(
            &self.launcher,
            &Self::category_arguments(request),
            request.timeout_seconds,
        )?;
        Ok(())
    }
}

/// Stand-in for a tool missing from the configuration
///
/// Fails only when the run actually needs the tool, so a site without
/// features does not have to configure a foreign resolver.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured(pub &'static str);

impl Unconfigured {
    fn fail<T>(self) -> Result<T> {
        bail!(
            "No {} tool configured, set tools.{} in p2site.toml",
            self.0.replace('-', " "),
            self.0
        )
    }
}

impl ArtifactResolver for Unconfigured {
    fn resolve(&self, _request: &ResolutionRequest) -> Result<Vec<ResolvedArtifact>> {
        self.fail()
    }
}

impl ArtifactBundler for Unconfigured {
    fn execute(&self, _request: &BundlerRequest, _instructions: &BundlerInstructions) -> Result<()> {
        self.fail()
    }
}

impl ForeignResolver for Unconfigured {
    fn resolve(&self, _request: &ForeignResolutionRequest, _destination: &Path) -> Result<()> {
        self.fail()
    }
}

impl SitePublisher for Unconfigured {
    fn publish_site(&self, _request: &SitePublishRequest) -> Result<()> {
        self.fail()
    }
}

impl CategoryPublisher for Unconfigured {
    fn publish_categories(&self, _request: &CategoryPublishRequest) -> Result<()> {
        self.fail()
    }
}

/// Command-backed collaborators built from `[tools]`
pub struct ToolSet {
    resolver: Box<dyn ArtifactResolver>,
    bundler: Box<dyn ArtifactBundler>,
    foreign_resolver: Box<dyn ForeignResolver>,
    site_publisher: Box<dyn SitePublisher>,
    category_publisher: Box<dyn CategoryPublisher>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet").finish_non_exhaustive()
    }
}

impl ToolSet {
    /// Tools run with `project_root` as working directory
    pub fn from_config(config: &ToolsConfig, project_root: &Path) -> Self {
        let command = |argv: &[String]| {
            ToolCommand::from_argv(argv).map(|command| command.in_dir(project_root))
        };
        let timeout_seconds = config.timeout_in_seconds;
        let site_publisher: Box<dyn SitePublisher>;
        let category_publisher: Box<dyn CategoryPublisher>;
        match command(&config.launcher) {
            Some(launcher) => {
                let publisher = LauncherPublisher { launcher };
                site_publisher = Box::new(publisher.clone());
                category_publisher = Box::new(publisher);
            }
            None => {
                site_publisher = Box::new(Unconfigured("launcher"));
                category_publisher = Box::new(Unconfigured("launcher"));
            }
        }

        Self {
            resolver: match command(&config.resolver) {
                Some(command) => Box::new(CommandResolver {
                    command,
                    timeout_seconds,
                }),
                None => Box::new(Unconfigured("resolver")),
            },
            bundler: match command(&config.bundler) {
                Some(command) => Box::new(CommandBundler {
                    command,
                    timeout_seconds,
                }),
                None => Box::new(Unconfigured("bundler")),
            },
            foreign_resolver: match command(&config.foreign_resolver) {
                Some(command) => Box::new(CommandForeignResolver {
                    command,
                    timeout_seconds,
                }),
                None => Box::new(Unconfigured("foreign-resolver")),
            },
            site_publisher,
            category_publisher,
        }
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            resolver: self.resolver.as_ref(),
            bundler: self.bundler.as_ref(),
            foreign_resolver: self.foreign_resolver.as_ref(),
            site_publisher: self.site_publisher.as_ref(),
            category_publisher: self.category_publisher.as_ref(),
        }
    }
}
