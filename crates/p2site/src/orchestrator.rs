//! End-to-end site build
//!
//! The orchestrator owns the immutable configuration of one run and drives
//! the stages strictly in sequence:
//! 1. Checksum gate (may end the run early)
//! 2. Scratch folder preparation
//! 3. Artifact resolution and deduplicated bundling
//! 4. Features, then directly referenced P2 artifacts
//! 5. Publishing, scratch cleanup and checksum persistence
//!
//! Any stage error aborts the remaining stages. Nothing is published and no
//! checksum is written after a failure.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

use crate::{
    bundler::{ArtifactBundler, BundleOptions, BundledSet, bundle_artifacts},
    checksum::{save_hash, should_skip},
    config::Config,
    feature::{handle_features, qualifier_timestamp},
    foreign::{ForeignResolver, handle_foreign},
    publisher::{CategoryPublisher, PublishOptions, SitePublisher, publish},
    resolver::{ArtifactResolver, resolve_artifacts},
};

/// Scratch folder below the build directory holding plugins and features
pub const BUNDLES_TOP_FOLDER: &str = "source";
pub const PLUGINS_FOLDER: &str = "plugins";
pub const FEATURES_FOLDER: &str = "features";
/// Default repository folder below the build directory
pub const REPOSITORY_FOLDER: &str = "repository";

/// Every path a run reads or writes, resolved against the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    pub work_folder: PathBuf,
    pub plugins_folder: PathBuf,
    pub features_folder: PathBuf,
    pub destination: PathBuf,
    pub checksum_file: PathBuf,
    pub category_file: Option<PathBuf>,
}

impl SiteLayout {
    pub fn new(config: &Config, project_root: &Path) -> Self {
        let build_directory = project_root.join(&config.build_directory);
        let work_folder = build_directory.join(BUNDLES_TOP_FOLDER);
        let destination = config.destination_directory.as_ref().map_or_else(
            || build_directory.join(REPOSITORY_FOLDER),
            |dir| project_root.join(dir),
        );
        Self {
            plugins_folder: work_folder.join(PLUGINS_FOLDER),
            features_folder: work_folder.join(FEATURES_FOLDER),
            work_folder,
            destination,
            checksum_file: project_root.join(&config.checksum.file),
            category_file: config.category_file.as_ref().map(|f| project_root.join(f)),
        }
    }
}

/// The external services one run talks to
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub resolver: &'a dyn ArtifactResolver,
    pub bundler: &'a dyn ArtifactBundler,
    pub foreign_resolver: &'a dyn ForeignResolver,
    pub site_publisher: &'a dyn SitePublisher,
    pub category_publisher: &'a dyn CategoryPublisher,
}

impl fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// What a finished run did
#[derive(Debug)]
pub enum RunOutcome {
    /// The declared artifacts did not change since the last successful run
    Skipped,
    Completed(RunSummary),
}

#[derive(Debug)]
pub struct RunSummary {
    pub bundled: BundledSet,
    pub features: Vec<PathBuf>,
    pub destination: PathBuf,
}

#[derive(Debug)]
pub struct SiteOrchestrator<'a> {
    config: Config,
    layout: SiteLayout,
    collaborators: Collaborators<'a>,
    /// Qualifier timestamp shared by every feature of this run
    timestamp: String,
}

impl<'a> SiteOrchestrator<'a> {
    pub fn new(config: Config, project_root: &Path, collaborators: Collaborators<'a>) -> Self {
        let layout = SiteLayout::new(&config, project_root);
        Self {
            config,
            layout,
            collaborators,
            timestamp: qualifier_timestamp(Utc::now()),
        }
    }

    /// Use a fixed feature qualifier instead of the current time
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn layout(&self) -> &SiteLayout {
        &self.layout
    }

    pub fn run(&self) -> Result<RunOutcome> {
        let checksum = &self.config.checksum;
        let decision = should_skip(
            &self.config.artifacts,
            &self.layout.checksum_file,
            checksum.generate,
            checksum.skip_if_equal,
        );
        if decision.skip {
            info!(
                "Skipping execution because the p2 site was already generated for this set of \
                 declared artifacts"
            );
            return Ok(RunOutcome::Skipped);
        }

        self.prepare_environment()?;

        let index = resolve_artifacts(self.collaborators.resolver, &self.config.artifacts)?;
        let bundled = bundle_artifacts(
            self.collaborators.bundler,
            &index,
            &self.config.artifacts,
            &BundleOptions {
                plugins_folder: self.layout.plugins_folder.clone(),
                skip_invalid: self.config.skip_invalid_artifacts,
                pedantic: self.config.pedantic,
            },
        )?;

        let features = handle_features(
            self.collaborators.resolver,
            &self.config.features,
            &self.layout.features_folder,
            &self.timestamp,
        )?;

        handle_foreign(
            self.collaborators.foreign_resolver,
            &self.config.foreign,
            &self.layout.plugins_folder,
        )?;

        publish(
            self.collaborators.site_publisher,
            self.collaborators.category_publisher,
            &PublishOptions {
                source_folder: self.layout.work_folder.clone(),
                destination: self.layout.destination.clone(),
                compress: self.config.compress_site,
                additional_args: self.config.additional_args(),
                category_file: self.layout.category_file.clone(),
                timeout_seconds: self.config.forked_process_timeout_in_seconds,
            },
        )?;

        self.cleanup_environment();
        save_hash(&decision, &self.layout.checksum_file);

        Ok(RunOutcome::Completed(RunSummary {
            bundled,
            features,
            destination: self.layout.destination.clone(),
        }))
    }

    fn prepare_environment(&self) -> Result<()> {
        let work_folder = &self.layout.work_folder;
        if work_folder.exists() {
            fs::remove_dir_all(work_folder)
                .with_context(|| format!("Failed to clear {}", work_folder.display()))?;
        }
        for folder in [&self.layout.plugins_folder, &self.layout.features_folder] {
            fs::create_dir_all(folder)
                .with_context(|| format!("Failed to create {}", folder.display()))?;
        }
        Ok(())
    }

    fn cleanup_environment(&self) {
        let work_folder = &self.layout.work_folder;
        if let Err(e) = fs::remove_dir_all(work_folder) {
            warn!(
                "Cannot cleanup the work folder {}: {e}",
                work_folder.display()
            );
        }
    }
}
