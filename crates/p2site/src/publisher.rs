//! Publishing the bundled output as a P2 repository
//!
//! Two external tools run one after the other: the site publisher turns the
//! plugin and feature folders into P2 metadata, then the category publisher
//! adds the category index on top of that repository.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::info;

/// Category definition used when none is configured
pub const DEFAULT_CATEGORY_XML: &str = include_str!("../resources/category.xml");

/// File name of the category definition written into the destination
pub const DEFAULT_CATEGORY_FILE: &str = "category.xml";

/// Arguments for generating repository metadata from bundled jars
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePublishRequest {
    /// Folder holding the `plugins` and `features` subfolders
    pub source_folder: PathBuf,
    pub destination: PathBuf,
    pub compress: bool,
    pub additional_args: Vec<String>,
    pub timeout_seconds: u64,
}

/// Arguments for attaching categories to a published repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPublishRequest {
    pub metadata_repository: PathBuf,
    pub category_file: PathBuf,
    pub additional_args: Vec<String>,
    pub timeout_seconds: u64,
}

pub trait SitePublisher {
    fn publish_site(&self, request: &SitePublishRequest) -> Result<()>;
}

pub trait CategoryPublisher {
    fn publish_categories(&self, request: &CategoryPublishRequest) -> Result<()>;
}

/// Settings of the publish stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub source_folder: PathBuf,
    pub destination: PathBuf,
    pub compress: bool,
    pub additional_args: Vec<String>,
    /// Configured category definition, the bundled default when `None`
    pub category_file: Option<PathBuf>,
    /// Forked process timeout, 0 waits forever
    pub timeout_seconds: u64,
}

/// Clear the destination, then run the site and category publishers
pub fn publish(
    site: &dyn SitePublisher,
    categories: &dyn CategoryPublisher,
    options: &PublishOptions,
) -> Result<()> {
    prepare_destination(&options.destination)?;

    info!("Publishing site to {}", options.destination.display());
    site.publish_site(&SitePublishRequest {
        source_folder: options.source_folder.clone(),
        destination: options.destination.clone(),
        compress: options.compress,
        additional_args: options.additional_args.clone(),
        timeout_seconds: options.timeout_seconds,
    })
    .context("Site publisher failed")?;

    let category_file = prepare_category_file(options)?;
    info!("Publishing categories from {}", category_file.display());
    categories
        .publish_categories(&CategoryPublishRequest {
            metadata_repository: options.destination.clone(),
            category_file,
            additional_args: options.additional_args.clone(),
            timeout_seconds: options.timeout_seconds,
        })
        .context("Category publisher failed")
}

fn prepare_destination(destination: &Path) -> Result<()> {
    if destination.exists() {
        fs::remove_dir_all(destination).with_context(|| {
            format!("Failed to clear destination {}", destination.display())
        })?;
    }
    Ok(())
}

/// Return the category file to use, writing the default one if needed
fn prepare_category_file(options: &PublishOptions) -> Result<PathBuf> {
    if let Some(file) = &options.category_file {
        return Ok(file.clone());
    }

    fs::create_dir_all(&options.destination).with_context(|| {
        format!(
            "Failed to create destination {}",
            options.destination.display()
        )
    })?;
    let file = options.destination.join(DEFAULT_CATEGORY_FILE);
    fs::write(&file, DEFAULT_CATEGORY_XML)
        .with_context(|| format!("Failed to write {}", file.display()))?;
    Ok(file)
}
