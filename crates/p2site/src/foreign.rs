//! Directly referenced P2 artifacts
//!
//! These are fetched as-is from Eclipse repositories into the plugin output
//! folder. No dedup is performed here.

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::types::{ConfigurationError, ForeignArtifact};

/// Request for one foreign artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignResolutionRequest {
    pub namespace: String,
    pub name: String,
    pub include_sources: bool,
}

impl ForeignResolutionRequest {
    /// Split a `namespace:name` id, rejecting any other shape
    pub fn parse(artifact: &ForeignArtifact) -> Result<Self, ConfigurationError> {
        match artifact.id.split(':').collect::<Vec<_>>().as_slice() {
            [namespace, name] if !namespace.is_empty() && !name.is_empty() => Ok(Self {
                namespace: (*namespace).to_owned(),
                name: (*name).to_owned(),
                include_sources: artifact.source,
            }),
            _ => Err(ConfigurationError::new(format!(
                "Wrong format {}",
                artifact.id
            ))),
        }
    }
}

/// Fetches an artifact from a P2 repository into a destination folder
pub trait ForeignResolver {
    fn resolve(&self, request: &ForeignResolutionRequest, destination: &Path) -> Result<()>;
}

/// Resolve every foreign artifact in declaration order
pub fn handle_foreign(
    resolver: &dyn ForeignResolver,
    declared: &[ForeignArtifact],
    bundles_folder: &Path,
) -> Result<()> {
    for artifact in declared {
        info!(
            "Resolving artifact=[{}] source=[{}]",
            artifact.id, artifact.source
        );
        let request = ForeignResolutionRequest::parse(artifact)?;
        resolver
            .resolve(&request, bundles_folder)
            .with_context(|| format!("Failed to resolve P2 artifact [{}]", artifact.id))?;
    }
    Ok(())
}
