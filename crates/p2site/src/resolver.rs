use std::collections::BTreeSet;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{info, warn};

use crate::types::{DeclaredArtifact, ResolvedArtifact};

/// Request sent to an [`ArtifactResolver`] for one declared artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    /// Coordinate of the requested (root) artifact
    pub root_artifact_id: String,
    pub resolve_source: bool,
    pub resolve_transitive: bool,
    /// Coordinate patterns excluded from the transitive graph
    pub excludes: BTreeSet<String>,
}

impl ResolutionRequest {
    pub fn for_declared(artifact: &DeclaredArtifact) -> Self {
        Self {
            root_artifact_id: artifact.id.clone(),
            resolve_source: artifact.source,
            resolve_transitive: artifact.transitive,
            excludes: artifact.excludes.clone(),
        }
    }
}

/// Fetches an artifact and, on request, its transitive graph from a repository
///
/// The returned list contains the requested artifact flagged as root plus
/// every dependency pulled in, in the order the repository reported them.
/// Retrying and partial success are the implementation's business; an
/// error returned here aborts the run.
pub trait ArtifactResolver {
    fn resolve(&self, request: &ResolutionRequest) -> Result<Vec<ResolvedArtifact>>;
}

/// Ordered multimap from declared artifact to its resolved artifacts
///
/// Iteration follows declaration order so logs and output are reproducible.
/// Declaring the same artifact twice appends to the same entry.
#[derive(Debug, Clone, Default)]
pub struct ResolutionIndex {
    entries: IndexMap<DeclaredArtifact, Vec<ResolvedArtifact>>,
}

impl ResolutionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append resolved artifacts under a declaration
    pub fn put_all(
        &mut self,
        declared: &DeclaredArtifact,
        resolved: impl IntoIterator<Item = ResolvedArtifact>,
    ) {
        self.entries
            .entry(declared.clone())
            .or_default()
            .extend(resolved);
    }

    /// Resolved artifacts of a declaration, empty when it was never resolved
    pub fn get(&self, declared: &DeclaredArtifact) -> &[ResolvedArtifact] {
        self.entries.get(declared).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeclaredArtifact, &[ResolvedArtifact])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Total number of resolved artifacts across all declarations
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve every declared artifact, one request each, in declaration order
pub fn resolve_artifacts(
    resolver: &dyn ArtifactResolver,
    declared: &[DeclaredArtifact],
) -> Result<ResolutionIndex> {
    let mut index = ResolutionIndex::new();
    for artifact in declared {
        log_resolving(artifact);
        let request = ResolutionRequest::for_declared(artifact);
        let resolved = resolver
            .resolve(&request)
            .with_context(|| format!("Failed to resolve artifact [{}]", artifact.id))?;
        log_resolved(&request, &resolved);
        index.put_all(artifact, resolved);
    }
    Ok(index)
}

fn log_resolving(artifact: &DeclaredArtifact) {
    info!(
        "Resolving artifact=[{}] transitive=[{}] source=[{}]",
        artifact.id, artifact.transitive, artifact.source
    );
}

fn log_resolved(request: &ResolutionRequest, resolved: &[ResolvedArtifact]) {
    for artifact in resolved {
        info!("\t [JAR] {}", artifact.identity());
        if let Some(source) = &artifact.source {
            info!("\t [SRC] {}", source.identity);
        } else if request.resolve_source {
            warn!(
                "\t [SRC] Failed to resolve source for artifact {}",
                artifact.identity()
            );
        }
    }
}
