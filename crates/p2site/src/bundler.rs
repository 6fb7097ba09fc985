//! Deduplicating bundling stage
//!
//! Walks the resolution index twice. The first pass bundles every root, the
//! artifacts the user asked for explicitly, and treats a root declared twice
//! as a misconfiguration. The second pass bundles the transitive artifacts
//! that no earlier pass already produced, optionally skipping the ones the
//! bundler rejects.

use std::{
    collections::BTreeMap,
    fmt,
    hash::BuildHasherDefault,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexSet;
use log::{debug, info, warn};
use rustc_hash::FxHasher;

use crate::{
    resolver::ResolutionIndex,
    types::{ArtifactIdentity, ConfigurationError, DeclaredArtifact, ResolvedArtifact},
};

/// Type alias for FxHasher-based IndexSet
type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Manifest header overriding the computed symbolic name
pub const BUNDLE_SYMBOLIC_NAME: &str = "Bundle-SymbolicName";

/// Manifest header overriding the computed bundle version
pub const BUNDLE_VERSION: &str = "Bundle-Version";

/// Files the bundler reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerRequest {
    pub binary_input: PathBuf,
    pub binary_output: PathBuf,
    pub source_input: Option<PathBuf>,
    pub source_output: Option<PathBuf>,
}

/// Metadata the bundler writes into the rewritten manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlerInstructions {
    pub symbolic_name: String,
    pub version: String,
    /// Extra manifest headers, only ever set for root artifacts
    pub instructions: BTreeMap<String, String>,
    pub singleton: bool,
    pub pedantic: bool,
    pub include_source: bool,
}

/// Rewrites a plain jar into an OSGi bundle
pub trait ArtifactBundler {
    fn execute(&self, request: &BundlerRequest, instructions: &BundlerInstructions) -> Result<()>;
}

/// Identities bundled during the current run
///
/// Grows monotonically; an identity is only added once the bundler
/// succeeded for it.
#[derive(Debug, Clone, Default)]
pub struct BundledSet {
    identities: FxIndexSet<ArtifactIdentity>,
}

impl BundledSet {
    pub fn contains(&self, identity: &ArtifactIdentity) -> bool {
        self.identities.contains(identity)
    }

    /// Returns false when the identity was already present
    pub fn insert(&mut self, identity: ArtifactIdentity) -> bool {
        self.identities.insert(identity)
    }

    /// Identities in the order they were bundled
    pub fn iter(&self) -> impl Iterator<Item = &ArtifactIdentity> {
        self.identities.iter()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Settings of the bundling stage
#[derive(Debug, Clone)]
pub struct BundleOptions {
    /// Folder receiving the rewritten plugin jars
    pub plugins_folder: PathBuf,
    /// Log and continue when a transitive artifact cannot be bundled
    pub skip_invalid: bool,
    /// Ask the bundler to fail on manifest warnings
    pub pedantic: bool,
}

/// Bundle every resolved artifact exactly once
pub fn bundle_artifacts(
    bundler: &dyn ArtifactBundler,
    index: &ResolutionIndex,
    declared: &[DeclaredArtifact],
    options: &BundleOptions,
) -> Result<BundledSet> {
    let mut bundled = BundledSet::default();
    bundle_roots(bundler, index, declared, options, &mut bundled)?;
    bundle_transitives(bundler, index, declared, options, &mut bundled)?;
    info!("Bundled {} artifacts", bundled.len());
    Ok(bundled)
}

fn bundle_roots(
    bundler: &dyn ArtifactBundler,
    index: &ResolutionIndex,
    declared: &[DeclaredArtifact],
    options: &BundleOptions,
    bundled: &mut BundledSet,
) -> Result<()> {
    // Every root is checked for duplicates before the first one is bundled
    let mut planned = FxIndexSet::default();
    let mut roots = Vec::new();
    for artifact in declared {
        for resolved in index.get(artifact).iter().filter(|r| r.is_root) {
            if !planned.insert(resolved.identity().clone()) {
                return Err(ConfigurationError::new(format!(
                    "Jar [{}] is configured as an artifact multiple times. Remove the duplicate \
                     artifact definitions.",
                    resolved.identity()
                ))
                .into());
            }
            roots.push((artifact, resolved));
        }
    }

    for (artifact, resolved) in roots {
        bundle_artifact(bundler, artifact, resolved, options)?;
        bundled.insert(resolved.identity().clone());
    }
    Ok(())
}

fn bundle_transitives(
    bundler: &dyn ArtifactBundler,
    index: &ResolutionIndex,
    declared: &[DeclaredArtifact],
    options: &BundleOptions,
    bundled: &mut BundledSet,
) -> Result<()> {
    for artifact in declared {
        for resolved in index.get(artifact).iter().filter(|r| !r.is_root) {
            if bundled.contains(resolved.identity()) {
                debug!(
                    "Not bundling transitive dependency since it has already been bundled [{}]",
                    resolved.identity()
                );
                continue;
            }

            match bundle_artifact(bundler, artifact, resolved, options) {
                Ok(()) => {
                    bundled.insert(resolved.identity().clone());
                }
                Err(e) if options.skip_invalid => {
                    warn!("Skip artifact=[{}]: {e:#}", artifact.id);
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

fn bundle_artifact(
    bundler: &dyn ArtifactBundler,
    declared: &DeclaredArtifact,
    resolved: &ResolvedArtifact,
    options: &BundleOptions,
) -> Result<()> {
    let instructions = create_instructions(declared, resolved, options.pedantic);
    let request = create_request(resolved, &instructions, &options.plugins_folder);
    debug!(
        "Bundling {} as {}_{}",
        resolved.identity(),
        instructions.symbolic_name,
        instructions.version
    );
    bundler
        .execute(&request, &instructions)
        .with_context(|| BundlingFailed(resolved.artifact.file.clone()))
}

/// Context attached to a bundler error
struct BundlingFailed(PathBuf);

impl fmt::Display for BundlingFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .0
            .file_name()
            .map_or_else(|| self.0.display().to_string(), |n| n.to_string_lossy().into_owned());
        write!(f, "Error while bundling jar or source: {name}")
    }
}

pub fn create_instructions(
    declared: &DeclaredArtifact,
    resolved: &ResolvedArtifact,
    pedantic: bool,
) -> BundlerInstructions {
    let instructions = if resolved.is_root {
        declared.instructions.clone()
    } else {
        BTreeMap::new()
    };
    let symbolic_name = instructions
        .get(BUNDLE_SYMBOLIC_NAME)
        .cloned()
        .unwrap_or_else(|| symbolic_name(resolved.identity()));
    let version = instructions
        .get(BUNDLE_VERSION)
        .cloned()
        .unwrap_or_else(|| osgi_version(&resolved.identity().version));

    BundlerInstructions {
        symbolic_name,
        version,
        instructions,
        singleton: resolved.is_root && declared.singleton,
        pedantic,
        include_source: declared.source && resolved.source.is_some(),
    }
}

pub fn create_request(
    resolved: &ResolvedArtifact,
    instructions: &BundlerInstructions,
    plugins_folder: &Path,
) -> BundlerRequest {
    let binary_output = plugins_folder.join(format!(
        "{}_{}.jar",
        instructions.symbolic_name, instructions.version
    ));
    let (source_input, source_output) = match &resolved.source {
        Some(source) if instructions.include_source => (
            Some(source.file.clone()),
            Some(plugins_folder.join(format!(
                "{}.source_{}.jar",
                instructions.symbolic_name, instructions.version
            ))),
        ),
        _ => (None, None),
    };

    BundlerRequest {
        binary_input: resolved.artifact.file.clone(),
        binary_output,
        source_input,
        source_output,
    }
}

/// Default bundle symbolic name, `group.name[.classifier]`
pub fn symbolic_name(identity: &ArtifactIdentity) -> String {
    match &identity.classifier {
        Some(classifier) => format!("{}.{}.{}", identity.group, identity.name, classifier),
        None => format!("{}.{}", identity.group, identity.name),
    }
}

/// Normalize a repository version into `major.minor.micro[.qualifier]`
///
/// Missing numeric segments become `0`; whatever follows the numeric part is
/// moved into the qualifier with characters OSGi does not allow replaced by
/// `_`.
pub fn osgi_version(version: &str) -> String {
    let mut numbers: Vec<&str> = Vec::with_capacity(3);
    let mut rest = version.trim();

    while numbers.len() < 3 {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            break;
        }
        numbers.push(&rest[..digits]);
        rest = &rest[digits..];

        let continues = rest.len() > 1
            && rest.starts_with('.')
            && rest.as_bytes()[1].is_ascii_digit();
        if !continues || numbers.len() == 3 {
            break;
        }
        rest = &rest[1..];
    }

    let qualifier: String = rest
        .strip_prefix(['.', '-', '_'])
        .unwrap_or(rest)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut normalized = String::new();
    for i in 0..3 {
        if i > 0 {
            normalized.push('.');
        }
        // leading zeros are dropped, "01" and "1" are the same segment
        let digits = numbers.get(i).map_or("", |n| n.trim_start_matches('0'));
        normalized.push_str(if digits.is_empty() { "0" } else { digits });
    }
    if !qualifier.is_empty() {
        normalized.push('.');
        normalized.push_str(&qualifier);
    }
    normalized
}
