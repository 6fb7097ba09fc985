//! Shared type definitions for the p2site crate
//!
//! This module contains the artifact model used across every stage of the
//! site build: what the user declares, what the resolver hands back and the
//! identity used to decide whether something was already bundled.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::PathBuf,
    str::FromStr,
};

use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Extension assumed when a coordinate does not name one
pub const DEFAULT_EXTENSION: &str = "jar";

/// Error raised for mistakes in the declared configuration
///
/// Carried inside `anyhow::Error` so callers can tell a misconfiguration
/// apart from a resolution or bundling failure with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p2site misconfiguration: {}", self.message)
    }
}

impl std::error::Error for ConfigurationError {}

/// Identity of an artifact in a Maven-style repository
///
/// Equality on this type is what "already bundled" means: two resolved
/// artifacts with the same identity are the same bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactIdentity {
    pub group: String,
    pub name: String,
    pub extension: String,
    pub classifier: Option<String>,
    pub version: String,
}

impl ArtifactIdentity {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            extension: DEFAULT_EXTENSION.to_owned(),
            classifier: None,
            version: version.into(),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

/// Parses `group:name[:extension[:classifier]]:version`
impl FromStr for ArtifactIdentity {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split(':').map(str::trim).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(ConfigurationError::new(format!(
                "Bad artifact coordinates [{s}], expected format is \
                 <group>:<name>[:<extension>[:<classifier>]]:<version>"
            )));
        }

        let (extension, classifier) = match tokens.len() {
            3 => (DEFAULT_EXTENSION, None),
            4 => (tokens[2], None),
            5 => (tokens[2], Some(tokens[3].to_owned())),
            _ => {
                return Err(ConfigurationError::new(format!(
                    "Bad artifact coordinates [{s}], expected format is \
                     <group>:<name>[:<extension>[:<classifier>]]:<version>"
                )));
            }
        };

        Ok(Self {
            group: tokens[0].to_owned(),
            name: tokens[1].to_owned(),
            extension: extension.to_owned(),
            classifier,
            version: tokens[tokens.len() - 1].to_owned(),
        })
    }
}

impl fmt::Display for ArtifactIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.extension)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        write!(f, ":{}", self.version)
    }
}

const fn default_true() -> bool {
    true
}

/// A user-declared request for one coordinate plus resolution flags
///
/// Declared once in the configuration and never mutated afterwards. Every
/// field takes part in [`DeclaredArtifact::checksum`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct DeclaredArtifact {
    /// Coordinate in `group:name[:extension[:classifier]]:version` form
    pub id: String,
    /// Pull in the transitive dependency graph
    #[serde(default = "default_true")]
    pub transitive: bool,
    /// Resolve and bundle the sources jar next to the binary
    #[serde(default)]
    pub source: bool,
    /// Coordinate patterns excluded from the transitive graph
    #[serde(default)]
    pub excludes: BTreeSet<String>,
    /// Manifest headers handed to the bundler for the root artifact
    #[serde(default)]
    pub instructions: BTreeMap<String, String>,
    /// Mark the bundle as an OSGi singleton
    #[serde(default)]
    pub singleton: bool,
}

impl DeclaredArtifact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transitive: true,
            source: false,
            excludes: BTreeSet::new(),
            instructions: BTreeMap::new(),
            singleton: false,
        }
    }

    #[must_use]
    pub fn transitive(mut self, transitive: bool) -> Self {
        self.transitive = transitive;
        self
    }

    #[must_use]
    pub fn source(mut self, source: bool) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.insert(pattern.into());
        self
    }

    #[must_use]
    pub fn instruction(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.instructions.insert(key.into(), value.into());
        self
    }

    /// Parse the declared id into an identity
    pub fn identity(&self) -> Result<ArtifactIdentity, ConfigurationError> {
        self.id.parse()
    }

    /// Stable hash over every field of the declaration
    ///
    /// Fields are length-prefixed before hashing so that moving characters
    /// between adjacent fields always changes the result.
    pub fn checksum(&self) -> u64 {
        let mut hasher = Sha256::new();
        feed(&mut hasher, self.id.as_bytes());
        feed(&mut hasher, &[u8::from(self.transitive), u8::from(self.source)]);
        feed(&mut hasher, &(self.excludes.len() as u64).to_be_bytes());
        for exclude in &self.excludes {
            feed(&mut hasher, exclude.as_bytes());
        }
        feed(&mut hasher, &(self.instructions.len() as u64).to_be_bytes());
        for (key, value) in &self.instructions {
            feed(&mut hasher, key.as_bytes());
            feed(&mut hasher, value.as_bytes());
        }
        feed(&mut hasher, &[u8::from(self.singleton)]);
        leading_u64(&hasher.finalize())
    }
}

impl fmt::Display for DeclaredArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// First eight bytes of a digest as a big-endian integer
pub(crate) fn leading_u64(digest: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// An artifact file on disk together with its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub identity: ArtifactIdentity,
    pub file: PathBuf,
}

impl ArtifactFile {
    pub fn new(identity: ArtifactIdentity, file: impl Into<PathBuf>) -> Self {
        Self {
            identity,
            file: file.into(),
        }
    }
}

impl fmt::Display for ArtifactFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity, self.file.display())
    }
}

/// One result of resolving a [`DeclaredArtifact`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub artifact: ArtifactFile,
    /// Paired sources jar, when sources were requested and found
    pub source: Option<ArtifactFile>,
    /// True iff this is the requested coordinate rather than a dependency
    pub is_root: bool,
}

impl ResolvedArtifact {
    pub fn identity(&self) -> &ArtifactIdentity {
        &self.artifact.identity
    }
}

/// A directly referenced artifact living in a P2 (Eclipse) repository
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ForeignArtifact {
    /// `namespace:name`, e.g. `org.eclipse.ui:3.4.0`
    pub id: String,
    #[serde(default)]
    pub source: bool,
}

impl ForeignArtifact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_three_part_coordinate() {
        let identity: ArtifactIdentity = "commons-io:commons-io:2.4".parse().unwrap();
        assert_eq!(identity, ArtifactIdentity::new("commons-io", "commons-io", "2.4"));
        assert_eq!(identity.to_string(), "commons-io:commons-io:jar:2.4");
    }

    #[test]
    fn test_parse_classifier_coordinate() {
        let identity: ArtifactIdentity = "org.acme:core:jar:tests:1.0".parse().unwrap();
        assert_eq!(identity.classifier.as_deref(), Some("tests"));
        assert_eq!(identity.version, "1.0");
        assert_eq!(identity.to_string(), "org.acme:core:jar:tests:1.0");
    }

    #[test]
    fn test_parse_rejects_malformed_coordinates() {
        for bad in ["org.acme", "org.acme:core", "a:b:c:d:e:f", "a::1.0"] {
            let err = bad.parse::<ArtifactIdentity>().unwrap_err();
            assert!(err.message().contains(bad), "{err}");
        }
    }

    #[test]
    fn test_checksum_is_stable() {
        let artifact = DeclaredArtifact::new("org.acme:core:1.0")
            .source(true)
            .exclude("org.slf4j:*");
        assert_eq!(artifact.checksum(), artifact.clone().checksum());
    }

    #[test]
    fn test_checksum_tracks_every_field() {
        let base = DeclaredArtifact::new("org.acme:core:1.0");
        let variants = [
            DeclaredArtifact::new("org.acme:core:1.1"),
            base.clone().transitive(false),
            base.clone().source(true),
            base.clone().exclude("org.slf4j:slf4j-api"),
            base.clone().instruction("Bundle-SymbolicName", "acme.core"),
            DeclaredArtifact {
                singleton: true,
                ..base.clone()
            },
        ];
        for variant in variants {
            assert_ne!(base.checksum(), variant.checksum(), "{variant:?}");
        }
    }

    #[test]
    fn test_checksum_field_boundaries() {
        let left = DeclaredArtifact::new("a:b:1").exclude("cd");
        let right = DeclaredArtifact::new("a:b:1c").exclude("d");
        assert_ne!(left.checksum(), right.checksum());
    }

    #[test]
    fn test_declared_artifact_defaults_from_toml() {
        let artifact: DeclaredArtifact = toml::from_str(r#"id = "org.acme:core:1.0""#).unwrap();
        assert!(artifact.transitive);
        assert!(!artifact.source);
        assert!(artifact.excludes.is_empty());
        assert_eq!(artifact, DeclaredArtifact::new("org.acme:core:1.0"));
    }
}
