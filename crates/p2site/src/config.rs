//! Site build configuration (`p2site.toml`)
//!
//! The configuration is read once when a run starts and never mutated while
//! stages execute. Missing fields take the documented defaults and absent
//! lists are empty, so stages never need to special-case "not configured".

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::{
    checksum::DEFAULT_CHECKSUM_FILE,
    dirs,
    types::{DeclaredArtifact, ForeignArtifact},
};

/// File name looked up in the project root and the user config directory
pub const CONFIG_FILE: &str = "p2site.toml";

/// Top-level site configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Scratch root, relative paths are resolved against the project root
    #[serde(default = "default_build_directory")]
    pub build_directory: PathBuf,

    /// Final repository location, `<build-directory>/repository` when unset
    #[serde(default)]
    pub destination_directory: Option<PathBuf>,

    /// Fail bundling on manifest warnings
    #[serde(default)]
    pub pedantic: bool,

    /// Continue when a transitive artifact cannot be bundled
    #[serde(default)]
    pub skip_invalid_artifacts: bool,

    #[serde(default = "default_true")]
    pub compress_site: bool,

    /// Timeout for forked publisher processes, 0 waits forever
    #[serde(default)]
    pub forked_process_timeout_in_seconds: u64,

    /// Extra arguments for the P2 launcher, split on whitespace
    #[serde(default)]
    pub additional_args: String,

    /// Category definition, the bundled default when unset
    #[serde(default)]
    pub category_file: Option<PathBuf>,

    #[serde(default)]
    pub checksum: ChecksumConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Artifacts to resolve and bundle
    #[serde(default, rename = "artifact")]
    pub artifacts: Vec<DeclaredArtifact>,

    /// Eclipse features to resolve and copy
    #[serde(default, rename = "feature")]
    pub features: Vec<DeclaredArtifact>,

    /// Artifacts fetched directly from P2 repositories
    #[serde(default, rename = "p2")]
    pub foreign: Vec<ForeignArtifact>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_directory: default_build_directory(),
            destination_directory: None,
            pedantic: false,
            skip_invalid_artifacts: false,
            compress_site: true,
            forked_process_timeout_in_seconds: 0,
            additional_args: String::new(),
            category_file: None,
            checksum: ChecksumConfig::default(),
            tools: ToolsConfig::default(),
            artifacts: Vec::new(),
            features: Vec::new(),
            foreign: Vec::new(),
        }
    }
}

fn default_build_directory() -> PathBuf {
    PathBuf::from("target")
}

const fn default_true() -> bool {
    true
}

/// Change detection settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ChecksumConfig {
    /// Compute a hash of the declared artifacts
    #[serde(default)]
    pub generate: bool,

    /// Skip the run when the hash matches the persisted one
    #[serde(default = "default_true")]
    pub skip_if_equal: bool,

    /// Hash record location, relative to the project root
    #[serde(default = "default_checksum_file")]
    pub file: PathBuf,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            generate: false,
            skip_if_equal: true,
            file: default_checksum_file(),
        }
    }
}

fn default_checksum_file() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKSUM_FILE)
}

/// External tools backing the resolver, bundler and publishers
///
/// Each entry is an argv prefix; stage-specific arguments are appended.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ToolsConfig {
    #[serde(default)]
    pub resolver: Vec<String>,
    #[serde(default)]
    pub bundler: Vec<String>,
    #[serde(default)]
    pub foreign_resolver: Vec<String>,
    /// Eclipse launcher running the P2 publisher applications
    #[serde(default)]
    pub launcher: Vec<String>,
    /// Timeout for resolver and bundler invocations, 0 waits forever
    #[serde(default)]
    pub timeout_in_seconds: u64,
}

impl Config {
    /// Parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Locate and load the configuration for a project
    ///
    /// Looks for `p2site.toml` in the project root, then in the user config
    /// directory. Returns the defaults when neither exists.
    pub fn discover(project_root: &Path) -> Result<Self> {
        let candidates = [
            Some(project_root.join(CONFIG_FILE)),
            dirs::user_config_dir().map(|dir| dir.join(CONFIG_FILE)),
        ];
        for candidate in candidates.into_iter().flatten() {
            if candidate.is_file() {
                debug!("Loading configuration from {}", candidate.display());
                return Self::load(&candidate);
            }
        }
        debug!("No {CONFIG_FILE} found, using defaults");
        Ok(Self::default())
    }

    pub fn additional_args(&self) -> Vec<String> {
        crate::launcher::split_args(&self.additional_args)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() -> Result<()> {
        let config = Config::parse("")?;
        assert_eq!(config, Config::default());
        assert!(config.compress_site);
        assert!(!config.checksum.generate);
        assert!(config.checksum.skip_if_equal);
        assert_eq!(config.checksum.file, PathBuf::from("p2.hash"));
        assert!(config.artifacts.is_empty());
        Ok(())
    }

    #[test]
    fn test_full_config() -> Result<()> {
        let config = Config::parse(
            r#"
build-directory = "out"
skip-invalid-artifacts = true
forked-process-timeout-in-seconds = 120
additional-args = "-consoleLog -debug"

[checksum]
generate = true

[tools]
resolver = ["p2-resolve", "--offline"]
launcher = ["eclipse", "-nosplash"]

[[artifact]]
id = "commons-io:commons-io:2.4"
source = true
excludes = ["org.slf4j:*"]

[artifact.instructions]
Bundle-SymbolicName = "apache.commons.io"

[[artifact]]
id = "org.acme:core:1.0"
transitive = false

[[feature]]
id = "org.acme:feature:1.0.0.qualifier"

[[p2]]
id = "org.eclipse.ui:3.4.0"
"#,
        )?;

        assert_eq!(config.build_directory, PathBuf::from("out"));
        assert!(config.skip_invalid_artifacts);
        assert_eq!(config.forked_process_timeout_in_seconds, 120);
        assert_eq!(config.additional_args(), vec!["-consoleLog", "-debug"]);
        assert!(config.checksum.generate);
        assert_eq!(config.tools.resolver, vec!["p2-resolve", "--offline"]);
        assert_eq!(config.artifacts.len(), 2);
        assert_eq!(
            config.artifacts[0]
                .instructions
                .get("Bundle-SymbolicName")
                .map(String::as_str),
            Some("apache.commons.io")
        );
        assert!(config.artifacts[0].transitive);
        assert!(!config.artifacts[1].transitive);
        assert_eq!(config.features.len(), 1);
        assert_eq!(config.foreign[0].id, "org.eclipse.ui:3.4.0");
        Ok(())
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(Config::parse("compress = true").is_err());
        assert!(Config::parse("[[artifact]]\nid = \"a:b:1\"\ntransitiv = true\n").is_err());
    }

    #[test]
    fn test_discover_prefers_project_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join(CONFIG_FILE), "pedantic = true\n")?;
        assert!(Config::discover(temp_dir.path())?.pedantic);
        Ok(())
    }

    #[test]
    fn test_load_reports_path() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(CONFIG_FILE);
        fs::write(&path, "pedantic = 3\n")?;
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains(CONFIG_FILE));
        Ok(())
    }
}
