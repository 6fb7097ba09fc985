//! Change detection for the declared artifact set
//!
//! The gate hashes every declared artifact, compares the result with the
//! value persisted by the last successful run and tells the orchestrator
//! whether the whole site build can be skipped. The record lives in a small
//! properties file with a single `artifactsHash` key.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::types::{DeclaredArtifact, leading_u64};

/// Key under which the combined hash is persisted
pub const ARTIFACTS_HASH_KEY: &str = "artifactsHash";

/// Default file name of the checksum record, relative to the project root
pub const DEFAULT_CHECKSUM_FILE: &str = "p2.hash";

/// Outcome of consulting the gate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GateDecision {
    /// The persisted hash matches, nothing needs to run
    pub skip: bool,
    /// Hash of the current declaration, `None` when generation is disabled
    pub hash: Option<String>,
}

/// Combine the per-artifact checksums into one decimal hash
///
/// The combination is order-sensitive: reordering the declarations yields a
/// different value.
pub fn compute_artifacts_hash(declared: &[DeclaredArtifact]) -> String {
    let mut hasher = Sha256::new();
    for artifact in declared {
        hasher.update(artifact.checksum().to_be_bytes());
    }
    leading_u64(&hasher.finalize()).to_string()
}

/// Decide whether the pipeline can be skipped
pub fn should_skip(
    declared: &[DeclaredArtifact],
    persist_path: &Path,
    generate: bool,
    skip_if_equal: bool,
) -> GateDecision {
    if !generate {
        // no hash is generated, so there is nothing to compare against
        return GateDecision::default();
    }

    let hash = compute_artifacts_hash(declared);
    debug!("Computed artifacts hash {hash} for {} artifacts", declared.len());

    let skip = skip_if_equal && persisted_hash_matches(persist_path, &hash);
    GateDecision {
        skip,
        hash: Some(hash),
    }
}

fn persisted_hash_matches(persist_path: &Path, hash: &str) -> bool {
    if !persist_path.exists() {
        debug!("No checksum record at {}", persist_path.display());
        return false;
    }

    match read_properties(persist_path) {
        Ok(properties) => properties
            .get(ARTIFACTS_HASH_KEY)
            .is_some_and(|persisted| persisted == hash),
        Err(e) => {
            warn!("Ignoring unreadable checksum record: {e:#}");
            false
        }
    }
}

/// Persist the hash computed by the gate
///
/// Does nothing when the gate did not compute a hash. A failed write only
/// costs the next run its skip, so it is reported and swallowed.
pub fn save_hash(decision: &GateDecision, persist_path: &Path) {
    let Some(hash) = &decision.hash else {
        return;
    };

    match write_properties(persist_path, &[(ARTIFACTS_HASH_KEY, hash)]) {
        Ok(()) => info!(
            "Saved artifacts hash {hash} to {}",
            persist_path.display()
        ),
        Err(e) => warn!("Cannot save artifacts hash: {e:#}"),
    }
}

/// Read a flat properties file
///
/// Keys end at the first `=`, `:` or whitespace; a line without a value maps
/// its key to the empty string. Blank lines and lines starting with `#` or
/// `!` are ignored. Later keys win.
pub fn read_properties(path: &Path) -> Result<IndexMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read properties file {}", path.display()))?;
    Ok(parse_properties(&content))
}

fn parse_properties(content: &str) -> IndexMap<String, String> {
    let mut properties = IndexMap::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let key_end = line
            .find(|c: char| c == '=' || c == ':' || c.is_whitespace())
            .unwrap_or(line.len());
        let (key, rest) = line.split_at(key_end);
        let rest = rest.trim_start();
        let value = rest
            .strip_prefix(['=', ':'])
            .unwrap_or(rest)
            .trim();
        properties.insert(key.to_owned(), value.to_owned());
    }
    properties
}

fn render_properties(entries: &[(&str, &str)], comment: &str) -> String {
    let mut content = format!("#{comment}\n");
    for (key, value) in entries {
        content.push_str(key);
        content.push('=');
        content.push_str(value);
        content.push('\n');
    }
    content
}

fn write_properties(path: &Path, entries: &[(&str, &str)]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let comment = chrono::Utc::now().to_rfc2822();
    fs::write(path, render_properties(entries, &comment))
        .with_context(|| format!("Failed to write properties file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn declared() -> Vec<DeclaredArtifact> {
        vec![
            DeclaredArtifact::new("org.acme:core:1.0"),
            DeclaredArtifact::new("org.acme:util:2.0").source(true),
        ]
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(compute_artifacts_hash(&declared()), compute_artifacts_hash(&declared()));
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        let mut reversed = declared();
        reversed.reverse();
        assert_ne!(compute_artifacts_hash(&declared()), compute_artifacts_hash(&reversed));
    }

    #[test]
    fn test_hash_changes_with_any_flag() {
        let mut changed = declared();
        changed[1].transitive = false;
        assert_ne!(compute_artifacts_hash(&declared()), compute_artifacts_hash(&changed));
    }

    #[test]
    fn test_hash_is_decimal() {
        let hash = compute_artifacts_hash(&declared());
        assert!(hash.chars().all(|c| c.is_ascii_digit()), "{hash}");
    }

    #[test]
    fn test_generate_disabled_never_skips() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("p2.hash");
        let hash = compute_artifacts_hash(&declared());
        fs::write(&path, format!("{ARTIFACTS_HASH_KEY}={hash}\n"))?;

        let decision = should_skip(&declared(), &path, false, true);
        assert_eq!(decision, GateDecision::default());
        Ok(())
    }

    #[test]
    fn test_skips_when_persisted_hash_matches() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("p2.hash");

        let first = should_skip(&declared(), &path, true, true);
        assert!(!first.skip);
        save_hash(&first, &path);

        let second = should_skip(&declared(), &path, true, true);
        assert!(second.skip);
        assert_eq!(second.hash, first.hash);
        Ok(())
    }

    #[test]
    fn test_skip_if_equal_disabled() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("p2.hash");
        save_hash(&should_skip(&declared(), &path, true, true), &path);

        let decision = should_skip(&declared(), &path, true, false);
        assert!(!decision.skip);
        assert!(decision.hash.is_some());
        Ok(())
    }

    #[test]
    fn test_different_hash_does_not_skip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("p2.hash");
        fs::write(&path, "artifactsHash=42\n")?;

        assert!(!should_skip(&declared(), &path, true, true).skip);
        Ok(())
    }

    #[test]
    fn test_record_without_hash_key_does_not_skip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("p2.hash");
        fs::write(&path, "this is not a properties file\n")?;

        let decision = should_skip(&declared(), &path, true, true);
        assert!(!decision.skip);
        assert!(decision.hash.is_some());
        Ok(())
    }

    #[test]
    fn test_unreadable_record_is_not_fatal() -> Result<()> {
        let temp_dir = TempDir::new()?;
        // a directory cannot be read as a file
        let decision = should_skip(&declared(), temp_dir.path(), true, true);
        assert!(!decision.skip);
        Ok(())
    }

    #[test]
    fn test_save_without_hash_writes_nothing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("p2.hash");
        save_hash(&GateDecision::default(), &path);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_save_overwrites_previous_record() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("p2.hash");
        fs::write(&path, "artifactsHash=1\nother=kept?\n")?;

        let decision = should_skip(&declared(), &path, true, true);
        save_hash(&decision, &path);

        let properties = read_properties(&path)?;
        assert_eq!(properties.len(), 1);
        assert_eq!(properties.get(ARTIFACTS_HASH_KEY), decision.hash.as_ref());
        Ok(())
    }

    #[test]
    fn test_parse_properties_syntax() {
        let properties = parse_properties(
            "# comment\n! another comment\n\n  artifactsHash = 123  \nname:value\nurl=http://x\n",
        );
        assert_eq!(properties.get("artifactsHash").map(String::as_str), Some("123"));
        assert_eq!(properties.get("name").map(String::as_str), Some("value"));
        assert_eq!(properties.get("url").map(String::as_str), Some("http://x"));
    }

    #[test]
    fn test_parse_properties_whitespace_and_bare_keys() {
        let properties = parse_properties("flag\nartifactsHash 42\nspaced  :  v w\n");
        assert_eq!(properties.get("flag").map(String::as_str), Some(""));
        assert_eq!(properties.get("artifactsHash").map(String::as_str), Some("42"));
        assert_eq!(properties.get("spaced").map(String::as_str), Some("v w"));
    }

    #[test]
    fn test_skips_with_whitespace_separated_record() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("p2.hash");
        let hash = compute_artifacts_hash(&declared());
        fs::write(&path, format!("#written elsewhere\nflag\n{ARTIFACTS_HASH_KEY} {hash}\n"))?;

        assert!(should_skip(&declared(), &path, true, true).skip);
        Ok(())
    }

    #[test]
    fn test_render_properties() {
        let rendered = render_properties(&[(ARTIFACTS_HASH_KEY, "123")], "generated");
        insta::assert_snapshot!(rendered, @r"
        #generated
        artifactsHash=123
        ");
    }
}
