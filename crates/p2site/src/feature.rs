//! Eclipse feature handling
//!
//! Features are resolved like root artifacts but never deduplicated against
//! the plugin bundles: they land in their own output folder, with the
//! `qualifier` placeholder of their version replaced by the build timestamp.

use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::{debug, info};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{
    resolver::{ArtifactResolver, resolve_artifacts},
    types::{DeclaredArtifact, ResolvedArtifact},
};

/// Descriptor at the root of a feature jar
pub const FEATURE_DESCRIPTOR: &str = "feature.xml";

/// Version segment replaced by the build timestamp
pub const QUALIFIER_PLACEHOLDER: &str = "qualifier";

/// Timestamp used as version qualifier for one site build
pub fn qualifier_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M").to_string()
}

/// Replace a trailing `qualifier` segment of a version
pub fn expand_qualifier(version: &str, timestamp: &str) -> String {
    match version.rsplit_once('.') {
        Some((base, QUALIFIER_PLACEHOLDER)) => format!("{base}.{timestamp}"),
        None if version == QUALIFIER_PLACEHOLDER => timestamp.to_owned(),
        _ => version.to_owned(),
    }
}

/// Resolve the declared features and copy them into `features_folder`
///
/// Returns the written feature jars in declaration order.
pub fn handle_features(
    resolver: &dyn ArtifactResolver,
    features: &[DeclaredArtifact],
    features_folder: &Path,
    timestamp: &str,
) -> Result<Vec<PathBuf>> {
    let index = resolve_artifacts(resolver, features)?;
    info!("Resolved {} features", index.len());

    let mut written = Vec::new();
    for feature in features {
        for resolved in index.get(feature) {
            written.push(handle_feature(feature, resolved, features_folder, timestamp)?);
        }
    }
    Ok(written)
}

fn handle_feature(
    feature: &DeclaredArtifact,
    resolved: &ResolvedArtifact,
    features_folder: &Path,
    timestamp: &str,
) -> Result<PathBuf> {
    debug!("Handling feature {}", feature.id);
    let identity = resolved.identity();
    let input = &resolved.artifact.file;
    let output = features_folder.join(format!(
        "{}_{}.jar",
        identity.name,
        expand_qualifier(&identity.version, timestamp)
    ));

    copy_with_timestamp(input, &output, timestamp).with_context(|| {
        format!(
            "Error while bundling jar or source: {}",
            input
                .file_name()
                .map_or_else(|| input.display().to_string(), |n| n.to_string_lossy().into_owned())
        )
    })?;
    info!("Copied {} to {}", input.display(), output.display());
    Ok(output)
}

/// Copy a feature jar, expanding the qualifier of its `feature.xml` version
///
/// Every other entry is copied without recompression.
fn copy_with_timestamp(input: &Path, output: &Path, timestamp: &str) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(input)?)?;
    let mut writer = ZipWriter::new(File::create(output)?);
    let mut descriptor_found = false;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.name() != FEATURE_DESCRIPTOR {
            writer.raw_copy_file(entry)?;
            continue;
        }

        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        let xml = set_feature_qualifier(&xml, timestamp)?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(FEATURE_DESCRIPTOR, options)?;
        writer.write_all(xml.as_bytes())?;
        descriptor_found = true;
    }

    if !descriptor_found {
        bail!("{FEATURE_DESCRIPTOR} not found in {}", input.display());
    }
    writer.finish()?;
    Ok(())
}

/// Expand the qualifier of the `version` attribute on the root `<feature>` tag
///
/// Only that attribute is touched; versions of included plugins and the rest
/// of the document stay byte for byte the same.
pub fn set_feature_qualifier(xml: &str, timestamp: &str) -> Result<String> {
    let Some(tag_start) = xml.match_indices("<feature").map(|(i, _)| i).find(|&i| {
        xml[i + "<feature".len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_whitespace() || c == '>' || c == '/')
    }) else {
        bail!("No <feature> element in {FEATURE_DESCRIPTOR}");
    };
    let Some(tag_len) = xml[tag_start..].find('>') else {
        bail!("Unterminated <feature> element in {FEATURE_DESCRIPTOR}");
    };
    let tag = &xml[tag_start..tag_start + tag_len];

    let Some((value_start, value_end)) = version_attribute(tag) else {
        bail!("The <feature> element in {FEATURE_DESCRIPTOR} has no version");
    };
    let value = &tag[value_start..value_end];

    let mut rewritten = String::with_capacity(xml.len() + timestamp.len());
    rewritten.push_str(&xml[..tag_start + value_start]);
    rewritten.push_str(&expand_qualifier(value, timestamp));
    rewritten.push_str(&xml[tag_start + value_end..]);
    Ok(rewritten)
}

/// Byte range of the `version` attribute value inside a start tag
fn version_attribute(tag: &str) -> Option<(usize, usize)> {
    for (i, _) in tag.match_indices("version") {
        let preceded_by_space = tag[..i].chars().next_back().is_some_and(char::is_whitespace);
        if !preceded_by_space {
            continue;
        }
        let after_name = &tag[i + "version".len()..];
        let Some(after_eq) = after_name.trim_start().strip_prefix('=') else {
            continue;
        };
        let value = after_eq.trim_start();
        let Some(quote) = value.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let start = tag.len() - value.len() + 1;
        let len = tag[start..].find(quote)?;
        return Some((start, start + len));
    }
    None
}
