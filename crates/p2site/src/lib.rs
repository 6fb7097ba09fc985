//! Build a P2 update site from declared artifacts
//!
//! A run resolves every declared artifact, wraps each distinct jar exactly
//! once as an OSGi plugin, copies Eclipse features, fetches artifacts that
//! already live in P2 repositories and finally publishes the lot as a P2
//! repository. An optional checksum of the declared artifacts lets a run end
//! immediately when nothing changed since the last successful build.

pub mod bundler;
pub mod checksum;
pub mod config;
pub mod dirs;
pub mod feature;
pub mod foreign;
pub mod launcher;
pub mod orchestrator;
pub mod publisher;
pub mod resolver;
pub mod tools;
pub mod types;
