//! # Mount Resolution
//!
//! Composes the final set of host-to-container bind specifications from
//! target defaults and developer overrides.
//!
//! Mounts are keyed by name. A developer-supplied entry with the same key
//! **fully replaces** the target entry: replacement is whole-record, never a
//! field-level merge. Every resulting spec is validated against the closed
//! mount-type enumeration before the set is returned; an unknown type is a
//! hard configuration error, not a silently dropped entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths::ContainerPaths;

/// Closed enumeration of supported mount types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountType {
    /// Read-write bind mount.
    #[serde(rename = "bind")]
    Bind,
    /// Read-only bind mount.
    #[serde(rename = "readonly-bind")]
    ReadonlyBind,
    /// Named volume.
    #[serde(rename = "volume")]
    Volume,
}

impl MountType {
    /// Parses a mount type from its wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bind" => Some(Self::Bind),
            "readonly-bind" => Some(Self::ReadonlyBind),
            "volume" => Some(Self::Volume),
            _ => None,
        }
    }
}

impl std::fmt::Display for MountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind => write!(f, "bind"),
            Self::ReadonlyBind => write!(f, "readonly-bind"),
            Self::Volume => write!(f, "volume"),
        }
    }
}

/// One host path exposed inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSpec {
    /// Host-side source path (or volume name for [`MountType::Volume`]).
    pub source: PathBuf,
    /// Container-side target path. Relative targets are resolved against
    /// the container home directory during composition.
    pub target: PathBuf,
    /// Mount type, from the closed enumeration.
    #[serde(rename = "type")]
    pub mount_type: MountType,
}

impl MountSpec {
    /// Creates a read-write bind mount.
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mount_type: MountType::Bind,
        }
    }
}

/// Composes the final mount set, keyed by mount name.
///
/// Developer entries replace target entries of the same key wholesale.
/// Relative container targets are prefixed with the container home directory.
/// Relative host sources are resolved against `source_root` (the developer's
/// `builder_dir` for override entries).
pub fn compose(
    target_mounts: &BTreeMap<String, MountSpec>,
    developer_mounts: Option<&BTreeMap<String, MountSpec>>,
    source_root: Option<&Path>,
) -> Result<BTreeMap<String, MountSpec>> {
    let mut composed: BTreeMap<String, MountSpec> = target_mounts.clone();

    if let Some(overrides) = developer_mounts {
        for (name, spec) in overrides {
            let mut spec = spec.clone();
            if spec.source.is_relative() {
                if let Some(root) = source_root {
                    spec.source = root.join(&spec.source);
                }
            }
            composed.insert(name.clone(), spec);
        }
    }

    for (name, spec) in &mut composed {
        validate(name, spec)?;
        if spec.target.is_relative() {
            spec.target = ContainerPaths::home().join(&spec.target);
        }
    }

    Ok(composed)
}

/// Validates a single resolved mount record.
fn validate(name: &str, spec: &MountSpec) -> Result<()> {
    if spec.source.as_os_str().is_empty() {
        return Err(Error::InvalidMount {
            name: name.to_string(),
            reason: "source path is empty".to_string(),
        });
    }
    if spec.target.as_os_str().is_empty() {
        return Err(Error::InvalidMount {
            name: name.to_string(),
            reason: "target path is empty".to_string(),
        });
    }
    Ok(())
}
