//! # Configuration Documents
//!
//! Typed forms of the two JSON documents the builder consumes:
//!
//! - the **target specification** (`<target>_spec.json`), an immutable
//!   description of one buildable target;
//! - the **developer override** (`developer.json`), optional environment and
//!   mount overrides, legal only in development mode.
//!
//! Both are closed schemas: unknown top-level fields are rejected. Loading
//! goes through [`crate::schema`], which reports all violations instead of
//! stopping at the first.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{TAG_MODE_AUTOMATED, TAG_MODE_DEV};
use crate::error::{Error, Result};
use crate::mounts::MountSpec;
use crate::schema;

/// Environment variable section shared by both documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSection {
    /// Variable name to value.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Immutable description of one buildable target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    /// SDK name, e.g. `openwrt`. Selects the SDK variant.
    pub sdk_name: String,
    /// Clone URL of the SDK sources.
    pub sdk_url: String,
    /// Tag or branch of the SDK sources to check out.
    pub sdk_tag: String,
    /// Whether the target builds against an external toolchain.
    pub external_toolchain: bool,
    /// Where to fetch the external toolchain from. Required when
    /// `external_toolchain` is set.
    #[serde(rename = "external_toolchain_URL", default)]
    pub external_toolchain_url: Option<String>,
    /// Base name of the output artifact archive.
    pub build_artifacts_archive_name: String,
    /// Target-supplied environment entries for build steps.
    pub environment: EnvironmentSection,
}

impl TargetSpec {
    /// Loads and validates a target spec document.
    pub fn load(path: &Path) -> Result<Self> {
        let value = read_json(path)?;
        schema::validate_target_spec(&value).map_err(|violations| Error::SchemaViolation {
            document: path.display().to_string(),
            violations,
        })
    }

    /// Directory name the SDK checkout lives under: `<sdk_name>_<sdk_tag>`.
    pub fn sdk_dirname(&self) -> String {
        format!("{}_{}", self.sdk_name, self.sdk_tag)
    }
}

/// Optional developer override document. All entries take precedence over
/// target defaults; only consulted in development mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeveloperConfig {
    /// Environment overrides.
    pub environment: EnvironmentSection,
    /// Mount overrides, keyed by mount name. Same-key entries fully replace
    /// target mounts.
    pub mounts: BTreeMap<String, MountSpec>,
    /// The developer's builder checkout; relative mount sources resolve
    /// against it.
    pub builder_dir: PathBuf,
}

impl DeveloperConfig {
    /// Loads and validates a developer override document.
    pub fn load(path: &Path) -> Result<Self> {
        let value = read_json(path)?;
        schema::validate_developer_config(&value).map_err(|violations| Error::SchemaViolation {
            document: path.display().to_string(),
            violations,
        })
    }
}

/// Reads a file into a JSON value.
pub(crate) fn read_json(path: &Path) -> Result<serde_json::Value> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))
}

/// Build operating mode. Selects the image tag suffix and whether SDK
/// sources live on the host (development) or inside the image (automated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Fully automated build; sources and artifacts live in the image.
    Automated,
    /// Developer build; sources are bind-mounted from the host.
    Development,
}

impl BuildMode {
    /// Image tag suffix for this mode.
    pub fn tag_suffix(self) -> &'static str {
        match self {
            Self::Automated => TAG_MODE_AUTOMATED,
            Self::Development => TAG_MODE_DEV,
        }
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag_suffix())
    }
}

/// Build granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildScope {
    /// Build the whole SDK: tools, toolchain, packages, firmware.
    Full,
    /// Build only the named packages against a prebuilt SDK.
    Packages(Vec<String>),
    /// Build only the firmware image against a prebuilt SDK.
    Firmware,
}

impl BuildScope {
    /// True for scopes that reuse a cached image instead of building one.
    pub fn is_restricted(&self) -> bool {
        !matches!(self, Self::Full)
    }
}
