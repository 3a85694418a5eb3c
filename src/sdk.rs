//! # SDK Variants
//!
//! A small capability interface over the SDK families the builder knows how
//! to drive. Variants are a closed set selected by `sdk_name`; adding a new
//! SDK means adding one variant here, nothing else.
//!
//! The variant supplies hints logged before the prepare hooks and the
//! fallback package-build command used when a layer ships no
//! `build_packages` steps of its own. The actual build logic stays in the
//! layer scripts — variants describe capabilities, they do not build.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::spec::TargetSpec;

/// Capabilities of one SDK family.
pub trait SdkVariant: std::fmt::Debug + Send + Sync {
    /// Variant name, matching the spec's `sdk_name`.
    fn name(&self) -> &str;

    /// What the `prepare_system` hook should take care of.
    fn prepare_system_hints(&self) -> &[&str];

    /// What the `prepare_sdk` hook should take care of.
    fn prepare_sdk_hints(&self) -> &[&str];

    /// Command building the named packages, used as the fallback when no
    /// `build_packages` steps were contributed by any layer.
    fn package_build_command(&self, packages: &[String], cores: u32) -> Vec<String>;
}

/// The OpenWrt buildroot family.
#[derive(Debug)]
pub struct OpenWrtSdk;

impl SdkVariant for OpenWrtSdk {
    fn name(&self) -> &str {
        "openwrt"
    }

    fn prepare_system_hints(&self) -> &[&str] {
        &["build-essential toolchain packages", "ccache directory"]
    }

    fn prepare_sdk_hints(&self) -> &[&str] {
        &["feeds update and install", "default .config seed"]
    }

    fn package_build_command(&self, packages: &[String], cores: u32) -> Vec<String> {
        let mut command = vec!["make".to_string(), format!("-j{cores}")];
        for package in packages {
            command.push(format!("package/{package}/compile"));
        }
        command
    }
}

/// Selects the variant for an SDK name. Unknown names are configuration
/// errors, caught before any container work.
pub fn variant_for(sdk_name: &str) -> Result<Box<dyn SdkVariant>> {
    match sdk_name {
        "openwrt" => Ok(Box::new(OpenWrtSdk)),
        other => Err(Error::UnknownSdk {
            sdk: other.to_string(),
        }),
    }
}

/// Logs a variant's hints ahead of the prepare hooks.
pub fn log_hints(variant: &dyn SdkVariant) {
    info!(
        "sdk '{}': prepare_system covers {:?}, prepare_sdk covers {:?}",
        variant.name(),
        variant.prepare_system_hints(),
        variant.prepare_sdk_hints()
    );
}

/// Checks out the SDK sources declared by a target spec into `dest`.
///
/// A fresh destination is cloned at the requested tag; an existing checkout
/// is switched to the tag instead, or removed first when `clean` is set.
pub async fn checkout(spec: &TargetSpec, dest: &Path, clean: bool) -> Result<()> {
    if dest.exists() && clean {
        debug!("removing existing checkout at {}", dest.display());
        tokio::fs::remove_dir_all(dest).await?;
    }

    let mut command = tokio::process::Command::new("git");
    if dest.exists() {
        command.args(["-C"]).arg(dest).args(["checkout", &spec.sdk_tag]);
    } else {
        command
            .args(["clone", &spec.sdk_url, "--branch", &spec.sdk_tag])
            .arg(dest);
    }

    info!(
        "checking out '{}' at '{}' into {}",
        spec.sdk_url,
        spec.sdk_tag,
        dest.display()
    );
    let status = command.status().await.map_err(|e| Error::CheckoutFailed {
        url: spec.sdk_url.clone(),
        branch: spec.sdk_tag.clone(),
        reason: e.to_string(),
    })?;

    if !status.success() {
        return Err(Error::CheckoutFailed {
            url: spec.sdk_url.clone(),
            branch: spec.sdk_tag.clone(),
            reason: format!("git exited with {}", status.code().unwrap_or(-1)),
        });
    }
    Ok(())
}
