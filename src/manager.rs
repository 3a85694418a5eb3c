//! # Container Lifecycle Management
//!
//! Computes image identities, decides build-vs-reuse, and launches the
//! containers restricted builds and interactive sessions run in.
//!
//! ## Image Identity
//!
//! A built image is cached under a tag derived from
//! `(sdk name, sdk branch, build mode, target)`:
//!
//! ```text
//! <sdk_name>_<sdk_branch>:latest_<mode>_<target>      (lowercased)
//! ```
//!
//! Two builds with identical identity are interchangeable. The manager
//! **never deletes** images — pruning stale identities is the operator's
//! responsibility.
//!
//! ## Cache Semantics
//!
//! A cache hit on the identity skips the image build entirely. A cache miss
//! while a restricted scope is requested is a fatal precondition failure:
//! the orchestrator must not fall back to an implicit full build.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::{ContainerEngine, RunSpec};
use crate::error::{Error, Result};
use crate::mounts::MountSpec;
use crate::spec::{BuildMode, TargetSpec};

/// Cache key for a built container image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIdentity {
    pub sdk_name: String,
    pub sdk_branch: String,
    pub mode: BuildMode,
    pub target: String,
}

impl ImageIdentity {
    /// Derives the identity for a target spec and mode.
    pub fn derive(spec: &TargetSpec, mode: BuildMode, target: &str) -> Self {
        Self {
            sdk_name: spec.sdk_name.clone(),
            sdk_branch: spec.sdk_tag.clone(),
            mode,
            target: target.to_string(),
        }
    }

    /// Canonical image tag for this identity.
    pub fn tag(&self) -> String {
        format!(
            "{}_{}:latest_{}_{}",
            self.sdk_name,
            self.sdk_branch,
            self.mode.tag_suffix(),
            self.target
        )
        .to_lowercase()
    }
}

impl std::fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Outcome of a restricted build container run.
#[derive(Debug, Clone)]
pub struct RestrictedRun {
    /// Name of the (non-ephemeral) container, for artifact copies.
    pub container: String,
}

/// Drives one image identity through the container engine.
pub struct ContainerManager {
    engine: Arc<dyn ContainerEngine>,
    identity: ImageIdentity,
}

impl ContainerManager {
    /// Creates a manager for an identity on an engine.
    pub fn new(engine: Arc<dyn ContainerEngine>, identity: ImageIdentity) -> Self {
        Self { engine, identity }
    }

    /// The identity this manager serves.
    pub fn identity(&self) -> &ImageIdentity {
        &self.identity
    }

    /// True when a cached image exists for the identity.
    pub async fn image_cached(&self) -> Result<bool> {
        self.engine.image_exists(&self.identity.tag()).await
    }

    /// Fails with a precondition error unless the image is cached.
    pub async fn require_image(&self) -> Result<()> {
        if self.image_cached().await? {
            return Ok(());
        }
        Err(Error::ImageNotFound {
            tag: self.identity.tag(),
        })
    }

    /// Builds and tags the image from a staging tree. The engine's exit
    /// status propagates unchanged on failure.
    pub async fn build_image(
        &self,
        context: &Path,
        build_args: &BTreeMap<String, String>,
        nocache: bool,
    ) -> Result<()> {
        self.engine
            .build_image(context, &self.identity.tag(), build_args, nocache)
            .await
    }

    /// Starts a container from the cached image to run one restricted
    /// build command, blocking until it exits.
    ///
    /// Non-ephemeral containers get a unique name so artifacts can be
    /// copied out afterwards; callers remove them via
    /// [`ContainerManager::retrieve_from_container`].
    pub async fn run_restricted(
        &self,
        command: Vec<String>,
        env: BTreeMap<String, String>,
        mounts: Vec<MountSpec>,
        ephemeral: bool,
    ) -> Result<RestrictedRun> {
        self.require_image().await?;

        let container = container_name(&self.identity);
        let spec = RunSpec {
            image: self.identity.tag(),
            command,
            env,
            mounts,
            interactive: false,
            ephemeral,
            name: Some(container.clone()),
        };

        info!(
            "starting container '{container}' from '{}' with cmd {:?}",
            self.identity.tag(),
            spec.command
        );
        let code = self.engine.run(&spec).await?;
        info!("container '{container}' exited with exit code {code}");
        if code != 0 {
            return Err(Error::ContainerExited {
                tag: self.identity.tag(),
                code,
            });
        }
        Ok(RestrictedRun { container })
    }

    /// Attaches an interactive shell session to a fresh container from the
    /// cached image. Returns the shell's exit code.
    pub async fn interactive_session(
        &self,
        env: BTreeMap<String, String>,
        mounts: Vec<MountSpec>,
        ephemeral: bool,
    ) -> Result<i32> {
        self.require_image().await?;

        let spec = RunSpec {
            image: self.identity.tag(),
            command: vec!["/bin/bash".to_string()],
            env,
            mounts,
            interactive: true,
            ephemeral,
            name: None,
        };
        info!(
            "attaching interactive session to '{}' (ephemeral: {ephemeral})",
            self.identity.tag()
        );
        self.engine.run(&spec).await
    }

    /// Copies a path out of the cached image.
    pub async fn retrieve_from_image(&self, src: &Path, dst: &Path) -> Result<()> {
        self.require_image().await?;
        debug!("copying {} from image '{}'", src.display(), self.identity.tag());
        self.engine
            .copy_from_image(&self.identity.tag(), src, dst)
            .await
    }

    /// Copies a path out of a build container, removing it afterwards.
    pub async fn retrieve_from_container(
        &self,
        container: &str,
        src: &Path,
        dst: &Path,
    ) -> Result<()> {
        if !self.engine.container_exists(container).await? {
            return Err(Error::ContainerNotFound {
                id: container.to_string(),
            });
        }
        debug!("copying {} from container '{container}'", src.display());
        self.engine
            .copy_from_container(container, src, dst, true)
            .await
    }
}

/// Unique, engine-legal container name for one restricted run.
fn container_name(identity: &ImageIdentity) -> String {
    let mut base = format!("{}_{}_build", identity.sdk_name, identity.target).to_lowercase();
    base.retain(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    format!("{base}_{}", uuid::Uuid::now_v7().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::EnvironmentSection;

    fn spec() -> TargetSpec {
        TargetSpec {
            sdk_name: "OpenWrt".to_string(),
            sdk_url: "https://git.openwrt.org/openwrt/openwrt.git".to_string(),
            sdk_tag: "V23.05.0".to_string(),
            external_toolchain: false,
            external_toolchain_url: None,
            build_artifacts_archive_name: "fw".to_string(),
            environment: EnvironmentSection::default(),
        }
    }

    #[test]
    fn tag_is_lowercased_canonical_form() {
        let identity = ImageIdentity::derive(&spec(), BuildMode::Automated, "RPi4B");
        assert_eq!(identity.tag(), "openwrt_v23.05.0:latest_automated_rpi4b");
    }

    #[test]
    fn dev_mode_selects_dev_suffix() {
        let identity = ImageIdentity::derive(&spec(), BuildMode::Development, "rpi4b");
        assert_eq!(identity.tag(), "openwrt_v23.05.0:latest_dev_rpi4b");
    }

    #[test]
    fn container_names_are_engine_legal() {
        let identity = ImageIdentity::derive(&spec(), BuildMode::Automated, "rpi4b");
        let name = container_name(&identity);
        assert!(name.starts_with("openwrt_rpi4b_build_"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }
}
