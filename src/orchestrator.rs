//! # Build Orchestration
//!
//! The top-level state machine sequencing a build. Full builds walk
//!
//! ```text
//! Init → PrepareSystem → PrepareSdk → InstallConfigs
//!      → Prebuild → Build → Postbuild → Done
//! ```
//!
//! while restricted scopes short-circuit `Init → RestrictedBuild → Done`
//! against a cached image. Each hook/stage transition corresponds to one
//! scheduler run over that namespace; any failing namespace moves the
//! machine to the terminal `Failed` state and aborts everything that
//! remains.
//!
//! ## Two Sides, One Machine
//!
//! The same orchestrator runs on both sides of the container boundary. The
//! host side stages the merged layer tree, drives the container engine, and
//! retrieves artifacts; the container side (the staged entrypoint, re-entered
//! during image builds and restricted runs) walks the hook and stage
//! namespaces. `PrepareSystem`/`PrepareSdk` run only when the image identity
//! was not cached — the cache miss is the first-build signal, carried into
//! the image build as the `FIRST_BUILD` build argument.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::artifacts;
use crate::constants::{
    ENTRYPOINT_FILE, ENV_DEFAULTS_FILE, ENV_FIRST_BUILD, ENV_PACKAGES_TO_BUILD, ENV_VERBOSE,
    BUILD_USER, HOOK_BUILD_PACKAGES, TARGET_SPEC_SUFFIX,
};
use crate::engine::ContainerEngine;
use crate::environment::{self, BuilderEnv};
use crate::error::{Error, Result};
use crate::layers::{LayerResolver, StagingTree};
use crate::manager::{ContainerManager, ImageIdentity};
use crate::mounts::{self, MountSpec};
use crate::paths::{inside_container, BuilderPaths, ContainerPaths};
use crate::schema;
use crate::sdk::{self, SdkVariant};
use crate::spec::{read_json, BuildMode, BuildScope, DeveloperConfig, TargetSpec};
use crate::steps::{ExecutionContext, HookScheduler, StepRegistry};

/// States of the build machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Init,
    PrepareSystem,
    PrepareSdk,
    InstallConfigs,
    Prebuild,
    Build,
    Postbuild,
    RestrictedBuild,
    Done,
    Failed,
}

impl BuildState {
    /// The namespace a state traverses, for states that traverse one.
    pub fn namespace(self) -> Option<&'static str> {
        match self {
            Self::PrepareSystem => Some("prepare_system"),
            Self::PrepareSdk => Some("prepare_sdk"),
            Self::InstallConfigs => Some("install_configs"),
            Self::Prebuild => Some("prebuild"),
            Self::Build => Some("build"),
            Self::Postbuild => Some("postbuild"),
            _ => None,
        }
    }

    /// True for the two terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Everything one invocation asked for.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub target: String,
    pub mode: BuildMode,
    pub scope: BuildScope,
    pub num_build_cores: u32,
    pub verbose: bool,
    pub clean: bool,
}

/// Top-level build state machine.
pub struct BuildOrchestrator {
    paths: BuilderPaths,
    request: BuildRequest,
    spec: TargetSpec,
    developer: Option<DeveloperConfig>,
    variant: Box<dyn SdkVariant>,
    manager: ContainerManager,
    container_root: PathBuf,
    state: BuildState,
}

impl BuildOrchestrator {
    /// Creates an orchestrator for one validated request.
    ///
    /// Fails fast on configuration errors (unknown SDK, developer config
    /// outside development mode) before any container work.
    pub fn new(
        paths: BuilderPaths,
        request: BuildRequest,
        spec: TargetSpec,
        developer: Option<DeveloperConfig>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<Self> {
        if developer.is_some() && request.mode != BuildMode::Development {
            return Err(Error::DeveloperConfigNotAllowed {
                path: paths.developer_config(),
            });
        }
        let variant = sdk::variant_for(&spec.sdk_name)?;
        let identity = ImageIdentity::derive(&spec, request.mode, &request.target);
        let manager = ContainerManager::new(engine, identity);

        Ok(Self {
            paths,
            request,
            spec,
            developer,
            variant,
            manager,
            container_root: ContainerPaths::base(),
            state: BuildState::Init,
        })
    }

    /// Overrides the container-side root, for walking the container states
    /// against a tree outside the image contract's base directory.
    pub fn with_container_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.container_root = root.into();
        self
    }

    /// Current machine state.
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// The manager driving this build's image identity.
    pub fn manager(&self) -> &ContainerManager {
        &self.manager
    }

    /// Runs the machine to a terminal state.
    pub async fn run(&mut self) -> Result<()> {
        let outcome = self.drive().await;
        if outcome.is_err() {
            self.state = BuildState::Failed;
        }
        outcome
    }

    async fn drive(&mut self) -> Result<()> {
        if inside_container() {
            return match self.request.scope.clone() {
                BuildScope::Full => self.container_full().await,
                BuildScope::Firmware => self.container_stages().await,
                BuildScope::Packages(_) => {
                    run_container_hook(HOOK_BUILD_PACKAGES, &self.container_root).await
                }
            };
        }

        match self.request.scope.clone() {
            // A development-mode "full" build means rebuilding the firmware
            // against the developer's mounted sources, not a new image.
            BuildScope::Full if self.request.mode == BuildMode::Development => {
                self.host_restricted(BuildScope::Firmware).await
            }
            BuildScope::Full => self.host_full().await,
            scope => self.host_restricted(scope).await,
        }
    }

    // =========================================================================
    // Host Side
    // =========================================================================

    /// Full automated build: stage, build the image (the container side
    /// walks the hook/stage states during the build), retrieve artifacts.
    async fn host_full(&mut self) -> Result<()> {
        artifacts::record_start(&self.paths.timestamp_file())?;
        let staging = self.stage()?;

        let first_build = !self.manager.image_cached().await? || self.request.clean;
        sdk::log_hints(self.variant.as_ref());
        self.manager
            .build_image(
                staging.root(),
                &self.image_build_args(first_build),
                self.request.clean,
            )
            .await?;

        // Artifacts of an automated build live in the image.
        let scratch = self.paths.tmp_dir().join("artifacts");
        std::fs::create_dir_all(&scratch)?;
        self.manager
            .retrieve_from_image(&ContainerPaths::out_dir(), &scratch)
            .await?;
        self.bundle(&scratch.join("out"))?;

        self.state = BuildState::Done;
        Ok(())
    }

    /// Restricted build: reuse the cached image, run one container, copy
    /// its artifacts out. A missing image is a fatal precondition failure —
    /// never an implicit full build.
    async fn host_restricted(&mut self, scope: BuildScope) -> Result<()> {
        self.state = BuildState::RestrictedBuild;
        artifacts::record_start(&self.paths.timestamp_file())?;
        self.manager.require_image().await?;

        // Development containers mount the staging tree from the host.
        if self.request.mode == BuildMode::Development {
            self.stage()?;
        }

        let mut env = self.compose_environment()?.to_map();
        let entrypoint = ContainerPaths::base().join(ENTRYPOINT_FILE);
        let (command, artifact_src) = match &scope {
            BuildScope::Packages(packages) => {
                info!(" ** Restricted build for packages: {packages:?}");
                env.insert(ENV_PACKAGES_TO_BUILD.to_string(), packages.join(" "));
                let command = vec![
                    entrypoint.display().to_string(),
                    "--run-hook".to_string(),
                    HOOK_BUILD_PACKAGES.to_string(),
                ];
                (command, ContainerPaths::pkg_out_dir())
            }
            BuildScope::Firmware => {
                info!("Restricted firmware-only build using prebuilt sdk ..");
                let command = vec![
                    entrypoint.display().to_string(),
                    "--target".to_string(),
                    self.request.target.clone(),
                    "--build-firmware".to_string(),
                    "--cores".to_string(),
                    self.request.num_build_cores.to_string(),
                ];
                (command, ContainerPaths::out_dir())
            }
            BuildScope::Full => unreachable!("full scope never takes the restricted path"),
        };

        let run = self
            .manager
            .run_restricted(command, env, self.compose_mounts()?, false)
            .await?;

        let scratch = self.paths.tmp_dir().join("artifacts");
        std::fs::create_dir_all(&scratch)?;
        self.manager
            .retrieve_from_container(&run.container, &artifact_src, &scratch)
            .await?;
        let prefix = artifact_src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string());
        self.bundle(&scratch.join(&prefix))?;

        self.state = BuildState::Done;
        Ok(())
    }

    /// Attaches an interactive container session against the cached image.
    pub async fn interactive_session(&mut self, ephemeral: bool) -> Result<i32> {
        if self.request.mode == BuildMode::Development {
            self.stage()?;
        }
        let env = self.compose_environment()?.to_map();
        let mounts = self.compose_mounts()?;
        self.manager.interactive_session(env, mounts, ephemeral).await
    }

    /// Resolves the three layers and materializes the staging tree, then
    /// installs the documents and entrypoint the container side needs.
    pub fn stage(&self) -> Result<StagingTree> {
        let resolver = LayerResolver::new(
            self.paths.common_root(),
            self.paths.sdk_root(&self.spec.sdk_name),
            self.paths.target_root(&self.request.target),
        );
        let mut tree = resolver.materialize(&self.paths.staging_root())?;

        tree.install(
            format!("{}{TARGET_SPEC_SUFFIX}", self.request.target),
            &self.paths.target_spec(&self.request.target),
        )?;
        let env_defaults = self.paths.env_defaults();
        if env_defaults.is_file() {
            tree.install(ENV_DEFAULTS_FILE, &env_defaults)?;
        }
        match std::env::current_exe() {
            Ok(exe) => tree.install(ENTRYPOINT_FILE, &exe)?,
            Err(e) => warn!("could not stage the builder entrypoint: {e}"),
        }

        // Surface malformed step names now, before any container work.
        let registry = StepRegistry::discover(tree.root())?;
        debug!("staging tree registers {} steps", registry.len());
        Ok(tree)
    }

    /// Arguments the image build parameterizes its Dockerfile with.
    fn image_build_args(&self, first_build: bool) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        args.insert("UID".to_string(), host_uid());
        args.insert("GID".to_string(), host_gid());
        args.insert("USER".to_string(), BUILD_USER.to_string());
        args.insert("GROUP".to_string(), BUILD_USER.to_string());
        args.insert("SDK_DIRNAME".to_string(), self.spec.sdk_dirname());
        args.insert("TARGET".to_string(), self.request.target.clone());
        args.insert(
            "NUM_BUILD_CORES".to_string(),
            self.request.num_build_cores.to_string(),
        );
        args.insert(
            ENV_VERBOSE.to_string(),
            if self.request.verbose { "Y" } else { "" }.to_string(),
        );
        args.insert(
            ENV_FIRST_BUILD.to_string(),
            if first_build { "1" } else { "0" }.to_string(),
        );
        args
    }

    /// Composes the step environment for this invocation.
    fn compose_environment(&self) -> Result<environment::ComposedEnvironment> {
        let defaults = self.load_env_defaults(&self.paths.env_defaults())?;
        let builder = BuilderEnv::for_target(
            &self.spec,
            self.request.num_build_cores,
            self.request.verbose,
        );
        let developer = self
            .developer
            .as_ref()
            .map(|d| d.environment.variables.clone());
        Ok(environment::compose(
            &defaults,
            &builder,
            &self.spec.environment.variables,
            developer.as_ref(),
            self.request.mode,
        ))
    }

    /// Composes the mount set: implicit development binds, overridden by
    /// developer entries. Automated containers get no mounts.
    fn compose_mounts(&self) -> Result<Vec<MountSpec>> {
        let mut target_mounts = BTreeMap::new();
        if self.request.mode == BuildMode::Development {
            let sdk_dirname = self.spec.sdk_dirname();
            target_mounts.insert(
                "sdk-root".to_string(),
                MountSpec::bind(
                    self.paths.root().join(&sdk_dirname),
                    ContainerPaths::home().join(&sdk_dirname),
                ),
            );
            target_mounts.insert(
                "staging".to_string(),
                MountSpec::bind(self.paths.staging_root(), ContainerPaths::base()),
            );
        }

        let developer_mounts = self.developer.as_ref().map(|d| d.mounts.clone());
        let source_root = self.developer.as_ref().map(|d| d.builder_dir.as_path());
        let composed = mounts::compose(&target_mounts, developer_mounts.as_ref(), source_root)?;
        Ok(composed.into_values().collect())
    }

    fn load_env_defaults(&self, path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        let value = read_json(path)?;
        let section = schema::validate_env_defaults(&value).map_err(|violations| {
            Error::SchemaViolation {
                document: path.display().to_string(),
                violations,
            }
        })?;
        Ok(section.variables)
    }

    /// Bundles the build log, timestamp record, and retrieved artifacts.
    fn bundle(&self, artifacts_dir: &Path) -> Result<()> {
        artifacts::record_end(&self.paths.timestamp_file())?;
        let archive = self.paths.out_dir().join(format!(
            "{}.tar.gz",
            self.spec.build_artifacts_archive_name
        ));
        let prefix = artifacts_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "out".to_string());
        artifacts::bundle(
            &archive,
            &prefix,
            Some(artifacts_dir),
            &[self.paths.build_log(), self.paths.timestamp_file()],
        )
    }

    // =========================================================================
    // Container Side
    // =========================================================================

    /// Walks every hook and stage namespace; runs during image builds.
    ///
    /// The prepare hooks run only when the host signalled a first build
    /// (image-cache miss) through the environment.
    async fn container_full(&mut self) -> Result<()> {
        let registry = StepRegistry::discover(&self.container_root)?;
        let env = self.container_environment()?.to_map();
        let first_build = std::env::var(ENV_FIRST_BUILD)
            .map(|v| v != "0")
            .unwrap_or(true);

        if first_build {
            self.advance(BuildState::PrepareSystem, &registry, &env).await?;
            self.state = BuildState::PrepareSdk;
            sdk::checkout(
                &self.spec,
                &ContainerPaths::sdk_topdir(&self.spec.sdk_dirname()),
                self.request.clean,
            )
            .await?;
            self.run_namespace(BuildState::PrepareSdk, &registry, &env)
                .await?;
        } else {
            info!("image identity already built once, skipping prepare hooks");
        }

        self.advance(BuildState::InstallConfigs, &registry, &env).await?;
        self.advance(BuildState::Prebuild, &registry, &env).await?;
        self.advance(BuildState::Build, &registry, &env).await?;
        self.advance(BuildState::Postbuild, &registry, &env).await?;

        self.state = BuildState::Done;
        Ok(())
    }

    /// Walks only the three stages; runs for firmware-restricted builds in
    /// a container whose environment was composed and injected by the host.
    async fn container_stages(&mut self) -> Result<()> {
        let registry = StepRegistry::discover(&self.container_root)?;
        let env = BTreeMap::new();

        self.advance(BuildState::Prebuild, &registry, &env).await?;
        self.advance(BuildState::Build, &registry, &env).await?;
        self.advance(BuildState::Postbuild, &registry, &env).await?;

        self.state = BuildState::Done;
        Ok(())
    }

    /// Transitions into a state and runs its namespace.
    async fn advance(
        &mut self,
        state: BuildState,
        registry: &StepRegistry,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.state = state;
        self.run_namespace(state, registry, env).await
    }

    async fn run_namespace(
        &self,
        state: BuildState,
        registry: &StepRegistry,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let Some(namespace) = state.namespace() else {
            return Ok(());
        };
        info!(
            "============| Stage: {namespace} [{}] |============",
            Local::now().format("%H:%M:%S")
        );
        let scheduler = HookScheduler::new(current_context());
        scheduler.run(registry.namespace(namespace), env).await
    }

    /// Composes the container-side environment from the staged documents.
    fn container_environment(&self) -> Result<environment::ComposedEnvironment> {
        let defaults = self.load_env_defaults(&self.container_root.join(ENV_DEFAULTS_FILE))?;
        let builder = BuilderEnv::for_target(
            &self.spec,
            self.request.num_build_cores,
            self.request.verbose,
        );
        Ok(environment::compose(
            &defaults,
            &builder,
            &self.spec.environment.variables,
            None,
            self.request.mode,
        ))
    }
}

/// The side of the container boundary this process runs on.
fn current_context() -> ExecutionContext {
    if inside_container() {
        ExecutionContext::Container
    } else {
        ExecutionContext::Host
    }
}

/// Runs one hook namespace in the current container, inheriting the
/// container's injected environment.
///
/// Used by the staged entrypoint for restricted package builds. When no
/// layer contributed `build_packages` steps, the SDK variant's package
/// build command runs in the SDK top directory as a fallback.
pub async fn run_container_hook(hook: &str, container_root: &Path) -> Result<()> {
    let registry = StepRegistry::discover(container_root)?;
    let steps = registry.namespace(hook);
    info!(" > Running scripts for hook '{hook}'");

    if steps.is_empty() && hook == HOOK_BUILD_PACKAGES {
        return run_package_fallback(container_root).await;
    }

    let scheduler = HookScheduler::new(current_context());
    scheduler.run(steps, &BTreeMap::new()).await
}

/// Builds the packages named by `PACKAGES_TO_BUILD` with the SDK variant's
/// own command when no hook steps exist.
async fn run_package_fallback(container_root: &Path) -> Result<()> {
    let Some(spec_path) = find_staged_spec(container_root)? else {
        warn!("no staged target spec found, nothing to build");
        return Ok(());
    };
    let spec: TargetSpec = serde_json::from_value(read_json(&spec_path)?)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    let variant = sdk::variant_for(&spec.sdk_name)?;

    let packages: Vec<String> = std::env::var(ENV_PACKAGES_TO_BUILD)
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if packages.is_empty() {
        warn!("no packages requested, nothing to build");
        return Ok(());
    }
    let cores = std::env::var(crate::constants::ENV_NUM_BUILD_CORES)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(crate::constants::DEFAULT_BUILD_CORES);

    let command = variant.package_build_command(&packages, cores);
    info!("no build_packages steps staged, falling back to {command:?}");

    let status = tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .current_dir(ContainerPaths::sdk_topdir(&spec.sdk_dirname()))
        .status()
        .await?;
    match status.code() {
        Some(0) => Ok(()),
        code => Err(Error::StepFailed {
            namespace: HOOK_BUILD_PACKAGES.to_string(),
            step: "package-build-fallback".to_string(),
            order: 0,
            code: code.unwrap_or(-1),
        }),
    }
}

/// Finds the `<target>_spec.json` document installed in the staging tree.
fn find_staged_spec(container_root: &Path) -> Result<Option<PathBuf>> {
    for entry in std::fs::read_dir(container_root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(TARGET_SPEC_SUFFIX) && entry.file_type()?.is_file() {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

fn host_uid() -> String {
    #[cfg(unix)]
    {
        nix::unistd::getuid().to_string()
    }
    #[cfg(not(unix))]
    {
        "0".to_string()
    }
}

fn host_gid() -> String {
    #[cfg(unix)]
    {
        nix::unistd::getgid().to_string()
    }
    #[cfg(not(unix))]
    {
        "0".to_string()
    }
}
