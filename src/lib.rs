//! # fwbuilder
//!
//! **Containerized Embedded-Firmware SDK Build Orchestrator**
//!
//! This crate builds embedded-firmware SDKs (OpenWrt-style build systems)
//! inside containers, in two operating modes — fully automated and
//! developer/interactive — and two build granularities — full-SDK and
//! scope-restricted (single package or single firmware artifact).
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           fwbuilder                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                     BuildOrchestrator                       │    │
//! │  │   Init → PrepareSystem → PrepareSdk → InstallConfigs        │    │
//! │  │        → Prebuild → Build → Postbuild → Done                │    │
//! │  │   Init → RestrictedBuild → Done       (scope ≠ full)        │    │
//! │  └───────────────┬─────────────────────────────┬───────────────┘    │
//! │                  │                             │                    │
//! │  ┌───────────────┴───────────────┐  ┌──────────┴───────────────┐    │
//! │  │        Configuration          │  │        Execution         │    │
//! │  │  LayerResolver (3-tier merge) │  │  HookScheduler (numbered │    │
//! │  │  EnvironmentComposer          │  │  steps, fail-fast)       │    │
//! │  │  MountResolver                │  │  ContainerManager (image │    │
//! │  │  SchemaValidator              │  │  identity, cache, runs)  │    │
//! │  └───────────────────────────────┘  └──────────┬───────────────┘    │
//! ├─────────────────────────────────────────────────┼───────────────────┤
//! │                    ContainerEngine Trait        │                   │
//! │        image_exists │ build_image │ run │ copy_from_*              │
//! │                       ┌──────────────┐                              │
//! │                       │ DockerEngine │                              │
//! │                       └──────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Layer Model
//!
//! Build material comes from three layers merged with deterministic
//! override precedence (later wins, whole-file replace):
//!
//! | Layer  | Root                    | Contributes                       |
//! |--------|-------------------------|-----------------------------------|
//! | common | `spec/targets/common/`  | material shared by every build    |
//! | sdk    | `spec/sdks/<sdk_name>/` | SDK-family specifics              |
//! | target | `spec/targets/<target>/`| per-target overrides              |
//!
//! The same precedence governs environment variables
//! (defaults < builder-implicit < target < developer) and mounts
//! (developer entries replace target entries wholesale).
//!
//! # Step Contract
//!
//! Steps are opaque executables named `<integer>.<name>`, discovered per
//! stage/hook namespace and run in numeric order. They consume the injected
//! environment (`SDK_TOPDIR`, `BUILD_ARTIFACTS_OUTDIR`, `PACKAGE_OUTDIR`,
//! `CONFIGS_DIR`, `NUM_BUILD_CORES`, `VERBOSE`, …) and signal failure via a
//! non-zero exit status — the sole cross-boundary error channel. A failing
//! step aborts its namespace and the build.
//!
//! # Image Identity
//!
//! Built images are cached under
//! `<sdk_name>_<sdk_branch>:latest_<mode>_<target>`. Restricted builds
//! require a cached identity and never fall back to an implicit full
//! build. The builder never deletes images; pruning is the operator's job.
//!
//! # Example
//!
//! ```rust,ignore
//! use fwbuilder::{
//!     engine, BuildMode, BuildOrchestrator, BuildRequest, BuildScope,
//!     BuilderPaths, TargetSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> fwbuilder::Result<()> {
//!     let paths = BuilderPaths::new(std::env::current_dir()?);
//!     let spec = TargetSpec::load(&paths.target_spec("rpi4b"))?;
//!     let request = BuildRequest {
//!         target: "rpi4b".to_string(),
//!         mode: BuildMode::Automated,
//!         scope: BuildScope::Full,
//!         num_build_cores: 4,
//!         verbose: true,
//!         clean: false,
//!     };
//!     let engine = engine::engine_for("docker")?;
//!     let mut build = BuildOrchestrator::new(paths, request, spec, None, engine)?;
//!     build.run().await
//! }
//! ```

pub mod artifacts;
pub mod constants;
pub mod engine;
pub mod environment;
pub mod error;
pub mod layers;
pub mod manager;
pub mod mounts;
pub mod orchestrator;
pub mod paths;
pub mod schema;
pub mod sdk;
pub mod spec;
pub mod steps;

// Re-exports
pub use engine::{ContainerEngine, DockerEngine, RunSpec};
pub use environment::{BuilderEnv, ComposedEnvironment, EnvironmentEntry, Provenance};
pub use error::{Error, Result};
pub use layers::{LayerKind, LayerResolver, StagingTree};
pub use manager::{ContainerManager, ImageIdentity};
pub use mounts::{MountSpec, MountType};
pub use orchestrator::{BuildOrchestrator, BuildRequest, BuildState};
pub use paths::{inside_container, BuilderPaths, ContainerPaths};
pub use schema::ValidationReport;
pub use sdk::SdkVariant;
pub use spec::{BuildMode, BuildScope, DeveloperConfig, TargetSpec};
pub use steps::{ExecutionContext, HookScheduler, StepDescriptor, StepRegistry};
