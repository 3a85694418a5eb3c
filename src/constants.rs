//! # Builder Constants
//!
//! Defines the directory layout, namespace names, environment contract, and
//! resource bounds for the build orchestrator. These constants are the
//! **single source of truth** for the layer/staging layout and the step
//! environment contract throughout the codebase.
//!
//! ## Cross-References
//!
//! - [`crate::layers`]: Uses the layout names when merging layer trees
//! - [`crate::steps`]: Uses the namespace tables for discovery and routing
//! - [`crate::environment`]: Uses the environment variable names
//! - [`crate::manager`]: Uses the image tag mode suffixes

// =============================================================================
// Stage and Hook Namespaces
// =============================================================================

/// Stage namespaces, traversed in this order for every full or
/// firmware-restricted build.
pub const STAGES: [&str; 3] = ["prebuild", "build", "postbuild"];

/// Hook namespaces, traversed only in specific scenarios (first build,
/// pre-build config installation, restricted package builds).
pub const HOOKS: [&str; 4] = [
    "prepare_system",
    "prepare_sdk",
    "install_configs",
    "build_packages",
];

/// Hook namespace run before the build stages to install config files.
pub const HOOK_INSTALL_CONFIGS: &str = "install_configs";

/// Hook namespace run to prepare the build system on first build.
pub const HOOK_PREPARE_SYSTEM: &str = "prepare_system";

/// Hook namespace run to prepare the SDK checkout on first build.
pub const HOOK_PREPARE_SDK: &str = "prepare_sdk";

/// Hook namespace run for restricted package builds.
pub const HOOK_BUILD_PACKAGES: &str = "build_packages";

// =============================================================================
// Layer / Staging Layout
// =============================================================================

/// Directory under a layer root holding config files to inject.
pub const FILES_DIR: &str = "files";

/// Directory under a layer root holding stage scripts.
pub const SCRIPTS_DIR: &str = "scripts";

/// Directory under `scripts/` holding hook namespaces.
pub const HOOKS_DIR: &str = "hooks";

/// Directory under a layer root holding specification documents.
pub const SPECS_DIR: &str = "specs";

/// Root directory of per-target layers, relative to the project root.
pub const TARGETS_DIR: &str = "spec/targets";

/// Root directory of per-SDK layers, relative to the project root.
pub const SDKS_DIR: &str = "spec/sdks";

/// Name of the common (lowest-precedence) layer directory.
pub const COMMON_LAYER: &str = "common";

/// Staging directory for the merged build context, relative to project root.
pub const STAGING_DIR: &str = "staging";

/// Output directory on the host, relative to the project root.
pub const OUT_DIR: &str = "out";

/// Package output directory, relative to the output directory.
pub const PKG_OUT_DIR: &str = "package";

/// Scratch directory holding the build log and timestamp record.
pub const TMP_DIR: &str = ".tmp";

/// Build log file name inside [`TMP_DIR`].
pub const BUILD_LOG_FILE: &str = "build.log";

/// Timestamp record file name inside [`TMP_DIR`].
pub const TIMESTAMP_FILE: &str = "timestamp";

/// Common environment-defaults document, relative to the common layer root.
pub const ENV_DEFAULTS_FILE: &str = "specs/environment.json";

/// Default developer override document, relative to the project root.
pub const DEVELOPER_CONFIG_FILE: &str = "developer.json";

/// Suffix of per-target specification documents (`<target>_spec.json`).
pub const TARGET_SPEC_SUFFIX: &str = "_spec.json";

// =============================================================================
// Container Layout
// =============================================================================

/// Home directory of the build user inside the container.
pub const CONTAINER_HOME: &str = "/home/dev";

/// Base directory inside the container where the staging tree lands.
pub const CONTAINER_BASE: &str = "/home/dev/base";

/// User the build runs as inside the container.
pub const BUILD_USER: &str = "dev";

/// Container engine used unless overridden (the only engine with an
/// interface at present).
pub const DEFAULT_ENGINE: &str = "docker";

// =============================================================================
// Environment Contract
// =============================================================================
//
// Variable names every step may rely on. Steps signal failure via non-zero
// exit status; these names are the only other cross-boundary channel.
// =============================================================================

/// Top directory of the SDK checkout.
pub const ENV_SDK_TOPDIR: &str = "SDK_TOPDIR";

/// Directory build artifacts must be written to.
pub const ENV_BUILD_ARTIFACTS_OUTDIR: &str = "BUILD_ARTIFACTS_OUTDIR";

/// Directory package artifacts must be written to.
pub const ENV_PACKAGE_OUTDIR: &str = "PACKAGE_OUTDIR";

/// Directory holding installed config files.
pub const ENV_CONFIGS_DIR: &str = "CONFIGS_DIR";

/// Number of processor cores available to the build.
pub const ENV_NUM_BUILD_CORES: &str = "NUM_BUILD_CORES";

/// Presence toggles verbose mode in steps.
pub const ENV_VERBOSE: &str = "VERBOSE";

/// Space-separated package list for restricted package builds.
pub const ENV_PACKAGES_TO_BUILD: &str = "PACKAGES_TO_BUILD";

/// URL of the external toolchain, when the target declares one.
pub const ENV_EXTERNAL_TOOLCHAIN_URL: &str = "EXTERNAL_TOOLCHAIN_URL";

/// Set inside build containers; distinguishes the container side from the
/// host side of an invocation.
pub const ENV_INSIDE_CONTAINER: &str = "INSIDE_CONTAINER";

/// Set to `0` inside image builds whose identity was already cached, so the
/// one-shot prepare hooks are skipped on rebuilds. Cache-miss is the
/// first-build signal; there is no separate marker.
pub const ENV_FIRST_BUILD: &str = "FIRST_BUILD";

/// Name the builder entrypoint is staged under, so the container side can
/// re-enter the orchestrator.
pub const ENTRYPOINT_FILE: &str = "fwbuilder";

/// Default core count when `--cores` is not given.
pub const DEFAULT_BUILD_CORES: u32 = 1;

// =============================================================================
// Image Tags
// =============================================================================

/// Tag mode suffix for automated builds.
pub const TAG_MODE_AUTOMATED: &str = "automated";

/// Tag mode suffix for development builds.
pub const TAG_MODE_DEV: &str = "dev";

// =============================================================================
// Resource Bounds
// =============================================================================
//
// Bounds on staging and discovery. These are generous for legitimate layer
// trees while catching runaway or looping inputs (e.g. a symlink cycle fed
// to the layer walk) before they exhaust the filesystem.
// =============================================================================

/// Maximum number of files a single staging tree may contain.
pub const MAX_STAGING_FILES: usize = 100_000;

/// Maximum directory depth of a layer tree.
pub const MAX_LAYER_DEPTH: usize = 32;

/// Maximum number of steps a single namespace may contain.
pub const MAX_NAMESPACE_STEPS: usize = 1024;

/// Timestamp format used in the build timestamp record.
pub const TIMESTAMP_FORMAT: &str = "%b %d %Y ~ %H:%M";
