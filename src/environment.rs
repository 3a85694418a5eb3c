//! # Environment Composition
//!
//! Builds the final environment-variable mapping handed to every step.
//!
//! Four tiers are merged with strict precedence, lowest first:
//!
//! 1. common defaults (the shared `environment.json` document)
//! 2. builder-implicit values (paths, core count, verbosity)
//! 3. target-supplied entries
//! 4. developer overrides — consulted **only** in development mode
//!
//! Composition is deterministic and side-effect free: the result is an
//! ordered map where every name appears exactly once, holding the value of
//! the highest tier that set it.

use std::collections::BTreeMap;

use crate::constants::{
    DEFAULT_BUILD_CORES, ENV_BUILD_ARTIFACTS_OUTDIR, ENV_CONFIGS_DIR, ENV_EXTERNAL_TOOLCHAIN_URL,
    ENV_NUM_BUILD_CORES, ENV_PACKAGE_OUTDIR, ENV_SDK_TOPDIR, ENV_VERBOSE,
};
use crate::paths::ContainerPaths;
use crate::spec::{BuildMode, TargetSpec};

/// Which tier resolved a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Provenance {
    /// Common defaults document.
    Default,
    /// Injected by the builder itself.
    Builder,
    /// Target specification.
    Target,
    /// Developer override document.
    Developer,
}

/// One resolved variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentEntry {
    pub name: String,
    pub value: String,
    pub provenance: Provenance,
}

/// The builder-implicit tier. Always injected, regardless of target.
#[derive(Debug, Clone)]
pub struct BuilderEnv {
    /// Top directory of the SDK checkout inside the container.
    pub sdk_topdir: String,
    /// Core count for the build.
    pub num_build_cores: u32,
    /// Whether steps should run in verbose mode.
    pub verbose: bool,
    /// External toolchain URL, when the target declares one.
    pub external_toolchain_url: Option<String>,
}

impl BuilderEnv {
    /// Derives the implicit tier for a target. Steps run inside the
    /// container, so all injected paths are container-side.
    pub fn for_target(spec: &TargetSpec, num_build_cores: u32, verbose: bool) -> Self {
        Self {
            sdk_topdir: ContainerPaths::sdk_topdir(&spec.sdk_dirname())
                .display()
                .to_string(),
            num_build_cores,
            verbose,
            external_toolchain_url: spec.external_toolchain_url.clone(),
        }
    }
}

impl Default for BuilderEnv {
    fn default() -> Self {
        Self {
            sdk_topdir: ContainerPaths::home().display().to_string(),
            num_build_cores: DEFAULT_BUILD_CORES,
            verbose: false,
            external_toolchain_url: None,
        }
    }
}

/// The composed environment, with provenance retained for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ComposedEnvironment {
    entries: BTreeMap<String, EnvironmentEntry>,
}

impl ComposedEnvironment {
    /// Looks up a resolved entry.
    pub fn get(&self, name: &str) -> Option<&EnvironmentEntry> {
        self.entries.get(name)
    }

    /// Iterates entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentEntry> {
        self.entries.values()
    }

    /// Flattens into a plain name → value map for process spawning.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries
            .values()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }

    /// Number of resolved variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn absorb(&mut self, vars: &BTreeMap<String, String>, provenance: Provenance) {
        for (name, value) in vars {
            self.entries.insert(
                name.clone(),
                EnvironmentEntry {
                    name: name.clone(),
                    value: value.clone(),
                    provenance,
                },
            );
        }
    }
}

/// Composes the final environment.
///
/// `developer` is consulted only when `mode` is development; in automated
/// mode it is ignored even if present.
pub fn compose(
    defaults: &BTreeMap<String, String>,
    builder: &BuilderEnv,
    target: &BTreeMap<String, String>,
    developer: Option<&BTreeMap<String, String>>,
    mode: BuildMode,
) -> ComposedEnvironment {
    let mut env = ComposedEnvironment::default();

    env.absorb(defaults, Provenance::Default);
    env.absorb(&implicit_vars(builder), Provenance::Builder);
    env.absorb(target, Provenance::Target);
    if mode == BuildMode::Development {
        if let Some(overrides) = developer {
            env.absorb(overrides, Provenance::Developer);
        }
    }

    env
}

/// The fixed implicit subset every step may rely on.
fn implicit_vars(builder: &BuilderEnv) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert(ENV_SDK_TOPDIR.to_string(), builder.sdk_topdir.clone());
    vars.insert(
        ENV_BUILD_ARTIFACTS_OUTDIR.to_string(),
        ContainerPaths::out_dir().display().to_string(),
    );
    vars.insert(
        ENV_PACKAGE_OUTDIR.to_string(),
        ContainerPaths::pkg_out_dir().display().to_string(),
    );
    vars.insert(
        ENV_CONFIGS_DIR.to_string(),
        ContainerPaths::files_dir().display().to_string(),
    );
    vars.insert(
        ENV_NUM_BUILD_CORES.to_string(),
        builder.num_build_cores.to_string(),
    );
    // Presence toggles verbose mode; the variable is absent otherwise.
    if builder.verbose {
        vars.insert(ENV_VERBOSE.to_string(), "Y".to_string());
    }
    if let Some(url) = &builder.external_toolchain_url {
        vars.insert(ENV_EXTERNAL_TOOLCHAIN_URL.to_string(), url.clone());
    }
    vars
}
