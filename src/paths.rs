//! # Builder Path Layout
//!
//! The builder operates in three path contexts: the **host** (project
//! checkout), the **staging tree** (merged build context on the host), and
//! the **container** (where the staging tree lands and steps run). This
//! module pins the layout once so the rest of the crate never assembles
//! paths by hand.
//!
//! ```text
//! <project root>/                      CONTAINER_BASE (/home/dev/base)/
//! ├── spec/targets/                    ├── files/
//! │   ├── common/                      ├── scripts/
//! │   │   ├── files/                   │   ├── prebuild/
//! │   │   ├── scripts/                 │   ├── build/
//! │   │   └── specs/environment.json   │   ├── postbuild/
//! │   └── <target>/                    │   └── hooks/<hook>/
//! │       ├── <target>_spec.json       └── <target>_spec.json
//! │       ├── files/
//! │       └── scripts/
//! ├── staging/        (merged tree)
//! ├── out/            (artifact bundles)
//! │   └── package/
//! └── .tmp/           (build.log, timestamp)
//! ```

use std::path::{Path, PathBuf};

use crate::constants::{
    BUILD_LOG_FILE, COMMON_LAYER, CONTAINER_BASE, CONTAINER_HOME, DEVELOPER_CONFIG_FILE,
    ENV_DEFAULTS_FILE, ENV_INSIDE_CONTAINER, FILES_DIR, OUT_DIR, PKG_OUT_DIR, SDKS_DIR,
    STAGING_DIR, TARGETS_DIR, TARGET_SPEC_SUFFIX, TIMESTAMP_FILE, TMP_DIR,
};

/// True when running inside a build container.
///
/// Containers launched by the builder always carry the `INSIDE_CONTAINER`
/// environment variable; its presence selects the container side of the
/// orchestrator.
pub fn inside_container() -> bool {
    std::env::var_os(ENV_INSIDE_CONTAINER).is_some()
}

/// Host-side path layout, anchored at the project root.
#[derive(Debug, Clone)]
pub struct BuilderPaths {
    root: PathBuf,
}

impl BuilderPaths {
    /// Creates the layout for a project root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root of all target layers.
    pub fn targets_root(&self) -> PathBuf {
        self.root.join(TARGETS_DIR)
    }

    /// Root of the common layer.
    pub fn common_root(&self) -> PathBuf {
        self.targets_root().join(COMMON_LAYER)
    }

    /// Root of one target's layer.
    pub fn target_root(&self, target: &str) -> PathBuf {
        self.targets_root().join(target)
    }

    /// Root of one SDK's layer.
    pub fn sdk_root(&self, sdk_name: &str) -> PathBuf {
        self.root.join(SDKS_DIR).join(sdk_name)
    }

    /// Specification document of one target.
    pub fn target_spec(&self, target: &str) -> PathBuf {
        self.target_root(target)
            .join(format!("{target}{TARGET_SPEC_SUFFIX}"))
    }

    /// Common environment-defaults document.
    pub fn env_defaults(&self) -> PathBuf {
        self.common_root().join(ENV_DEFAULTS_FILE)
    }

    /// Default developer override document.
    pub fn developer_config(&self) -> PathBuf {
        self.root.join(DEVELOPER_CONFIG_FILE)
    }

    /// Staging root where the merged layer tree is materialized.
    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Output directory for artifact bundles.
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(OUT_DIR)
    }

    /// Scratch directory for the build log and timestamp record.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Build log file.
    pub fn build_log(&self) -> PathBuf {
        self.tmp_dir().join(BUILD_LOG_FILE)
    }

    /// Timestamp record file.
    pub fn timestamp_file(&self) -> PathBuf {
        self.tmp_dir().join(TIMESTAMP_FILE)
    }

    /// Lists the known targets: every directory under the targets root
    /// except the common layer.
    pub fn known_targets(&self) -> std::io::Result<Vec<String>> {
        let mut targets = Vec::new();
        for entry in std::fs::read_dir(self.targets_root())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != COMMON_LAYER {
                targets.push(name);
            }
        }
        targets.sort();
        Ok(targets)
    }
}

/// Container-side path layout. All paths are fixed by the image contract,
/// so this type has no state.
#[derive(Debug, Clone, Copy)]
pub struct ContainerPaths;

impl ContainerPaths {
    /// Base directory where the staging tree lands.
    pub fn base() -> PathBuf {
        PathBuf::from(CONTAINER_BASE)
    }

    /// Home directory of the build user.
    pub fn home() -> PathBuf {
        PathBuf::from(CONTAINER_HOME)
    }

    /// Artifact output directory inside the container.
    pub fn out_dir() -> PathBuf {
        Self::home().join(OUT_DIR)
    }

    /// Package output directory inside the container.
    pub fn pkg_out_dir() -> PathBuf {
        Self::out_dir().join(PKG_OUT_DIR)
    }

    /// Installed config files directory inside the container.
    pub fn files_dir() -> PathBuf {
        Self::base().join(FILES_DIR)
    }

    /// Top directory of an SDK checkout named `<sdk_name>_<sdk_tag>`.
    pub fn sdk_topdir(sdk_dirname: &str) -> PathBuf {
        Self::home().join(sdk_dirname)
    }
}
