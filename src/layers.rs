//! # Layer Resolution
//!
//! Merges the three configuration layers — common, SDK-specific, and
//! target-specific — into one staging tree that becomes the container build
//! context.
//!
//! ## Merge Model
//!
//! Layers are walked strictly in order common → sdk → target, comparing
//! entries by layer-relative path. When the same relative path appears in
//! more than one layer, the later layer **replaces** the earlier one
//! entirely; there is no content-level merge.
//!
//! Only the `files/` and `scripts/` subtrees of a layer participate in the
//! merge. `scripts/` is validated structurally before merging: its direct
//! children must be known stage namespaces or the `hooks/` directory, whose
//! children must in turn be known hook namespaces. A namespace directory may
//! contain only step files, never nested directories.
//!
//! ## Security Model
//!
//! Every contributed path must map back inside its declared layer root.
//! Relative paths containing `..` components and directory symlinks that
//! escape the root are rejected with a configuration error before anything
//! is copied. The walk is additionally bounded by [`MAX_LAYER_DEPTH`] and
//! [`MAX_STAGING_FILES`] so a cyclic or pathological tree cannot exhaust the
//! filesystem.
//!
//! ## Determinism
//!
//! The merge manifest is an ordered map keyed by relative path, and
//! materialization copies entries in that order. Resolving the same three
//! layers twice with unchanged inputs produces byte-identical staging trees.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::constants::{
    FILES_DIR, HOOKS, HOOKS_DIR, MAX_LAYER_DEPTH, MAX_STAGING_FILES, SCRIPTS_DIR, SPECS_DIR,
    STAGES,
};
use crate::error::{Error, Result};

/// One of the three override tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayerKind {
    /// Lowest precedence, shared by every SDK and target.
    Common,
    /// SDK-specific material.
    Sdk,
    /// Target-specific material; highest precedence.
    Target,
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Common => write!(f, "common"),
            Self::Sdk => write!(f, "sdk"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// One layer: a kind and a root path. A missing root is an empty layer, not
/// an error — most SDKs contribute nothing to most namespaces.
#[derive(Debug, Clone)]
pub struct Layer {
    pub kind: LayerKind,
    pub root: PathBuf,
}

/// One entry of the merged manifest: which layer won a relative path, and
/// the absolute source file to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEntry {
    pub layer: LayerKind,
    pub source: PathBuf,
}

/// The merged manifest: relative path → winning entry, ordered by path.
pub type Manifest = BTreeMap<PathBuf, MergedEntry>;

/// Merges common/sdk/target layer trees into one staging tree.
#[derive(Debug, Clone)]
pub struct LayerResolver {
    layers: Vec<Layer>,
}

impl LayerResolver {
    /// Creates a resolver over the three layer roots, in override order.
    pub fn new(
        common_root: impl Into<PathBuf>,
        sdk_root: impl Into<PathBuf>,
        target_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            layers: vec![
                Layer {
                    kind: LayerKind::Common,
                    root: common_root.into(),
                },
                Layer {
                    kind: LayerKind::Sdk,
                    root: sdk_root.into(),
                },
                Layer {
                    kind: LayerKind::Target,
                    root: target_root.into(),
                },
            ],
        }
    }

    /// Resolves the layers into a merged manifest. Later layers win on
    /// relative-path collisions.
    pub fn resolve(&self) -> Result<Manifest> {
        let mut manifest = Manifest::new();

        for layer in &self.layers {
            if !layer.root.is_dir() {
                debug!("layer '{}' has no root at {}", layer.kind, layer.root.display());
                continue;
            }
            validate_layout(layer)?;
            collect_layer(layer, &mut manifest)?;
        }

        debug!("merged manifest holds {} entries", manifest.len());
        Ok(manifest)
    }

    /// Resolves and materializes the staging tree at `staging_root`.
    ///
    /// The staging root is rebuilt from scratch on every invocation; there
    /// is no persisted merged state.
    pub fn materialize(&self, staging_root: &Path) -> Result<StagingTree> {
        let manifest = self.resolve()?;

        if staging_root.exists() {
            std::fs::remove_dir_all(staging_root).map_err(|e| Error::StagingFailed {
                path: staging_root.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        std::fs::create_dir_all(staging_root).map_err(|e| Error::StagingFailed {
            path: staging_root.to_path_buf(),
            reason: e.to_string(),
        })?;

        for (rel, entry) in &manifest {
            let dest = staging_root.join(rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::StagingFailed {
                    path: parent.to_path_buf(),
                    reason: e.to_string(),
                })?;
            }
            std::fs::copy(&entry.source, &dest).map_err(|e| Error::StagingFailed {
                path: entry.source.clone(),
                reason: e.to_string(),
            })?;
        }

        info!(
            "staged {} files into {}",
            manifest.len(),
            staging_root.display()
        );
        Ok(StagingTree {
            root: staging_root.to_path_buf(),
            manifest,
        })
    }
}

/// Walks one layer's `files/` and `scripts/` subtrees into the manifest.
fn collect_layer(layer: &Layer, manifest: &mut Manifest) -> Result<()> {
    for subtree in [FILES_DIR, SCRIPTS_DIR] {
        let root = layer.root.join(subtree);
        if !root.is_dir() {
            continue;
        }
        walk(layer, &root, &layer.root, 0, manifest)?;
    }
    Ok(())
}

fn walk(
    layer: &Layer,
    dir: &Path,
    layer_root: &Path,
    depth: usize,
    manifest: &mut Manifest,
) -> Result<()> {
    if depth > MAX_LAYER_DEPTH {
        return Err(Error::InvalidLayerLayout {
            layer: layer.kind.to_string(),
            path: dir.display().to_string(),
            reason: format!("exceeds maximum depth of {MAX_LAYER_DEPTH}"),
        });
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() || (file_type.is_symlink() && path.is_dir()) {
            // A directory symlink may not lead the walk outside the layer.
            ensure_contained(layer, &path, layer_root)?;
            walk(layer, &path, layer_root, depth + 1, manifest)?;
        } else {
            let rel = relative_to(layer, &path, layer_root)?;
            if manifest.len() >= MAX_STAGING_FILES {
                return Err(Error::StagingFailed {
                    path: path.clone(),
                    reason: format!("staging tree exceeds {MAX_STAGING_FILES} files"),
                });
            }
            manifest.insert(
                rel,
                MergedEntry {
                    layer: layer.kind,
                    source: path,
                },
            );
        }
    }
    Ok(())
}

/// Maps a path to its layer-relative form, rejecting anything that cannot
/// be expressed inside the declared root.
fn relative_to(layer: &Layer, path: &Path, layer_root: &Path) -> Result<PathBuf> {
    let rel = path
        .strip_prefix(layer_root)
        .map_err(|_| Error::PathTraversal {
            layer: layer.kind.to_string(),
            path: path.display().to_string(),
        })?;

    for component in rel.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(Error::PathTraversal {
                    layer: layer.kind.to_string(),
                    path: path.display().to_string(),
                })
            }
        }
    }
    Ok(rel.to_path_buf())
}

/// Rejects directories whose canonical location escapes the layer root.
fn ensure_contained(layer: &Layer, path: &Path, layer_root: &Path) -> Result<()> {
    let canonical = std::fs::canonicalize(path)?;
    let canonical_root = std::fs::canonicalize(layer_root)?;
    if !canonical.starts_with(&canonical_root) {
        return Err(Error::PathTraversal {
            layer: layer.kind.to_string(),
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// Structurally validates one layer before merging.
///
/// Top-level directories are limited to `files/`, `scripts/`, `specs/`.
/// `scripts/` children must be stage namespaces or `hooks/`; `hooks/`
/// children must be hook namespaces; namespace directories hold only files.
fn validate_layout(layer: &Layer) -> Result<()> {
    let invalid = |path: &Path, reason: String| Error::InvalidLayerLayout {
        layer: layer.kind.to_string(),
        path: path.display().to_string(),
        reason,
    };

    for entry in std::fs::read_dir(&layer.root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if ![FILES_DIR, SCRIPTS_DIR, SPECS_DIR].contains(&name.as_str()) {
            return Err(invalid(
                &entry.path(),
                format!("unexpected top-level directory '{name}'"),
            ));
        }
    }

    let scripts = layer.root.join(SCRIPTS_DIR);
    if !scripts.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(&scripts)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type()?.is_dir() {
            return Err(invalid(
                &entry.path(),
                "loose file outside a namespace directory".to_string(),
            ));
        }
        if name == HOOKS_DIR {
            for hook in std::fs::read_dir(entry.path())? {
                let hook = hook?;
                let hook_name = hook.file_name().to_string_lossy().into_owned();
                if !hook.file_type()?.is_dir() {
                    return Err(invalid(
                        &hook.path(),
                        "loose file outside a hook namespace".to_string(),
                    ));
                }
                if !HOOKS.contains(&hook_name.as_str()) {
                    return Err(invalid(
                        &hook.path(),
                        format!("unknown hook namespace '{hook_name}'"),
                    ));
                }
                ensure_flat(layer, &hook.path())?;
            }
        } else if STAGES.contains(&name.as_str()) {
            ensure_flat(layer, &entry.path())?;
        } else {
            return Err(invalid(
                &entry.path(),
                format!("unknown stage namespace '{name}'"),
            ));
        }
    }

    Ok(())
}

/// A namespace directory may contain only step files.
fn ensure_flat(layer: &Layer, namespace_dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(namespace_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            return Err(Error::InvalidLayerLayout {
                layer: layer.kind.to_string(),
                path: entry.path().display().to_string(),
                reason: "namespace directories may not nest".to_string(),
            });
        }
    }
    Ok(())
}

/// A materialized staging tree, ready to serve as a container build context.
#[derive(Debug)]
pub struct StagingTree {
    root: PathBuf,
    manifest: Manifest,
}

impl StagingTree {
    /// Staging root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The manifest the tree was materialized from.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Installs an extra file into the tree at `rel` (spec documents, the
    /// builder entrypoint). Permissions are carried over from the source.
    pub fn install(&mut self, rel: impl AsRef<Path>, source: &Path) -> Result<()> {
        let rel = rel.as_ref();
        let dest = self.root.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, &dest).map_err(|e| Error::StagingFailed {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("installed {} into staging", rel.display());
        Ok(())
    }
}
