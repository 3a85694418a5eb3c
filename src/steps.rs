//! # Step Discovery and Scheduling
//!
//! Discovers numbered executable steps inside stage and hook namespaces and
//! runs them against a composed environment.
//!
//! ## Naming Convention
//!
//! Every direct entry of a namespace directory must be named
//! `<integer>.<name>`. The integer prefix is the sort key — **numeric**, not
//! lexicographic: `2.patch` runs before `10.configure` runs before
//! `100.compile`. Ties keep discovery order (the sort is stable). Entries
//! that do not match the convention are configuration errors.
//!
//! ## Namespace Isolation
//!
//! Ordering domains never span namespaces: a prefix collision between
//! `prebuild/100.x` and `build/100.x` is not a conflict, and both steps run
//! independently in their own namespaces.
//!
//! ## Execution
//!
//! Steps run strictly in sorted order, each handed the fully composed
//! environment. A non-zero exit fails the whole namespace immediately — no
//! further steps run — and the failure propagates to the orchestrator with
//! the step's name, order, and exit code. The scheduler routes steps by
//! execution context (host vs container) but never interprets their
//! semantics: a step for the other side is skipped here and run there.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::constants::{HOOKS, HOOKS_DIR, MAX_NAMESPACE_STEPS, SCRIPTS_DIR, STAGES};
use crate::error::{Error, Result};

/// Which side of the container boundary runs a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// The invoking host.
    Host,
    /// Inside the build container.
    Container,
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Default execution context for a namespace. Every stage and hook runs
/// container-side; host-side work (staging, image builds, artifact
/// retrieval) is orchestrator state, not steps.
pub fn namespace_context(_namespace: &str) -> ExecutionContext {
    ExecutionContext::Container
}

/// One discovered executable step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    /// Numeric order prefix.
    pub order: u32,
    /// Step name (everything after the first dot).
    pub name: String,
    /// Owning namespace (a stage or hook name).
    pub namespace: String,
    /// Which side runs this step.
    pub context: ExecutionContext,
    /// Absolute path of the executable.
    pub path: PathBuf,
}

impl StepDescriptor {
    /// The on-disk file name, `<order>.<name>`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.order, self.name)
    }
}

/// Discovers the ordered step sequence of one namespace directory.
///
/// A missing or empty namespace is a warning, not an error: most layers
/// contribute steps to only a few namespaces.
pub fn discover(namespace_root: &Path, namespace: &str) -> Result<Vec<StepDescriptor>> {
    if !namespace_root.is_dir() {
        debug!("namespace '{namespace}' has no directory, nothing to run");
        return Ok(Vec::new());
    }

    let context = namespace_context(namespace);
    let mut steps = Vec::new();

    for entry in std::fs::read_dir(namespace_root)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();

        let (order, name) = parse_step_name(&file_name).ok_or_else(|| Error::InvalidStepName {
            namespace: namespace.to_string(),
            name: file_name.clone(),
        })?;

        if steps.len() >= MAX_NAMESPACE_STEPS {
            return Err(Error::InvalidStepName {
                namespace: namespace.to_string(),
                name: format!("more than {MAX_NAMESPACE_STEPS} steps"),
            });
        }

        steps.push(StepDescriptor {
            order,
            name: name.to_string(),
            namespace: namespace.to_string(),
            context,
            path: entry.path(),
        });
    }

    // Numeric sort; stable, so equal prefixes keep discovery order.
    steps.sort_by_key(|s| s.order);

    if steps.is_empty() {
        warn!("no steps registered with namespace '{namespace}'");
    }
    Ok(steps)
}

/// Splits `<integer>.<name>` into its parts. The name must be non-empty.
fn parse_step_name(file_name: &str) -> Option<(u32, &str)> {
    let (prefix, name) = file_name.split_once('.')?;
    if name.is_empty() {
        return None;
    }
    let order = prefix.parse::<u32>().ok()?;
    Some((order, name))
}

/// In-memory registry of every namespace's ordered steps, populated by one
/// discovery pass over a merged scripts tree.
#[derive(Debug, Default)]
pub struct StepRegistry {
    namespaces: BTreeMap<String, Vec<StepDescriptor>>,
}

impl StepRegistry {
    /// Discovers all stage and hook namespaces under a staging root.
    pub fn discover(staging_root: &Path) -> Result<Self> {
        let scripts = staging_root.join(SCRIPTS_DIR);
        let mut namespaces = BTreeMap::new();

        for stage in STAGES {
            namespaces.insert(stage.to_string(), discover(&scripts.join(stage), stage)?);
        }
        for hook in HOOKS {
            let root = scripts.join(HOOKS_DIR).join(hook);
            namespaces.insert(hook.to_string(), discover(&root, hook)?);
        }

        Ok(Self { namespaces })
    }

    /// Ordered steps of one namespace; empty when nothing was discovered.
    pub fn namespace(&self, name: &str) -> &[StepDescriptor] {
        self.namespaces.get(name).map_or(&[], Vec::as_slice)
    }

    /// Total number of discovered steps.
    pub fn len(&self) -> usize {
        self.namespaces.values().map(Vec::len).sum()
    }

    /// True when no namespace contributed a step.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs ordered steps for one side of the container boundary.
#[derive(Debug, Clone, Copy)]
pub struct HookScheduler {
    current_context: ExecutionContext,
}

impl HookScheduler {
    /// Creates a scheduler for the side it is running on.
    pub fn new(current_context: ExecutionContext) -> Self {
        Self { current_context }
    }

    /// Executes `steps` strictly in order against `env`.
    ///
    /// Steps whose context is the other side are routed (skipped here). The
    /// first non-zero exit aborts the namespace and propagates.
    pub async fn run(
        &self,
        steps: &[StepDescriptor],
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        for step in steps {
            if step.context != self.current_context {
                debug!(
                    "step '{}' routed to {} side, skipping here",
                    step.file_name(),
                    step.context
                );
                continue;
            }

            info!(
                " > Step: {} [{}/{}]",
                step.file_name(),
                step.namespace,
                step.context
            );

            let mut command = tokio::process::Command::new(&step.path);
            command.envs(env);
            if let Some(dir) = step.path.parent() {
                command.current_dir(dir);
            }

            let status = command
                .status()
                .await
                .map_err(|e| Error::StepSpawnFailed {
                    namespace: step.namespace.clone(),
                    step: step.name.clone(),
                    order: step.order,
                    reason: e.to_string(),
                })?;

            match status.code() {
                Some(0) => {}
                Some(code) => {
                    return Err(Error::StepFailed {
                        namespace: step.namespace.clone(),
                        step: step.name.clone(),
                        order: step.order,
                        code,
                    });
                }
                None => {
                    return Err(Error::StepTerminated {
                        namespace: step.namespace.clone(),
                        step: step.name.clone(),
                        order: step.order,
                    });
                }
            }
        }
        Ok(())
    }
}
