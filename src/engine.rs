//! # Container Engine Abstraction
//!
//! One pluggable interface over container technologies, covering exactly the
//! primitives the builder needs: image existence, image build+tag, container
//! run with environment and mounts, and copying artifacts back out.
//!
//! The concrete [`DockerEngine`] drives the `docker` CLI in subprocesses.
//! Additional engines (podman, lxd) would implement [`ContainerEngine`] and
//! register in [`engine_for`]; the rest of the crate never names a concrete
//! engine.
//!
//! Build and run output is streamed line-by-line into the log so container
//! output lands in the same build log as the builder's own diagnostics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::constants::{DEFAULT_ENGINE, ENV_INSIDE_CONTAINER};
use crate::error::{Error, Result};
use crate::mounts::{MountSpec, MountType};

/// Everything needed to start one container.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Image tag to instantiate.
    pub image: String,
    /// Command to run inside the container.
    pub command: Vec<String>,
    /// Environment injected into the container.
    pub env: BTreeMap<String, String>,
    /// Mounts attached to the container.
    pub mounts: Vec<MountSpec>,
    /// Attach a terminal for an interactive session.
    pub interactive: bool,
    /// Auto-remove the container on exit.
    pub ephemeral: bool,
    /// Stable container name, when the caller needs to find it again.
    pub name: Option<String>,
}

/// Abstraction over one container technology.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine name, e.g. `docker`.
    fn name(&self) -> &str;

    /// Does an image with this tag exist locally?
    async fn image_exists(&self, tag: &str) -> Result<bool>;

    /// Builds an image from `context`, tagging it `tag`. The engine's exit
    /// status propagates unchanged on failure.
    async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        build_args: &BTreeMap<String, String>,
        nocache: bool,
    ) -> Result<()>;

    /// Runs a container to completion (or interactively) and returns its
    /// exit code.
    async fn run(&self, spec: &RunSpec) -> Result<i32>;

    /// Does a container with this id or name exist?
    async fn container_exists(&self, id: &str) -> Result<bool>;

    /// Copies a path out of an image. Engines typically cannot copy from
    /// images directly, so this creates a throwaway container for the copy.
    async fn copy_from_image(&self, tag: &str, src: &Path, dst: &Path) -> Result<()>;

    /// Copies a path out of an existing container, optionally removing the
    /// container afterwards.
    async fn copy_from_container(
        &self,
        id: &str,
        src: &Path,
        dst: &Path,
        remove: bool,
    ) -> Result<()>;

    /// Force-removes a container.
    async fn remove_container(&self, id: &str) -> Result<()>;
}

/// Returns the engine interface for a technology name.
pub fn engine_for(name: &str) -> Result<Arc<dyn ContainerEngine>> {
    match name {
        DEFAULT_ENGINE => Ok(Arc::new(DockerEngine::new())),
        other => Err(Error::UnknownEngine {
            engine: other.to_string(),
        }),
    }
}

/// [`ContainerEngine`] implementation driving the `docker` CLI.
pub struct DockerEngine {
    program: PathBuf,
}

impl DockerEngine {
    /// Creates an engine using `docker` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("docker"),
        }
    }

    /// Creates an engine using a specific client binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, args: &[String]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.program.display(), args.join(" "))
    }

    /// Runs a docker command capturing output, mapping spawn failures.
    async fn capture(&self, args: &[String]) -> Result<std::process::Output> {
        self.command(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::EngineCommandFailed {
                command: self.describe(args),
                reason: e.to_string(),
            })
    }

    /// Runs a docker command streaming its output into the log, returning
    /// the exit code.
    async fn stream(&self, args: &[String]) -> Result<i32> {
        let mut child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::EngineCommandFailed {
                command: self.describe(args),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!("{line}");
                }
            }
        };
        let err_task = async {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!("{line}");
                }
            }
        };
        tokio::join!(out_task, err_task);

        let status = child.wait().await.map_err(|e| Error::EngineCommandFailed {
            command: self.describe(args),
            reason: e.to_string(),
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders one mount as a `--mount` flag value.
fn mount_flag(spec: &MountSpec) -> String {
    let (ty, readonly) = match spec.mount_type {
        MountType::Bind => ("bind", false),
        MountType::ReadonlyBind => ("bind", true),
        MountType::Volume => ("volume", false),
    };
    let mut flag = format!(
        "type={ty},source={},target={}",
        spec.source.display(),
        spec.target.display()
    );
    if readonly {
        flag.push_str(",readonly");
    }
    flag
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        DEFAULT_ENGINE
    }

    async fn image_exists(&self, tag: &str) -> Result<bool> {
        let args = vec!["image".to_string(), "inspect".to_string(), tag.to_string()];
        let output = self.capture(&args).await?;
        Ok(output.status.success())
    }

    async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        build_args: &BTreeMap<String, String>,
        nocache: bool,
    ) -> Result<()> {
        let mut args = vec![
            "build".to_string(),
            "--network=host".to_string(),
            "--rm".to_string(),
        ];
        if nocache {
            args.push("--no-cache".to_string());
        }
        for (key, value) in build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("-t".to_string());
        args.push(tag.to_string());
        args.push(context.display().to_string());

        info!("building image '{tag}' from {}", context.display());
        let code = self.stream(&args).await?;
        if code != 0 {
            return Err(Error::ImageBuildFailed {
                tag: tag.to_string(),
                code,
            });
        }
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> Result<i32> {
        let mut args = vec!["run".to_string(), "--net=host".to_string()];
        if spec.ephemeral {
            args.push("--rm".to_string());
        }
        if spec.interactive {
            args.push("-it".to_string());
        }
        if let Some(name) = &spec.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        args.push("-e".to_string());
        args.push(format!("{ENV_INSIDE_CONTAINER}=1"));
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            args.push("--mount".to_string());
            args.push(mount_flag(mount));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        debug!("starting container: {}", self.describe(&args));
        if spec.interactive {
            // Interactive sessions own the terminal; nothing to capture.
            let status = self
                .command(&args)
                .status()
                .await
                .map_err(|e| Error::EngineCommandFailed {
                    command: self.describe(&args),
                    reason: e.to_string(),
                })?;
            Ok(status.code().unwrap_or(-1))
        } else {
            self.stream(&args).await
        }
    }

    async fn container_exists(&self, id: &str) -> Result<bool> {
        let args = vec![
            "container".to_string(),
            "inspect".to_string(),
            id.to_string(),
        ];
        let output = self.capture(&args).await?;
        Ok(output.status.success())
    }

    async fn copy_from_image(&self, tag: &str, src: &Path, dst: &Path) -> Result<()> {
        // Images cannot be copied from directly; create a throwaway
        // container for the duration of the copy.
        let create = vec!["create".to_string(), tag.to_string()];
        let output = self.capture(&create).await?;
        if !output.status.success() {
            return Err(Error::EngineCommandFailed {
                command: self.describe(&create),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let result = self.copy_from_container(&id, src, dst, false).await;
        let _ = self.remove_container(&id).await;
        result
    }

    async fn copy_from_container(
        &self,
        id: &str,
        src: &Path,
        dst: &Path,
        remove: bool,
    ) -> Result<()> {
        let args = vec![
            "cp".to_string(),
            format!("{id}:{}", src.display()),
            dst.display().to_string(),
        ];
        let output = self.capture(&args).await?;
        if !output.status.success() {
            return Err(Error::EngineCommandFailed {
                command: self.describe(&args),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if remove {
            self.remove_container(id).await?;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let args = vec!["rm".to_string(), "-f".to_string(), id.to_string()];
        let output = self.capture(&args).await?;
        if !output.status.success() {
            return Err(Error::EngineCommandFailed {
                command: self.describe(&args),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_flags_render_per_type() {
        let bind = MountSpec::bind("/src", "/dst");
        assert_eq!(mount_flag(&bind), "type=bind,source=/src,target=/dst");

        let ro = MountSpec {
            source: "/src".into(),
            target: "/dst".into(),
            mount_type: MountType::ReadonlyBind,
        };
        assert_eq!(
            mount_flag(&ro),
            "type=bind,source=/src,target=/dst,readonly"
        );

        let vol = MountSpec {
            source: "cache".into(),
            target: "/cache".into(),
            mount_type: MountType::Volume,
        };
        assert_eq!(mount_flag(&vol), "type=volume,source=cache,target=/cache");
    }

    #[test]
    fn unknown_engine_is_rejected() {
        assert!(matches!(
            engine_for("lxd"),
            Err(Error::UnknownEngine { .. })
        ));
        assert!(engine_for("docker").is_ok());
    }
}
