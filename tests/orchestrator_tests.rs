//! Tests for the build orchestrator state machine.
//!
//! Drives the host side against a fake container engine: restricted-build
//! preconditions, image identity computation, cache semantics, and the
//! terminal states.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fwbuilder::{
    BuildMode, BuildOrchestrator, BuildRequest, BuildScope, BuildState, BuilderPaths,
    ContainerEngine, DeveloperConfig, Error, MountSpec, RunSpec, TargetSpec,
};
use tempfile::TempDir;

// =============================================================================
// Fake Engine
// =============================================================================

#[derive(Debug, Default)]
struct EngineState {
    images: Vec<String>,
    build_calls: Vec<(PathBuf, String, BTreeMap<String, String>)>,
    run_calls: Vec<RunSpec>,
    removed: Vec<String>,
}

/// In-memory engine recording every call it sees.
#[derive(Default)]
struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    fn with_image(tag: &str) -> Self {
        let engine = Self::default();
        engine.state.lock().unwrap().images.push(tag.to_string());
        engine
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn image_exists(&self, tag: &str) -> fwbuilder::Result<bool> {
        Ok(self.state().images.iter().any(|t| t == tag))
    }

    async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        build_args: &BTreeMap<String, String>,
        _nocache: bool,
    ) -> fwbuilder::Result<()> {
        let mut state = self.state();
        state
            .build_calls
            .push((context.to_path_buf(), tag.to_string(), build_args.clone()));
        state.images.push(tag.to_string());
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> fwbuilder::Result<i32> {
        self.state().run_calls.push(spec.clone());
        Ok(0)
    }

    async fn container_exists(&self, _id: &str) -> fwbuilder::Result<bool> {
        Ok(true)
    }

    async fn copy_from_image(&self, _tag: &str, src: &Path, dst: &Path) -> fwbuilder::Result<()> {
        fake_copy(src, dst)
    }

    async fn copy_from_container(
        &self,
        id: &str,
        src: &Path,
        dst: &Path,
        remove: bool,
    ) -> fwbuilder::Result<()> {
        if remove {
            self.state().removed.push(id.to_string());
        }
        fake_copy(src, dst)
    }

    async fn remove_container(&self, id: &str) -> fwbuilder::Result<()> {
        self.state().removed.push(id.to_string());
        Ok(())
    }
}

/// Mimics an engine copy of a directory: `dst/<basename of src>/…`.
fn fake_copy(src: &Path, dst: &Path) -> fwbuilder::Result<()> {
    let name = src.file_name().unwrap();
    let out = dst.join(name);
    fs::create_dir_all(&out)?;
    fs::write(out.join("firmware.img"), b"\x7fELF")?;
    Ok(())
}

// =============================================================================
// Fixtures
// =============================================================================

fn project(temp: &TempDir) -> BuilderPaths {
    let paths = BuilderPaths::new(temp.path());

    fs::create_dir_all(paths.common_root().join("files/system_config")).unwrap();
    fs::create_dir_all(paths.common_root().join("scripts/prebuild")).unwrap();
    fs::write(
        paths.common_root().join("files/system_config/banner"),
        "common banner",
    )
    .unwrap();
    fs::write(paths.common_root().join("scripts/prebuild/1.fetch"), "#!/bin/sh\n").unwrap();

    fs::create_dir_all(paths.target_root("rpi4b")).unwrap();
    fs::write(
        paths.target_spec("rpi4b"),
        serde_json::json!({
            "sdk_name": "openwrt",
            "sdk_url": "https://git.openwrt.org/openwrt/openwrt.git",
            "sdk_tag": "v23.05.0",
            "external_toolchain": false,
            "build_artifacts_archive_name": "rpi4b_firmware",
            "environment": { "variables": { "PROFILE": "rpi-4" } }
        })
        .to_string(),
    )
    .unwrap();

    paths
}

fn request(mode: BuildMode, scope: BuildScope) -> BuildRequest {
    BuildRequest {
        target: "rpi4b".to_string(),
        mode,
        scope,
        num_build_cores: 4,
        verbose: false,
        clean: false,
    }
}

fn orchestrator(
    paths: &BuilderPaths,
    req: BuildRequest,
    developer: Option<DeveloperConfig>,
    engine: Arc<FakeEngine>,
) -> BuildOrchestrator {
    let spec = TargetSpec::load(&paths.target_spec("rpi4b")).unwrap();
    BuildOrchestrator::new(paths.clone(), req, spec, developer, engine).unwrap()
}

const CACHED_TAG: &str = "openwrt_v23.05.0:latest_automated_rpi4b";

// =============================================================================
// Precondition Tests
// =============================================================================

#[tokio::test]
async fn restricted_build_without_cached_image_fails_fast() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let engine = Arc::new(FakeEngine::default());

    let mut build = orchestrator(
        &paths,
        request(BuildMode::Automated, BuildScope::Firmware),
        None,
        engine.clone(),
    );

    let err = build.run().await.unwrap_err();
    assert!(matches!(err, Error::ImageNotFound { .. }));
    assert!(err.is_precondition());
    assert_eq!(build.state(), BuildState::Failed);

    let state = engine.state();
    assert!(
        state.build_calls.is_empty(),
        "a missing image must never trigger an implicit full build"
    );
    assert!(state.run_calls.is_empty());
}

#[tokio::test]
async fn package_scope_has_the_same_precondition() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let engine = Arc::new(FakeEngine::default());

    let mut build = orchestrator(
        &paths,
        request(
            BuildMode::Automated,
            BuildScope::Packages(vec!["ubus".to_string()]),
        ),
        None,
        engine.clone(),
    );

    assert!(build.run().await.is_err());
    assert!(engine.state().build_calls.is_empty());
}

// =============================================================================
// Full Build Tests
// =============================================================================

#[tokio::test]
async fn full_build_stages_and_builds_the_identity_tag() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let engine = Arc::new(FakeEngine::default());

    let mut build = orchestrator(
        &paths,
        request(BuildMode::Automated, BuildScope::Full),
        None,
        engine.clone(),
    );
    build.run().await.unwrap();
    assert_eq!(build.state(), BuildState::Done);

    let state = engine.state();
    assert_eq!(state.build_calls.len(), 1);
    let (context, tag, build_args) = &state.build_calls[0];

    assert_eq!(tag, CACHED_TAG);
    assert_eq!(context, &paths.staging_root());
    assert_eq!(build_args["FIRST_BUILD"], "1", "cache miss signals first build");
    assert_eq!(build_args["SDK_DIRNAME"], "openwrt_v23.05.0");

    // The merged tree and the installed documents are in the build context.
    assert!(context.join("files/system_config/banner").exists());
    assert!(context.join("scripts/prebuild/1.fetch").exists());
    assert!(context.join("rpi4b_spec.json").exists());

    // The artifact bundle made it out.
    assert!(paths.out_dir().join("rpi4b_firmware.tar.gz").exists());
}

#[tokio::test]
async fn rebuild_of_a_cached_identity_skips_the_prepare_signal() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let engine = Arc::new(FakeEngine::with_image(CACHED_TAG));

    let mut build = orchestrator(
        &paths,
        request(BuildMode::Automated, BuildScope::Full),
        None,
        engine.clone(),
    );
    build.run().await.unwrap();

    let state = engine.state();
    let (_, _, build_args) = &state.build_calls[0];
    assert_eq!(
        build_args["FIRST_BUILD"], "0",
        "cached identity means the prepare hooks are skipped in the image build"
    );
}

// =============================================================================
// Restricted Build Tests
// =============================================================================

#[tokio::test]
async fn firmware_build_reuses_the_cached_image() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let engine = Arc::new(FakeEngine::with_image(CACHED_TAG));

    let mut build = orchestrator(
        &paths,
        request(BuildMode::Automated, BuildScope::Firmware),
        None,
        engine.clone(),
    );
    build.run().await.unwrap();
    assert_eq!(build.state(), BuildState::Done);

    let state = engine.state();
    assert!(state.build_calls.is_empty(), "cached image is reused, not rebuilt");
    assert_eq!(state.run_calls.len(), 1);

    let run = &state.run_calls[0];
    assert_eq!(run.image, CACHED_TAG);
    assert!(run.command.iter().any(|a| a == "--build-firmware"));
    assert_eq!(run.env["SDK_TOPDIR"], "/home/dev/openwrt_v23.05.0");
    assert_eq!(run.env["PROFILE"], "rpi-4");
    assert!(!run.ephemeral, "artifacts are copied out before removal");

    // The build container was removed after the artifact copy.
    assert_eq!(state.removed.len(), 1);
    assert!(paths.out_dir().join("rpi4b_firmware.tar.gz").exists());
}

#[tokio::test]
async fn package_build_passes_the_package_list() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let engine = Arc::new(FakeEngine::with_image(CACHED_TAG));

    let mut build = orchestrator(
        &paths,
        request(
            BuildMode::Automated,
            BuildScope::Packages(vec!["ubus".to_string(), "uci".to_string()]),
        ),
        None,
        engine.clone(),
    );
    build.run().await.unwrap();

    let state = engine.state();
    let run = &state.run_calls[0];
    assert_eq!(run.env["PACKAGES_TO_BUILD"], "ubus uci");
    assert!(run.command.iter().any(|a| a == "--run-hook"));
    assert!(run.command.iter().any(|a| a == "build_packages"));
}

// =============================================================================
// Development Mode Tests
// =============================================================================

fn developer_config(builder_dir: &Path) -> DeveloperConfig {
    serde_json::from_value(serde_json::json!({
        "environment": { "variables": { "PROFILE": "rpi-4-debug" } },
        "mounts": {
            "staging": {
                "source": "/somewhere/else/staging",
                "target": "/home/dev/base",
                "type": "bind"
            }
        },
        "builder_dir": builder_dir
    }))
    .unwrap()
}

#[tokio::test]
async fn developer_config_is_rejected_outside_development_mode() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let spec = TargetSpec::load(&paths.target_spec("rpi4b")).unwrap();

    let err = BuildOrchestrator::new(
        paths.clone(),
        request(BuildMode::Automated, BuildScope::Full),
        spec,
        Some(developer_config(temp.path())),
        Arc::new(FakeEngine::default()),
    )
    .map(|_| ())
    .unwrap_err();

    assert!(matches!(err, Error::DeveloperConfigNotAllowed { .. }));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn dev_full_build_takes_the_firmware_path_with_host_mounts() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let engine = Arc::new(FakeEngine::with_image(
        "openwrt_v23.05.0:latest_dev_rpi4b",
    ));

    let mut build = orchestrator(
        &paths,
        request(BuildMode::Development, BuildScope::Full),
        None,
        engine.clone(),
    );
    build.run().await.unwrap();
    assert_eq!(build.state(), BuildState::Done);

    let state = engine.state();
    assert!(state.build_calls.is_empty(), "dev builds reuse the dev image");
    let run = &state.run_calls[0];
    assert!(run.command.iter().any(|a| a == "--build-firmware"));

    // Implicit development binds: sdk sources and staging tree.
    let targets: Vec<&Path> = run.mounts.iter().map(|m| m.target.as_path()).collect();
    assert!(targets.contains(&Path::new("/home/dev/openwrt_v23.05.0")));
    assert!(targets.contains(&Path::new("/home/dev/base")));
}

#[tokio::test]
async fn developer_mounts_replace_implicit_mounts_wholesale() {
    let temp = TempDir::new().unwrap();
    let paths = project(&temp);
    let engine = Arc::new(FakeEngine::with_image(
        "openwrt_v23.05.0:latest_dev_rpi4b",
    ));

    let mut build = orchestrator(
        &paths,
        request(BuildMode::Development, BuildScope::Firmware),
        Some(developer_config(temp.path())),
        engine.clone(),
    );
    build.run().await.unwrap();

    let state = engine.state();
    let run = &state.run_calls[0];

    let staging: Vec<&MountSpec> = run
        .mounts
        .iter()
        .filter(|m| m.target == Path::new("/home/dev/base"))
        .collect();
    assert_eq!(staging.len(), 1);
    assert_eq!(
        staging[0].source,
        Path::new("/somewhere/else/staging"),
        "developer entry replaces the implicit staging mount"
    );

    // Developer environment overrides the target entry in dev mode.
    assert_eq!(run.env["PROFILE"], "rpi-4-debug");
}
