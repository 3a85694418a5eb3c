//! Tests for environment composition.
//!
//! Validates tier precedence, the always-injected implicit subset, and the
//! development-mode gate on developer overrides.

use std::collections::BTreeMap;

use fwbuilder::{environment, BuildMode, BuilderEnv, Provenance};

fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Precedence Tests
// =============================================================================

#[test]
fn developer_override_wins_in_development_mode() {
    let target = vars(&[("FOO", "1")]);
    let developer = vars(&[("FOO", "2")]);

    let env = environment::compose(
        &BTreeMap::new(),
        &BuilderEnv::default(),
        &target,
        Some(&developer),
        BuildMode::Development,
    );

    let entry = env.get("FOO").unwrap();
    assert_eq!(entry.value, "2");
    assert_eq!(entry.provenance, Provenance::Developer);
}

#[test]
fn developer_override_is_never_consulted_in_automated_mode() {
    let target = vars(&[("FOO", "1")]);
    let developer = vars(&[("FOO", "2"), ("EXTRA", "3")]);

    let env = environment::compose(
        &BTreeMap::new(),
        &BuilderEnv::default(),
        &target,
        Some(&developer),
        BuildMode::Automated,
    );

    assert_eq!(env.get("FOO").unwrap().value, "1");
    assert!(
        env.get("EXTRA").is_none(),
        "developer-only names must not leak into automated builds"
    );
}

#[test]
fn target_overrides_defaults_and_builder() {
    let defaults = vars(&[("CFLAGS", "-O1"), ("KEEP", "yes")]);
    let target = vars(&[("CFLAGS", "-O2"), ("NUM_BUILD_CORES", "16")]);

    let env = environment::compose(
        &defaults,
        &BuilderEnv::default(),
        &target,
        None,
        BuildMode::Automated,
    );

    assert_eq!(env.get("CFLAGS").unwrap().value, "-O2");
    assert_eq!(env.get("KEEP").unwrap().value, "yes");
    // The target tier may even shadow a builder-implicit name.
    assert_eq!(env.get("NUM_BUILD_CORES").unwrap().value, "16");
}

#[test]
fn builder_implicit_overrides_common_defaults() {
    let defaults = vars(&[("NUM_BUILD_CORES", "2")]);
    let builder = BuilderEnv {
        num_build_cores: 8,
        ..BuilderEnv::default()
    };

    let env = environment::compose(
        &defaults,
        &builder,
        &BTreeMap::new(),
        None,
        BuildMode::Automated,
    );

    assert_eq!(env.get("NUM_BUILD_CORES").unwrap().value, "8");
    assert_eq!(
        env.get("NUM_BUILD_CORES").unwrap().provenance,
        Provenance::Builder
    );
}

// =============================================================================
// Implicit Subset Tests
// =============================================================================

#[test]
fn implicit_subset_is_injected_regardless_of_target() {
    let env = environment::compose(
        &BTreeMap::new(),
        &BuilderEnv::default(),
        &BTreeMap::new(),
        None,
        BuildMode::Automated,
    );

    assert_eq!(env.get("BUILD_ARTIFACTS_OUTDIR").unwrap().value, "/home/dev/out");
    assert_eq!(env.get("PACKAGE_OUTDIR").unwrap().value, "/home/dev/out/package");
    assert_eq!(env.get("CONFIGS_DIR").unwrap().value, "/home/dev/base/files");
    assert_eq!(env.get("NUM_BUILD_CORES").unwrap().value, "1", "core count defaults to 1");
}

#[test]
fn verbose_is_presence_toggled() {
    let quiet = environment::compose(
        &BTreeMap::new(),
        &BuilderEnv::default(),
        &BTreeMap::new(),
        None,
        BuildMode::Automated,
    );
    assert!(quiet.get("VERBOSE").is_none());

    let verbose = environment::compose(
        &BTreeMap::new(),
        &BuilderEnv {
            verbose: true,
            ..BuilderEnv::default()
        },
        &BTreeMap::new(),
        None,
        BuildMode::Automated,
    );
    assert_eq!(verbose.get("VERBOSE").unwrap().value, "Y");
}

// =============================================================================
// Determinism Tests
// =============================================================================

#[test]
fn composition_is_deterministic_and_duplicate_free() {
    let defaults = vars(&[("A", "1"), ("B", "2")]);
    let target = vars(&[("B", "3"), ("C", "4")]);

    let once = environment::compose(
        &defaults,
        &BuilderEnv::default(),
        &target,
        None,
        BuildMode::Automated,
    );
    let twice = environment::compose(
        &defaults,
        &BuilderEnv::default(),
        &target,
        None,
        BuildMode::Automated,
    );

    assert_eq!(once.to_map(), twice.to_map());

    let names: Vec<&str> = once.iter().map(|e| e.name.as_str()).collect();
    let mut deduped = names.clone();
    deduped.dedup();
    assert_eq!(names, deduped, "every name appears at most once");
}
