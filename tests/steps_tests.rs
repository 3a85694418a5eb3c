//! Tests for step discovery and scheduling.
//!
//! Validates numeric ordering, namespace isolation, fail-fast execution,
//! and context routing.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use fwbuilder::{steps, Error, ExecutionContext, HookScheduler, StepRegistry};
use tempfile::TempDir;

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[test]
fn steps_sort_numerically_not_lexically() {
    let temp = TempDir::new().unwrap();
    let namespace = temp.path().join("prebuild");
    fs::create_dir_all(&namespace).unwrap();
    for name in ["100.c", "2.a", "10.b"] {
        fs::write(namespace.join(name), "").unwrap();
    }

    let discovered = steps::discover(&namespace, "prebuild").unwrap();
    let order: Vec<String> = discovered.iter().map(|s| s.file_name()).collect();

    assert_eq!(order, ["2.a", "10.b", "100.c"], "numeric, never lexicographic");
}

#[test]
fn nonconforming_names_are_configuration_errors() {
    let temp = TempDir::new().unwrap();
    let namespace = temp.path().join("build");
    fs::create_dir_all(&namespace).unwrap();
    fs::write(namespace.join("setup.sh"), "").unwrap();

    let err = steps::discover(&namespace, "build").unwrap_err();
    assert!(matches!(err, Error::InvalidStepName { .. }));
    assert!(err.is_configuration());
}

#[test]
fn missing_namespace_discovers_empty() {
    let temp = TempDir::new().unwrap();
    let discovered = steps::discover(&temp.path().join("absent"), "postbuild").unwrap();
    assert!(discovered.is_empty());
}

#[test]
fn registry_keeps_namespaces_isolated() {
    let temp = TempDir::new().unwrap();
    let scripts = temp.path().join("scripts");
    fs::create_dir_all(scripts.join("prebuild")).unwrap();
    fs::create_dir_all(scripts.join("build")).unwrap();
    fs::write(scripts.join("prebuild/100.x"), "").unwrap();
    fs::write(scripts.join("build/100.x"), "").unwrap();

    let registry = StepRegistry::discover(temp.path()).unwrap();

    // A prefix collision across namespaces is not a conflict.
    assert_eq!(registry.namespace("prebuild").len(), 1);
    assert_eq!(registry.namespace("build").len(), 1);
    assert_eq!(registry.namespace("prebuild")[0].namespace, "prebuild");
    assert_eq!(registry.namespace("build")[0].namespace, "build");
}

// =============================================================================
// Execution Tests
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn steps_run_in_order_with_the_composed_environment() {
    let temp = TempDir::new().unwrap();
    let namespace = temp.path().join("prebuild");
    let log = temp.path().join("order.log");

    for (name, tag) in [("3.third", "third"), ("1.first", "first"), ("2.second", "second")] {
        write_script(
            &namespace,
            name,
            &format!("echo {tag}-$MARKER >> {}", log.display()),
        );
    }

    let discovered = steps::discover(&namespace, "prebuild").unwrap();
    let mut env = BTreeMap::new();
    env.insert("MARKER".to_string(), "ok".to_string());

    HookScheduler::new(ExecutionContext::Container)
        .run(&discovered, &env)
        .await
        .unwrap();

    let ran = fs::read_to_string(&log).unwrap();
    assert_eq!(ran, "first-ok\nsecond-ok\nthird-ok\n");
}

#[cfg(unix)]
#[tokio::test]
async fn failing_step_aborts_the_namespace() {
    let temp = TempDir::new().unwrap();
    let namespace = temp.path().join("build");
    let marker = temp.path().join("late.ran");

    write_script(&namespace, "100.a", "exit 7");
    write_script(&namespace, "200.b", &format!("touch {}", marker.display()));

    let discovered = steps::discover(&namespace, "build").unwrap();
    let err = HookScheduler::new(ExecutionContext::Container)
        .run(&discovered, &BTreeMap::new())
        .await
        .unwrap_err();

    match err {
        Error::StepFailed {
            namespace,
            step,
            order,
            code,
        } => {
            assert_eq!(namespace, "build");
            assert_eq!(step, "a");
            assert_eq!(order, 100);
            assert_eq!(code, 7);
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
    assert!(!marker.exists(), "step 200.b must never run after 100.a fails");
}

#[cfg(unix)]
#[tokio::test]
async fn steps_for_the_other_side_are_routed_not_run() {
    let temp = TempDir::new().unwrap();
    let namespace = temp.path().join("prebuild");
    let marker = temp.path().join("container.ran");

    write_script(&namespace, "1.touch", &format!("touch {}", marker.display()));
    let mut discovered = steps::discover(&namespace, "prebuild").unwrap();
    assert_eq!(discovered[0].context, ExecutionContext::Container);

    // A host-side scheduler routes container steps to the other side.
    HookScheduler::new(ExecutionContext::Host)
        .run(&discovered, &BTreeMap::new())
        .await
        .unwrap();
    assert!(!marker.exists());

    // Flipping the descriptor's context makes the host scheduler run it.
    discovered[0].context = ExecutionContext::Host;
    HookScheduler::new(ExecutionContext::Host)
        .run(&discovered, &BTreeMap::new())
        .await
        .unwrap();
    assert!(marker.exists());
}
