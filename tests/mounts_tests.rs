//! Tests for mount resolution.
//!
//! Validates whole-record replacement of target mounts by developer
//! overrides, relative path anchoring, and mount validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fwbuilder::{mounts, MountSpec, MountType};

fn mount(source: &str, target: &str, mount_type: MountType) -> MountSpec {
    MountSpec {
        source: PathBuf::from(source),
        target: PathBuf::from(target),
        mount_type,
    }
}

// =============================================================================
// Replacement Semantics Tests
// =============================================================================

#[test]
fn developer_mount_fully_replaces_target_mount() {
    let mut target = BTreeMap::new();
    target.insert(
        "ubus-source".to_string(),
        mount("/opt/ubus", "/work/ubus", MountType::ReadonlyBind),
    );
    let mut developer = BTreeMap::new();
    developer.insert(
        "ubus-source".to_string(),
        mount("/home/dev/src/ubus", "/work/ubus-dev", MountType::Bind),
    );

    let composed = mounts::compose(&target, Some(&developer), None).unwrap();
    let resolved = &composed["ubus-source"];

    // Whole-record replace: every field comes from the developer entry.
    assert_eq!(resolved.source, Path::new("/home/dev/src/ubus"));
    assert_eq!(resolved.target, Path::new("/work/ubus-dev"));
    assert_eq!(resolved.mount_type, MountType::Bind);
}

#[test]
fn non_overridden_target_mounts_survive() {
    let mut target = BTreeMap::new();
    target.insert(
        "staging".to_string(),
        mount("/proj/staging", "/home/dev/base", MountType::Bind),
    );
    let mut developer = BTreeMap::new();
    developer.insert(
        "ccache".to_string(),
        mount("/home/dev/.ccache", "/ccache", MountType::Volume),
    );

    let composed = mounts::compose(&target, Some(&developer), None).unwrap();
    assert_eq!(composed.len(), 2);
    assert!(composed.contains_key("staging"));
    assert!(composed.contains_key("ccache"));
}

// =============================================================================
// Path Anchoring Tests
// =============================================================================

#[test]
fn relative_container_targets_are_home_anchored() {
    let mut target = BTreeMap::new();
    target.insert(
        "workdir".to_string(),
        mount("/opt/work", "workdir", MountType::Bind),
    );

    let composed = mounts::compose(&target, None, None).unwrap();
    assert_eq!(composed["workdir"].target, Path::new("/home/dev/workdir"));
}

#[test]
fn relative_developer_sources_resolve_against_builder_dir() {
    let mut developer = BTreeMap::new();
    developer.insert(
        "patches".to_string(),
        mount("patches", "/work/patches", MountType::ReadonlyBind),
    );

    let composed = mounts::compose(
        &BTreeMap::new(),
        Some(&developer),
        Some(Path::new("/home/dev/builder")),
    )
    .unwrap();
    assert_eq!(
        composed["patches"].source,
        Path::new("/home/dev/builder/patches")
    );
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn unknown_mount_type_is_rejected_at_parse_time() {
    let result: Result<MountSpec, _> = serde_json::from_str(
        r#"{"source": "/a", "target": "/b", "type": "tmpfs"}"#,
    );
    assert!(result.is_err(), "'tmpfs' is outside the closed enumeration");
}

#[test]
fn known_mount_types_round_trip() {
    for wire in ["bind", "readonly-bind", "volume"] {
        let json = format!(r#"{{"source": "/a", "target": "/b", "type": "{wire}"}}"#);
        let spec: MountSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_value(&spec).unwrap()["type"], wire);
    }
}

#[test]
fn empty_target_is_a_configuration_error() {
    let mut target = BTreeMap::new();
    target.insert("broken".to_string(), mount("/a", "", MountType::Bind));

    let err = mounts::compose(&target, None, None).unwrap_err();
    assert!(err.is_configuration());
}
