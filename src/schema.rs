//! # Document Validation
//!
//! Generic validation of the builder's JSON documents against their closed
//! schemas. Validation reports **all** violations for a document rather than
//! stopping at the first, so a user can fix a config file in one pass.
//!
//! Every config-bearing module funnels document loading through here; the
//! container engine is never touched while any known document is invalid.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::mounts::MountType;
use crate::paths::BuilderPaths;
use crate::spec::{read_json, DeveloperConfig, EnvironmentSection, TargetSpec};

/// Top-level fields of a target specification document.
const TARGET_SPEC_FIELDS: [&str; 7] = [
    "sdk_name",
    "sdk_url",
    "sdk_tag",
    "external_toolchain",
    "external_toolchain_URL",
    "build_artifacts_archive_name",
    "environment",
];

/// Required top-level fields of a target specification document.
const TARGET_SPEC_REQUIRED: [&str; 6] = [
    "sdk_name",
    "sdk_url",
    "sdk_tag",
    "external_toolchain",
    "build_artifacts_archive_name",
    "environment",
];

/// Top-level fields of a developer override document. All are required.
const DEVELOPER_FIELDS: [&str; 3] = ["environment", "mounts", "builder_dir"];

/// Validates a target specification document.
///
/// Returns the typed spec on success, or every violation found.
pub fn validate_target_spec(value: &Value) -> std::result::Result<TargetSpec, Vec<String>> {
    let mut violations = check_object(value, &TARGET_SPEC_FIELDS, &TARGET_SPEC_REQUIRED);

    if let Some(obj) = value.as_object() {
        // Conditionally required: a declared external toolchain must say
        // where to fetch it from.
        let external = obj.get("external_toolchain").and_then(Value::as_bool);
        let has_url = obj
            .get("external_toolchain_URL")
            .is_some_and(|v| !v.is_null());
        if external == Some(true) && !has_url {
            violations.push(
                "'external_toolchain_URL' is required when 'external_toolchain' is true"
                    .to_string(),
            );
        }
    }

    if !violations.is_empty() {
        return Err(violations);
    }

    serde_json::from_value(value.clone()).map_err(|e| vec![e.to_string()])
}

/// Validates a developer override document.
pub fn validate_developer_config(value: &Value) -> std::result::Result<DeveloperConfig, Vec<String>> {
    let mut violations = check_object(value, &DEVELOPER_FIELDS, &DEVELOPER_FIELDS);

    if let Some(mounts) = value.get("mounts").and_then(Value::as_object) {
        for (name, entry) in mounts {
            violations.extend(check_mount_entry(name, entry));
        }
    }

    if !violations.is_empty() {
        return Err(violations);
    }

    serde_json::from_value(value.clone()).map_err(|e| vec![e.to_string()])
}

/// Validates the common environment-defaults document.
pub fn validate_env_defaults(value: &Value) -> std::result::Result<EnvironmentSection, Vec<String>> {
    let violations = check_object(value, &["variables"], &["variables"]);
    if !violations.is_empty() {
        return Err(violations);
    }
    serde_json::from_value(value.clone()).map_err(|e| vec![e.to_string()])
}

/// Checks one mount entry for required fields and a known mount type.
fn check_mount_entry(name: &str, entry: &Value) -> Vec<String> {
    let Some(obj) = entry.as_object() else {
        return vec![format!("mount '{name}' is not an object")];
    };

    let mut violations = Vec::new();
    for field in ["source", "target", "type"] {
        if !obj.contains_key(field) {
            violations.push(format!("mount '{name}' is missing required field '{field}'"));
        }
    }
    if let Some(ty) = obj.get("type").and_then(Value::as_str) {
        if MountType::parse(ty).is_none() {
            violations.push(format!("mount '{name}' has unknown mount type '{ty}'"));
        }
    }
    violations
}

/// Shared shape check: the value is an object whose keys are drawn from
/// `allowed` and include all of `required`.
fn check_object(value: &Value, allowed: &[&str], required: &[&str]) -> Vec<String> {
    let Some(obj) = value.as_object() else {
        return vec!["document is not a JSON object".to_string()];
    };

    let mut violations = Vec::new();
    for field in required {
        if !obj.contains_key(*field) {
            violations.push(format!("missing required field '{field}'"));
        }
    }
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            violations.push(format!("unknown field '{key}'"));
        }
    }
    violations
}

/// Outcome of validating every known configuration document.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Document path to its violations. Valid documents map to empty lists.
    pub documents: BTreeMap<String, Vec<String>>,
}

impl ValidationReport {
    /// True when no document has violations.
    pub fn ok(&self) -> bool {
        self.documents.values().all(Vec::is_empty)
    }
}

/// Validates all known configuration documents without building anything:
/// every target spec under the targets root, the common environment
/// defaults, and the developer config when present.
pub fn validate_tree(
    paths: &BuilderPaths,
    developer_config: Option<&std::path::Path>,
) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    for target in paths.known_targets()? {
        let spec_path = paths.target_spec(&target);
        let label = spec_path.display().to_string();
        if !spec_path.is_file() {
            report
                .documents
                .insert(label, vec!["target spec document missing".to_string()]);
            continue;
        }
        let violations = match read_json(&spec_path) {
            Ok(value) => validate_target_spec(&value).map(|_| Vec::new()).unwrap_or_else(|v| v),
            Err(e) => vec![e.to_string()],
        };
        report.documents.insert(label, violations);
    }

    let env_defaults = paths.env_defaults();
    if env_defaults.is_file() {
        let violations = match read_json(&env_defaults) {
            Ok(value) => validate_env_defaults(&value).map(|_| Vec::new()).unwrap_or_else(|v| v),
            Err(e) => vec![e.to_string()],
        };
        report
            .documents
            .insert(env_defaults.display().to_string(), violations);
    }

    if let Some(path) = developer_config {
        let violations = match read_json(path) {
            Ok(value) => validate_developer_config(&value)
                .map(|_| Vec::new())
                .unwrap_or_else(|v| v),
            Err(e) => vec![e.to_string()],
        };
        report.documents.insert(path.display().to_string(), violations);
    }

    Ok(report)
}

/// Converts a report into a hard error when any document is invalid.
pub fn enforce(report: &ValidationReport) -> Result<()> {
    for (document, violations) in &report.documents {
        if !violations.is_empty() {
            return Err(Error::SchemaViolation {
                document: document.clone(),
                violations: violations.clone(),
            });
        }
    }
    Ok(())
}
