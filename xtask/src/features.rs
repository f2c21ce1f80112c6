use std::process::Command;

use anyhow::{Context, Result};

/// Package and feature set pairs that must build on their own.
const FEATURE_MATRIX: &[(&str, &[&str])] = &[
    ("offsync-domain", &[]),
    ("offsync-core", &[]),
    ("offsync-core", &["test-utils"]),
    ("offsync-infra", &[]),
];

/// Check each package in isolation so feature unification across the
/// workspace cannot hide a missing `cfg` gate.
pub fn check_feature_matrix() -> Result<()> {
    println!("Checking {} package/feature combinations...", FEATURE_MATRIX.len());

    for (index, (package, features)) in FEATURE_MATRIX.iter().enumerate() {
        let label = if features.is_empty() {
            format!("{package} (default)")
        } else {
            format!("{package} --features {}", features.join(","))
        };
        println!("\n[{}/{}] cargo check -p {label}", index + 1, FEATURE_MATRIX.len());

        let mut command = Command::new("cargo");
        command.args(["check", "--all-targets", "-p", package]);
        if !features.is_empty() {
            command.arg("--features").arg(features.join(","));
        }

        let status =
            command.status().with_context(|| format!("Failed to run cargo check for {label}"))?;
        if !status.success() {
            anyhow::bail!("{label} failed to compile");
        }
    }

    println!("\n✓ All feature combinations compile");
    Ok(())
}
