// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    // Re-run build script if git HEAD changes
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=ENVLIGHT_VERSION");

    // Packaged builds pin the version explicitly
    let version = if let Ok(v) = std::env::var("ENVLIGHT_VERSION") {
        v
    } else {
        get_git_version()
    };

    println!("cargo::rustc-env=ENVLIGHT_BUILD_VERSION={}", version);
}

fn get_git_version() -> String {
    let pkg_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());

    match get_commit_hash() {
        // "0.1.0" becomes "0.1.0-abcdef1"
        Some(hash) => format!("{}-{}", pkg_version, hash),
        None => pkg_version,
    }
}

fn get_commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
