//! Stamps the binary with a version and short git SHA.
//!
//! CI can override both with MCH_VERSION / MCH_GIT_SHA.

use std::process::Command;

fn main() {
    let version = std::env::var("MCH_VERSION")
        .or_else(|_| std::env::var("CARGO_PKG_VERSION"))
        .unwrap_or_else(|_| "unknown".into());
    println!("cargo:rustc-env=MCH_VERSION={}", version);

    let git_sha = std::env::var("MCH_GIT_SHA").unwrap_or_else(|_| short_sha());
    println!("cargo:rustc-env=MCH_GIT_SHA={}", git_sha);

    println!("cargo:rerun-if-env-changed=MCH_VERSION");
    println!("cargo:rerun-if-env-changed=MCH_GIT_SHA");
}

fn short_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}
