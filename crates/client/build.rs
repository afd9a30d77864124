use std::process::Command;

fn main() {
    let pkg_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());

    // Short commit hash, when building from a checkout
    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty());

    let version = match commit {
        Some(commit) => format!("{}+{}", pkg_version, commit),
        None => pkg_version,
    };

    println!("cargo:rustc-env=FAMCARE_VERSION={}", version);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
