use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Exposes the release version to the CLI as `DBAPI_VERSION`.
///
/// Tagged builds use the tag without its `v` prefix. Dirty trees and builds
/// outside a checkout get a build-time suffix so they never look like a release.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    println!("cargo:rustc-env=DBAPI_VERSION={}", describe_version());
}

fn describe_version() -> String {
    let described = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().trim_start_matches('v').to_string());

    match described {
        Some(tag) if !tag.is_empty() && !tag.ends_with("-dirty") => tag,
        Some(tag) if !tag.is_empty() => format!("{}.{}", tag, build_time()),
        _ => format!("0.0.0-dev.{}", build_time()),
    }
}

fn build_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
