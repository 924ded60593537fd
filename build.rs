use std::process::Command;

/// Commit hash for `/api/status`: `GIT_COMMIT_SHA` when CI pins it, else `git rev-parse`.
fn commit_hash() -> String {
    if let Ok(sha) = std::env::var("GIT_COMMIT_SHA") {
        return sha;
    }

    Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    let hash = commit_hash();
    let short = match hash.get(..7) {
        Some(prefix) if hash != "unknown" => prefix.to_string(),
        _ => hash.clone(),
    };

    println!("cargo:rustc-env=GIT_COMMIT_HASH={hash}");
    println!("cargo:rustc-env=GIT_COMMIT_SHORT={short}");
    println!("cargo:rerun-if-env-changed=GIT_COMMIT_SHA");

    if std::path::Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/refs/heads");
    }
}
