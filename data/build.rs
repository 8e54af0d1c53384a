use std::path::Path;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|output| output.trim().to_string())
}

fn main() {
    let Some(hash) = git(&["describe", "--always", "--dirty", "--exclude='*'"]) else {
        return;
    };

    println!("cargo:rustc-env=GIT_HASH={hash}");

    let Some(git_dir) = git(&["rev-parse", "--git-dir"]) else {
        return;
    };

    // Rebuild when HEAD moves to another branch or the branch advances
    let head = Path::new(&git_dir).join("HEAD");
    if head.exists() {
        println!("cargo:rerun-if-changed={}", head.display());
    }

    if let Some(head_ref) = git(&["symbolic-ref", "HEAD"]) {
        let head_ref = Path::new(&git_dir).join(head_ref);
        if head_ref.exists() {
            println!("cargo:rerun-if-changed={}", head_ref.display());
        }
    }
}
