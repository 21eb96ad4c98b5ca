//! Build script: embeds the git hash and warns about CUDA builds on hosts
//! without an NVIDIA driver.

use std::process::Command;

fn main() {
    // Embed git short hash for version string
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if std::env::var_os("CARGO_FEATURE_CUDA").is_some() {
        check_nvidia_driver();
    }
}

fn check_nvidia_driver() {
    match Command::new("nvidia-smi").arg("-L").output() {
        Ok(out) if out.status.success() => {}
        _ => {
            println!("cargo::warning=Building with `cuda` but nvidia-smi is not available.");
            println!(
                "cargo::warning=Face detection will fall back to the CPU provider at runtime."
            );
        }
    }
}
