//! System diagnostics and dependency checking.
//!
//! Verifies that the external tools, encoders and model the pipeline relies on
//! are present before the service is started.

use crate::config::Config;
use crate::defaults;
use std::path::Path;
use std::process::Command;

/// Result of a dependency check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Tool is installed and working
    Ok,
    /// Tool is not found
    NotFound,
    /// Tool is found but has issues
    Warning(String),
}

/// Check if a tool exists and answers `-version` (ffmpeg style).
fn check_command(command: &Path) -> CheckResult {
    match Command::new(command).arg("-version").output() {
        Ok(output) if output.status.success() => CheckResult::Ok,
        Ok(_) => CheckResult::Warning(format!(
            "'{}' found but -version failed",
            command.display()
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckResult::NotFound,
        Err(e) => CheckResult::Warning(format!("Error checking '{}': {}", command.display(), e)),
    }
}

/// True if `ffmpeg -encoders` output lists `name`.
pub fn encoder_listed(encoders: &str, name: &str) -> bool {
    encoders
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

fn check_encoder(ffmpeg: &Path, name: &str) -> CheckResult {
    match Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
    {
        Ok(output) if output.status.success() => {
            if encoder_listed(&String::from_utf8_lossy(&output.stdout), name) {
                CheckResult::Ok
            } else {
                CheckResult::NotFound
            }
        }
        Ok(_) => CheckResult::Warning("ffmpeg -encoders failed".to_string()),
        Err(e) => CheckResult::Warning(format!("Cannot run ffmpeg: {}", e)),
    }
}

fn print_result(result: &CheckResult, not_found_hint: &str) {
    match result {
        CheckResult::Ok => println!("✓ OK"),
        CheckResult::NotFound => {
            println!("✗ NOT FOUND");
            if !not_found_hint.is_empty() {
                println!("  {}", not_found_hint);
            }
        }
        CheckResult::Warning(msg) => println!("⚠ WARNING: {}", msg),
    }
}

/// Check all dependencies and print a report.
///
/// Returns true when everything the software path needs is present.
pub fn check_dependencies(config: &Config) -> bool {
    println!("Checking system dependencies...\n");

    print!("ffmpeg:          ");
    let ffmpeg = check_command(&config.tools.ffmpeg);
    print_result(
        &ffmpeg,
        "Install: sudo apt install ffmpeg  (Debian/Ubuntu)",
    );

    print!("ffprobe:         ");
    let ffprobe = check_command(&config.tools.ffprobe);
    print_result(&ffprobe, "Usually shipped with the ffmpeg package");

    let mut libx264 = CheckResult::NotFound;
    if ffmpeg == CheckResult::Ok {
        print!("libx264 encoder: ");
        libx264 = check_encoder(&config.tools.ffmpeg, "libx264");
        print_result(&libx264, "Software encoding needs an ffmpeg built with libx264");

        print!("h264_nvenc:      ");
        match check_encoder(&config.tools.ffmpeg, "h264_nvenc") {
            CheckResult::Ok => println!("✓ OK"),
            CheckResult::NotFound => println!("- not available (hardware encode will fall back)"),
            CheckResult::Warning(msg) => println!("⚠ WARNING: {}", msg),
        }
    }

    print!("Detector model:  ");
    let model = if config.detector.model_path.exists() {
        CheckResult::Ok
    } else {
        CheckResult::NotFound
    };
    print_result(
        &model,
        &format!(
            "Expected at {} (set detector.model_path or VEILCAST_MODEL)",
            config.detector.model_path.display()
        ),
    );

    println!();
    println!("Face detection:");
    let compiled = defaults::inference_backend();
    println!("  Compiled backend: {}", compiled);
    check_gpu_nvidia(compiled);

    let ready = ffmpeg == CheckResult::Ok
        && ffprobe == CheckResult::Ok
        && libx264 == CheckResult::Ok
        && model == CheckResult::Ok
        && compiled != "none";

    println!();
    if ready {
        println!("✓ Ready to relay {}", config.stream.input_url);
    } else if compiled == "none" {
        println!("⚠ No face detection backend: rebuild with --features onnx");
    } else {
        println!("⚠ Missing dependencies, the relay will not start streaming.");
    }
    ready
}

/// Check for NVIDIA GPU via `nvidia-smi`.
fn check_gpu_nvidia(compiled: &str) {
    print!("  NVIDIA (CUDA):    ");
    match Command::new("nvidia-smi")
        .arg("--query-gpu=gpu_name")
        .arg("--format=csv,noheader")
        .output()
    {
        Ok(output) if output.status.success() => {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if compiled.contains("CUDA") {
                println!("✓ Active ({})", name);
            } else {
                println!(
                    "✓ {} found → rebuild with: cargo build --release --features cuda",
                    name
                );
            }
        }
        _ => println!("- nvidia-smi not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_equality() {
        assert_eq!(CheckResult::Ok, CheckResult::Ok);
        assert_ne!(CheckResult::Ok, CheckResult::NotFound);
        assert_ne!(
            CheckResult::Warning("a".to_string()),
            CheckResult::Warning("b".to_string())
        );
    }

    #[test]
    fn test_check_command_nonexistent() {
        let result = check_command(Path::new("nonexistent-command-xyz-12345"));
        assert_eq!(result, CheckResult::NotFound);
    }

    #[test]
    fn test_encoder_listed_matches_name_column() {
        let encoders = "\
Encoders:
 V..... = Video
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)
";
        assert!(encoder_listed(encoders, "libx264"));
        assert!(encoder_listed(encoders, "h264_nvenc"));
        assert!(!encoder_listed(encoders, "hevc_nvenc"));
        assert!(!encoder_listed(encoders, "H.264"));
    }

    #[test]
    fn test_check_dependencies_runs_without_panic() {
        let mut config = Config::default();
        config.tools.ffmpeg = "nonexistent-ffmpeg-xyz".into();
        config.tools.ffprobe = "nonexistent-ffprobe-xyz".into();
        assert!(!check_dependencies(&config));
    }

    #[test]
    fn gpu_nvidia_runs_without_panic() {
        check_gpu_nvidia("none");
    }
}
