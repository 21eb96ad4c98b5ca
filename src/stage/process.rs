//! Stages backed by a child process.

use crate::pipeline::error::{StageFailure, StageKind};
use crate::stage::{StageHandle, join_threads};
use crate::sys;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

/// Which standard streams the supervisor talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipes {
    pub stdin: bool,
    pub stdout: bool,
}

impl Pipes {
    pub const OUTPUT: Pipes = Pipes {
        stdin: false,
        stdout: true,
    };
    pub const INPUT: Pipes = Pipes {
        stdin: true,
        stdout: false,
    };
    pub const NONE: Pipes = Pipes {
        stdin: false,
        stdout: false,
    };
}

/// A running external process.
///
/// Its stderr is forwarded line by line into the log under the stage name.
/// The process is killed when the handle is terminated or dropped.
pub struct ChildStage {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_thread: Option<JoinHandle<()>>,
    terminated: bool,
}

impl ChildStage {
    /// Spawn `program` with `args`.
    ///
    /// A missing or non-executable program is [`StageFailure::Unlaunchable`];
    /// any other spawn error is [`StageFailure::StartFailed`].
    pub fn spawn(
        kind: StageKind,
        name: &str,
        program: &Path,
        args: &[String],
        pipes: Pipes,
    ) -> Result<Self, StageFailure> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if pipes.stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if pipes.stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped());
        sys::kill_on_parent_death(&mut command);

        tracing::debug!(stage = name, "Spawning {} {}", program.display(), args.join(" "));

        let mut child = command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => StageFailure::Unlaunchable {
                stage: kind,
                message: format!("{}: {}", program.display(), e),
            },
            _ => StageFailure::StartFailed {
                stage: kind,
                message: format!("failed to execute {}: {}", program.display(), e),
            },
        })?;

        let stderr_thread = child.stderr.take().and_then(|stderr| {
            let stage = name.to_string();
            std::thread::Builder::new()
                .name(format!("{}-stderr", name))
                .spawn(move || forward_stderr(&stage, stderr))
                .map_err(|e| tracing::warn!(stage = name, "Cannot forward stderr: {}", e))
                .ok()
        });

        let mut stage = Self {
            name: name.to_string(),
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            child,
            stderr_thread,
            terminated: false,
        };

        if (pipes.stdin && stage.stdin.is_none()) || (pipes.stdout && stage.stdout.is_none()) {
            stage.terminate();
            return Err(StageFailure::StartFailed {
                stage: kind,
                message: "stage pipes unavailable".to_string(),
            });
        }

        Ok(stage)
    }

    /// OS process id, for logging.
    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

fn forward_stderr(stage: &str, stderr: impl Read) {
    for line in BufReader::new(stderr).lines() {
        match line {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => tracing::warn!(stage, "{}", line.trim_end()),
            Err(_) => break,
        }
    }
}

impl StageHandle for ChildStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn take_output(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdout
            .take()
            .map(|out| Box::new(out) as Box<dyn Read + Send>)
    }

    fn take_input(&mut self) -> Option<Box<dyn Write + Send>> {
        self.stdin
            .take()
            .map(|input| Box::new(input) as Box<dyn Write + Send>)
    }

    fn is_alive(&mut self) -> bool {
        !self.terminated && matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        // Closing our ends first lets a blocked child notice EOF / EPIPE
        self.stdin.take();
        self.stdout.take();

        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(stage = %self.name, "Stage already exited: {}", status);
            }
            _ => {
                if let Err(e) = self.child.kill() {
                    tracing::debug!(stage = %self.name, "Kill failed: {}", e);
                }
                match self.child.wait() {
                    Ok(status) => tracing::debug!(stage = %self.name, "Stage stopped: {}", status),
                    Err(e) => tracing::warn!(stage = %self.name, "Failed to reap stage: {}", e),
                }
            }
        }

        if let Some(handle) = self.stderr_thread.take() {
            join_threads(&self.name, vec![handle], Duration::from_secs(1));
        }
    }
}

impl Drop for ChildStage {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_missing_program_is_unlaunchable() {
        let result = ChildStage::spawn(
            StageKind::Decode,
            "decode",
            &PathBuf::from("/nonexistent/veilcast-ffmpeg"),
            &[],
            Pipes::OUTPUT,
        );
        let Err(failure) = result else {
            panic!("expected spawn failure");
        };
        assert!(matches!(failure, StageFailure::Unlaunchable { .. }));
        assert!(failure.is_session_fatal());
    }

    #[test]
    fn test_output_pipe_yields_child_stdout() {
        let mut stage = ChildStage::spawn(
            StageKind::Decode,
            "decode",
            Path::new("sh"),
            &sh("printf abc"),
            Pipes::OUTPUT,
        )
        .unwrap();

        let mut out = stage.take_output().unwrap();
        let mut buf = String::new();
        out.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "abc");
        assert!(stage.take_output().is_none());
        stage.terminate();
    }

    #[test]
    fn test_terminate_kills_running_child_and_is_idempotent() {
        let mut stage = ChildStage::spawn(
            StageKind::Remux,
            "remux",
            Path::new("sh"),
            &sh("sleep 30"),
            Pipes::NONE,
        )
        .unwrap();

        assert!(stage.is_alive());
        stage.terminate();
        assert!(!stage.is_alive());
        stage.terminate();
    }

    #[test]
    fn test_input_pipe_reaches_child() {
        let mut stage = ChildStage::spawn(
            StageKind::Encode,
            "encode",
            Path::new("sh"),
            &sh("cat > /dev/null"),
            Pipes::INPUT,
        )
        .unwrap();

        let mut input = stage.take_input().unwrap();
        input.write_all(b"frame").unwrap();
        drop(input);
        stage.terminate();
    }
}
