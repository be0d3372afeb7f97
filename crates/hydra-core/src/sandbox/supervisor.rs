//! Session lifecycle over the container runtime CLI.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{SandboxError, SandboxResult};
use super::profile::{run_args, SandboxOverrides, SandboxProfile};

/// Output cap per stream: 10 MiB.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Exit code reported for a wall-time cap hit.
const TIMEOUT_EXIT_CODE: i32 = 124;

const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const DESTROY_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one command execution inside a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Truncate captured output to the stream cap.
fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.into_owned();
    }
    let mut cut = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[output truncated]", &text[..cut])
}

async fn docker_output(args: &[String], timeout: Duration) -> SandboxResult<std::process::Output> {
    let child = Command::new("docker")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SandboxError::Runtime(format!("failed to spawn docker: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(SandboxError::Runtime(format!("docker wait failed: {e}"))),
        Err(_) => Err(SandboxError::CommandTimeout {
            limit_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Supervisor over the container runtime. Exposes boolean probes plus
/// session creation.
#[derive(Debug, Clone, Default)]
pub struct SandboxSupervisor;

impl SandboxSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Whether the container runtime responds at all. Never raises.
    pub async fn is_runtime_available(&self) -> bool {
        Command::new("docker")
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Whether the profile's image exists locally. Never raises.
    pub async fn is_image_built(&self, profile: SandboxProfile) -> bool {
        Command::new("docker")
            .args(["image", "inspect", profile.image()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Create an ephemeral hardened session.
    pub async fn create(
        &self,
        profile: SandboxProfile,
        overrides: Option<SandboxOverrides>,
    ) -> SandboxResult<SandboxSession> {
        if !self.is_runtime_available().await {
            return Err(SandboxError::RuntimeUnavailable);
        }
        if !self.is_image_built(profile).await {
            return Err(SandboxError::ImageMissing {
                image: profile.image().to_string(),
            });
        }

        let name = format!("hydra-sbx-{}", Uuid::new_v4().simple());
        let args = run_args(profile, &overrides.unwrap_or_default(), &name);
        let output = docker_output(&args, CREATE_TIMEOUT).await?;

        if !output.status.success() {
            return Err(SandboxError::Runtime(format!(
                "container create failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(container = %name, profile = ?profile, "sandbox session created");
        Ok(SandboxSession {
            container: name,
            destroyed: AtomicBool::new(false),
        })
    }
}

/// An ephemeral container-isolated execution context.
///
/// `destroy` is idempotent and also runs from `Drop`, so a session cannot
/// leak even when its owning task unwinds.
pub struct SandboxSession {
    container: String,
    destroyed: AtomicBool,
}

impl SandboxSession {
    pub fn container_name(&self) -> &str {
        &self.container
    }

    /// Run `argv` inside the session under a wall-time cap. A cap hit yields
    /// `exit_code = 124` and `timed_out = true`, never a success.
    pub async fn exec(
        &self,
        argv: &[&str],
        timeout: Option<Duration>,
    ) -> SandboxResult<ExecResult> {
        let cap = timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT);
        let start = Instant::now();

        let mut args = vec!["exec".to_string(), self.container.clone()];
        args.extend(argv.iter().map(|s| s.to_string()));

        let child = Command::new("docker")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Runtime(format!("failed to spawn docker exec: {e}")))?;

        // On a cap hit the output future is dropped, which kills the client
        // process; the container itself is torn down by destroy.
        match tokio::time::timeout(cap, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ExecResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: truncate_output(&output.stdout),
                stderr: truncate_output(&output.stderr),
                timed_out: false,
                duration_ms: start.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => Err(SandboxError::Runtime(format!("docker exec failed: {e}"))),
            Err(_) => Ok(ExecResult {
                exit_code: TIMEOUT_EXIT_CODE,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
                duration_ms: start.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Write `bytes` to `path` inside the session.
    pub async fn write_file(&self, path: &str, bytes: &[u8]) -> SandboxResult<()> {
        let mut child = Command::new("docker")
            .arg("exec")
            .arg("-i")
            .arg(&self.container)
            .arg("sh")
            .arg("-c")
            .arg(format!("cat > {path}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::Runtime(format!("failed to spawn docker exec: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(bytes).await?;
            drop(stdin);
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SandboxError::Runtime(format!("docker exec failed: {e}")))?;
        if !output.status.success() {
            return Err(SandboxError::Runtime(format!(
                "write_file failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Copy a host file into the session.
    pub async fn copy_in(&self, host: &std::path::Path, guest: &str) -> SandboxResult<()> {
        let output = docker_output(
            &[
                "cp".to_string(),
                host.to_string_lossy().into_owned(),
                format!("{}:{guest}", self.container),
            ],
            DEFAULT_EXEC_TIMEOUT,
        )
        .await?;
        if !output.status.success() {
            return Err(SandboxError::Runtime(format!(
                "copy_in failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Tear the container down. Idempotent; a missing container counts as
    /// already destroyed.
    pub async fn destroy(&self) -> SandboxResult<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = docker_output(
            &[
                "rm".to_string(),
                "-f".to_string(),
                self.container.clone(),
            ],
            DESTROY_TIMEOUT,
        )
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(container = %self.container, error = %e, "sandbox destroy degraded");
                Ok(())
            }
        }
    }
}

impl Drop for SandboxSession {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            // Synchronous best-effort teardown for abandoned sessions.
            let _ = std::process::Command::new("docker")
                .arg("rm")
                .arg("-f")
                .arg(&self.container)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}
