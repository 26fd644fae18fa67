use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use keeper_core::engine::{BackupEngine, EngineStatus, ProgressFn};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Status reported when the engine program could not be run at all.
pub const ENGINE_FAILED: EngineStatus = -1;

/// Prefix of a progress line on the engine's stdout.
const PROGRESS_PREFIX: &str = "PROGRESS";

/// [`BackupEngine`] backed by an external program.
///
/// Every operation runs `<program> <args..> <operation> <operands..>` and
/// blocks until it exits. Stdout lines of the form `PROGRESS <pct> <message>`
/// are forwarded as progress; the exit code is the status; stderr becomes the
/// last error message.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    last_error: Mutex<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            last_error: Mutex::new(String::new()),
        }
    }

    fn invoke(&self, operation: &str, operands: Vec<OsString>, progress: ProgressFn<'_>) -> EngineStatus {
        debug!(program = %self.program, %operation, "invoking engine");
        match self.spawn(operation, &operands, progress) {
            Ok((status, stderr)) => {
                if status != 0 {
                    let message = if stderr.trim().is_empty() {
                        format!("{operation} exited with status {status}")
                    } else {
                        stderr.trim().to_string()
                    };
                    warn!(%operation, status, "engine operation failed: {message}");
                    self.set_last_error(message);
                }
                status
            }
            Err(e) => {
                warn!(%operation, "engine operation failed: {e}");
                self.set_last_error(e.to_string());
                ENGINE_FAILED
            }
        }
    }

    fn spawn(
        &self,
        operation: &str,
        operands: &[OsString],
        progress: ProgressFn<'_>,
    ) -> Result<(EngineStatus, String)> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(operation)
            .args(operands)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Drain stderr on its own thread so a chatty engine cannot block on a
        // full pipe while stdout is being read.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let forwarded = match child.stdout.take() {
            Some(stdout) => forward_progress(stdout, operation, progress),
            None => Ok(()),
        };
        if forwarded.is_err() {
            let _ = child.kill();
        }

        // Reap the child on every path.
        let status = child.wait();
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        forwarded?;
        let status = status?;

        let code = status.code().ok_or(EngineError::Killed)?;
        Ok((code, stderr))
    }

    fn set_last_error(&self, message: String) {
        *self.last_error.lock().expect("engine error slot poisoned") = message;
    }
}

/// Read engine stdout line by line. Bytes that are not UTF-8 are replaced
/// rather than failing the run.
fn forward_progress(stdout: impl Read, operation: &str, progress: ProgressFn<'_>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\r', '\n']);
        match parse_progress(line) {
            Some((percent, message)) => progress(percent, message),
            None => debug!(%operation, "engine: {line}"),
        }
    }
}

/// Parse `PROGRESS <pct> <message>`. The message may be empty.
pub fn parse_progress(line: &str) -> Option<(i32, &str)> {
    let rest = line.strip_prefix(PROGRESS_PREFIX)?;
    let rest = rest.strip_prefix(' ')?.trim_start();
    let (pct, message) = match rest.split_once(' ') {
        Some((pct, message)) => (pct, message.trim()),
        None => (rest.trim_end(), ""),
    };
    let percent: i32 = pct.parse().ok()?;
    Some((percent.clamp(0, 100), message))
}

fn path_arg(path: &Path) -> OsString {
    path.as_os_str().to_os_string()
}

impl BackupEngine for CommandEngine {
    fn backup_files(&self, source: &str, destination: &Path, progress: ProgressFn<'_>) -> EngineStatus {
        self.invoke(
            "backup-files",
            vec![source.into(), path_arg(destination)],
            progress,
        )
    }

    fn backup_volume(
        &self,
        volume: &str,
        destination: &Path,
        include_system_state: bool,
        compress: bool,
        progress: ProgressFn<'_>,
    ) -> EngineStatus {
        let mut operands = vec![volume.into(), path_arg(destination)];
        if include_system_state {
            operands.push("--system-state".into());
        }
        if compress {
            operands.push("--compress".into());
        }
        self.invoke("backup-volume", operands, progress)
    }

    fn backup_hyperv_vm(&self, vm_name: &str, destination: &Path, progress: ProgressFn<'_>) -> EngineStatus {
        self.invoke(
            "backup-hyperv",
            vec![vm_name.into(), path_arg(destination)],
            progress,
        )
    }

    fn create_incremental_backup(
        &self,
        source: &str,
        destination: &Path,
        base: Option<&Path>,
        progress: ProgressFn<'_>,
    ) -> EngineStatus {
        let mut operands = vec![source.into(), path_arg(destination)];
        if let Some(base) = base {
            operands.push("--base".into());
            operands.push(path_arg(base));
        }
        self.invoke("incremental", operands, progress)
    }

    fn create_differential_backup(
        &self,
        source: &str,
        destination: &Path,
        full: Option<&Path>,
        progress: ProgressFn<'_>,
    ) -> EngineStatus {
        let mut operands = vec![source.into(), path_arg(destination)];
        if let Some(full) = full {
            operands.push("--base".into());
            operands.push(path_arg(full));
        }
        self.invoke("differential", operands, progress)
    }

    fn verify_backup(&self, path: &Path, progress: ProgressFn<'_>) -> EngineStatus {
        self.invoke("verify", vec![path_arg(path)], progress)
    }

    fn last_error_message(&self) -> String {
        self.last_error
            .lock()
            .expect("engine error slot poisoned")
            .clone()
    }
}
