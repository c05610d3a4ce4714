//! Command Invocation
//!
//! Runs one rendered command of a process:
//! - Output directory creation
//! - Script generation (`set -e`, so the first failing line fails the task)
//! - Execution with the configured shell in the working directory
//! - Atomic finalization of `.tmp` outputs

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, error, warn};
use once_cell::sync::Lazy;

use crate::error::FlowError;

/// Shell used to run command scripts (`SCIFLOW_SHELL`, default `bash`).
pub static SHELL: Lazy<String> =
    Lazy::new(|| std::env::var("SCIFLOW_SHELL").unwrap_or_else(|_| "bash".to_string()));

/// Suffix of in-progress outputs.
pub const TMP_SUFFIX: &str = ".tmp";

static SCRIPT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// The in-progress path an output is written to before finalization.
pub fn temp_path(path: &str) -> String {
    format!("{}{}", path, TMP_SUFFIX)
}

/// Resolves a path against the working directory.
pub fn in_working_dir(path: &str, working_dir: Option<&Path>) -> PathBuf {
    match working_dir {
        Some(dir) => dir.join(path),
        None => PathBuf::from(path),
    }
}

/// Runs a rendered command for `process`.
///
/// Fails with [`FlowError::Execution`] naming the process and the command
/// when the shell exits non-zero.
pub fn run_command(process: &str, command: &str, working_dir: Option<&Path>) -> Result<(), FlowError> {
    debug!("[{}] {}", process, command);

    let script_path = create_execution_script(process, command)?;
    let result = execute_script(&script_path, working_dir);

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("Failed to clean up script {}: {}", script_path.display(), e);
    }

    let output = result.map_err(|e| FlowError::Execution {
        process: process.to_string(),
        command: command.to_string(),
        reason: format!("could not start {}: {}", SHELL.as_str(), e),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        if !stdout.trim().is_empty() {
            debug!("[{}] output:\n{}", process, stdout.trim_end());
        }
        return Ok(());
    }

    let reason = match output.status.code() {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    };
    error!("Process '{}' failed with {}", process, reason);

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        error!("stderr:\n{}", stderr.trim_end());
    }
    if !stdout.trim().is_empty() {
        debug!("stdout:\n{}", stdout.trim_end());
    }

    Err(FlowError::Execution {
        process: process.to_string(),
        command: command.to_string(),
        reason,
    })
}

/// Writes the command to a temporary script.
fn create_execution_script(process: &str, command: &str) -> Result<PathBuf, FlowError> {
    let script_dir = std::env::temp_dir().join("sciflow_scripts");
    fs::create_dir_all(&script_dir)?;

    // Invocations of one process may run concurrently
    let serial = SCRIPT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let stem: String = process
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let script_path = script_dir.join(format!(
        "{}_{}_{}.sh",
        stem,
        std::process::id(),
        serial
    ));

    let mut file = File::create(&script_path)?;
    writeln!(file, "#!/usr/bin/env bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

fn execute_script(script_path: &Path, working_dir: Option<&Path>) -> std::io::Result<Output> {
    let mut cmd = Command::new(SHELL.as_str());
    cmd.arg(script_path);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    cmd.output()
}

/// Creates the parent directory of every output path.
pub fn ensure_output_directories(paths: &[String], working_dir: Option<&Path>) -> Result<(), FlowError> {
    for path in paths.iter().filter(|p| !p.is_empty()) {
        let output_path = in_working_dir(path, working_dir);
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {}", parent.display());
            }
        }
    }
    Ok(())
}

/// Renames every existing `<path>.tmp` to `<path>`.
///
/// Outputs the command wrote under their final name are left alone.
pub fn finalize_outputs(paths: &[String], working_dir: Option<&Path>) -> Result<(), FlowError> {
    for path in paths {
        let tmp = in_working_dir(&temp_path(path), working_dir);
        if tmp.exists() {
            let target = in_working_dir(path, working_dir);
            fs::rename(&tmp, &target)?;
            debug!("Finalized {}", target.display());
        }
    }
    Ok(())
}

/// True if there is at least one path and every path exists.
pub fn outputs_exist(paths: &[String], working_dir: Option<&Path>) -> bool {
    !paths.is_empty() && paths.iter().all(|p| in_working_dir(p, working_dir).exists())
}

/// Deletes files (or directories), returning how many were removed.
pub fn remove_files(paths: &[String], working_dir: Option<&Path>) -> usize {
    let mut removed = 0;
    for path in paths {
        let target = in_working_dir(path, working_dir);
        let result = if target.is_dir() {
            fs::remove_dir_all(&target)
        } else if target.exists() {
            fs::remove_file(&target)
        } else {
            continue;
        };
        match result {
            Ok(()) => {
                debug!("Removed temporary output {}", target.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", target.display(), e),
        }
    }
    removed
}
