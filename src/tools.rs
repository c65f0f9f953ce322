//! Running external command-line tools.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::AppError;
use crate::workspace::RunLog;

const STDERR_TAIL_LINES: usize = 20;

/// Run `program args...` to completion.
///
/// Stdout lines go to `tracing`; lines that look like progress (`NN%`) are
/// also written to the run log. A non-zero exit status is reported together
/// with the tail of stderr.
pub fn run_tool(
    program: &Path,
    args: &[String],
    envs: &[(&str, &str)],
    log: &mut RunLog,
) -> Result<(), AppError> {
    let name = program.display().to_string();
    tracing::info!(program = %name, args = %args.join(" "), "running external tool");

    let mut child = Command::new(program)
        .args(args)
        .envs(envs.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AppError::tool(format!("Failed to start '{name}': {e}")))?;

    // Drain stderr on its own thread so a chatty tool cannot block on a full pipe.
    let stderr = child.stderr.take();
    let stderr_reader = std::thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = stderr {
            if let Err(e) = pipe.read_to_end(&mut bytes) {
                tracing::warn!(error = %e, "stderr of external tool truncated");
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    });

    // Tool output is not guaranteed to be UTF-8; decode lossily and keep going
    // so the child is always reaped.
    if let Some(stdout) = child.stdout.take() {
        for chunk in BufReader::new(stdout).split(b'\n') {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(program = %name, error = %e, "stopped reading tool output");
                    break;
                }
            };
            let line = String::from_utf8_lossy(&chunk);
            tracing::debug!(program = %name, "{line}");
            let trimmed = line.trim();
            if trimmed.ends_with('%') && trimmed.len() <= 4 {
                log.write(&format!("{trimmed} "));
            }
        }
    }

    let status = child.wait();
    let stderr_text = stderr_reader.join().unwrap_or_default();
    let status = status.map_err(|e| AppError::tool(format!("Failed to wait for '{name}': {e}")))?;

    if !status.success() {
        let lines: Vec<&str> = stderr_text.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        return Err(AppError::tool(format!("'{name}' failed ({status}):\n{tail}")));
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_tool_error() {
        let mut log = RunLog::capture();
        let err = run_tool(Path::new("/nonexistent/asl-tool"), &[], &[], &mut log).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn non_zero_exit_reports_stderr() {
        let mut log = RunLog::capture();
        let args = vec!["-c".to_string(), "echo 50% ; echo boom >&2; exit 3".to_string()];
        let err = run_tool(Path::new("/bin/sh"), &args, &[], &mut log).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("boom"));
        assert_eq!(log.captured(), "50% ");
    }

    #[test]
    fn non_utf8_stdout_does_not_fail_a_successful_tool() {
        let mut log = RunLog::capture();
        let args = vec!["-c".to_string(), r"printf 'T1\351 ok\n'; echo 100%; exit 0".to_string()];
        run_tool(Path::new("/bin/sh"), &args, &[], &mut log).unwrap();
        assert_eq!(log.captured(), "100% ");
    }

    #[test]
    fn non_utf8_stderr_is_kept_in_the_error() {
        let mut log = RunLog::capture();
        let args = vec!["-c".to_string(), r"printf 'bad value \351 for --t1\n' >&2; exit 1".to_string()];
        let err = run_tool(Path::new("/bin/sh"), &args, &[], &mut log).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("bad value"));
        assert!(err.to_string().contains("for --t1"));
    }
}
