//! Launching the external `ph2dt` / `hypoDD` programs.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct EngineCommand {
    pub binary: PathBuf,
    pub control_file: PathBuf,
    pub work_dir: PathBuf,
}

impl EngineCommand {
    pub fn new(
        binary: impl Into<PathBuf>,
        control_file: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            control_file: control_file.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Runs the program to completion inside `work_dir`. A non-zero exit is
    /// fatal for the run; the captured stderr is carried in the error.
    pub fn run(&self) -> Result<String> {
        tracing::info!(
            "Running {} {} in {}",
            self.binary.display(),
            self.control_file.display(),
            self.work_dir.display()
        );
        let output = Command::new(&self.binary)
            .arg(&self.control_file)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|source| Error::EngineLaunch {
                program: self.binary.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(Error::EngineFailed {
                program: self.binary.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!("{}: {}", program_name(&self.binary), line);
        }
        Ok(stdout)
    }
}

fn program_name(binary: &Path) -> String {
    binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = EngineCommand::new(
            dir.path().join("no-such-program"),
            "hypoDD.inp",
            dir.path(),
        );
        assert!(matches!(cmd.run(), Err(Error::EngineLaunch { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = EngineCommand::new("false", "ph2dt.inp", dir.path());
        assert!(matches!(cmd.run(), Err(Error::EngineFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_the_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.inp"), "").unwrap();
        let cmd = EngineCommand::new("ls", "marker.inp", dir.path());
        let stdout = cmd.run().unwrap();
        assert_eq!(stdout.trim(), "marker.inp");
    }
}
