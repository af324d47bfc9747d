//! External tool configuration and invocation.
//!
//! Symbolication shells out to three tools: an architecture dump
//! (`dwarfdump -u`), an archive extractor (`unzip`) and the address
//! resolver itself (`atos`). Their locations and the per-invocation
//! timeout live in a [`ToolConfig`] supplied by the embedding application.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Locations of the external tools and the timeout applied to each
/// invocation.
#[derive(Clone, Debug)]
pub struct ToolConfig {
    /// The architecture-dump tool, invoked as `dwarfdump -u <path>`.
    pub dwarfdump: PathBuf,
    /// The address resolver, invoked once per image batch.
    pub atos: PathBuf,
    /// The archive extractor, invoked as `unzip -o <zip> -d <dest>`.
    pub unzip: PathBuf,
    /// Upper bound on the runtime of a single tool invocation.
    pub timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            dwarfdump: PathBuf::from("/usr/bin/dwarfdump"),
            atos: PathBuf::from("/usr/bin/atos"),
            unzip: PathBuf::from("/usr/bin/unzip"),
            timeout: Duration::from_secs(30),
        }
    }
}

/// An error returned when validating a [`ToolConfig`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolConfigError {
    /// A configured tool does not exist on disk.
    ///
    /// Surfaced at configuration time so that a missing installation is not
    /// mistaken for a failure to resolve a particular report.
    #[error("required external tool not found: {}", .0.display())]
    ToolNotFound(PathBuf),
}

impl ToolConfig {
    /// Checks that every configured tool exists.
    ///
    /// Callers are expected to run this once at startup, before the first
    /// symbolication request.
    pub fn verify(&self) -> Result<(), ToolConfigError> {
        for tool in [&self.dwarfdump, &self.atos, &self.unzip] {
            if !tool.is_file() {
                return Err(ToolConfigError::ToolNotFound(tool.clone()));
            }
        }
        Ok(())
    }
}

/// Captured result of a finished tool invocation.
#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
}

/// Runs an external tool to completion, capturing its standard output.
///
/// The child is killed and `ErrorKind::TimedOut` returned if it does not
/// exit within `timeout`.
pub(crate) fn run_tool<I, S>(program: &Path, args: I, timeout: Duration) -> io::Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    // Drain stdout on a separate thread so a chatty child cannot fill the
    // pipe and stall before we observe its exit.
    let mut stdout = child.stdout.take().ok_or_else(|| {
        io::Error::new(io::ErrorKind::BrokenPipe, "child stdout not captured")
    })?;
    let reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        io::Read::read_to_end(&mut stdout, &mut buf).map(|_| buf)
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} did not exit within {:?}", program.display(), timeout),
            ));
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let stdout = reader
        .join()
        .map_err(|_| io::Error::other("stdout reader thread panicked"))??;

    Ok(ToolOutput { status, stdout })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_paths() {
        let config = ToolConfig::default();
        assert!(config.dwarfdump.is_absolute());
        assert!(config.atos.is_absolute());
        assert!(config.unzip.is_absolute());
    }

    #[test]
    fn test_verify_reports_missing_tool() {
        let config = ToolConfig {
            dwarfdump: PathBuf::from("/nonexistent/dwarfdump"),
            ..ToolConfig::default()
        };

        let err = config.verify().unwrap_err();
        assert!(matches!(err, ToolConfigError::ToolNotFound(path) if path.ends_with("dwarfdump")));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_tool_captures_stdout() {
        let output = run_tool(
            Path::new("/bin/sh"),
            ["-c", "echo hello"],
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(output.status.success());
        assert_eq!(output.stdout, b"hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_tool_times_out() {
        let err = run_tool(
            Path::new("/bin/sh"),
            ["-c", "sleep 5"],
            Duration::from_millis(100),
        )
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
