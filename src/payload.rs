use crate::core::PayloadSource;
use crate::error::Error;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Where message bodies come from for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSelection {
    /// A generated status record, optionally carrying a command's output.
    Status { command: Option<String> },
    Stdin,
    File(PathBuf),
}

impl PayloadSelection {
    /// Opens the selected source. Stdin and files are read in full here.
    pub fn open(&self) -> Result<Box<dyn PayloadSource>, Error> {
        let source: Box<dyn PayloadSource> = match self {
            PayloadSelection::Status { command } => Box::new(StatusPayload::new(command.clone())),
            PayloadSelection::Stdin => Box::new(ReplayPayload::from_reader(
                std::io::stdin().lock(),
                "stdin",
            )?),
            PayloadSelection::File(path) => Box::new(ReplayPayload::from_file(path)?),
        };
        Ok(source)
    }
}

/// Replays bytes that were captured once, up front.
#[derive(Debug, Clone)]
pub struct ReplayPayload {
    bytes: Vec<u8>,
}

impl ReplayPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_reader<R: Read>(mut reader: R, source_name: &str) -> Result<Self, Error> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| Error::Read {
                source_name: source_name.to_string(),
                source,
            })?;
        tracing::debug!(bytes = bytes.len(), source_name, "captured payload");
        Ok(Self::new(bytes))
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let bytes = std::fs::read(path).map_err(|source| Error::Read {
            source_name: format!("file '{}'", path.display()),
            source,
        })?;
        tracing::debug!(bytes = bytes.len(), path = %path.display(), "captured payload");
        Ok(Self::new(bytes))
    }
}

impl PayloadSource for ReplayPayload {
    fn next_payload(&mut self) -> Result<Vec<u8>, Error> {
        Ok(self.bytes.clone())
    }
}

/// Why a status command produced no output. Recorded in the payload, never fatal.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unable to parse command line")]
    Parse,
    #[error("empty command line")]
    Empty,
    #[error("unable to exec: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("unable to exec: {0}")]
    Status(std::process::ExitStatus),
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LocalStatus {
    pub hostname: String,
    pub timestamp: String,
    pub command: String,
    pub exec_error: String,
    pub stdout: String,
    pub stderr: String,
    pub count: u64,
}

/// Builds a fresh status record on every call.
#[derive(Debug)]
pub struct StatusPayload {
    hostname: String,
    command: Option<String>,
    count: u64,
}

impl StatusPayload {
    pub fn new(command: Option<String>) -> Self {
        let hostname = match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => format!("unknown ({})", e),
        };
        Self::with_hostname(hostname, command)
    }

    pub fn with_hostname(hostname: String, command: Option<String>) -> Self {
        Self {
            hostname,
            command: command.filter(|c| !c.is_empty()),
            count: 0,
        }
    }

    pub fn status(&mut self) -> LocalStatus {
        let mut status = LocalStatus {
            hostname: self.hostname.clone(),
            timestamp: chrono::Local::now().to_rfc2822(),
            count: self.count,
            ..Default::default()
        };
        self.count += 1;

        if let Some(command) = &self.command {
            status.command = command.clone();
            match run_command(command) {
                Ok((stdout, stderr)) => {
                    status.stdout = stdout;
                    status.stderr = stderr;
                }
                Err((e, stdout, stderr)) => {
                    tracing::warn!(command = %command, error = %e, "status command failed");
                    status.exec_error = e.to_string();
                    status.stdout = stdout;
                    status.stderr = stderr;
                }
            }
        }

        status
    }
}

impl PayloadSource for StatusPayload {
    fn next_payload(&mut self) -> Result<Vec<u8>, Error> {
        let status = self.status();
        Ok(serde_json::to_vec_pretty(&status)?)
    }
}

type CommandFailure = (ExecError, String, String);

fn run_command(command_line: &str) -> Result<(String, String), CommandFailure> {
    let failed = |e: ExecError| (e, String::new(), String::new());

    let args = shlex::split(command_line).ok_or_else(|| failed(ExecError::Parse))?;
    let (program, args) = args.split_first().ok_or_else(|| failed(ExecError::Empty))?;

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| failed(ExecError::Spawn(e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err((ExecError::Status(output.status), stdout, stderr));
    }
    Ok((stdout, stderr))
}
