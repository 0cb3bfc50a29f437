//! Client for the external video extractor.
//!
//! The service never understands TikTok pages itself; it asks `yt-dlp` for
//! metadata and, when downloading, lets it write the media file. The
//! [`Extractor`] trait is the seam the download manager depends on so the
//! HTTP layer can be exercised without a network.

use serde::Deserialize;
use std::{
    io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use thiserror::Error;
use tracing::{debug, error};

/// Subset of yt-dlp's `--dump-single-json` payload the service reads. Every
/// field is optional because extractors omit whatever the platform hides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    /// Extension of the written file, known only once the download finished.
    #[serde(default)]
    pub ext: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    /// The extractor ran and rejected the request. Carries its own message.
    #[error("{0}")]
    Failed(String),
    #[error("unreadable extractor output: {0}")]
    InvalidOutput(String),
}

pub trait Extractor: Send + Sync {
    /// Reads metadata without writing anything to disk.
    fn extract_info(&self, url: &str) -> Result<ExtractedInfo, ExtractorError>;

    /// Downloads the media to `output_template`, where `%(ext)s` is replaced by
    /// the extension the extractor settles on.
    fn download(
        &self,
        url: &str,
        output_template: &Path,
        headers: &[(&str, &str)],
    ) -> Result<ExtractedInfo, ExtractorError>;
}

/// Drives the `yt-dlp` executable as a child process.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs `<program> --version` so a missing install shows up at startup
    /// rather than on the first request.
    pub fn ensure_available(&self) -> Result<(), ExtractorError> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| ExtractorError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        if !status.success() {
            return Err(ExtractorError::Failed(format!(
                "{} is installed but returned {}",
                self.program.display(),
                status
            )));
        }
        Ok(())
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--dump-single-json")
            .arg("--no-warnings")
            .arg("--no-progress")
            .stdin(Stdio::null());
        command
    }

    fn run(&self, mut command: Command) -> Result<ExtractedInfo, ExtractorError> {
        debug!(?command, "invoking extractor");
        let output = command.output().map_err(|source| ExtractorError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                stderr
            };
            error!(%message, "extractor failed");
            return Err(ExtractorError::Failed(message));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|err| ExtractorError::InvalidOutput(err.to_string()))
    }
}

impl Extractor for YtDlp {
    fn extract_info(&self, url: &str) -> Result<ExtractedInfo, ExtractorError> {
        let mut command = self.base_command();
        command.arg("--skip-download").arg("--").arg(url);
        self.run(command)
    }

    fn download(
        &self,
        url: &str,
        output_template: &Path,
        headers: &[(&str, &str)],
    ) -> Result<ExtractedInfo, ExtractorError> {
        let mut command = self.base_command();
        command
            .arg("--no-simulate")
            .arg("--format")
            .arg("best")
            .arg("--output")
            .arg(output_template);
        for (name, value) in headers {
            command.arg("--add-header").arg(format!("{name}:{value}"));
        }
        command.arg("--").arg(url);
        self.run(command)
    }
}
