use std::{
    convert::Infallible,
    ffi::OsStr,
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    str::FromStr,
};

use tokio::process::Command;

use crate::error::{M3uaError, M3uaResult};

/// An external executable located on the current machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    name: String,
    path: PathBuf,
}

impl ExternalTool {
    /// Locate `name` with `which`. Absolute or relative paths are checked directly.
    pub fn resolve(name: &str) -> M3uaResult<Self> {
        let path = which::which(name).map_err(|source| M3uaError::ToolUnavailable {
            name: name.to_string(),
            source,
        })?;
        tracing::debug!("Tool {name} resolved to {}", path.display());

        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    #[cfg(test)]
    pub(crate) fn unchecked(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: PathBuf::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File stem of the executable, used to pick the argument convention.
    pub fn flavor(&self) -> &str {
        self.path
            .file_stem()
            .or_else(|| Path::new(&self.name).file_stem())
            .and_then(OsStr::to_str)
            .unwrap_or(&self.name)
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.path);
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    /// Wait for `command` and turn a non-zero exit into [M3uaError::ToolFailed].
    pub async fn run(&self, mut command: Command) -> M3uaResult<()> {
        tracing::debug!("Running {:?}", command.as_std().get_program());
        let status = command.spawn()?.wait().await?;
        if !status.success() {
            return Err(M3uaError::ToolFailed {
                tool: self.name.clone(),
                status,
            });
        }
        Ok(())
    }
}

/// Which implementation to use for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// In-process implementation.
    Builtin,
    /// Name or path of an executable.
    External(String),
}

impl ToolChoice {
    pub fn external(name: impl Into<String>) -> Self {
        Self::External(name.into())
    }

    pub fn resolve(&self) -> M3uaResult<ResolvedTool> {
        Ok(match self {
            Self::Builtin => ResolvedTool::Builtin,
            Self::External(name) => ResolvedTool::External(ExternalTool::resolve(name)?),
        })
    }
}

impl FromStr for ToolChoice {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("builtin") {
            Self::Builtin
        } else {
            Self::External(s.to_string())
        })
    }
}

impl fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::External(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTool {
    Builtin,
    External(ExternalTool),
}

/// Tool selection for each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub download: ToolChoice,
    pub concat: ToolChoice,
    pub decrypt: ToolChoice,
    pub transcode: ToolChoice,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            download: ToolChoice::external("aria2c"),
            concat: ToolChoice::external("cat"),
            decrypt: ToolChoice::external("openssl"),
            transcode: ToolChoice::external("ffmpeg"),
        }
    }
}

impl ToolConfig {
    pub fn builtin() -> Self {
        Self {
            download: ToolChoice::Builtin,
            concat: ToolChoice::Builtin,
            decrypt: ToolChoice::Builtin,
            transcode: ToolChoice::Builtin,
        }
    }
}

/// Every tool a run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct ToolSet {
    pub download: ResolvedTool,
    /// `None` when there is a single segment to concatenate.
    pub concat: Option<ResolvedTool>,
    /// `None` when the stream is not encrypted.
    pub decrypt: Option<ResolvedTool>,
    pub transcode: ResolvedTool,
}

impl ToolSet {
    /// Check all tools required for a playlist of `segment_count` segments.
    ///
    /// Fails on the first unavailable tool, before anything is downloaded.
    pub fn resolve(config: &ToolConfig, segment_count: usize, encrypted: bool) -> M3uaResult<Self> {
        let download = config.download.resolve()?;
        let transcode = config.transcode.resolve()?;
        let concat = if segment_count > 1 {
            Some(config.concat.resolve()?)
        } else {
            None
        };
        let decrypt = if encrypted {
            Some(config.decrypt.resolve()?)
        } else {
            None
        };

        Ok(Self {
            download,
            concat,
            decrypt,
            transcode,
        })
    }
}
