use std::{ffi::OsString, path::Path, process::Stdio};

use super::SegmentDownloader;
use crate::{error::M3uaResult, tool::ExternalTool};

/// Download segments by spawning a download tool such as `aria2c`, `curl` or `wget`.
///
/// Arguments are passed as an argument vector, urls and paths never go
/// through a shell.
#[derive(Debug, Clone)]
pub struct ExternalDownloader {
    tool: ExternalTool,
    extra_args: Vec<String>,
}

impl ExternalDownloader {
    pub fn new(tool: ExternalTool) -> Self {
        Self {
            tool,
            extra_args: Vec::new(),
        }
    }

    /// Extra arguments inserted before the url.
    pub fn with_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn tool(&self) -> &ExternalTool {
        &self.tool
    }

    fn arguments(&self, url: &str, dest: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match self.tool.flavor() {
            "curl" => {
                args.extend(["-fsSL", "-o"].map(OsString::from));
                args.push(dest.into());
                args.extend(self.extra_args.iter().map(OsString::from));
                args.push(url.into());
            }
            "wget" => {
                args.extend(["-q", "-O"].map(OsString::from));
                args.push(dest.into());
                args.extend(self.extra_args.iter().map(OsString::from));
                args.push(url.into());
            }
            // aria2c and anything speaking its options
            _ => {
                let dir = dest.parent().unwrap_or_else(|| Path::new("."));
                let file_name = dest.file_name().unwrap_or_default();
                args.extend(
                    [
                        "--console-log-level=error",
                        "--download-result=hide",
                        "--show-console-readout=false",
                        "--allow-overwrite=true",
                        "--auto-file-renaming=false",
                        "--dir",
                    ]
                    .map(OsString::from),
                );
                args.push(dir.into());
                args.push("--out".into());
                args.push(file_name.into());
                args.extend(self.extra_args.iter().map(OsString::from));
                args.push(url.into());
            }
        }
        args
    }
}

impl SegmentDownloader for ExternalDownloader {
    async fn download(&self, url: &str, dest: &Path) -> M3uaResult<()> {
        let mut command = self.tool.command();
        command
            .args(self.arguments(url, dest))
            .stdout(Stdio::null());
        self.tool.run(command).await
    }
}
