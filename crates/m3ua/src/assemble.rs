mod concat;
mod decrypt;
mod transcode;

pub use decrypt::DecryptParams;

use std::path::{Path, PathBuf};

use crate::{
    error::{AssemblyStage, M3uaError, M3uaResult},
    tool::{ResolvedTool, ToolSet},
    util::path::{intermediate_path, M3uaPathExt},
};

/// Turns downloaded segments into the final media file.
///
/// ```text
/// segments ──concat──► <stem>_en.ts ──decrypt──► <stem>.ts ──transcode──► output
///                      (<stem>.ts if clear)      (skipped if clear)
/// ```
///
/// A single segment skips concatenation and is used as the stream directly.
/// The final file only appears at `output` once the transcode succeeded.
#[derive(Debug, Clone)]
pub struct MediaAssembler {
    concat: ResolvedTool,
    decrypt: ResolvedTool,
    transcode: ResolvedTool,
    clean_up: bool,
}

impl MediaAssembler {
    pub fn new(concat: ResolvedTool, decrypt: ResolvedTool, transcode: ResolvedTool) -> Self {
        Self {
            concat,
            decrypt,
            transcode,
            clean_up: false,
        }
    }

    /// Stages a run does not need fall back to the builtin implementation.
    pub fn from_tools(tools: &ToolSet) -> Self {
        Self::new(
            tools.concat.clone().unwrap_or(ResolvedTool::Builtin),
            tools.decrypt.clone().unwrap_or(ResolvedTool::Builtin),
            tools.transcode.clone(),
        )
    }

    /// Remove the intermediate streams after a successful run.
    pub fn with_clean_up(mut self, clean_up: bool) -> Self {
        self.clean_up = clean_up;
        self
    }

    /// Assemble `files`, in the given order, into `output`.
    pub async fn assemble(
        &self,
        files: &[PathBuf],
        output: &Path,
        decryption: Option<&DecryptParams>,
    ) -> M3uaResult<PathBuf> {
        let Some(first) = files.first() else {
            return Err(M3uaError::assembly(
                AssemblyStage::Concatenate,
                M3uaError::MissingSegment(0),
            ));
        };
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut intermediates = Vec::new();

        let stream = if files.len() == 1 {
            tracing::debug!("Single segment, skipping concatenation.");
            first.clone()
        } else {
            let suffix = decryption.is_some().then_some("en");
            let concatenated = distinct(intermediate_path(output, suffix), output);
            tracing::info!("Merging {} chunks...", files.len());
            concat::concat(&self.concat, files, &concatenated)
                .await
                .map_err(|e| M3uaError::assembly(AssemblyStage::Concatenate, e))?;
            tracing::debug!("File concatenated: {}", concatenated.display());
            intermediates.push(concatenated.clone());
            concatenated
        };

        let stream = match decryption {
            Some(params) => {
                let decrypted = distinct(intermediate_path(output, None), output);
                let decrypted = if decrypted == stream {
                    distinct(intermediate_path(output, Some("dec")), output)
                } else {
                    decrypted
                };
                tracing::info!("Decrypting with {}...", params.cipher());
                decrypt::decrypt(&self.decrypt, params, &stream, &decrypted)
                    .await
                    .map_err(|e| M3uaError::assembly(AssemblyStage::Decrypt, e))?;
                tracing::debug!("File decrypted: {}", decrypted.display());
                intermediates.push(decrypted.clone());
                decrypted
            }
            None => stream,
        };

        transcode::transcode(&self.transcode, &stream, output)
            .await
            .map_err(|e| M3uaError::assembly(AssemblyStage::Transcode, e))?;

        if self.clean_up {
            for path in intermediates {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::warn!("Failed to remove {}: {e}", path.display());
                }
            }
        }

        tracing::info!(
            "All finished. Please checkout your files at {}",
            output.display()
        );
        Ok(output.to_path_buf())
    }
}

/// Intermediate files must never be written at the final output path.
fn distinct(mut path: PathBuf, output: &Path) -> PathBuf {
    if path == output {
        path.add_tag("stream");
    }
    path
}
