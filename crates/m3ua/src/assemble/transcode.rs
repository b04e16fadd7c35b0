use std::path::Path;

use crate::{error::M3uaResult, tool::ResolvedTool, util::path::M3uaPathExt};

/// Remux `input` into `output` with stream copy.
///
/// The tool writes to `<stem>_part.<ext>` first, which is renamed to `output`
/// on success and removed on failure.
pub(super) async fn transcode(
    tool: &ResolvedTool,
    input: &Path,
    output: &Path,
) -> M3uaResult<()> {
    let mut part = output.to_path_buf();
    part.add_tag("part");

    let result = run(tool, input, &part).await;
    if let Err(e) = result {
        if let Err(e) = tokio::fs::remove_file(&part).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {e}", part.display());
            }
        }
        return Err(e);
    }

    tokio::fs::rename(&part, output).await?;
    Ok(())
}

async fn run(tool: &ResolvedTool, input: &Path, part: &Path) -> M3uaResult<()> {
    match tool {
        // keep the stream as it is
        ResolvedTool::Builtin => {
            tokio::fs::copy(input, part).await?;
        }
        ResolvedTool::External(tool) => {
            tracing::info!("Converting {} with {}...", input.display(), tool.name());
            let mut command = tool.command();
            command
                .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
                .arg(input)
                .args(["-codec", "copy"])
                .arg(part);
            tool.run(command).await?;
        }
    }
    Ok(())
}
