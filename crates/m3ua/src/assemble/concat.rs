use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::{fs::File, io::AsyncWriteExt};

use crate::{error::M3uaResult, tool::ResolvedTool};

/// Write `inputs` back to back into `output`, in slice order.
pub(super) async fn concat(
    tool: &ResolvedTool,
    inputs: &[PathBuf],
    output: &Path,
) -> M3uaResult<()> {
    match tool {
        ResolvedTool::Builtin => {
            let mut target = File::create(output).await?;
            for input in inputs {
                let mut file = File::open(input).await?;
                tokio::io::copy(&mut file, &mut target).await?;
            }
            target.flush().await?;
        }
        ResolvedTool::External(tool) => {
            // `cat a b c > output`, with the redirection done by us instead of a shell
            let target = std::fs::File::create(output)?;
            let mut command = tool.command();
            command.args(inputs).stdout(Stdio::from(target));
            tool.run(command).await?;
        }
    }
    Ok(())
}
