use anyhow::Context;

use super::shell::{sh_command, shell_escape};
use crate::context::RunContext;
use crate::transport::{RemoteHost, NON_INTERACTIVE_SUDO};

/// Printed in place of a file's contents when the file does not exist.
pub const MISSING_FILE_SENTINEL: &str = "__SETTLED_MISSING__";

/// Empty when connected as root, otherwise the non-interactive sudo marker.
pub async fn sudo_prefix(ctx: &RunContext, host: &dyn RemoteHost) -> anyhow::Result<&'static str> {
    let output = host
        .execute(ctx, "id -u")
        .await
        .context("check for root user")?;
    if output.trim() == "0" {
        return Ok("");
    }
    Ok(NON_INTERACTIVE_SUDO)
}

/// Contents of a remote regular file, or `None` when it does not exist.
pub async fn read_file_if_exists(
    ctx: &RunContext,
    host: &dyn RemoteHost,
    prefix: &str,
    path: &str,
) -> anyhow::Result<Option<String>> {
    let marker = format!("{MISSING_FILE_SENTINEL}:{path}");
    let escaped = shell_escape(path);
    let script = format!(
        "if [ -f {escaped} ]; then cat {escaped}; else printf '%s' {}; fi",
        shell_escape(&marker)
    );
    let output = host
        .execute(ctx, &sh_command(prefix, &script))
        .await
        .with_context(|| format!("read file {path:?}"))?;
    if output.trim() == marker {
        return Ok(None);
    }
    Ok(Some(output))
}
