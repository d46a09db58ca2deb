//! Engine format listing.

use std::path::Path;

use tracing::info;

use crate::TranscodeError;

/// Run `<engine> -formats` and return everything it printed, stdout first.
pub async fn list_formats(engine_path: &Path) -> Result<String, TranscodeError> {
    let output = tokio::process::Command::new(engine_path)
        .args(["-hide_banner", "-formats"])
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| TranscodeError::Spawn(e.to_string()))?;

    info!(status = ?output.status.code(), "engine format listing finished");

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}
