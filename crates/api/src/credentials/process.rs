//! `credential_process`: an external command printing credentials as JSON.

use std::process::Stdio;

use tokio::process::Command;

use super::{Credentials, ProviderDocument};
use crate::ApiError;

pub(super) async fn run(command: &str) -> Result<Credentials, ApiError> {
    let output = shell(command)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ApiError::Credentials(format!("credential_process could not be started: {e}")))?;
    if !output.status.success() {
        return Err(ApiError::Credentials(format!(
            "credential_process exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let stdout = String::from_utf8(output.stdout)
        .map_err(|_| ApiError::Credentials("credential_process printed non-UTF-8 output".into()))?;
    ProviderDocument::parse("credential_process", &stdout)
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(command);
    shell
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(command);
    shell
}
