//! Guarded external command execution

use async_trait::async_trait;

use super::{CollabError, CommandExecutor, CommandOutcome, CommandSpec, Guard};

/// Runs commands with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandExecutor;

impl SystemCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(
        &self,
        command: &CommandSpec,
        guard: &Guard,
    ) -> Result<CommandOutcome, CollabError> {
        if guard.holds() {
            log::debug!("Guard {:?} holds, not running `{}`", guard, command);
            return Ok(CommandOutcome::Skipped);
        }

        log::debug!("Running `{}`", command);
        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| CollabError::CommandSpawn(format!("`{}`: {}", command, e)))?;

        if !output.status.success() {
            return Err(CollabError::CommandFailed {
                command: command.to_string(),
                status: output
                    .status
                    .code()
                    .map(|code| format!("status {}", code))
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(CommandOutcome::Ran)
    }
}
