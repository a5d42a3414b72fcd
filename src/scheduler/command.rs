use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// Captured result of one scheduler CLI invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stderr if the command wrote any, otherwise the exit code.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("Exit code: {:?}", self.exit_code)
        } else {
            stderr.to_string()
        }
    }
}

/// Runs scheduler CLI programs (`bsub`, `squeue`, ...).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        tracing::debug!(program, args = ?args, "Running scheduler command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Replays canned outputs and records every call.
/// Single-quote `word` for a command line the scheduler hands to a shell.
///
/// Both `bsub` and `sbatch --wrap` store the job command as one string and
/// run it through `sh` on the execution host.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_runner_captures_stdout() {
        let out = SystemRunner
            .run("echo", &["hello".to_string()])
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn system_runner_reports_failure() {
        let out = SystemRunner
            .run("sh", &["-c".to_string(), "echo boom >&2; exit 3".to_string()])
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.failure_reason(), "boom");
    }

    #[test]
    fn shell_quote_leaves_plain_words() {
        assert_eq!(shell_quote("config.yaml"), "config.yaml");
        assert_eq!(shell_quote("/data/110106_FC70BUKAAXX"), "/data/110106_FC70BUKAAXX");
    }

    #[test]
    fn shell_quote_wraps_spaces_and_quotes() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[tokio::test]
    async fn shell_quote_round_trips_through_sh() {
        let words = ["plain", "with space", "it's", "$HOME", ""];
        let script = format!(
            "printf '%s|' {}",
            words.iter().map(|w| shell_quote(w)).collect::<Vec<_>>().join(" ")
        );
        let out = SystemRunner
            .run("sh", &["-c".to_string(), script])
            .await
            .unwrap();
        assert_eq!(out.stdout, "plain|with space|it's|$HOME||");
    }

    #[tokio::test]
    async fn system_runner_missing_program_is_io_error() {
        let result = SystemRunner.run("nonexistent_program_12345", &[]).await;
        assert!(result.is_err());
    }

    #[test]
    fn failure_reason_falls_back_to_exit_code() {
        let out = CommandOutput {
            exit_code: Some(255),
            ..Default::default()
        };
        assert_eq!(out.failure_reason(), "Exit code: Some(255)");
    }
}
