// Raw input acquisition
//
// Obtains the `lastb -F` text the parser consumes: from the configured
// command (the normal path on a host), from a file, or from stdin.
// Acquisition runs before anything is parsed or written, so its failures
// never leave partial pipeline state behind.

use radar_common::{RadarError, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::IngestConfig;

/// Where the raw log text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Run the configured `lastb -F` command on the host.
    Command,
    /// Read a file (testing, or piping captured output).
    File(PathBuf),
    /// Read stdin.
    Stdin,
}

/// Read the raw log text from the given source.
pub async fn read_input(source: &InputSource, config: &IngestConfig) -> Result<String> {
    match source {
        InputSource::File(path) => {
            info!(path = %path.display(), "Reading login-failure data from file");
            Ok(tokio::fs::read_to_string(path).await?)
        }
        InputSource::Stdin => {
            info!("Reading login-failure data from stdin");
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            Ok(buf)
        }
        InputSource::Command => run_command(config).await,
    }
}

async fn run_command(config: &IngestConfig) -> Result<String> {
    let mut parts = config.lastb_command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| RadarError::Config("lastb command is empty".to_string()))?;

    info!(command = %config.lastb_command, "Running login-failure log command");

    let mut command = Command::new(program);
    command
        .args(parts)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let output = match timeout(
        Duration::from_secs(config.command_timeout_secs),
        command.output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
            return Err(RadarError::CommandNotFound(program.to_string()));
        }
        Ok(Err(e)) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(RadarError::PermissionDenied(config.lastb_command.clone()));
        }
        Ok(Err(e)) => return Err(RadarError::Io(e)),
        Err(_) => {
            return Err(RadarError::CommandTimeout {
                command: config.lastb_command.clone(),
                timeout_secs: config.command_timeout_secs,
            });
        }
    };

    // lastb exits non-zero when btmp is only partially readable but still
    // prints what it could; keep the stdout and surface the stderr.
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!(stderr = %stderr.trim(), "login-failure log command reported errors");
        }
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(command: &str, timeout_secs: u64) -> IngestConfig {
        IngestConfig {
            lastb_command: command.to_string(),
            command_timeout_secs: timeout_secs,
        }
    }

    #[tokio::test]
    async fn test_read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "some lastb output").unwrap();

        let source = InputSource::File(file.path().to_path_buf());
        let text = read_input(&source, &config("lastb -F", 30)).await.unwrap();

        assert_eq!(text, "some lastb output\n");
    }

    #[tokio::test]
    async fn test_read_from_missing_file() {
        let source = InputSource::File(PathBuf::from("/nonexistent/btmp.txt"));
        let result = read_input(&source, &config("lastb -F", 30)).await;

        assert!(matches!(result, Err(RadarError::Io(_))));
    }

    #[tokio::test]
    async fn test_command_output_captured() {
        let text = read_input(&InputSource::Command, &config("echo hello", 30))
            .await
            .unwrap();

        assert_eq!(text, "hello\n");
    }

    #[tokio::test]
    async fn test_command_not_found() {
        let result =
            read_input(&InputSource::Command, &config("definitely-not-a-binary-xyz", 30)).await;

        assert!(matches!(result, Err(RadarError::CommandNotFound(_))));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let result = read_input(&InputSource::Command, &config("sleep 5", 1)).await;

        assert!(matches!(
            result,
            Err(RadarError::CommandTimeout { timeout_secs: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let result = read_input(&InputSource::Command, &config("", 30)).await;

        assert!(matches!(result, Err(RadarError::Config(_))));
    }
}
