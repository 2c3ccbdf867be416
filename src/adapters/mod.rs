// Adapters layer: concrete implementations for external systems.

pub mod http {
    use crate::utils::error::{ChessboardError, Result};
    use reqwest::Client;

    /// Downloads a remote Checkmatefile.
    #[derive(Debug, Clone, Default)]
    pub struct HttpFetcher {
        client: Client,
    }

    impl HttpFetcher {
        pub fn new() -> Self {
            Self {
                client: Client::new(),
            }
        }

        pub async fn fetch(&self, url: &str) -> Result<String> {
            tracing::debug!("Fetching Checkmatefile from: {}", url);
            let response = self.client.get(url).send().await?;
            tracing::debug!("Response status: {}", response.status());

            if !response.status().is_success() {
                return Err(ChessboardError::DoesNotExist(format!(
                    "Could not fetch '{}': HTTP {}",
                    url,
                    response.status()
                )));
            }
            Ok(response.text().await?)
        }
    }

    /// Whether `location` names a remote document rather than a path.
    pub fn is_remote(location: &str) -> bool {
        location.starts_with("http://") || location.starts_with("https://")
    }
}

pub mod process {
    use crate::domain::ports::CommandRunner;
    use crate::utils::error::{ChessboardError, Result};
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::process::Command;

    #[derive(Debug, Clone, Copy, Default)]
    pub struct TokioCommandRunner;

    #[async_trait]
    impl CommandRunner for TokioCommandRunner {
        async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<String> {
            let cmd = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            tracing::info!("Running `{}` in {}", cmd, cwd.display());

            let output = Command::new(program)
                .args(args)
                .current_dir(cwd)
                .output()
                .await?;
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ChessboardError::CalledProcess {
                    returncode: output.status.code().unwrap_or(-1),
                    cmd,
                    output: Some(format!("{}{}", stdout, stderr)),
                });
            }
            Ok(stdout)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_run_failure_is_called_process() {
            let dir = std::env::temp_dir();
            let err = TokioCommandRunner
                .run("sh", &["-c", "echo boom; exit 3"], &dir)
                .await
                .unwrap_err();
            match err {
                ChessboardError::CalledProcess { returncode, cmd, output } => {
                    assert_eq!(returncode, 3);
                    assert_eq!(cmd, "sh -c echo boom; exit 3");
                    assert_eq!(output.as_deref(), Some("boom\n"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_run_returns_stdout() {
            let dir = std::env::temp_dir();
            let out = TokioCommandRunner.run("echo", &["hi"], &dir).await.unwrap();
            assert_eq!(out, "hi\n");
        }
    }
}
