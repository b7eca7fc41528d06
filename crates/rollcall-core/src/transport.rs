//! Command-based notification transport.
//!
//! Runs an operator-supplied program once per message: the destination is
//! passed as the only argument and the message text is written to stdin.
//! Whatever chat or mail protocol sits behind it is the program's business.

use crate::notify::{Notifier, NotifyError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct CommandNotifier {
    program: PathBuf,
}

impl CommandNotifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let mut child = Command::new(&self.program)
            .arg(destination)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // A timed-out send drops this future; take the child down with it.
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            tracing::debug!(program = %self.program.display(), "notify command succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NotifyError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("notify.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_command_receives_destination_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let program = script(dir.path(), &format!("{{ echo \"$1\"; cat; }} > {}", out.display()));

        CommandNotifier::new(program)
            .send("chat-42", "Name: Bob\nTime: 10:00:00\nStatus: Entry")
            .await
            .unwrap();

        let written = std::fs::read_to_string(out).unwrap();
        assert_eq!(written, "chat-42\nName: Bob\nTime: 10:00:00\nStatus: Entry");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "cat > /dev/null; echo 'unauthorized' >&2; exit 3");
        let err = CommandNotifier::new(program).send("x", "y").await.unwrap_err();
        match err {
            NotifyError::Failed(msg) => assert!(msg.contains("unauthorized"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let err = CommandNotifier::new("/nonexistent/rollcall-notify")
            .send("x", "y")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Io(_)));
    }
}
