//! Bounded "last N" reads used to answer history requests.
//!
//! Local sources read the last N bytes of the file; remote sources run
//! `tail -n N` over ssh. Either way the lines come back newest first.

use logharvest_core::config::SshConfig;
use logharvest_core::{split_lines, Encoding, SourceError};
use std::io::SeekFrom;
use std::path::Path;
use std::process::Stdio;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;

/// Split a history window into lines, most recent first
pub fn newest_first(bytes: &[u8], encoding: Encoding) -> Vec<String> {
    split_lines(bytes)
        .into_iter()
        .rev()
        .map(|line| encoding.decode(line))
        .collect()
}

/// Read at most the last `length` bytes of a local file.
///
/// The window is clamped to the start of the file. A partial first line
/// inside the window is kept.
pub async fn read_local(
    label: &str,
    path: &Path,
    length: u64,
    encoding: Encoding,
) -> Result<Vec<String>, SourceError> {
    let read_error = |e: std::io::Error| SourceError::Read {
        label: label.to_string(),
        message: format!("{}: {}", path.display(), e),
    };

    let mut file = File::open(path).await.map_err(read_error)?;
    let size = file.metadata().await.map_err(read_error)?.len();
    let start = size.saturating_sub(length);
    file.seek(SeekFrom::Start(start)).await.map_err(read_error)?;

    let mut buf = Vec::with_capacity((size - start) as usize);
    file.take(length).read_to_end(&mut buf).await.map_err(read_error)?;

    Ok(newest_first(&buf, encoding))
}

/// Run `tail -n <lines>` on a remote host and collect its output
pub async fn read_remote(
    label: &str,
    ssh: &SshConfig,
    host: &str,
    path: &str,
    lines: u64,
    encoding: Encoding,
) -> Result<Vec<String>, SourceError> {
    let command_error = |message: String| SourceError::RemoteCommand {
        label: label.to_string(),
        message,
    };

    let output = Command::new(&ssh.program)
        .args(ssh.cli_options())
        .arg(host)
        .arg(format!("tail -n {} {}", lines, shell_quote(path)))
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| command_error(format!("Failed to execute {}: {}", ssh.program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(command_error(format!(
            "{} on {} ({})",
            output.status,
            host,
            stderr.trim()
        )));
    }

    Ok(newest_first(&output.stdout, encoding))
}

/// Quote a path for the remote shell
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Runs the "remote" command through a local shell: `sh -c <command>`
    fn local_shell() -> SshConfig {
        SshConfig {
            program: "sh".to_string(),
            batch_mode: false,
            connect_timeout_secs: 0,
        }
    }

    #[test]
    fn test_newest_first() {
        assert_eq!(newest_first(b"a\nb\nc\n", Encoding::Utf8), vec!["c", "b", "a"]);
        assert!(newest_first(b"", Encoding::Utf8).is_empty());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/var/log/app.log"), "'/var/log/app.log'");
        assert_eq!(shell_quote("it's.log"), r"'it'\''s.log'");
    }

    #[tokio::test]
    async fn test_small_file_returns_every_line_reversed() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a\nb\nc\n").unwrap();
        file.flush().unwrap();

        let lines = read_local("app", file.path(), 100_000, Encoding::Utf8)
            .await
            .unwrap();
        assert_eq!(lines, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_large_file_returns_only_the_window() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..100 {
            writeln!(file, "line-{:03}", i).unwrap(); // 9 bytes per line
        }
        file.flush().unwrap();

        // Exactly the last three lines
        let lines = read_local("app", file.path(), 27, Encoding::Utf8).await.unwrap();
        assert_eq!(lines, vec!["line-099", "line-098", "line-097"]);

        // A window cutting into a line keeps only the part inside it
        let lines = read_local("app", file.path(), 24, Encoding::Utf8).await.unwrap();
        assert_eq!(lines, vec!["line-099", "line-098", "e-097"]);
    }

    #[tokio::test]
    async fn test_empty_file_is_not_an_error() {
        let file = NamedTempFile::new().unwrap();
        let lines = read_local("app", file.path(), 100, Encoding::Utf8).await.unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_local("app", &dir.path().join("gone.log"), 100, Encoding::Utf8)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Read { ref label, .. } if label == "app"));
    }

    #[tokio::test]
    async fn test_remote_tail_through_shell() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "one\ntwo\nthree\nfour\n").unwrap();
        file.flush().unwrap();
        let path = file.path().to_string_lossy().to_string();

        let lines = read_remote("db", &local_shell(), "-c", &path, 2, Encoding::Utf8)
            .await
            .unwrap();
        assert_eq!(lines, vec!["four", "three"]);
    }

    #[tokio::test]
    async fn test_remote_failure_is_reported() {
        let err = read_remote(
            "db",
            &local_shell(),
            "-c",
            "/definitely/not/here.log",
            10,
            Encoding::Utf8,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::RemoteCommand { .. }));
    }
}
