//! Locating and launching the ffmpeg binary.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

#[cfg(windows)]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BINARY: &str = "ffmpeg";

/// Finds ffmpeg: an explicit override first, then every `PATH` entry.
pub fn find_ffmpeg(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return path.is_file().then(|| path.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(FFMPEG_BINARY))
        .find(|candidate| candidate.is_file())
}

/// A quiet ffmpeg command that is killed if its handle is dropped.
pub fn ffmpeg_command(ffmpeg_path: &Path) -> Command {
    let mut command = Command::new(ffmpeg_path);
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    command
}

/// Runs `ffmpeg -version`; true when the binary starts and exits cleanly.
pub async fn ffmpeg_runs(ffmpeg_path: &Path) -> bool {
    match Command::new(ffmpeg_path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(err) => {
            log::debug!("ffmpeg at {} failed to start: {}", ffmpeg_path.display(), err);
            false
        }
    }
}

/// Last few lines of ffmpeg's stderr, for error messages.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_override_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ffmpeg-not-here");
        assert!(find_ffmpeg(Some(&missing)).is_none());
    }

    #[test]
    fn existing_override_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("my-ffmpeg");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(find_ffmpeg(Some(&fake)), Some(fake));
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let tail = stderr_tail(b"one\n\ntwo\nthree\nfour\n");
        assert_eq!(tail, "two | three | four");
        assert_eq!(stderr_tail(b""), "");
    }
}
