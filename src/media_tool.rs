//! Out-of-process video tooling (ffprobe / ffmpeg)
//!
//! Every invocation is bounded by a timeout; an expired child is killed and
//! reaped before the error is returned.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::ScanConfig;
use crate::error::ScanError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished subprocess
#[derive(Debug)]
pub struct ToolOutput {
    /// Exit status
    pub status: ExitStatus,
    /// Everything written to stdout
    pub stdout: String,
    /// Everything written to stderr
    pub stderr: String,
}

/// Run `command`, killing it if it outlives `timeout`
pub fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
    subject: &Path,
) -> Result<ToolOutput, ScanError> {
    let program = command.get_program().to_string_lossy().to_string();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            ScanError::subprocess_failed(
                Some(subject.to_path_buf()),
                format!("failed to start {program}: {e}"),
            )
        })?;

    // Drain both pipes while polling so a chatty child never blocks on write
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Readers are detached; a grandchild may still hold the pipes
                    return Err(ScanError::timeout(
                        Some(subject.to_path_buf()),
                        format!("{program} did not finish within {:?}", timeout),
                    ));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ScanError::from(e).with_path(subject));
            }
        }
    };

    let stdout = collect(stdout_reader);
    let stderr = collect(stderr_reader);

    Ok(ToolOutput {
        status,
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

fn ensure_success(output: ToolOutput, program: &str, subject: &Path) -> Result<ToolOutput, ScanError> {
    if output.status.success() {
        return Ok(output);
    }
    Err(ScanError::subprocess_failed(
        Some(subject.to_path_buf()),
        format!(
            "{program} exited with {:?}: {}",
            output.status.code(),
            output.stderr.trim()
        ),
    ))
}

/// Parse the first `WIDTHxHEIGHT` line printed by ffprobe
pub fn parse_dimensions(stdout: &str) -> Option<(u32, u32)> {
    stdout.lines().find_map(|line| {
        let (w, h) = line.trim().trim_end_matches('x').split_once('x')?;
        let w: u32 = w.trim().parse().ok()?;
        let h: u32 = h.trim().parse().ok()?;
        (w > 0 && h > 0).then_some((w, h))
    })
}

/// Handle on the external video toolchain
#[derive(Debug, Clone)]
pub struct MediaTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl MediaTool {
    /// Create a tool handle with explicit binaries and timeout
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    /// Create a tool handle from a scan config
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            config.ffmpeg_bin.clone(),
            config.ffprobe_bin.clone(),
            config.subprocess_timeout(),
        )
    }

    /// Width and height of the first video stream
    pub fn probe_dimensions(&self, video: &Path) -> Result<(u32, u32), ScanError> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height"])
            .args(["-of", "csv=s=x:p=0"])
            .arg(video);

        let output = run_with_timeout(command, self.timeout, video)?;
        let output = ensure_success(output, "ffprobe", video)?;
        parse_dimensions(&output.stdout).ok_or_else(|| {
            ScanError::probe_error(
                video.to_path_buf(),
                format!("unrecognised ffprobe output: {:?}", output.stdout.trim()),
            )
        })
    }

    /// Decode the first frame of `video` into the image file `output`
    pub fn extract_frame(&self, video: &Path, output: &Path) -> Result<(), ScanError> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-y", "-v", "error", "-i"])
            .arg(video)
            .args(["-frames:v", "1"])
            .arg(output);

        let result = run_with_timeout(command, self.timeout, video)?;
        ensure_success(result, "ffmpeg", video)?;

        if !output.is_file() {
            return Err(ScanError::subprocess_failed(
                Some(video.to_path_buf()),
                "ffmpeg reported success but wrote no frame",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanErrorKind;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("1280x720x\n"), Some((1280, 720)));
        assert_eq!(parse_dimensions("\n640x480\n320x240\n"), Some((640, 480)));
        assert_eq!(parse_dimensions("N/AxN/A"), None);
        assert_eq!(parse_dimensions("0x0"), None);
        assert_eq!(parse_dimensions(""), None);
    }

    #[test]
    fn test_missing_binary_is_subprocess_failure() {
        let tool = MediaTool::new(
            "/nonexistent/ffmpeg",
            "/nonexistent/ffprobe",
            Duration::from_secs(1),
        );
        let err = tool.probe_dimensions(Path::new("clip.mp4")).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::SubprocessFailed);
        assert_eq!(err.path, Some(PathBuf::from("clip.mp4")));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);

        let started = Instant::now();
        let err = run_with_timeout(command, Duration::from_millis(100), Path::new("slow.mp4"))
            .unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_large_stderr_does_not_stall_child() {
        let mut command = Command::new("sh");
        command.args(["-c", "head -c 200000 /dev/zero | tr '\\0' 'e' >&2; exit 0"]);

        let started = Instant::now();
        let output = run_with_timeout(command, Duration::from_secs(10), Path::new("noisy.mp4")).unwrap();
        assert!(output.status.success());
        assert_eq!(output.stderr.len(), 200_000);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo 'moov atom not found' >&2; exit 1"]);

        let output = run_with_timeout(command, Duration::from_secs(5), Path::new("bad.mp4")).unwrap();
        let err = ensure_success(output, "ffprobe", Path::new("bad.mp4")).unwrap_err();
        assert_eq!(err.kind, ScanErrorKind::SubprocessFailed);
        assert!(err.message.contains("moov atom not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_with_fake_ffprobe() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ffprobe");
        std::fs::write(&script, "#!/bin/sh\necho 3840x2160\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tool = MediaTool::new("ffmpeg", &script, Duration::from_secs(5));
        assert_eq!(tool.probe_dimensions(Path::new("clip.mp4")).unwrap(), (3840, 2160));
    }
}
