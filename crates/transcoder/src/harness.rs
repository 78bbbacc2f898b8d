use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::{Accelerator, Settings};
use crate::error::ExecutionError;
use crate::storage::CONTAINER_STORAGE_ROOT;

/// Captured output of one encoder run, in emission order
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub lines: Vec<String>,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Reassembles lines from a byte stream that arrives in arbitrary chunks.
/// A line is emitted only once its newline is observed; bytes after the
/// last newline stay in the carry-over buffer.
#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    carry: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the lines it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.carry.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.carry.drain(..=newline).collect();
            line.pop();
            // The pseudo-terminal emits CRLF line endings
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes after the final newline. The tool terminates its output with a
    /// newline, so anything left here at stream end is discarded.
    pub fn remainder(&self) -> &[u8] {
        &self.carry
    }
}

/// Assemble the full docker argument vector for one encoder run: container
/// lifecycle flags, the storage bind mount, the accelerator attachment, the
/// image, then the ffmpeg arguments.
fn docker_run_args(settings: &Settings, ffmpeg_args: &[String]) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        // The tool buffers differently without a pseudo-terminal
        "-t".to_string(),
        "--entrypoint".to_string(),
        "ffmpeg".to_string(),
        "-v".to_string(),
        format!(
            "{}:{}",
            settings.storage_path.display(),
            CONTAINER_STORAGE_ROOT
        ),
    ];

    match settings.accelerator {
        Accelerator::Nvenc => {
            args.push("--runtime".to_string());
            args.push("nvidia".to_string());
        }
        Accelerator::Qsv | Accelerator::Vaapi => {
            args.push("--device".to_string());
            args.push("/dev/dri:/dev/dri".to_string());
        }
    }

    args.push(settings.config.docker_image.clone());
    args.extend(ffmpeg_args.iter().cloned());
    args
}

/// Run the encoding tool inside its container and capture the combined
/// output as discrete lines. Blocks the caller until the process
/// terminates or the configured deadline expires.
pub async fn run_encoder(
    settings: &Settings,
    ffmpeg_args: &[String],
) -> Result<RunResult, ExecutionError> {
    let docker_args = docker_run_args(settings, ffmpeg_args);
    debug!(
        "launching encoder: {} {}",
        settings.config.docker_bin.display(),
        docker_args.join(" ")
    );

    let started_at = Utc::now();
    let mut child = Command::new(&settings.config.docker_bin)
        .args(&docker_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ExecutionError::Spawn)?;

    // With a pseudo-terminal attached the container's stdout and stderr
    // arrive combined on our stdout handle; the stderr handle carries only
    // the docker client's own diagnostics.
    let stdout = child.stdout.take().ok_or_else(|| {
        ExecutionError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "stdout was not captured",
        ))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        ExecutionError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "stderr was not captured",
        ))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut stdout = stdout;
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => lines.extend(assembler.push(&buf[..n])),
                Err(e) => return Err(e),
            }
        }
        if !assembler.remainder().is_empty() {
            debug!(
                "discarding {} bytes of trailing partial output",
                assembler.remainder().len()
            );
        }
        Ok(lines)
    });

    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            lines.push(line);
        }
        lines
    });

    // Wait for the process, optionally under a deadline
    let status = match settings.config.job_timeout_secs {
        Some(secs) => match timeout(Duration::from_secs(secs), child.wait()).await {
            Ok(result) => result.map_err(ExecutionError::Io)?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("failed to kill timed-out encoder: {}", e);
                }
                return Err(ExecutionError::Timeout(secs));
            }
        },
        None => child.wait().await.map_err(ExecutionError::Io)?,
    };

    let lines = stdout_task
        .await
        .map_err(|e| ExecutionError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(ExecutionError::Io)?;
    let stderr_lines = stderr_task
        .await
        .map_err(|e| ExecutionError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    let exit_code = status.code().unwrap_or(-1);
    let finished_at = Utc::now();

    if !status.success() {
        // Surface everything captured so the caller can diagnose; the
        // docker client's stderr is appended after the tool's output.
        let mut log = lines;
        log.extend(stderr_lines);
        return Err(ExecutionError::ExitFailure {
            code: exit_code,
            log,
        });
    }

    if !stderr_lines.is_empty() {
        debug!("docker client emitted {} stderr lines", stderr_lines.len());
    }

    Ok(RunResult {
        lines,
        exit_code,
        started_at,
        finished_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use std::path::PathBuf;

    fn settings_with(accelerator: Accelerator) -> Settings {
        Settings {
            config: ServiceConfig::default_config(),
            storage_path: PathBuf::from("/srv/media"),
            accelerator,
        }
    }

    #[test]
    fn assembler_joins_lines_split_across_chunks() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"frame=  100 fps= 25 ").is_empty());
        let lines = assembler.push(b"bitrate=1000k\nframe=");
        assert_eq!(lines, vec!["frame=  100 fps= 25 bitrate=1000k"]);
        assert_eq!(assembler.remainder(), b"frame=");
    }

    #[test]
    fn assembler_emits_multiple_lines_from_one_chunk() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"one\ntwo\nthree\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert!(assembler.remainder().is_empty());
    }

    #[test]
    fn assembler_strips_pty_crlf_endings() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"Stream mapping:\r\n  Stream #0:0 -> #0:0\r\n");
        assert_eq!(lines, vec!["Stream mapping:", "  Stream #0:0 -> #0:0"]);
    }

    #[test]
    fn assembler_keeps_trailing_partial_line_in_carry() {
        let mut assembler = LineAssembler::new();
        assembler.push(b"complete\nincomplete tail");
        assert_eq!(assembler.remainder(), b"incomplete tail");
    }

    #[test]
    fn assembler_handles_multibyte_sequences_split_across_chunks() {
        // Split the chunk inside the two-byte "é" sequence.
        let text = "    title           : Pokémon\n".as_bytes();
        let (left, right) = text.split_at(26);

        let mut assembler = LineAssembler::new();
        assert!(assembler.push(left).is_empty());
        let lines = assembler.push(right);
        assert_eq!(lines, vec!["    title           : Pokémon"]);
    }

    #[test]
    fn nvenc_attaches_the_nvidia_runtime() {
        let args = docker_run_args(&settings_with(Accelerator::Nvenc), &["-encoders".to_string()]);
        let runtime = args.iter().position(|a| a == "--runtime").expect("--runtime");
        assert_eq!(args[runtime + 1], "nvidia");
        assert!(!args.iter().any(|a| a == "--device"));
    }

    #[test]
    fn qsv_and_vaapi_pass_the_render_devices_through() {
        for accelerator in [Accelerator::Qsv, Accelerator::Vaapi] {
            let args = docker_run_args(&settings_with(accelerator), &[]);
            let device = args.iter().position(|a| a == "--device").expect("--device");
            assert_eq!(args[device + 1], "/dev/dri:/dev/dri");
            assert!(!args.iter().any(|a| a == "--runtime"));
        }
    }

    #[test]
    fn run_args_mount_storage_and_allocate_a_tty() {
        let ffmpeg_args = vec!["-i".to_string(), "/storage/in.mkv".to_string()];
        let args = docker_run_args(&settings_with(Accelerator::Nvenc), &ffmpeg_args);

        assert!(args.contains(&"-t".to_string()));
        assert!(args.contains(&"/srv/media:/storage".to_string()));

        // The image comes after every docker flag and before the tool args.
        let image = args
            .iter()
            .position(|a| a == "linuxserver/ffmpeg")
            .expect("image present");
        let first_tool_arg = args.iter().position(|a| a == "-i").expect("tool args");
        assert!(image < first_tool_arg);
        assert_eq!(args.last().map(String::as_str), Some("/storage/in.mkv"));
    }
}
