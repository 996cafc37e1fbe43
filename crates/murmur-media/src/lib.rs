//! Audio conversion for transcription input.
//!
//! Incoming voice and video files arrive in whatever container the chat
//! platform uses. Transcription wants 16 kHz mono PCM wav, so everything
//! funnels through [`AudioConverter::convert_to_wav`] before upload.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;

/// Concurrent ffmpeg processes allowed at once. Conversion is CPU-bound;
/// more than a few at a time just thrash the box.
const MAX_CONCURRENT_CONVERSIONS: usize = 3;

/// Niceness applied to each ffmpeg process so conversion never starves the
/// event loop.
const FFMPEG_NICENESS: &str = "10";

#[async_trait]
pub trait AudioConverter: Send + Sync {
    /// Converts `input` to a 16 kHz mono PCM wav in the work directory and
    /// returns the output path.
    async fn convert_to_wav(&self, input: &Path) -> Result<PathBuf>;

    /// Removes a working file, logging instead of failing if it is already
    /// gone.
    async fn remove(&self, path: &Path);
}

pub struct FfmpegConverter {
    work_dir: PathBuf,
    slots: Semaphore,
}

impl FfmpegConverter {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            slots: Semaphore::new(MAX_CONCURRENT_CONVERSIONS),
        }
    }

    /// Output path for `input`: the work directory plus the input's file
    /// name with `.wav` appended. Appending rather than replacing keeps
    /// distinct inputs distinct even when extensions collide.
    pub fn output_path(&self, input: &Path) -> Result<PathBuf> {
        let name = input
            .file_name()
            .ok_or_else(|| anyhow!("input path has no file name: {}", input.display()))?;
        let mut name = name.to_os_string();
        name.push(".wav");
        Ok(self.work_dir.join(name))
    }
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert_to_wav(&self, input: &Path) -> Result<PathBuf> {
        let output = self.output_path(input)?;
        let _slot = self
            .slots
            .acquire()
            .await
            .context("conversion slot closed")?;

        tracing::info!(
            input = %input.display(),
            output = %output.display(),
            "converting audio to wav"
        );
        let result = Command::new("nice")
            .arg("-n")
            .arg(FFMPEG_NICENESS)
            .arg("ffmpeg")
            .arg("-i")
            .arg(input)
            .args(["-f", "wav", "-acodec", "pcm_s16le", "-ac", "1", "-ar", "16000", "-y"])
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to spawn ffmpeg")?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr.lines().next_back().unwrap_or("no stderr output");
            return Err(anyhow!(
                "ffmpeg exited with {} for {}: {tail}",
                result.status,
                input.display()
            ));
        }

        tracing::info!(output = %output.display(), "audio conversion complete");
        Ok(output)
    }

    async fn remove(&self, path: &Path) {
        if let Err(error) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), %error, "failed to remove working file");
        }
    }
}
